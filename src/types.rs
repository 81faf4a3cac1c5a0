use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::artifact::Artifact;
use crate::error::{DalleError, Result};

/// Prepended to the prompt when the "as-is" option is set, asking the model
/// not to rewrite the prompt.
pub const AS_IS_PREFIX: &str = "I NEED to test how the tool works with extremely simple prompts. DO NOT add any detail, just use it AS-IS:";

/// Save directory used when the form leaves it blank.
pub const DEFAULT_SAVE_DIR: &str = "./saved_images";

/// Most images a single request may ask for.
pub const MAX_IMAGE_COUNT: u32 = 100;

/// Azure OpenAI API version sent as the `api-version` query parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiVersion {
    #[default]
    #[serde(rename = "2024-02-01")]
    V2024_02_01,
    #[serde(rename = "2024-02-15-preview")]
    V2024_02_15Preview,
}

impl ApiVersion {
    pub const ALL: [ApiVersion; 2] = [ApiVersion::V2024_02_01, ApiVersion::V2024_02_15Preview];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V2024_02_01 => "2024-02-01",
            ApiVersion::V2024_02_15Preview => "2024-02-15-preview",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

/// DALL-E 3 rendering style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Natural,
    #[default]
    Vivid,
}

impl Style {
    pub const ALL: [Style; 2] = [Style::Natural, Style::Vivid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Natural => "natural",
            Style::Vivid => "vivid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

/// DALL-E 3 quality tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    Hd,
}

impl Quality {
    pub const ALL: [Quality; 2] = [Quality::Standard, Quality::Hd];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Standard => "standard",
            Quality::Hd => "hd",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

/// Output dimensions supported by DALL-E 3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1792x1024")]
    Landscape,
    #[serde(rename = "1024x1792")]
    Portrait,
}

impl ImageSize {
    pub const ALL: [ImageSize; 3] = [ImageSize::Square, ImageSize::Landscape, ImageSize::Portrait];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Square => "1024x1024",
            ImageSize::Landscape => "1792x1024",
            ImageSize::Portrait => "1024x1792",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            ImageSize::Square => (1024, 1024),
            ImageSize::Landscape => (1792, 1024),
            ImageSize::Portrait => (1024, 1792),
        }
    }
}

/// Per-request options forwarded to the generation endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationOptions {
    pub api_version: ApiVersion,
    pub style: Style,
    pub quality: Quality,
    pub size: ImageSize,
}

/// Raw, unvalidated form values as supplied by a UI or a settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormInput {
    pub save_dir: String,
    pub prompt: String,
    pub as_is: bool,
    pub count: Option<String>,
    pub api_version: Option<String>,
    pub style: Option<String>,
    pub quality: Option<String>,
    pub size: Option<String>,
}

/// One "generate N images for this prompt" action. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    save_dir: PathBuf,
    prompt: String,
    as_is: bool,
    count: u32,
    options: GenerationOptions,
}

impl GenerationRequest {
    /// Create a request for `count` images, with default options and save directory.
    pub fn new(prompt: impl Into<String>, count: u32) -> Result<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(DalleError::InvalidRequest("prompt is empty".into()));
        }
        if count == 0 {
            return Err(DalleError::InvalidRequest(
                "count must be a positive integer".into(),
            ));
        }
        if count > MAX_IMAGE_COUNT {
            return Err(DalleError::InvalidRequest(format!(
                "count must be at most {}, got {}",
                MAX_IMAGE_COUNT, count
            )));
        }
        Ok(Self {
            save_dir: PathBuf::from(DEFAULT_SAVE_DIR),
            prompt,
            as_is: false,
            count,
            options: GenerationOptions::default(),
        })
    }

    /// Normalise raw form values. Unknown option values fall back to their
    /// defaults; a missing or non-numeric count becomes 1.
    pub fn from_form(form: &FormInput) -> Result<Self> {
        let count = parse_count(form.count.as_deref())?;
        let options = GenerationOptions {
            api_version: form
                .api_version
                .as_deref()
                .and_then(ApiVersion::parse)
                .unwrap_or_default(),
            style: form.style.as_deref().and_then(Style::parse).unwrap_or_default(),
            quality: form
                .quality
                .as_deref()
                .and_then(Quality::parse)
                .unwrap_or_default(),
            size: form.size.as_deref().and_then(ImageSize::parse).unwrap_or_default(),
        };

        let mut request = Self::new(form.prompt.clone(), count)?
            .with_as_is(form.as_is)
            .with_options(options);
        if !form.save_dir.trim().is_empty() {
            request = request.with_save_dir(form.save_dir.trim());
        }
        Ok(request)
    }

    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = dir.into();
        self
    }

    pub fn with_as_is(mut self, as_is: bool) -> Self {
        self.as_is = as_is;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn save_dir(&self) -> &std::path::Path {
        &self.save_dir
    }

    /// The prompt as typed, used for file names and metadata.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn as_is(&self) -> bool {
        self.as_is
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// The prompt actually sent to the provider.
    pub fn full_prompt(&self) -> String {
        if self.as_is {
            format!("{} {}", AS_IS_PREFIX, self.prompt)
        } else {
            self.prompt.clone()
        }
    }
}

fn parse_count(raw: Option<&str>) -> Result<u32> {
    let parsed = raw
        .map(str::trim)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|n| n.is_finite());
    match parsed {
        None => Ok(1),
        Some(n) if n.trunc() >= 1.0 => Ok(n.trunc().min(u32::MAX as f64) as u32),
        Some(_) => Err(DalleError::InvalidRequest(
            "count must be a positive integer".into(),
        )),
    }
}

/// Opaque identifier of one generation unit.
///
/// Derived from the batch's microsecond timestamp plus the unit index, and
/// used as the file name suffix of the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub i64);

impl UnitId {
    /// File name suffix for this unit's artifact, e.g. `-1718000000000000.png`.
    pub fn file_suffix(&self) -> String {
        format!("-{}.png", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal outcome of one unit. Produced exactly once per unit.
#[derive(Debug, Clone)]
pub enum GenerationResult {
    Success(Artifact),
    Failure {
        reason: String,
        retryable: bool,
        retry_after: Option<u64>,
    },
}

impl GenerationResult {
    pub(crate) fn from_error(err: &DalleError) -> Self {
        GenerationResult::Failure {
            reason: err.to_string(),
            retryable: err.is_retryable(),
            retry_after: err.retry_after(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success(_))
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            GenerationResult::Success(artifact) => Some(artifact),
            GenerationResult::Failure { .. } => None,
        }
    }
}

/// A unit's identifier paired with its outcome.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit_id: UnitId,
    pub result: GenerationResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(prompt: &str) -> FormInput {
        FormInput {
            prompt: prompt.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_option_strings_round_trip() {
        for v in ApiVersion::ALL {
            assert_eq!(ApiVersion::parse(v.as_str()), Some(v));
        }
        for s in ImageSize::ALL {
            assert_eq!(ImageSize::parse(s.as_str()), Some(s));
        }
        assert_eq!(Style::parse("natural"), Some(Style::Natural));
        assert_eq!(Quality::parse("hd"), Some(Quality::Hd));
        assert_eq!(Style::parse("Natural"), None);
    }

    #[test]
    fn test_options_serialize_as_wire_strings() {
        let json = serde_json::json!({
            "size": ImageSize::Portrait,
            "quality": Quality::Hd,
            "style": Style::Natural,
            "version": ApiVersion::V2024_02_15Preview,
        });
        assert_eq!(json["size"], "1024x1792");
        assert_eq!(json["quality"], "hd");
        assert_eq!(json["style"], "natural");
        assert_eq!(json["version"], "2024-02-15-preview");
    }

    #[test]
    fn test_form_defaults_for_unknown_options() {
        let mut input = form("a cat");
        input.api_version = Some("2099-01-01".into());
        input.style = Some("cartoon".into());
        input.quality = Some("ultra".into());
        input.size = Some("10x10".into());

        let request = GenerationRequest::from_form(&input).unwrap();
        assert_eq!(request.options(), &GenerationOptions::default());
        assert_eq!(request.options().api_version.as_str(), "2024-02-01");
        assert_eq!(request.options().style, Style::Vivid);
        assert_eq!(request.options().quality, Quality::Standard);
        assert_eq!(request.options().size, ImageSize::Square);
        assert_eq!(request.save_dir(), std::path::Path::new(DEFAULT_SAVE_DIR));
    }

    #[test]
    fn test_form_keeps_valid_options() {
        let mut input = form("a cat");
        input.save_dir = "out".into();
        input.style = Some("natural".into());
        input.quality = Some("hd".into());
        input.size = Some("1792x1024".into());

        let request = GenerationRequest::from_form(&input).unwrap();
        assert_eq!(request.options().style, Style::Natural);
        assert_eq!(request.options().quality, Quality::Hd);
        assert_eq!(request.options().size, ImageSize::Landscape);
        assert_eq!(request.save_dir(), std::path::Path::new("out"));
    }

    #[test]
    fn test_count_parsing() {
        assert_eq!(parse_count(None).unwrap(), 1);
        assert_eq!(parse_count(Some("abc")).unwrap(), 1);
        assert_eq!(parse_count(Some("")).unwrap(), 1);
        assert_eq!(parse_count(Some("3")).unwrap(), 3);
        assert_eq!(parse_count(Some(" 4.0 ")).unwrap(), 4);
        assert_eq!(parse_count(Some("2.9")).unwrap(), 2);
        assert!(parse_count(Some("0")).is_err());
        assert!(parse_count(Some("-2")).is_err());
    }

    #[test]
    fn test_count_above_cap_rejected() {
        assert_eq!(GenerationRequest::new("a cat", MAX_IMAGE_COUNT).unwrap().count(), MAX_IMAGE_COUNT);
        assert!(matches!(
            GenerationRequest::new("a cat", MAX_IMAGE_COUNT + 1),
            Err(DalleError::InvalidRequest(_))
        ));

        let mut huge = form("a cat");
        huge.count = Some("1e9".into());
        match GenerationRequest::from_form(&huge) {
            Err(DalleError::InvalidRequest(msg)) => assert!(msg.contains("at most")),
            other => panic!("expected InvalidRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_prompt_rejected() {
        assert!(matches!(
            GenerationRequest::from_form(&form("   ")),
            Err(DalleError::InvalidRequest(_))
        ));
        assert!(GenerationRequest::new("a cat", 0).is_err());
    }

    #[test]
    fn test_full_prompt_with_as_is_prefix() {
        let plain = GenerationRequest::new("a cat", 1).unwrap();
        assert_eq!(plain.full_prompt(), "a cat");

        let as_is = plain.with_as_is(true);
        assert_eq!(as_is.full_prompt(), format!("{} a cat", AS_IS_PREFIX));
        assert_eq!(as_is.prompt(), "a cat");
    }

    #[test]
    fn test_unit_id_suffix() {
        assert_eq!(UnitId(1718000000000001).file_suffix(), "-1718000000000001.png");
        assert_eq!(UnitId(42).to_string(), "42");
    }
}
