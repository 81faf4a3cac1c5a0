use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use crate::error::{DalleError, Result};
use crate::types::FormInput;

/// Connection and throttling settings for a generation session.
///
/// Use [`ClientConfig::builder()`] for construction; [`ClientConfig::validate()`]
/// is run by the client and generator constructors.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Azure OpenAI resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    /// Value of the `api-key` header.
    pub key: String,
    /// DALL-E deployment name.
    pub deployment: String,
    /// Generation requests allowed per `period`.
    pub rpm: u32,
    /// Rolling window for `rpm` (default: 60s).
    pub period: Duration,
    /// Added to every rate-limit wait to absorb clock skew (default: 1s).
    pub extra_delay: Duration,
    /// Per-request HTTP timeout (default: 120s).
    pub request_timeout: Duration,
    /// Save each delivered image to its destination path (default: false).
    pub auto_save: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            key: String::new(),
            deployment: "Dalle3".to_string(),
            rpm: 3,
            period: Duration::from_secs(60),
            extra_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(120),
            auto_save: false,
        }
    }
}

impl ClientConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Reject configurations that could never make a successful call.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(DalleError::InvalidConfig("endpoint is empty".into()));
        }
        if self.key.is_empty() {
            return Err(DalleError::InvalidConfig("api key is empty".into()));
        }
        if self.deployment.trim().is_empty() {
            return Err(DalleError::InvalidConfig("deployment is empty".into()));
        }
        if self.rpm == 0 {
            return Err(DalleError::InvalidConfig(
                "requests per minute must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.config.key = key.into();
        self
    }

    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.config.deployment = deployment.into();
        self
    }

    /// Set the number of generation requests allowed per period.
    pub fn with_rpm(mut self, rpm: u32) -> Self {
        self.config.rpm = rpm;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.config.period = period;
        self
    }

    pub fn with_extra_delay(mut self, delay: Duration) -> Self {
        self.config.extra_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_auto_save(mut self, enabled: bool) -> Self {
        self.config.auto_save = enabled;
        self
    }

    /// Build the final [`ClientConfig`].
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Read-only view of a `settings.json` file.
///
/// Every field is optional. Numbers may be given as JSON numbers or numeric
/// strings, and `as_is` as a bool or the string `"true"`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub key: Option<String>,
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub rpm: Option<Value>,
    pub save_dir: Option<String>,
    pub as_is: Option<Value>,
    pub num: Option<Value>,
    pub api_version: Option<String>,
    pub style: Option<String>,
    pub quality: Option<String>,
    pub size: Option<String>,
}

impl Settings {
    /// Load settings from `path`.
    ///
    /// A missing file yields defaults. A file that is not valid JSON is
    /// logged and also yields defaults; only read errors are returned.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        tracing::info!("Found setting file");
        let text = std::fs::read_to_string(path)?;
        match serde_json::from_str(&text) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                tracing::error!("Failed to parse setting file: {}", e);
                Ok(Self::default())
            }
        }
    }

    /// Build and validate a [`ClientConfig`] from these settings.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let defaults = ClientConfig::default();
        let rpm = match self.rpm.as_ref() {
            None => defaults.rpm,
            Some(v) => number(v)
                .filter(|n| *n >= 1.0)
                .map(|n| n.trunc().min(u32::MAX as f64) as u32)
                .ok_or_else(|| DalleError::InvalidConfig(format!("invalid rpm: {}", v)))?,
        };

        let config = ClientConfig::builder()
            .with_endpoint(self.endpoint.clone().unwrap_or_default())
            .with_key(self.key.clone().unwrap_or_default())
            .with_deployment(self.deployment.clone().unwrap_or(defaults.deployment))
            .with_rpm(rpm)
            .build();
        config.validate()?;
        Ok(config)
    }

    /// Form values pre-filled from these settings. The prompt is left empty.
    pub fn form(&self) -> FormInput {
        FormInput {
            save_dir: self.save_dir.clone().unwrap_or_default(),
            prompt: String::new(),
            as_is: self.as_is.as_ref().map(truthy).unwrap_or(false),
            count: self.num.as_ref().map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            api_version: self.api_version.clone(),
            style: self.style.clone(),
            quality: self.quality.clone(),
            size: self.size.clone(),
        }
    }
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}
