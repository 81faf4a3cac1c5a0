use image::DynamicImage;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::{DalleError, Result};
use crate::types::GenerationOptions;
use crate::ImageProvider;

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

fn retry_after_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"retry after (\d+) second").expect("valid retry-after pattern"))
}

/// Unclassified answer from the generation endpoint.
///
/// Status and reason are kept as-is; the body is the parsed JSON, or the raw
/// text as a JSON string when it is not JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub reason: String,
    pub body: Value,
}

impl RawResponse {
    /// The provider's error message, falling back to whatever the body holds.
    pub fn error_message(&self) -> String {
        if let Some(msg) = self.body.pointer("/error/message").and_then(|v| v.as_str()) {
            return msg.to_string();
        }
        match &self.body {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A finished generation job: the rewritten prompt and where to fetch the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub revised_prompt: String,
    pub url: String,
}

/// Classify a raw generation response.
///
/// - 200: `data[0].revised_prompt` and `data[0].url` are required, otherwise
///   [`DalleError::MalformedResponse`].
/// - 429: [`DalleError::RateLimited`], carrying the wait from a
///   `retry after N second(s)` message when present.
/// - anything else: [`DalleError::Provider`].
pub fn interpret_response(raw: &RawResponse) -> Result<Generation> {
    match raw.status {
        200 => {
            let entry = raw
                .body
                .pointer("/data/0")
                .ok_or_else(|| DalleError::MalformedResponse("response has no data[0]".into()))?;
            let field = |name: &str| {
                entry
                    .get(name)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        DalleError::MalformedResponse(format!("response missing data[0].{}", name))
                    })
            };
            Ok(Generation {
                revised_prompt: field("revised_prompt")?,
                url: field("url")?,
            })
        }
        429 => {
            let message = raw.error_message();
            Err(DalleError::RateLimited {
                reason: raw.reason.clone(),
                retry_after: extract_retry_after(&message),
                message,
            })
        }
        status => Err(DalleError::Provider {
            status,
            reason: raw.reason.clone(),
            message: raw.error_message(),
        }),
    }
}

/// Pull `N` out of "... retry after N second(s) ...".
pub fn extract_retry_after(message: &str) -> Option<u64> {
    retry_after_pattern()
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Decode fetched bytes into an image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(DalleError::MalformedImage("image data is empty".into()));
    }
    image::load_from_memory(bytes).map_err(|e| DalleError::MalformedImage(e.to_string()))
}

/// Async client for an Azure OpenAI DALL-E deployment.
///
/// Performs the two remote calls of a generation: submitting the job and
/// downloading the resulting image. It classifies failures but never
/// retries. The `api-key` header is only sent to the generation endpoint,
/// never to the image host.
///
/// # Example
/// ```no_run
/// use dalle_queue::{DalleClient, GenerationOptions, interpret_response};
///
/// # async fn example() -> dalle_queue::Result<()> {
/// let client = DalleClient::new("https://my-resource.openai.azure.com", "key", "Dalle3");
/// let raw = client.submit_generation("a lighthouse at dusk", &GenerationOptions::default()).await?;
/// let generation = interpret_response(&raw)?;
/// let image = client.fetch_image(&generation.url).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DalleClient {
    http: Client,
    endpoint: String,
    key: String,
    deployment: String,
    timeout: Duration,
}

impl fmt::Debug for DalleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DalleClient")
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .field("key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DalleClient {
    /// Create a client for the given resource endpoint, key and deployment.
    pub fn new(
        endpoint: impl Into<String>,
        key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            key: key.into(),
            deployment: deployment.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Create a client from a validated [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(&config.endpoint, &config.key, &config.deployment)
            .with_timeout(config.request_timeout))
    }

    /// Use a custom `reqwest::Client` (for connection pooling, proxies, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// URL of the image generation endpoint, without the query string.
    pub fn generation_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/images/generations",
            self.endpoint, self.deployment
        )
    }

    // ── Generation ──────────────────────────────────────────────────

    /// Submit a generation job.
    ///
    /// Only transport failures are errors here; any HTTP answer comes back as
    /// a [`RawResponse`] for [`interpret_response`].
    pub async fn submit_generation(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<RawResponse> {
        let body = json!({
            "prompt": prompt,
            "size": options.size,
            "quality": options.quality,
            "style": options.style,
        });

        tracing::info!(deployment = %self.deployment, "Sending dalle request");
        let resp = self
            .http
            .post(self.generation_url())
            .query(&[("api-version", options.api_version.as_str())])
            .header("api-key", &self.key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| DalleError::Connection {
                context: format!("Connection error when calling DALL-E at {}", self.endpoint),
                source: e,
            })?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| DalleError::Connection {
            context: "Failed to read DALL-E response".into(),
            source: e,
        })?;
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

        Ok(RawResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }

    // ── Image download ──────────────────────────────────────────────

    /// Download and decode a generated image.
    pub async fn fetch_image(&self, url: &str) -> Result<DynamicImage> {
        tracing::info!("Getting generated image");
        let resp = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DalleError::Connection {
                context: "Connection error when getting image".into(),
                source: e,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DalleError::ImageUnavailable {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| DalleError::Connection {
            context: "Failed to read image bytes".into(),
            source: e,
        })?;

        tokio::task::spawn_blocking(move || decode_image(&bytes))
            .await
            .map_err(|e| DalleError::Other(format!("image decode task failed: {}", e)))?
    }
}

impl ImageProvider for DalleClient {
    fn submit_generation(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> impl std::future::Future<Output = Result<RawResponse>> + Send {
        DalleClient::submit_generation(self, prompt, options)
    }

    fn fetch_image(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<DynamicImage>> + Send {
        DalleClient::fetch_image(self, url)
    }
}
