//! # dalle-queue
//!
//! Rate-limited async client for Azure OpenAI DALL-E deployments, with a
//! generator that fans one prompt out into many concurrently scheduled
//! image generations.
//!
//! ## Features
//!
//! - Rolling-window rate limiter shared by all in-flight generations
//! - Two-stage calls (submit job, fetch image) with classified failures,
//!   including the wait hint from HTTP 429 messages
//! - Filesystem-safe, length-bounded artifact paths derived from the prompt
//! - Per-unit lifecycle events for a presentation layer
//! - PNG output with `prompt` and `revised_prompt` text metadata
//! - Session shutdown that cancels every in-flight unit
//!
//! ## Quick Start
//!
//! ```no_run
//! use dalle_queue::{ClientConfig, Generator, GenerationRequest, UnitEvent};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> dalle_queue::Result<()> {
//! let config = ClientConfig::builder()
//!     .with_endpoint("https://my-resource.openai.azure.com")
//!     .with_key("key")
//!     .with_rpm(3)
//!     .build();
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let generator = Generator::from_config(&config)?.with_events(tx);
//!
//! let batch = generator.generate(GenerationRequest::new("a lighthouse at dusk", 2)?);
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         if let UnitEvent::Delivered { artifact, .. } = event {
//!             artifact.save().ok();
//!         }
//!     }
//! });
//!
//! batch.wait().await;
//! generator.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod generator;
pub mod limiter;
pub mod logging;
pub mod path;
pub mod types;

pub use artifact::Artifact;
pub use client::{interpret_response, DalleClient, Generation, RawResponse};
pub use config::{ClientConfig, ClientConfigBuilder, Settings};
pub use error::{DalleError, Result};
pub use events::{DiscardEvents, EventSink, LogEvents, Severity, UnitEvent, UnitState};
pub use generator::{GenerationBatch, Generator};
pub use limiter::RateLimiter;
pub use logging::init_logging;
pub use path::{build_image_path, MAX_PATH_LEN};
pub use types::{
    ApiVersion, FormInput, GenerationOptions, GenerationRequest, GenerationResult, ImageSize,
    Quality, Style, UnitId, UnitReport, AS_IS_PREFIX, MAX_IMAGE_COUNT,
};

use image::DynamicImage;

/// The two remote calls a generation needs.
///
/// [`DalleClient`] is the real implementation. Implementations only classify
/// and report failures; they must not retry.
///
/// # Example
///
/// ```ignore
/// struct FixedProvider;
///
/// impl ImageProvider for FixedProvider {
///     async fn submit_generation(&self, prompt: &str, _options: &GenerationOptions) -> Result<RawResponse> {
///         Ok(RawResponse {
///             status: 200,
///             reason: "OK".into(),
///             body: serde_json::json!({"data": [{"revised_prompt": prompt, "url": "mem://1"}]}),
///         })
///     }
///
///     async fn fetch_image(&self, _url: &str) -> Result<DynamicImage> {
///         Ok(DynamicImage::new_rgba8(1, 1))
///     }
/// }
/// ```
pub trait ImageProvider: Send + Sync {
    /// Submit a generation job. Transport failures are errors; every HTTP
    /// answer is returned unclassified.
    fn submit_generation(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> impl std::future::Future<Output = Result<RawResponse>> + Send;

    /// Download and decode the image at `url`.
    fn fetch_image(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<DynamicImage>> + Send;
}
