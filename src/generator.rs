use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::client::{interpret_response, DalleClient};
use crate::config::ClientConfig;
use crate::error::{DalleError, Result};
use crate::events::{DiscardEvents, EventSink, Severity, UnitEvent, UnitState};
use crate::limiter::RateLimiter;
use crate::path::build_image_path;
use crate::types::{GenerationRequest, GenerationResult, UnitId, UnitReport};
use crate::ImageProvider;

/// Drives generation requests as independent, concurrently scheduled units.
///
/// Each unit owns its own permit acquisition and result. The only state the
/// units share is the [`RateLimiter`] ledger. One unit failing never cancels
/// or delays its siblings.
///
/// Dropping the generator (or calling [`shutdown()`](Self::shutdown)) cancels
/// every unit still in flight.
///
/// # Example
/// ```no_run
/// use dalle_queue::{ClientConfig, Generator, GenerationRequest};
///
/// # async fn example() -> dalle_queue::Result<()> {
/// let config = ClientConfig::builder()
///     .with_endpoint("https://my-resource.openai.azure.com")
///     .with_key("key")
///     .build();
/// let generator = Generator::from_config(&config)?;
///
/// let batch = generator.generate(GenerationRequest::new("a red fox in snow", 3)?);
/// for report in batch.wait().await {
///     println!("{}: success = {}", report.unit_id, report.result.is_success());
/// }
/// generator.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct Generator<P> {
    provider: Arc<P>,
    limiter: Arc<RateLimiter>,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    closed: AtomicBool,
    extra_delay: Duration,
    auto_save: bool,
}

impl Generator<DalleClient> {
    /// Build a generator backed by a [`DalleClient`] for `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = DalleClient::from_config(config)?;
        Self::new(client, config)
    }
}

impl<P> Generator<P>
where
    P: ImageProvider + 'static,
{
    /// Create a generator over any [`ImageProvider`], throttled per `config`.
    pub fn new(provider: P, config: &ClientConfig) -> Result<Self> {
        let limiter = RateLimiter::new(config.rpm, config.period)?;
        tracing::info!(rpm = config.rpm, "Client created");
        Ok(Self {
            provider: Arc::new(provider),
            limiter: Arc::new(limiter),
            events: Arc::new(DiscardEvents),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            extra_delay: config.extra_delay,
            auto_save: config.auto_save,
        })
    }

    /// Send lifecycle events to `sink`.
    pub fn with_events(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Arc::new(sink);
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Spawn one task per requested image and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn generate(&self, request: GenerationRequest) -> GenerationBatch {
        let batch_id = Uuid::new_v4();
        let base = chrono::Utc::now().timestamp_micros();
        let request = Arc::new(request);
        let span = tracing::info_span!("batch", id = %batch_id, count = request.count());

        let units = (0..request.count())
            .map(|i| {
                let unit_id = UnitId(base + i64::from(i));
                let unit = Unit {
                    id: unit_id,
                    request: Arc::clone(&request),
                    provider: Arc::clone(&self.provider),
                    limiter: Arc::clone(&self.limiter),
                    events: Arc::clone(&self.events),
                    cancel: self.cancel.clone(),
                    extra_delay: self.extra_delay,
                    auto_save: self.auto_save,
                };
                let span = tracing::info_span!(parent: &span, "unit", id = %unit_id);
                (unit_id, tokio::spawn(unit.run().instrument(span)))
            })
            .collect();

        GenerationBatch { id: batch_id, units }
    }

    /// End the session: cancel every in-flight unit.
    ///
    /// Runs its effect exactly once; returns `true` for the call that closed
    /// the session and `false` afterwards.
    pub fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        tracing::info!("Client closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<P> Drop for Generator<P> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
            tracing::info!("Client closed");
        }
    }
}

/// Handles to the units spawned by one [`Generator::generate`] call.
#[derive(Debug)]
pub struct GenerationBatch {
    id: Uuid,
    units: Vec<(UnitId, JoinHandle<GenerationResult>)>,
}

impl GenerationBatch {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Wait for every unit to reach a terminal state, in unit order.
    pub async fn wait(self) -> Vec<UnitReport> {
        let mut reports = Vec::with_capacity(self.units.len());
        for (unit_id, handle) in self.units {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => GenerationResult::Failure {
                    reason: format!("generation task ended abnormally: {}", e),
                    retryable: false,
                    retry_after: None,
                },
            };
            reports.push(UnitReport { unit_id, result });
        }
        reports
    }
}

/// Everything one unit needs, exclusively owned by its task.
struct Unit<P> {
    id: UnitId,
    request: Arc<GenerationRequest>,
    provider: Arc<P>,
    limiter: Arc<RateLimiter>,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    extra_delay: Duration,
    auto_save: bool,
}

impl<P> Unit<P>
where
    P: ImageProvider + 'static,
{
    async fn run(self) -> GenerationResult {
        self.progress(UnitState::Queued);
        match self.drive().await {
            Ok(artifact) => {
                tracing::info!("Image delivered");
                let artifact = Arc::new(artifact);
                self.events.emit(UnitEvent::Delivered {
                    unit_id: self.id,
                    artifact: Arc::clone(&artifact),
                });
                GenerationResult::Success(Arc::unwrap_or_clone(artifact))
            }
            Err(e) => {
                let severity = e.severity();
                match severity {
                    Severity::Warning => tracing::warn!("{}", e),
                    Severity::Error => tracing::error!("{}", e),
                }
                self.events.emit(UnitEvent::Failed {
                    unit_id: self.id,
                    reason: e.to_string(),
                    severity,
                });
                GenerationResult::from_error(&e)
            }
        }
    }

    async fn drive(&self) -> Result<Artifact> {
        if self.cancel.is_cancelled() {
            return Err(DalleError::Cancelled);
        }

        // Resolve the destination first so a bad directory never spends a permit.
        let path = build_image_path(
            self.request.save_dir(),
            self.request.prompt(),
            &self.id.file_suffix(),
        )?;

        self.progress(UnitState::Waiting);
        self.cancellable(async {
            self.limiter.wait_for_permit(self.extra_delay).await;
            Ok(())
        })
        .await?;

        self.progress(UnitState::Submitting);
        let raw = self
            .cancellable(
                self.provider
                    .submit_generation(&self.request.full_prompt(), self.request.options()),
            )
            .await?;

        self.progress(UnitState::Interpreting);
        let generation = interpret_response(&raw)?;

        self.progress(UnitState::FetchingImage);
        let image = self
            .cancellable(self.provider.fetch_image(&generation.url))
            .await?;

        let artifact = Artifact {
            unit_id: self.id,
            prompt: self.request.prompt().to_string(),
            revised_prompt: generation.revised_prompt,
            image,
            path,
        };

        if !self.auto_save {
            return Ok(artifact);
        }
        tokio::task::spawn_blocking(move || artifact.save().map(|_| artifact))
            .await
            .map_err(|e| DalleError::Other(format!("save task failed: {}", e)))?
    }

    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DalleError::Cancelled),
            result = fut => result,
        }
    }

    fn progress(&self, state: UnitState) {
        tracing::debug!(?state, "Unit state changed");
        self.events.emit(UnitEvent::Progress {
            unit_id: self.id,
            state,
        });
    }
}
