use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::artifact::Artifact;
use crate::types::UnitId;

/// How prominently a failure should be shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Lifecycle stage of a generation unit.
///
/// `Queued -> Waiting -> Submitting -> Interpreting -> FetchingImage -> Delivered`,
/// or `Failed` from any stage after `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Queued,
    Waiting,
    Submitting,
    Interpreting,
    FetchingImage,
    Delivered,
    Failed,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Delivered | UnitState::Failed)
    }
}

/// Event emitted to the presentation layer as a unit progresses.
#[derive(Debug, Clone)]
pub enum UnitEvent {
    /// The unit moved to a non-terminal stage.
    Progress { unit_id: UnitId, state: UnitState },
    /// The image is ready.
    Delivered {
        unit_id: UnitId,
        artifact: Arc<Artifact>,
    },
    /// The unit ended without an artifact.
    Failed {
        unit_id: UnitId,
        reason: String,
        severity: Severity,
    },
}

impl UnitEvent {
    pub fn unit_id(&self) -> UnitId {
        match self {
            UnitEvent::Progress { unit_id, .. }
            | UnitEvent::Delivered { unit_id, .. }
            | UnitEvent::Failed { unit_id, .. } => *unit_id,
        }
    }

    pub fn state(&self) -> UnitState {
        match self {
            UnitEvent::Progress { state, .. } => *state,
            UnitEvent::Delivered { .. } => UnitState::Delivered,
            UnitEvent::Failed { .. } => UnitState::Failed,
        }
    }
}

/// Receiver of unit lifecycle events.
///
/// The sink owns any mapping from [`UnitId`] to on-screen placeholders.
/// Implementations must not block; they are called from generation tasks.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UnitEvent);
}

impl EventSink for mpsc::UnboundedSender<UnitEvent> {
    fn emit(&self, event: UnitEvent) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.send(event);
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardEvents;

impl EventSink for DiscardEvents {
    fn emit(&self, _event: UnitEvent) {}
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl EventSink for LogEvents {
    fn emit(&self, event: UnitEvent) {
        match event {
            UnitEvent::Progress { unit_id, state } => {
                tracing::info!(%unit_id, ?state, "Unit progressed")
            }
            UnitEvent::Delivered { unit_id, artifact } => {
                tracing::info!(%unit_id, path = %artifact.path.display(), "Image delivered")
            }
            UnitEvent::Failed {
                unit_id,
                reason,
                severity: Severity::Warning,
            } => tracing::warn!(%unit_id, "{}", reason),
            UnitEvent::Failed {
                unit_id, reason, ..
            } => tracing::error!(%unit_id, "{}", reason),
        }
    }
}
