use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use shared::vatsim::EntityKind;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of one record passing through the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReconcileEvent {
    Created { kind: EntityKind, key: String },
    Updated { kind: EntityKind, key: String },
    Skipped { kind: EntityKind, key: String, reason: String },
    Failed { kind: EntityKind, key: String, error: String },
}

impl ReconcileEvent {
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Created { kind, .. }
            | Self::Updated { kind, .. }
            | Self::Skipped { kind, .. }
            | Self::Failed { kind, .. } => *kind,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Created { key, .. }
            | Self::Updated { key, .. }
            | Self::Skipped { key, .. }
            | Self::Failed { key, .. } => key,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ReconcileEvent);
}

impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&self, event: &ReconcileEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: &ReconcileEvent) {
        (**self).emit(event);
    }
}

/// Writes every event as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ReconcileEvent) {
        match event {
            ReconcileEvent::Created { kind, key } => {
                info!(name: "session.created", kind = %kind, key = %key, "added session");
            }
            ReconcileEvent::Updated { kind, key } => {
                debug!(name: "session.updated", kind = %kind, key = %key, "updated session");
            }
            ReconcileEvent::Skipped { kind, key, reason } => {
                warn!(
                    name: "session.skipped",
                    kind = %kind,
                    key = %key,
                    reason = %reason,
                    "skipped record"
                );
            }
            ReconcileEvent::Failed { kind, key, error } => {
                error!(
                    name: "session.failed",
                    kind = %kind,
                    key = %key,
                    error = %error,
                    "failed to reconcile record"
                );
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct EventCounts {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Running totals of emitted events, shared with the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct StatsSink {
    counts: Arc<RwLock<EventCounts>>,
}

impl StatsSink {
    pub fn counts(&self) -> EventCounts {
        *self.counts.read()
    }
}

impl EventSink for StatsSink {
    fn emit(&self, event: &ReconcileEvent) {
        let mut counts = self.counts.write();
        match event {
            ReconcileEvent::Created { .. } => counts.created += 1,
            ReconcileEvent::Updated { .. } => counts.updated += 1,
            ReconcileEvent::Skipped { .. } => counts.skipped += 1,
            ReconcileEvent::Failed { .. } => counts.failed += 1,
        }
        counts.last_event_at = Some(Utc::now());
    }
}
