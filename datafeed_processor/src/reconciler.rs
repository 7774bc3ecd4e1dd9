//! Decides, per incoming feed record, whether it starts a new session or continues one
//! already in the store.
//!
//! Lookups use the full natural key. When a row is found, the logon times of the stored and
//! incoming records decide the branch: a strictly newer incoming logon is written as a new
//! session row next to the old one, anything else is merged into the stored row. Ties
//! therefore merge, so repeated identical sightings never create duplicate sessions.

use crate::error::ReconcileError;
use crate::events::{EventSink, ReconcileEvent};
use crate::store::{PositionTable, SessionStore, SessionTable, StoreError, UnitOfWork};
use chrono::{DateTime, Utc};
use shared::ReconcilerConfig;
use shared::vatsim::timestamp::parse_logon_time;
use shared::vatsim::{EntityKind, PositionSnapshot, SessionRecord};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Applied to each unit of work separately.
    pub store_timeout: Duration,
    /// Total attempts for unavailable/timed-out stores, including the first.
    pub max_attempts: u32,
    /// Multiplied by the attempt number before each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ReconcilerConfig::default())
    }
}

impl From<&ReconcilerConfig> for RetryPolicy {
    fn from(config: &ReconcilerConfig) -> Self {
        Self {
            store_timeout: config.store_timeout(),
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No session with this key existed.
    Created,
    /// A session existed but the incoming logon is newer; a new row was written beside it.
    Superseded,
    /// The stored session was overwritten with the incoming payload.
    Updated,
}

pub struct Reconciler<S> {
    store: Arc<S>,
    sink: Arc<dyn EventSink>,
    policy: RetryPolicy,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            sink: Arc::clone(&self.sink),
            policy: self.policy,
        }
    }
}

impl<S: SessionStore> Reconciler<S> {
    pub fn new(store: Arc<S>, sink: Arc<dyn EventSink>, policy: RetryPolicy) -> Self {
        Self {
            store,
            sink,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Inserts or merges one session record in its own unit of work and reports the result
    /// to the event sink.
    #[instrument(skip_all, fields(kind = %E::KIND, key = %incoming.key()))]
    pub async fn reconcile<E>(&self, incoming: &E) -> Result<Outcome, ReconcileError>
    where
        E: SessionRecord,
        S::Unit: SessionTable<E>,
    {
        let result = match parse_logon_time(incoming.time_logon()) {
            Ok(incoming_logon) => {
                self.with_retries(move || self.reconcile_once(incoming, incoming_logon))
                    .await
            }
            Err(e) => Err(e.into()),
        };

        self.sink
            .emit(&session_event(E::KIND, incoming.key().to_string(), &result));
        result
    }

    /// Appends a position report. `None` is accepted and ignored.
    pub async fn record_position(
        &self,
        snapshot: Option<&PositionSnapshot>,
    ) -> Result<bool, ReconcileError> {
        let Some(snapshot) = snapshot else {
            trace!("no position snapshot to record");
            return Ok(false);
        };

        self.record_positions(std::slice::from_ref(snapshot))
            .await
            .map(|_| true)
    }

    /// Appends position reports in a single unit of work: either all of them are stored or
    /// none is, so a snapshot retried after a failure never stores a report twice.
    pub async fn record_positions(
        &self,
        snapshots: &[PositionSnapshot],
    ) -> Result<usize, ReconcileError> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let result = self
            .with_retries(move || self.insert_positions_once(snapshots))
            .await;

        for snapshot in snapshots {
            let key = snapshot.pilot_key().to_string();
            let event = match &result {
                Ok(()) => ReconcileEvent::Created {
                    kind: EntityKind::Position,
                    key,
                },
                Err(e) => ReconcileEvent::Failed {
                    kind: EntityKind::Position,
                    key,
                    error: e.to_string(),
                },
            };
            self.sink.emit(&event);
        }

        result.map(|()| snapshots.len())
    }

    async fn reconcile_once<E>(
        &self,
        incoming: &E,
        incoming_logon: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError>
    where
        E: SessionRecord,
        S::Unit: SessionTable<E>,
    {
        let mut unit = self.store.begin().await?;
        let key = incoming.key();

        let outcome = match SessionTable::<E>::find(&mut unit, &key).await? {
            None => {
                SessionTable::<E>::insert(&mut unit, incoming).await?;
                Outcome::Created
            }
            Some(mut existing) => {
                let existing_logon = parse_logon_time(existing.time_logon())?;
                if incoming_logon > existing_logon {
                    trace!(
                        existing_logon = %existing_logon,
                        incoming_logon = %incoming_logon,
                        "incoming logon is newer, starting new session"
                    );
                    SessionTable::<E>::insert(&mut unit, incoming).await?;
                    Outcome::Superseded
                } else {
                    existing.merge_from(incoming);
                    SessionTable::<E>::update(&mut unit, &existing).await?;
                    Outcome::Updated
                }
            }
        };

        unit.commit().await?;
        Ok(outcome)
    }

    async fn insert_positions_once(
        &self,
        snapshots: &[PositionSnapshot],
    ) -> Result<(), ReconcileError> {
        let mut unit = self.store.begin().await?;
        for snapshot in snapshots {
            unit.insert_position(snapshot).await?;
        }
        unit.commit().await?;
        Ok(())
    }

    /// Runs `operation` under the store timeout. A lost same-key race is re-run once; an
    /// unavailable or slow store is retried until `max_attempts` is used up.
    async fn with_retries<T, F, Fut>(&self, mut operation: F) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReconcileError>>,
    {
        let mut attempt: u32 = 1;
        let mut conflict_retried = false;

        loop {
            let result = match timeout(self.policy.store_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.policy.store_timeout).into()),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(ReconcileError::Store(e)) if e.is_conflict() && !conflict_retried => {
                    debug!(error = %e, "lost race on session key, re-running reconcile");
                    conflict_retried = true;
                }
                Err(ReconcileError::Store(e))
                    if e.is_transient() && attempt < self.policy.max_attempts =>
                {
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        "session store unavailable, retrying"
                    );
                    sleep(self.policy.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn session_event(
    kind: EntityKind,
    key: String,
    result: &Result<Outcome, ReconcileError>,
) -> ReconcileEvent {
    match result {
        Ok(Outcome::Created | Outcome::Superseded) => ReconcileEvent::Created { kind, key },
        Ok(Outcome::Updated) => ReconcileEvent::Updated { kind, key },
        Err(ReconcileError::Timestamp(e)) => ReconcileEvent::Skipped {
            kind,
            key,
            reason: e.to_string(),
        },
        Err(e) => ReconcileEvent::Failed {
            kind,
            key,
            error: e.to_string(),
        },
    }
}
