use crate::error::{IngestError, ReconcileError};
use crate::reconciler::{Outcome, Reconciler};
use crate::store::{SessionStore, SessionTable, StoreError, UnitOfWork};
use serde::Serialize;
use shared::vatsim::{
    Controller, DatafeedSnapshot, Pilot, PlannedFlight, PositionSnapshot, SessionRecord,
};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Reconcile every record against the store.
    Merge,
    /// Caller guarantees none of the keys exist yet.
    AssumeNew,
    /// Caller guarantees every key already exists.
    AssumeExisting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl IngestReport {
    pub const fn committed(&self) -> usize {
        self.created + self.updated
    }

    fn record(&mut self, result: &Result<Outcome, ReconcileError>) {
        match result {
            Ok(Outcome::Created | Outcome::Superseded) => self.created += 1,
            Ok(Outcome::Updated) => self.updated += 1,
            Err(ReconcileError::Timestamp(_)) => self.skipped += 1,
            Err(ReconcileError::Store(_)) => self.failed += 1,
        }
    }

    fn absorb(&mut self, other: &Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotReport {
    pub controllers: IngestReport,
    pub pilots: IngestReport,
    pub flights: IngestReport,
    pub positions: IngestReport,
}

#[derive(Default)]
struct LaneResult {
    report: IngestReport,
    unavailable: Option<StoreError>,
}

/// Applies the reconciler to whole snapshot lists.
pub struct BatchIngest<S> {
    reconciler: Reconciler<S>,
    workers: usize,
}

impl<S: SessionStore> BatchIngest<S> {
    pub fn new(reconciler: Reconciler<S>, workers: usize) -> Self {
        Self {
            reconciler,
            workers: workers.max(1),
        }
    }

    pub const fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    pub async fn ingest_all<E>(
        &self,
        records: Vec<E>,
        mode: IngestMode,
    ) -> Result<IngestReport, IngestError>
    where
        E: SessionRecord,
        S::Unit: SessionTable<E>,
    {
        if records.is_empty() {
            return Ok(IngestReport::default());
        }

        match mode {
            IngestMode::Merge => self.merge_all(records).await,
            IngestMode::AssumeNew | IngestMode::AssumeExisting => {
                self.bulk_write(records, mode).await
            }
        }
    }

    /// Appends every present snapshot in one unit of work; absent entries are ignored.
    pub async fn ingest_positions(
        &self,
        snapshots: Vec<Option<PositionSnapshot>>,
    ) -> Result<IngestReport, IngestError> {
        let present: Vec<PositionSnapshot> = snapshots.into_iter().flatten().collect();
        let mut report = IngestReport::default();

        match self.reconciler.record_positions(&present).await {
            Ok(written) => report.created = written,
            Err(ReconcileError::Store(source)) if source.is_transient() => {
                report.failed = present.len();
                return Err(IngestError::StoreUnavailable {
                    committed: 0,
                    report,
                    source,
                });
            }
            Err(e) => {
                warn!(count = present.len(), error = %e, "failed to append position reports");
                report.failed = present.len();
            }
        }

        Ok(report)
    }

    /// Merges one poll of the feed. Pilots are written before their position reports.
    pub async fn ingest_snapshot(
        &self,
        snapshot: DatafeedSnapshot,
    ) -> Result<SnapshotReport, IngestError> {
        let DatafeedSnapshot {
            updated_at,
            controllers,
            pilots,
            flights,
            positions,
        } = snapshot;

        let report = SnapshotReport {
            controllers: self
                .ingest_all::<Controller>(controllers, IngestMode::Merge)
                .await?,
            pilots: self.ingest_all::<Pilot>(pilots, IngestMode::Merge).await?,
            flights: self
                .ingest_all::<PlannedFlight>(flights, IngestMode::Merge)
                .await?,
            positions: self.ingest_positions(positions).await?,
        };

        info!(
            updated_at = %updated_at,
            controllers = ?report.controllers,
            pilots = ?report.pilots,
            flights = ?report.flights,
            positions = ?report.positions,
            "ingested datafeed snapshot"
        );

        Ok(report)
    }

    /// Records sharing a key form one lane and keep their input order; distinct lanes run on
    /// up to `workers` tasks at once.
    async fn merge_all<E>(&self, records: Vec<E>) -> Result<IngestReport, IngestError>
    where
        E: SessionRecord,
        S::Unit: SessionTable<E>,
    {
        let permits = Arc::new(Semaphore::new(self.workers));
        let abort = CancellationToken::new();
        let mut lanes = JoinSet::new();

        for lane in into_lanes(records) {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            if abort.is_cancelled() {
                break;
            }

            let reconciler = self.reconciler.clone();
            let abort = abort.clone();
            lanes.spawn(async move {
                let result = reconcile_lane(reconciler, lane, abort).await;
                drop(permit);
                result
            });
        }

        let mut report = IngestReport::default();
        let mut unavailable = None;
        while let Some(joined) = lanes.join_next().await {
            let lane = joined?;
            report.absorb(&lane.report);
            if let Some(e) = lane.unavailable {
                unavailable.get_or_insert(e);
            }
        }

        match unavailable {
            Some(source) => Err(IngestError::StoreUnavailable {
                committed: report.committed(),
                report,
                source,
            }),
            None => {
                debug!(kind = %E::KIND, report = ?report, "merged batch");
                Ok(report)
            }
        }
    }

    /// One unit of work for the whole batch: either every record is written or none is.
    async fn bulk_write<E>(
        &self,
        records: Vec<E>,
        mode: IngestMode,
    ) -> Result<IngestReport, IngestError>
    where
        E: SessionRecord,
        S::Unit: SessionTable<E>,
    {
        let store_timeout = self.reconciler.policy().store_timeout;
        let write = async {
            let mut unit = self.reconciler.store().begin().await?;
            let written = if mode == IngestMode::AssumeExisting {
                SessionTable::<E>::update_many(&mut unit, &records).await?
            } else {
                SessionTable::<E>::insert_many(&mut unit, &records).await?
            };
            unit.commit().await?;
            Ok::<_, StoreError>(written)
        };

        let written = match timeout(store_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(store_timeout)),
        }
        .map_err(|source| IngestError::Bulk {
            kind: E::KIND,
            mode,
            source,
        })?;

        info!(kind = %E::KIND, mode = ?mode, written, "bulk write committed");

        let mut report = IngestReport::default();
        if mode == IngestMode::AssumeExisting {
            report.updated = written;
        } else {
            report.created = written;
        }
        Ok(report)
    }
}

async fn reconcile_lane<S, E>(
    reconciler: Reconciler<S>,
    lane: Vec<E>,
    abort: CancellationToken,
) -> LaneResult
where
    S: SessionStore,
    E: SessionRecord,
    S::Unit: SessionTable<E>,
{
    let mut result = LaneResult::default();

    for record in &lane {
        if abort.is_cancelled() {
            break;
        }

        match reconciler.reconcile(record).await {
            Err(ReconcileError::Store(e)) if e.is_transient() => {
                warn!(
                    kind = %E::KIND,
                    key = %record.key(),
                    error = %e,
                    "session store unavailable, aborting batch"
                );
                result.report.failed += 1;
                result.unavailable = Some(e);
                abort.cancel();
                break;
            }
            other => result.report.record(&other),
        }
    }

    result
}

/// Groups records by natural key in order of first appearance.
fn into_lanes<E: SessionRecord>(records: Vec<E>) -> Vec<Vec<E>> {
    let mut index: HashMap<E::Key, usize> = HashMap::new();
    let mut lanes: Vec<Vec<E>> = Vec::new();

    for record in records {
        match index.entry(record.key()) {
            Entry::Occupied(slot) => {
                trace!(kind = %E::KIND, key = %slot.key(), "key repeated within batch");
                lanes[*slot.get()].push(record);
            }
            Entry::Vacant(slot) => {
                slot.insert(lanes.len());
                lanes.push(vec![record]);
            }
        }
    }

    lanes
}
