use crate::database::queries::QueryError;
use crate::ingest::{IngestMode, IngestReport};
use crate::store::StoreError;
use shared::error::InitializationError;
use shared::vatsim::EntityKind;
use shared::vatsim::timestamp::TimestampError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("session store unavailable after committing {committed} records: {source}")]
    StoreUnavailable {
        committed: usize,
        report: IngestReport,
        #[source]
        source: StoreError,
    },
    #[error("bulk {mode:?} write of {kind} records failed: {source}")]
    Bulk {
        kind: EntityKind,
        mode: IngestMode,
        #[source]
        source: StoreError,
    },
    #[error("ingest worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ProcessorMainError {
    #[error("failed to initialize datafeed processor: {0}")]
    Initialization(#[from] InitializationError),
    #[error("failed to clear initial backlog of queued snapshots")]
    InitialBacklog(#[from] BacklogProcessingError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum BacklogProcessingError {
    #[error("query error: {0}")]
    Query(#[from] QueryError),
    #[error("payload processing error: {0}")]
    Payload(#[from] PayloadProcessingError),
    #[error("db transaction error: {0}")]
    TransactionError(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum PayloadProcessingError {
    #[error("snapshot deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("snapshot ingest error: {0}")]
    Ingest(#[from] IngestError),
}
