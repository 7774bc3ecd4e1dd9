use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// A feed snapshot enqueued by the fetcher and not yet ingested.
#[derive(Debug, sqlx::FromRow, Clone)]
pub struct QueuedSnapshot {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}
