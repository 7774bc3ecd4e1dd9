#[warn(clippy::pedantic)]
pub mod database;
pub mod error;
pub mod events;
pub mod ingest;
pub mod reconciler;
pub mod store;

pub use ingest::{BatchIngest, IngestMode, IngestReport, SnapshotReport};
pub use reconciler::{Outcome, Reconciler, RetryPolicy};
