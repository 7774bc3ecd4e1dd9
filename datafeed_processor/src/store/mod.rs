//! The persistence contract the reconciler works against.
//!
//! A store hands out units of work. Every read and write happens inside one, and nothing
//! becomes visible to other units until [`UnitOfWork::commit`] succeeds; dropping a unit
//! without committing discards its writes. Stores must enforce uniqueness of the natural
//! key themselves and report collisions as [`StoreError::ConstraintViolation`].

pub mod memory;

use shared::vatsim::{
    Controller, EntityKind, Pilot, PlannedFlight, PositionSnapshot, SessionRecord,
};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} session {key} already exists")]
    ConstraintViolation { kind: EntityKind, key: String },
    #[error("{kind} session {key} not found")]
    NotFound { kind: EntityKind, key: String },
    #[error("session store unavailable: {0}")]
    Unavailable(#[source] BoxError),
    #[error("session store did not respond within {0:?}")]
    Timeout(Duration),
    #[error("session store error: {0}")]
    Backend(#[source] BoxError),
}

impl StoreError {
    pub fn constraint_violation<E: SessionRecord>(key: &E::Key) -> Self {
        Self::ConstraintViolation {
            kind: E::KIND,
            key: key.to_string(),
        }
    }

    pub fn not_found<E: SessionRecord>(key: &E::Key) -> Self {
        Self::NotFound {
            kind: E::KIND,
            key: key.to_string(),
        }
    }

    /// A same-key race lost against another writer: re-running the reconcile resolves it.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConstraintViolation { .. } | Self::NotFound { .. })
    }

    /// The store could not be reached in time; the same operation may succeed later.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

pub trait SessionStore: Send + Sync + 'static {
    type Unit: UnitOfWork
        + SessionTable<Controller>
        + SessionTable<Pilot>
        + SessionTable<PlannedFlight>
        + PositionTable;

    fn begin(&self) -> impl Future<Output = Result<Self::Unit, StoreError>> + Send;
}

pub trait UnitOfWork: Send + Sized {
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Keyed access to the sessions of one entity kind inside a unit of work.
pub trait SessionTable<E: SessionRecord>: Send {
    /// Returns `None` when no session with exactly this key exists.
    fn find(
        &mut self,
        key: &E::Key,
    ) -> impl Future<Output = Result<Option<E>, StoreError>> + Send;

    fn insert(&mut self, record: &E) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Overwrites the payload of the row matching `record.key()`.
    fn update(&mut self, record: &E) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stops at the first failing record. Callers that do not commit after an error see
    /// none of the batch.
    fn insert_many(
        &mut self,
        records: &[E],
    ) -> impl Future<Output = Result<usize, StoreError>> + Send {
        async move {
            for record in records {
                <Self as SessionTable<E>>::insert(&mut *self, record).await?;
            }
            Ok(records.len())
        }
    }

    /// Same failure semantics as [`SessionTable::insert_many`].
    fn update_many(
        &mut self,
        records: &[E],
    ) -> impl Future<Output = Result<usize, StoreError>> + Send {
        async move {
            for record in records {
                <Self as SessionTable<E>>::update(&mut *self, record).await?;
            }
            Ok(records.len())
        }
    }
}

pub trait PositionTable: Send {
    fn insert_position(
        &mut self,
        snapshot: &PositionSnapshot,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
