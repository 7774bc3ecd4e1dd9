pub mod models;
pub mod queries;

use crate::database::queries::QueryError;
use crate::store::{PositionTable, SessionStore, SessionTable, StoreError, UnitOfWork};
use shared::vatsim::{
    Controller, FlightKey, Pilot, PlannedFlight, PositionSnapshot, SessionKey, SessionRecord,
};
use sqlx::{Pool, Postgres, Transaction};
use tracing::trace;

/// Session store backed by the `controller_sessions`, `pilot_sessions`, `flight_plans` and
/// `pilot_positions` tables. Natural keys are the primary keys of those tables.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: Pool<Postgres>,
}

impl PgSessionStore {
    pub const fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

impl SessionStore for PgSessionStore {
    type Unit = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, StoreError> {
        let tx = self.pool.begin().await.map_err(|e| classify(QueryError::Db(e)))?;
        Ok(PgUnitOfWork { tx })
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl UnitOfWork for PgUnitOfWork {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| classify(QueryError::Db(e)))
    }
}

/// Unique violations on insert become `ConstraintViolation` for the record's key; lost
/// connections and pool exhaustion become `Unavailable`.
fn classify_write<E: SessionRecord>(error: QueryError, key: &E::Key) -> StoreError {
    let QueryError::Db(db_error) = &error;
    if matches!(db_error, sqlx::Error::Database(e) if e.is_unique_violation()) {
        trace!(kind = %E::KIND, key = %key, "unique violation on session key");
        return StoreError::constraint_violation::<E>(key);
    }
    classify(error)
}

fn classify(error: QueryError) -> StoreError {
    let QueryError::Db(db_error) = error;
    if matches!(
        db_error,
        sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed
    ) {
        StoreError::Unavailable(Box::new(db_error))
    } else {
        StoreError::Backend(Box::new(db_error))
    }
}

fn expect_row<E: SessionRecord>(rows_affected: u64, key: &E::Key) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::not_found::<E>(key))
    } else {
        Ok(())
    }
}

impl SessionTable<Controller> for PgUnitOfWork {
    async fn find(&mut self, key: &SessionKey) -> Result<Option<Controller>, StoreError> {
        queries::find_controller_session(&mut *self.tx, key)
            .await
            .map_err(classify)
    }

    async fn insert(&mut self, record: &Controller) -> Result<(), StoreError> {
        queries::insert_controller_session(&mut *self.tx, record)
            .await
            .map_err(|e| classify_write::<Controller>(e, &record.key()))
    }

    async fn update(&mut self, record: &Controller) -> Result<(), StoreError> {
        let rows = queries::update_controller_session(&mut *self.tx, record)
            .await
            .map_err(classify)?;
        expect_row::<Controller>(rows, &record.key())
    }
}

impl SessionTable<Pilot> for PgUnitOfWork {
    async fn find(&mut self, key: &SessionKey) -> Result<Option<Pilot>, StoreError> {
        queries::find_pilot_session(&mut *self.tx, key)
            .await
            .map_err(classify)
    }

    async fn insert(&mut self, record: &Pilot) -> Result<(), StoreError> {
        queries::insert_pilot_session(&mut *self.tx, record)
            .await
            .map_err(|e| classify_write::<Pilot>(e, &record.key()))
    }

    async fn update(&mut self, record: &Pilot) -> Result<(), StoreError> {
        let rows = queries::update_pilot_session(&mut *self.tx, record)
            .await
            .map_err(classify)?;
        expect_row::<Pilot>(rows, &record.key())
    }
}

impl SessionTable<PlannedFlight> for PgUnitOfWork {
    async fn find(&mut self, key: &FlightKey) -> Result<Option<PlannedFlight>, StoreError> {
        queries::find_flight_plan(&mut *self.tx, key)
            .await
            .map_err(classify)
    }

    async fn insert(&mut self, record: &PlannedFlight) -> Result<(), StoreError> {
        queries::insert_flight_plan(&mut *self.tx, record)
            .await
            .map_err(|e| classify_write::<PlannedFlight>(e, &record.key()))
    }

    async fn update(&mut self, record: &PlannedFlight) -> Result<(), StoreError> {
        let rows = queries::update_flight_plan(&mut *self.tx, record)
            .await
            .map_err(classify)?;
        expect_row::<PlannedFlight>(rows, &record.key())
    }
}

impl PositionTable for PgUnitOfWork {
    async fn insert_position(&mut self, snapshot: &PositionSnapshot) -> Result<(), StoreError> {
        let id = queries::insert_pilot_position(&mut *self.tx, snapshot)
            .await
            .map_err(classify)?;
        trace!(id = %id, pilot = %snapshot.pilot_key(), "inserted position snapshot");
        Ok(())
    }
}
