//! In-process session store. Writes are staged in the unit of work and validated again
//! against the shared tables at commit time, so two units racing on the same key behave
//! like two Postgres transactions racing on the primary key.

use crate::store::{PositionTable, SessionStore, SessionTable, StoreError, UnitOfWork};
use parking_lot::Mutex;
use shared::vatsim::{
    Controller, FlightKey, Pilot, PlannedFlight, PositionSnapshot, SessionKey, SessionRecord,
};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Tables {
    controllers: BTreeMap<SessionKey, Controller>,
    pilots: BTreeMap<SessionKey, Pilot>,
    flights: BTreeMap<FlightKey, PlannedFlight>,
    positions: Vec<PositionSnapshot>,
}

#[derive(Debug, Clone)]
pub enum Write<E> {
    Insert(E),
    Update(E),
}

impl<E: SessionRecord> Write<E> {
    fn record(&self) -> &E {
        match self {
            Self::Insert(record) | Self::Update(record) => record,
        }
    }

    fn apply(self, rows: &mut BTreeMap<E::Key, E>) -> Result<(), StoreError> {
        match self {
            Self::Insert(record) => {
                let key = record.key();
                if rows.contains_key(&key) {
                    return Err(StoreError::constraint_violation::<E>(&key));
                }
                rows.insert(key, record);
            }
            Self::Update(record) => {
                let key = record.key();
                match rows.get_mut(&key) {
                    Some(row) => *row = record,
                    None => return Err(StoreError::not_found::<E>(&key)),
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Staged {
    Controller(Write<Controller>),
    Pilot(Write<Pilot>),
    Flight(Write<PlannedFlight>),
    Position(PositionSnapshot),
}

impl Staged {
    fn apply(self, tables: &mut Tables) -> Result<(), StoreError> {
        match self {
            Self::Controller(write) => write.apply(&mut tables.controllers),
            Self::Pilot(write) => write.apply(&mut tables.pilots),
            Self::Flight(write) => write.apply(&mut tables.flights),
            Self::Position(snapshot) => {
                tables.positions.push(snapshot);
                Ok(())
            }
        }
    }
}

/// Session kinds the in-memory store keeps a table for.
pub trait MemoryTable: SessionRecord {
    fn rows(tables: &Tables) -> &BTreeMap<Self::Key, Self>;
    fn stage(write: Write<Self>) -> Staged;
    fn staged(staged: &Staged) -> Option<&Write<Self>>;
}

impl MemoryTable for Controller {
    fn rows(tables: &Tables) -> &BTreeMap<SessionKey, Self> {
        &tables.controllers
    }

    fn stage(write: Write<Self>) -> Staged {
        Staged::Controller(write)
    }

    fn staged(staged: &Staged) -> Option<&Write<Self>> {
        match staged {
            Staged::Controller(write) => Some(write),
            _ => None,
        }
    }
}

impl MemoryTable for Pilot {
    fn rows(tables: &Tables) -> &BTreeMap<SessionKey, Self> {
        &tables.pilots
    }

    fn stage(write: Write<Self>) -> Staged {
        Staged::Pilot(write)
    }

    fn staged(staged: &Staged) -> Option<&Write<Self>> {
        match staged {
            Staged::Pilot(write) => Some(write),
            _ => None,
        }
    }
}

impl MemoryTable for PlannedFlight {
    fn rows(tables: &Tables) -> &BTreeMap<FlightKey, Self> {
        &tables.flights
    }

    fn stage(write: Write<Self>) -> Staged {
        Staged::Flight(write)
    }

    fn staged(staged: &Staged) -> Option<&Write<Self>> {
        match staged {
            Staged::Flight(write) => Some(write),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows of one kind, ordered by key.
    pub fn rows<E: MemoryTable>(&self) -> Vec<E> {
        E::rows(&self.tables.lock()).values().cloned().collect()
    }

    pub fn get<E: MemoryTable>(&self, key: &E::Key) -> Option<E> {
        E::rows(&self.tables.lock()).get(key).cloned()
    }

    pub fn positions(&self) -> Vec<PositionSnapshot> {
        self.tables.lock().positions.clone()
    }
}

impl SessionStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit, StoreError> {
        Ok(MemoryUnit {
            tables: Arc::clone(&self.tables),
            staged: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryUnit {
    tables: Arc<Mutex<Tables>>,
    staged: Vec<Staged>,
}

impl MemoryUnit {
    /// Latest view of `key` as seen by this unit: its own staged writes first, then the
    /// committed tables.
    fn visible<E: MemoryTable>(&self, key: &E::Key) -> Option<E> {
        let staged = self
            .staged
            .iter()
            .rev()
            .filter_map(E::staged)
            .map(Write::record)
            .find(|record| &record.key() == key);

        match staged {
            Some(record) => Some(record.clone()),
            None => E::rows(&self.tables.lock()).get(key).cloned(),
        }
    }
}

impl UnitOfWork for MemoryUnit {
    async fn commit(self) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let mut next = tables.clone();
        for staged in self.staged {
            staged.apply(&mut next)?;
        }
        *tables = next;
        Ok(())
    }
}

impl<E: MemoryTable> SessionTable<E> for MemoryUnit {
    async fn find(&mut self, key: &E::Key) -> Result<Option<E>, StoreError> {
        Ok(self.visible(key))
    }

    async fn insert(&mut self, record: &E) -> Result<(), StoreError> {
        let key = record.key();
        if self.visible::<E>(&key).is_some() {
            return Err(StoreError::constraint_violation::<E>(&key));
        }
        self.staged.push(E::stage(Write::Insert(record.clone())));
        Ok(())
    }

    async fn update(&mut self, record: &E) -> Result<(), StoreError> {
        let key = record.key();
        if self.visible::<E>(&key).is_none() {
            return Err(StoreError::not_found::<E>(&key));
        }
        self.staged.push(E::stage(Write::Update(record.clone())));
        Ok(())
    }
}

impl PositionTable for MemoryUnit {
    async fn insert_position(&mut self, snapshot: &PositionSnapshot) -> Result<(), StoreError> {
        self.staged.push(Staged::Position(snapshot.clone()));
        Ok(())
    }
}
