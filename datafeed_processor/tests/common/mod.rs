#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use datafeed_processor::events::{EventSink, ReconcileEvent};
use datafeed_processor::store::memory::{MemoryStore, MemoryUnit};
use datafeed_processor::store::{PositionTable, SessionStore, SessionTable, StoreError, UnitOfWork};
use datafeed_processor::{Reconciler, RetryPolicy};
use parking_lot::Mutex;
use shared::vatsim::{Controller, FlightKey, Pilot, PlannedFlight, PositionSnapshot, SessionKey};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub const LOGON: &str = "20231001120000";
pub const LATER_LOGON: &str = "20231001180000";

pub fn controller(cid: &str, callsign: &str, time_logon: &str, frequency: &str) -> Controller {
    Controller {
        cid: cid.to_string(),
        callsign: callsign.to_string(),
        time_logon: time_logon.to_string(),
        realname: "Jane Doe KSMO".to_string(),
        server: "USA-WEST".to_string(),
        frequency: frequency.to_string(),
        facility_type: 4,
        rating: 3,
        visual_range: 50,
        atis_message: "LAX TWR".to_string(),
        time_last_atis_received: time_logon.to_string(),
        latitude: 33.9425,
        longitude: -118.4081,
    }
}

pub fn pilot(cid: &str, callsign: &str, time_logon: &str) -> Pilot {
    Pilot {
        cid: cid.to_string(),
        callsign: callsign.to_string(),
        time_logon: time_logon.to_string(),
        realname: "John Smith KJFK".to_string(),
        server: "USA-EAST".to_string(),
        latitude: 40.6413,
        longitude: -73.7781,
        altitude: 13,
        groundspeed: 0,
        heading: 310,
        transponder: "2200".to_string(),
        qnh_mb: 1013,
    }
}

pub fn flight(cid: &str, callsign: &str, departure: &str, destination: &str) -> PlannedFlight {
    PlannedFlight {
        cid: cid.to_string(),
        callsign: callsign.to_string(),
        time_logon: LOGON.to_string(),
        departure_airport: departure.to_string(),
        destination_airport: destination.to_string(),
        aircraft: "B738/L".to_string(),
        tas_cruise: 450,
        flight_rules: "I".to_string(),
        cruise_altitude: "FL350".to_string(),
        route: "DCT".to_string(),
        remarks: "/v/".to_string(),
        alternate_airport: String::new(),
        departure_time: "1230".to_string(),
        hours_enroute: 5,
        minutes_enroute: 30,
        hours_fuel: 7,
        minutes_fuel: 0,
    }
}

pub fn position(pilot: &Pilot, minute: u32) -> PositionSnapshot {
    PositionSnapshot {
        cid: pilot.cid.clone(),
        callsign: pilot.callsign.clone(),
        time_logon: pilot.time_logon.clone(),
        time_stamp: Utc.with_ymd_and_hms(2023, 10, 1, 12, minute, 0).unwrap(),
        latitude: pilot.latitude + f64::from(minute) / 100.0,
        longitude: pilot.longitude,
        altitude: 1000 * i32::try_from(minute).unwrap(),
        groundspeed: 250,
        heading: 270,
    }
}

pub fn session_key(cid: &str, callsign: &str, time_logon: &str) -> SessionKey {
    SessionKey::new(cid, callsign, time_logon)
}

pub fn flight_key(cid: &str, callsign: &str, departure: &str, destination: &str) -> FlightKey {
    FlightKey {
        session: session_key(cid, callsign, LOGON),
        departure_airport: departure.to_string(),
        destination_airport: destination.to_string(),
    }
}

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        store_timeout: Duration::from_secs(1),
        max_attempts,
        backoff: Duration::from_millis(1),
    }
}

pub fn reconciler<S: SessionStore>(store: Arc<S>, sink: &RecordingSink) -> Reconciler<S> {
    Reconciler::new(store, Arc::new(sink.clone()), fast_policy(3))
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ReconcileEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ReconcileEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &ReconcileEvent) {
        self.events.lock().push(event.clone());
    }
}

type Predicate = Arc<dyn Fn(u32) -> bool + Send + Sync>;

/// Wraps a [`MemoryStore`] to simulate an unreachable or stalled database, a concurrent writer
/// on the same key, a row deleted between lookup and write, or a store that resolves
/// controller sessions by cid and callsign only.
pub struct TestStore {
    pub inner: MemoryStore,
    begins: AtomicU32,
    fail_begin: Predicate,
    stall_begin: Predicate,
    stall_for: Duration,
    fail_position: Predicate,
    position_writes: Arc<AtomicU32>,
    rival: Mutex<Option<Controller>>,
    vanished: Mutex<Option<Controller>>,
    latest_by_callsign: bool,
}

impl TestStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            begins: AtomicU32::new(0),
            fail_begin: Arc::new(|_| false),
            stall_begin: Arc::new(|_| false),
            stall_for: Duration::ZERO,
            fail_position: Arc::new(|_| false),
            position_writes: Arc::new(AtomicU32::new(0)),
            rival: Mutex::new(None),
            vanished: Mutex::new(None),
            latest_by_callsign: false,
        }
    }

    /// `fail(n)` decides whether the n-th call to `begin` (0-based) is refused.
    pub fn failing_begin(mut self, fail: impl Fn(u32) -> bool + Send + Sync + 'static) -> Self {
        self.fail_begin = Arc::new(fail);
        self
    }

    /// `begin` calls for which `stall(n)` holds sleep for `duration` before opening a unit.
    pub fn stalling_begin(
        mut self,
        duration: Duration,
        stall: impl Fn(u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.stall_for = duration;
        self.stall_begin = Arc::new(stall);
        self
    }

    /// `fail(n)` decides whether the n-th position write (0-based, across all units) reports
    /// the store as unavailable.
    pub fn failing_position(mut self, fail: impl Fn(u32) -> bool + Send + Sync + 'static) -> Self {
        self.fail_position = Arc::new(fail);
        self
    }

    /// The next unit of work finds `row`, which is gone by the time the unit writes.
    pub fn with_vanished_row(self, row: Controller) -> Self {
        *self.vanished.lock() = Some(row);
        self
    }

    /// The next unit of work loses a race against `rival`, which commits first.
    pub fn with_rival(self, rival: Controller) -> Self {
        *self.rival.lock() = Some(rival);
        self
    }

    pub fn latest_by_callsign(mut self) -> Self {
        self.latest_by_callsign = true;
        self
    }

    pub fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }
}

impl SessionStore for TestStore {
    type Unit = TestUnit;

    async fn begin(&self) -> Result<TestUnit, StoreError> {
        let n = self.begins.fetch_add(1, Ordering::SeqCst);
        if (self.stall_begin)(n) {
            tokio::time::sleep(self.stall_for).await;
        }
        if (self.fail_begin)(n) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }

        let rival_record = self.rival.lock().take();
        let rival = match rival_record {
            Some(record) => {
                let mut unit = self.inner.begin().await?;
                SessionTable::<Controller>::insert(&mut unit, &record).await?;
                Some(unit)
            }
            None => None,
        };

        let inner = self.inner.begin().await?;
        let vanished = self.vanished.lock().take();
        Ok(TestUnit {
            inner,
            store: self.inner.clone(),
            rival,
            vanished,
            fail_position: Arc::clone(&self.fail_position),
            position_writes: Arc::clone(&self.position_writes),
            latest_by_callsign: self.latest_by_callsign,
        })
    }
}

pub struct TestUnit {
    inner: MemoryUnit,
    store: MemoryStore,
    rival: Option<MemoryUnit>,
    vanished: Option<Controller>,
    fail_position: Predicate,
    position_writes: Arc<AtomicU32>,
    latest_by_callsign: bool,
}

impl UnitOfWork for TestUnit {
    async fn commit(self) -> Result<(), StoreError> {
        if let Some(rival) = self.rival {
            rival.commit().await?;
        }
        self.inner.commit().await
    }
}

impl SessionTable<Controller> for TestUnit {
    async fn find(&mut self, key: &SessionKey) -> Result<Option<Controller>, StoreError> {
        if let Some(row) = self.vanished.take() {
            return Ok(Some(row));
        }
        if !self.latest_by_callsign {
            return SessionTable::<Controller>::find(&mut self.inner, key).await;
        }
        Ok(self
            .store
            .rows::<Controller>()
            .into_iter()
            .filter(|c| c.cid == key.cid && c.callsign == key.callsign)
            .max_by(|a, b| a.time_logon.cmp(&b.time_logon)))
    }

    async fn insert(&mut self, record: &Controller) -> Result<(), StoreError> {
        SessionTable::<Controller>::insert(&mut self.inner, record).await
    }

    async fn update(&mut self, record: &Controller) -> Result<(), StoreError> {
        SessionTable::<Controller>::update(&mut self.inner, record).await
    }
}

impl SessionTable<Pilot> for TestUnit {
    async fn find(&mut self, key: &SessionKey) -> Result<Option<Pilot>, StoreError> {
        SessionTable::<Pilot>::find(&mut self.inner, key).await
    }

    async fn insert(&mut self, record: &Pilot) -> Result<(), StoreError> {
        SessionTable::<Pilot>::insert(&mut self.inner, record).await
    }

    async fn update(&mut self, record: &Pilot) -> Result<(), StoreError> {
        SessionTable::<Pilot>::update(&mut self.inner, record).await
    }
}

impl SessionTable<PlannedFlight> for TestUnit {
    async fn find(&mut self, key: &FlightKey) -> Result<Option<PlannedFlight>, StoreError> {
        SessionTable::<PlannedFlight>::find(&mut self.inner, key).await
    }

    async fn insert(&mut self, record: &PlannedFlight) -> Result<(), StoreError> {
        SessionTable::<PlannedFlight>::insert(&mut self.inner, record).await
    }

    async fn update(&mut self, record: &PlannedFlight) -> Result<(), StoreError> {
        SessionTable::<PlannedFlight>::update(&mut self.inner, record).await
    }
}

impl PositionTable for TestUnit {
    async fn insert_position(&mut self, snapshot: &PositionSnapshot) -> Result<(), StoreError> {
        let n = self.position_writes.fetch_add(1, Ordering::SeqCst);
        if (self.fail_position)(n) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.insert_position(snapshot).await
    }
}
