use crate::vatsim::{EntityKind, SessionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Natural key shared by controller and pilot sessions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub cid: String,
    pub callsign: String,
    pub time_logon: String,
}

impl SessionKey {
    pub fn new(
        cid: impl Into<String>,
        callsign: impl Into<String>,
        time_logon: impl Into<String>,
    ) -> Self {
        Self {
            cid: cid.into(),
            callsign: callsign.into(),
            time_logon: time_logon.into(),
        }
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.cid, self.callsign, self.time_logon)
    }
}

/// A flight plan is one session plus the planned city pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlightKey {
    pub session: SessionKey,
    pub departure_airport: String,
    pub destination_airport: String,
}

impl Display for FlightKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.session, self.departure_airport, self.destination_airport
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Controller {
    pub cid: String,
    pub callsign: String,
    pub time_logon: String,
    pub realname: String,
    pub server: String,
    pub frequency: String,
    pub facility_type: i32,
    pub rating: i32,
    pub visual_range: i32,
    pub atis_message: String,
    pub time_last_atis_received: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl SessionRecord for Controller {
    const KIND: EntityKind = EntityKind::Controller;
    type Key = SessionKey;

    fn key(&self) -> SessionKey {
        SessionKey::new(&self.cid, &self.callsign, &self.time_logon)
    }

    fn time_logon(&self) -> &str {
        &self.time_logon
    }

    fn merge_from(&mut self, incoming: &Self) {
        self.realname.clone_from(&incoming.realname);
        self.server.clone_from(&incoming.server);
        self.frequency.clone_from(&incoming.frequency);
        self.facility_type = incoming.facility_type;
        self.rating = incoming.rating;
        self.visual_range = incoming.visual_range;
        self.atis_message.clone_from(&incoming.atis_message);
        self.time_last_atis_received
            .clone_from(&incoming.time_last_atis_received);
        self.latitude = incoming.latitude;
        self.longitude = incoming.longitude;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Pilot {
    pub cid: String,
    pub callsign: String,
    pub time_logon: String,
    pub realname: String,
    pub server: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub groundspeed: i32,
    pub heading: i32,
    pub transponder: String,
    pub qnh_mb: i32,
}

impl SessionRecord for Pilot {
    const KIND: EntityKind = EntityKind::Pilot;
    type Key = SessionKey;

    fn key(&self) -> SessionKey {
        SessionKey::new(&self.cid, &self.callsign, &self.time_logon)
    }

    fn time_logon(&self) -> &str {
        &self.time_logon
    }

    fn merge_from(&mut self, incoming: &Self) {
        self.realname.clone_from(&incoming.realname);
        self.server.clone_from(&incoming.server);
        self.latitude = incoming.latitude;
        self.longitude = incoming.longitude;
        self.altitude = incoming.altitude;
        self.groundspeed = incoming.groundspeed;
        self.heading = incoming.heading;
        self.transponder.clone_from(&incoming.transponder);
        self.qnh_mb = incoming.qnh_mb;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PlannedFlight {
    pub cid: String,
    pub callsign: String,
    pub time_logon: String,
    pub departure_airport: String,
    pub destination_airport: String,
    pub aircraft: String,
    pub tas_cruise: i32,
    /// `I`, `V`, `Y` or `Z` as filed.
    pub flight_rules: String,
    pub cruise_altitude: String,
    pub route: String,
    pub remarks: String,
    pub alternate_airport: String,
    pub departure_time: String,
    pub hours_enroute: i32,
    pub minutes_enroute: i32,
    pub hours_fuel: i32,
    pub minutes_fuel: i32,
}

impl SessionRecord for PlannedFlight {
    const KIND: EntityKind = EntityKind::Flight;
    type Key = FlightKey;

    fn key(&self) -> FlightKey {
        FlightKey {
            session: SessionKey::new(&self.cid, &self.callsign, &self.time_logon),
            departure_airport: self.departure_airport.clone(),
            destination_airport: self.destination_airport.clone(),
        }
    }

    fn time_logon(&self) -> &str {
        &self.time_logon
    }

    fn merge_from(&mut self, incoming: &Self) {
        self.aircraft.clone_from(&incoming.aircraft);
        self.tas_cruise = incoming.tas_cruise;
        self.flight_rules.clone_from(&incoming.flight_rules);
        self.cruise_altitude.clone_from(&incoming.cruise_altitude);
        self.route.clone_from(&incoming.route);
        self.remarks.clone_from(&incoming.remarks);
        self.alternate_airport.clone_from(&incoming.alternate_airport);
        self.departure_time.clone_from(&incoming.departure_time);
        self.hours_enroute = incoming.hours_enroute;
        self.minutes_enroute = incoming.minutes_enroute;
        self.hours_fuel = incoming.hours_fuel;
        self.minutes_fuel = incoming.minutes_fuel;
    }
}

/// One position report for a pilot session. Snapshots have no identity of their own.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PositionSnapshot {
    pub cid: String,
    pub callsign: String,
    pub time_logon: String,
    pub time_stamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub groundspeed: i32,
    pub heading: i32,
}

impl PositionSnapshot {
    pub fn pilot_key(&self) -> SessionKey {
        SessionKey::new(&self.cid, &self.callsign, &self.time_logon)
    }
}

/// One poll of the feed, as handed over by the fetcher.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatafeedSnapshot {
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub controllers: Vec<Controller>,
    #[serde(default)]
    pub pilots: Vec<Pilot>,
    #[serde(default)]
    pub flights: Vec<PlannedFlight>,
    #[serde(default)]
    pub positions: Vec<Option<PositionSnapshot>>,
}
