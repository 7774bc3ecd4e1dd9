pub mod clients;
pub mod timestamp;

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;

pub use clients::{
    Controller, DatafeedSnapshot, FlightKey, Pilot, PlannedFlight, PositionSnapshot, SessionKey,
};

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Controller,
    Pilot,
    Flight,
    Position,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Controller => write!(f, "controller"),
            Self::Pilot => write!(f, "pilot"),
            Self::Flight => write!(f, "flight"),
            Self::Position => write!(f, "position"),
        }
    }
}

/// A feed entity that represents one logon session and is stored under a natural key.
pub trait SessionRecord: Clone + Debug + Send + Sync + 'static {
    const KIND: EntityKind;

    type Key: Clone + Debug + Display + Eq + Hash + Ord + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    /// Raw feed logon timestamp; part of the key and never changed by a merge.
    fn time_logon(&self) -> &str;

    /// Copies every mutable payload field from `incoming`, leaving key fields untouched.
    fn merge_from(&mut self, incoming: &Self);
}
