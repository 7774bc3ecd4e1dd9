//! Codec for the `YYYYMMDDHHMMSS` timestamps the VATSIM feed uses for logon times and
//! position reports. All feed timestamps are UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

const LAYOUT: &str = "%Y%m%d%H%M%S";
const LAYOUT_LEN: usize = 14;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("malformed feed timestamp {raw:?}: expected 14 digits YYYYMMDDHHMMSS")]
    Malformed { raw: String },
}

/// Parses a feed timestamp into an instant.
///
/// The layout check runs before calendar parsing so that only the canonical 14-digit form is
/// accepted; distinct accepted strings therefore always map to distinct instants.
pub fn parse_logon_time(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let malformed = || TimestampError::Malformed {
        raw: raw.to_string(),
    };

    if raw.len() != LAYOUT_LEN || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    NaiveDateTime::parse_from_str(raw, LAYOUT)
        .map(|naive| naive.and_utc())
        .map_err(|_| malformed())
}

pub fn format_logon_time(instant: &DateTime<Utc>) -> String {
    instant.format(LAYOUT).to_string()
}
