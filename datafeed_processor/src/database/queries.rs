use crate::database::models::QueuedSnapshot;
use shared::vatsim::{Controller, FlightKey, Pilot, PlannedFlight, PositionSnapshot, SessionKey};
use sqlx::{Executor, Postgres};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Claims the oldest queued snapshot not locked by another drain. The row stays locked until
/// the caller's transaction ends.
pub async fn claim_next_snapshot<'e, E>(executor: E) -> Result<Option<QueuedSnapshot>, QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, QueuedSnapshot>(
        r"
        SELECT id, updated_at, payload, created_at
        FROM snapshot_queue
        ORDER BY updated_at
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        ",
    )
    .fetch_optional(executor)
    .await
    .map_err(QueryError::from)
}

pub async fn delete_queued_snapshot<'e, E>(executor: E, id: Uuid) -> Result<(), QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("DELETE FROM snapshot_queue WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await
        .map(|_| ())
        .map_err(QueryError::from)
}

pub async fn find_controller_session<'e, E>(
    executor: E,
    key: &SessionKey,
) -> Result<Option<Controller>, QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Controller>(
        r"
        SELECT
            cid, callsign, time_logon, realname, server, frequency, facility_type, rating,
            visual_range, atis_message, time_last_atis_received, latitude, longitude
        FROM controller_sessions
        WHERE cid = $1 AND callsign = $2 AND time_logon = $3
        ",
    )
    .bind(&key.cid)
    .bind(&key.callsign)
    .bind(&key.time_logon)
    .fetch_optional(executor)
    .await
    .map_err(QueryError::from)
}

pub async fn insert_controller_session<'e, E>(
    executor: E,
    controller: &Controller,
) -> Result<(), QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO controller_sessions (
            cid,
            callsign,
            time_logon,
            realname,
            server,
            frequency,
            facility_type,
            rating,
            visual_range,
            atis_message,
            time_last_atis_received,
            latitude,
            longitude
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ",
    )
    .bind(&controller.cid)
    .bind(&controller.callsign)
    .bind(&controller.time_logon)
    .bind(&controller.realname)
    .bind(&controller.server)
    .bind(&controller.frequency)
    .bind(controller.facility_type)
    .bind(controller.rating)
    .bind(controller.visual_range)
    .bind(&controller.atis_message)
    .bind(&controller.time_last_atis_received)
    .bind(controller.latitude)
    .bind(controller.longitude)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(QueryError::from)
}

/// Returns the number of rows matched by the natural key.
pub async fn update_controller_session<'e, E>(
    executor: E,
    controller: &Controller,
) -> Result<u64, QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r"
        UPDATE controller_sessions
        SET
            realname = $4,
            server = $5,
            frequency = $6,
            facility_type = $7,
            rating = $8,
            visual_range = $9,
            atis_message = $10,
            time_last_atis_received = $11,
            latitude = $12,
            longitude = $13,
            last_seen = now()
        WHERE cid = $1 AND callsign = $2 AND time_logon = $3
        ",
    )
    .bind(&controller.cid)
    .bind(&controller.callsign)
    .bind(&controller.time_logon)
    .bind(&controller.realname)
    .bind(&controller.server)
    .bind(&controller.frequency)
    .bind(controller.facility_type)
    .bind(controller.rating)
    .bind(controller.visual_range)
    .bind(&controller.atis_message)
    .bind(&controller.time_last_atis_received)
    .bind(controller.latitude)
    .bind(controller.longitude)
    .execute(executor)
    .await
    .map_err(QueryError::from)?;

    Ok(result.rows_affected())
}

pub async fn find_pilot_session<'e, E>(
    executor: E,
    key: &SessionKey,
) -> Result<Option<Pilot>, QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Pilot>(
        r"
        SELECT
            cid, callsign, time_logon, realname, server, latitude, longitude, altitude,
            groundspeed, heading, transponder, qnh_mb
        FROM pilot_sessions
        WHERE cid = $1 AND callsign = $2 AND time_logon = $3
        ",
    )
    .bind(&key.cid)
    .bind(&key.callsign)
    .bind(&key.time_logon)
    .fetch_optional(executor)
    .await
    .map_err(QueryError::from)
}

pub async fn insert_pilot_session<'e, E>(executor: E, pilot: &Pilot) -> Result<(), QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO pilot_sessions (
            cid,
            callsign,
            time_logon,
            realname,
            server,
            latitude,
            longitude,
            altitude,
            groundspeed,
            heading,
            transponder,
            qnh_mb
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ",
    )
    .bind(&pilot.cid)
    .bind(&pilot.callsign)
    .bind(&pilot.time_logon)
    .bind(&pilot.realname)
    .bind(&pilot.server)
    .bind(pilot.latitude)
    .bind(pilot.longitude)
    .bind(pilot.altitude)
    .bind(pilot.groundspeed)
    .bind(pilot.heading)
    .bind(&pilot.transponder)
    .bind(pilot.qnh_mb)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(QueryError::from)
}

pub async fn update_pilot_session<'e, E>(executor: E, pilot: &Pilot) -> Result<u64, QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r"
        UPDATE pilot_sessions
        SET
            realname = $4,
            server = $5,
            latitude = $6,
            longitude = $7,
            altitude = $8,
            groundspeed = $9,
            heading = $10,
            transponder = $11,
            qnh_mb = $12,
            last_seen = now()
        WHERE cid = $1 AND callsign = $2 AND time_logon = $3
        ",
    )
    .bind(&pilot.cid)
    .bind(&pilot.callsign)
    .bind(&pilot.time_logon)
    .bind(&pilot.realname)
    .bind(&pilot.server)
    .bind(pilot.latitude)
    .bind(pilot.longitude)
    .bind(pilot.altitude)
    .bind(pilot.groundspeed)
    .bind(pilot.heading)
    .bind(&pilot.transponder)
    .bind(pilot.qnh_mb)
    .execute(executor)
    .await
    .map_err(QueryError::from)?;

    Ok(result.rows_affected())
}

pub async fn find_flight_plan<'e, E>(
    executor: E,
    key: &FlightKey,
) -> Result<Option<PlannedFlight>, QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, PlannedFlight>(
        r"
        SELECT
            cid, callsign, time_logon, departure_airport, destination_airport, aircraft,
            tas_cruise, flight_rules, cruise_altitude, route, remarks, alternate_airport,
            departure_time, hours_enroute, minutes_enroute, hours_fuel, minutes_fuel
        FROM flight_plans
        WHERE cid = $1
            AND callsign = $2
            AND time_logon = $3
            AND departure_airport = $4
            AND destination_airport = $5
        ",
    )
    .bind(&key.session.cid)
    .bind(&key.session.callsign)
    .bind(&key.session.time_logon)
    .bind(&key.departure_airport)
    .bind(&key.destination_airport)
    .fetch_optional(executor)
    .await
    .map_err(QueryError::from)
}

pub async fn insert_flight_plan<'e, E>(
    executor: E,
    flight: &PlannedFlight,
) -> Result<(), QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO flight_plans (
            cid,
            callsign,
            time_logon,
            departure_airport,
            destination_airport,
            aircraft,
            tas_cruise,
            flight_rules,
            cruise_altitude,
            route,
            remarks,
            alternate_airport,
            departure_time,
            hours_enroute,
            minutes_enroute,
            hours_fuel,
            minutes_fuel
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ",
    )
    .bind(&flight.cid)
    .bind(&flight.callsign)
    .bind(&flight.time_logon)
    .bind(&flight.departure_airport)
    .bind(&flight.destination_airport)
    .bind(&flight.aircraft)
    .bind(flight.tas_cruise)
    .bind(&flight.flight_rules)
    .bind(&flight.cruise_altitude)
    .bind(&flight.route)
    .bind(&flight.remarks)
    .bind(&flight.alternate_airport)
    .bind(&flight.departure_time)
    .bind(flight.hours_enroute)
    .bind(flight.minutes_enroute)
    .bind(flight.hours_fuel)
    .bind(flight.minutes_fuel)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(QueryError::from)
}

pub async fn update_flight_plan<'e, E>(
    executor: E,
    flight: &PlannedFlight,
) -> Result<u64, QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r"
        UPDATE flight_plans
        SET
            aircraft = $6,
            tas_cruise = $7,
            flight_rules = $8,
            cruise_altitude = $9,
            route = $10,
            remarks = $11,
            alternate_airport = $12,
            departure_time = $13,
            hours_enroute = $14,
            minutes_enroute = $15,
            hours_fuel = $16,
            minutes_fuel = $17,
            last_seen = now()
        WHERE cid = $1
            AND callsign = $2
            AND time_logon = $3
            AND departure_airport = $4
            AND destination_airport = $5
        ",
    )
    .bind(&flight.cid)
    .bind(&flight.callsign)
    .bind(&flight.time_logon)
    .bind(&flight.departure_airport)
    .bind(&flight.destination_airport)
    .bind(&flight.aircraft)
    .bind(flight.tas_cruise)
    .bind(&flight.flight_rules)
    .bind(&flight.cruise_altitude)
    .bind(&flight.route)
    .bind(&flight.remarks)
    .bind(&flight.alternate_airport)
    .bind(&flight.departure_time)
    .bind(flight.hours_enroute)
    .bind(flight.minutes_enroute)
    .bind(flight.hours_fuel)
    .bind(flight.minutes_fuel)
    .execute(executor)
    .await
    .map_err(QueryError::from)?;

    Ok(result.rows_affected())
}

pub async fn insert_pilot_position<'e, E>(
    executor: E,
    snapshot: &PositionSnapshot,
) -> Result<Uuid, QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    let id = Uuid::now_v7();

    sqlx::query(
        r"
        INSERT INTO pilot_positions (
            id,
            cid,
            callsign,
            time_logon,
            time_stamp,
            latitude,
            longitude,
            altitude,
            groundspeed,
            heading
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ",
    )
    .bind(id)
    .bind(&snapshot.cid)
    .bind(&snapshot.callsign)
    .bind(&snapshot.time_logon)
    .bind(snapshot.time_stamp)
    .bind(snapshot.latitude)
    .bind(snapshot.longitude)
    .bind(snapshot.altitude)
    .bind(snapshot.groundspeed)
    .bind(snapshot.heading)
    .execute(executor)
    .await
    .map_err(QueryError::from)?;

    Ok(id)
}
