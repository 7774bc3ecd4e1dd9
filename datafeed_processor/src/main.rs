use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use datafeed_processor::database::PgSessionStore;
use datafeed_processor::database::queries::{claim_next_snapshot, delete_queued_snapshot};
use datafeed_processor::error::{
    BacklogProcessingError, PayloadProcessingError, ProcessorMainError,
};
use datafeed_processor::events::{EventCounts, EventSink, StatsSink, TracingSink};
use datafeed_processor::{BatchIngest, Reconciler, RetryPolicy, SnapshotReport};
use parking_lot::RwLock;
use serde::Serialize;
use shared::error::InitializationError;
use shared::vatsim::DatafeedSnapshot;
use shared::{
    HealthConfig, SNAPSHOT_QUEUE_NAME, init_tracing, initialize_db, load_config,
    shutdown_listener,
};
use sqlx::postgres::PgListener;
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type Ingest = BatchIngest<PgSessionStore>;

#[tokio::main]
async fn main() -> Result<(), ProcessorMainError> {
    let config = load_config().map_err(InitializationError::from)?;
    init_tracing(&config.logging)?;

    let starved = config.starved_workers();
    if starved > 0 {
        warn!(
            workers = config.reconciler.workers,
            max_connections = config.postgres.max_connections,
            starved,
            "more reconcile workers than free pool connections, expect store timeouts under load"
        );
    }

    let db_pool = initialize_db(&config.postgres).await?;

    let stats = StatsSink::default();
    let sink: Arc<dyn EventSink> = Arc::new((TracingSink, stats.clone()));
    let reconciler = Reconciler::new(
        Arc::new(PgSessionStore::new(db_pool.clone())),
        sink,
        RetryPolicy::from(&config.reconciler),
    );
    let ingest = Arc::new(BatchIngest::new(reconciler, config.reconciler.workers));

    // Shared with the health check endpoint
    let last_processed_snapshot = Arc::new(RwLock::new(None));

    // Cancellation token shared across tasks; listener cancels on SIGINT/SIGTERM.
    let shutdown_token = CancellationToken::new();

    let mut signal_handle = tokio::spawn(shutdown_listener(Some(shutdown_token.clone())));
    let mut axum_handle = tokio::spawn(run_health_server(
        config.health.clone(),
        HealthState {
            last_processed_snapshot: Arc::clone(&last_processed_snapshot),
            stats,
        },
        shutdown_token.clone(),
    ));
    let mut processor_handle = tokio::spawn(run_snapshot_processing_loop(
        db_pool,
        ingest,
        Arc::clone(&last_processed_snapshot),
        shutdown_token.clone(),
    ));

    let mut first_err: Option<ProcessorMainError> = None;
    let mut axum_done = false;
    let mut processor_done = false;

    tokio::select! {
        res = &mut axum_handle => {
            info!("axum task completed first, propagating cancellation token to other tasks");
            axum_done = true;
            shutdown_token.cancel();
            record_task_result(res.map(|r| r.map_err(ProcessorMainError::from)), &mut first_err);
        }
        res = &mut processor_handle => {
            info!("processor task completed first, propagating cancellation token to other tasks");
            processor_done = true;
            shutdown_token.cancel();
            record_task_result(res, &mut first_err);
        }
        res = &mut signal_handle => {
            info!("SIGINT/SIGTERM listener task completed first, propagating cancellation token to other tasks");
            shutdown_token.cancel();
            if let Err(join) = res {
                warn!(error = ?join, "error with SIGINT/SIGTERM listener task");
                first_err.get_or_insert(join.into());
            }
        }
    }

    if !axum_done {
        info!("awaiting completion of axum task");
        let res = axum_handle.await;
        record_task_result(res.map(|r| r.map_err(ProcessorMainError::from)), &mut first_err);
    }
    if !processor_done {
        info!("awaiting completion of processor task");
        record_task_result(processor_handle.await, &mut first_err);
    }

    first_err.map_or(Ok(()), Err)
}

fn record_task_result(
    res: Result<Result<(), ProcessorMainError>, tokio::task::JoinError>,
    first_err: &mut Option<ProcessorMainError>,
) {
    match res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(error = ?e, "task completed due to error");
            first_err.get_or_insert(e);
        }
        Err(join) => {
            warn!(error = ?join, "task completed due to error");
            first_err.get_or_insert(join.into());
        }
    }
}

#[derive(Clone)]
struct HealthState {
    last_processed_snapshot: Arc<RwLock<Option<DateTime<Utc>>>>,
    stats: StatsSink,
}

#[derive(Serialize)]
struct HealthResponse {
    last_processed_snapshot: Option<DateTime<Utc>>,
    events: EventCounts,
}

async fn run_health_server(
    config: HealthConfig,
    state: HealthState,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    info!(address = %config.bind_address, "starting axum health server");
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(state);
    let listener = TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    let body = HealthResponse {
        last_processed_snapshot: *state.last_processed_snapshot.read(),
        events: state.stats.counts(),
    };

    (StatusCode::OK, Json(body))
}

async fn run_snapshot_processing_loop(
    db_pool: Pool<Postgres>,
    ingest: Arc<Ingest>,
    last_processed_snapshot: Arc<RwLock<Option<DateTime<Utc>>>>,
    shutdown: CancellationToken,
) -> Result<(), ProcessorMainError> {
    // Process any backlog before listening
    info!("starting processing backlog of queued snapshots");
    process_pending_snapshots(&db_pool, &ingest, &last_processed_snapshot).await?;

    let mut listener = PgListener::connect_with(&db_pool)
        .await
        .map_err(InitializationError::from)?;
    listener
        .listen(SNAPSHOT_QUEUE_NAME)
        .await
        .map_err(InitializationError::from)?;
    info!("listening for new snapshots via Postgres NOTIFY");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, exiting processor loop");
                break;
            }
            recv = listener.recv() => {
                match recv {
                    Ok(notification) => {
                        trace!(payload = notification.payload(), "received snapshot notification");
                        process_pending_snapshots(&db_pool, &ingest, &last_processed_snapshot)
                            .await?;
                    }
                    Err(e) => {
                        warn!(error = ?e, "error receiving Postgres notification");
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Drains the queue one snapshot at a time. A snapshot's queue row is deleted and committed as
/// soon as it is ingested, so a later failure never hands it back to the next drain.
/// Malformed payloads are dropped from the queue.
async fn process_pending_snapshots(
    pool: &Pool<Postgres>,
    ingest: &Ingest,
    last_processed_snapshot: &RwLock<Option<DateTime<Utc>>>,
) -> Result<(), BacklogProcessingError> {
    loop {
        let mut tx = pool.begin().await?;
        let Some(message) = claim_next_snapshot(&mut *tx).await? else {
            tx.commit().await?;
            break;
        };

        let processed = match ingest_queued_payload(ingest, message.payload).await {
            Ok(report) => {
                debug!(
                    id = %message.id,
                    updated_at = ?message.updated_at,
                    report = ?report,
                    "snapshot ingested"
                );
                true
            }
            Err(PayloadProcessingError::Deserialize(e)) => {
                warn!(
                    id = %message.id,
                    error = ?e,
                    "dropping queued snapshot with malformed payload"
                );
                false
            }
            Err(e) => {
                tx.rollback().await?;
                return Err(e.into());
            }
        };

        delete_queued_snapshot(&mut *tx, message.id).await?;
        tx.commit().await?;
        if processed {
            *last_processed_snapshot.write() = Some(message.updated_at);
        }
    }

    Ok(())
}

async fn ingest_queued_payload(
    ingest: &Ingest,
    payload: serde_json::Value,
) -> Result<SnapshotReport, PayloadProcessingError> {
    let snapshot = serde_json::from_value::<DatafeedSnapshot>(payload)?;
    Ok(ingest.ingest_snapshot(snapshot).await?)
}
