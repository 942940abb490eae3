use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{Duration, SecondsFormat, Utc};
use hrflow_core::workflow::OVERDUE_SWEEP_MIN_AGE_HOURS;
use hrflow_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub approval_queue: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn spawn(bind_address: &str, port: u16, db_pool: DbPool) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let approval_queue = if database.status == "ready" {
        approval_queue_check(&state.db_pool).await
    } else {
        HealthCheck { status: "degraded", detail: "database unreachable".to_string() }
    };
    let ready = database.status == "ready" && approval_queue.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "hrflow-server runtime initialized".to_string(),
        },
        database,
        approval_queue,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

/// Pending backlog, with the share already past the reminder threshold.
async fn approval_queue_check(pool: &DbPool) -> HealthCheck {
    let cutoff = (Utc::now() - Duration::hours(OVERDUE_SWEEP_MIN_AGE_HOURS))
        .to_rfc3339_opts(SecondsFormat::Micros, true);
    let counts = sqlx::query_as::<_, (i64, i64)>(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN created_at < ?1 THEN 1 ELSE 0 END), 0) \
         FROM absence_request WHERE status = 'pending'",
    )
    .bind(cutoff)
    .fetch_one(pool)
    .await;

    match counts {
        Ok((pending, overdue)) => HealthCheck {
            status: "ready",
            detail: format!(
                "{pending} pending absence requests, {overdue} older than {OVERDUE_SWEEP_MIN_AGE_HOURS}h"
            ),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("approval queue unavailable: {error}") }
        }
    }
}
