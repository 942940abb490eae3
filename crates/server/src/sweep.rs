use std::time::Duration;

use chrono::Utc;
use hrflow_core::config::WorkflowConfig;
use hrflow_core::workflow::{SweepReport, WorkflowError};
use hrflow_db::{sql_workflow_engine, DbPool, SqlWorkflowEngine};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Starts the periodic overdue sweep. Returns `None` when sweeping is disabled.
pub fn spawn(
    config: &WorkflowConfig,
    db_pool: DbPool,
    shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if !config.sweep_enabled {
        info!(event_name = "system.sweep.disabled", correlation_id = "bootstrap", "overdue sweep disabled");
        return None;
    }

    let period = Duration::from_secs(config.sweep_interval_secs.max(1));
    info!(
        event_name = "system.sweep.start",
        correlation_id = "bootstrap",
        interval_secs = period.as_secs(),
        "overdue sweep scheduled"
    );
    Some(tokio::spawn(run_loop(sql_workflow_engine(&db_pool), period, shutdown)))
}

async fn run_loop(engine: SqlWorkflowEngine, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(error) = run_once(&engine).await {
                    error!(
                        event_name = "system.sweep.failed",
                        correlation_id = "sweep",
                        error = %error,
                        "overdue sweep failed; retrying on next tick"
                    );
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(event_name = "system.sweep.stopped", correlation_id = "shutdown", "overdue sweep stopped");
                    return;
                }
            }
        }
    }
}

pub async fn run_once(engine: &SqlWorkflowEngine) -> Result<SweepReport, WorkflowError> {
    let report = engine.check_overdue_requests(Utc::now()).await?;
    info!(
        event_name = "system.sweep.tick",
        correlation_id = "sweep",
        scanned = report.scanned,
        reminded = report.reminded,
        skipped = report.skipped,
        "overdue sweep tick finished"
    );
    Ok(report)
}
