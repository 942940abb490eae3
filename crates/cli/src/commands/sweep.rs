use chrono::Utc;
use tracing::info;

use hrflow_db::sql_workflow_engine;

use crate::commands::{to_data, with_database, workflow_failure, CommandResult};

/// One overdue-reminder pass, meant to be driven by cron.
pub fn run() -> CommandResult {
    let result = with_database("sweep", |pool| async move {
        let engine = sql_workflow_engine(&pool);
        let report = engine.check_overdue_requests(Utc::now()).await.map_err(workflow_failure)?;
        info!(
            event_name = "cli.sweep.completed",
            correlation_id = "cli-sweep",
            scanned = report.scanned,
            reminded = report.reminded,
            "overdue sweep run from the command line"
        );
        Ok(report)
    });

    match result {
        Ok(report) => CommandResult::success_with_data(
            "sweep",
            format!(
                "scanned {} pending requests, sent {} reminders, skipped {}",
                report.scanned, report.reminded, report.skipped
            ),
            to_data(&report),
        ),
        Err(failure) => failure,
    }
}
