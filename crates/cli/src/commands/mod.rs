pub mod attendance;
pub mod config;
pub mod doctor;
pub mod migrate;
pub mod request;
pub mod seed;
pub mod sweep;

use std::future::Future;

use hrflow_core::config::{AppConfig, LoadOptions};
use hrflow_core::workflow::WorkflowError;
use hrflow_db::{connect_with_settings, migrations, DbPool, RepositoryError};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// `(error_class, message, exit_code)` carried out of a command body.
pub(crate) type Failure = (&'static str, String, u8);

/// Loads config, opens and migrates the database, runs `work`, then closes the pool.
pub(crate) fn with_database<T, F, Fut>(command: &str, work: F) -> Result<T, CommandResult>
where
    F: FnOnce(DbPool) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })?;

    runtime
        .block_on(async {
            let pool = connect_with_settings(
                &config.database.url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5u8))?;

            let result = work(pool.clone()).await;
            pool.close().await;
            result
        })
        .map_err(|(error_class, message, exit_code)| {
            CommandResult::failure(command, error_class, message, exit_code)
        })
}

pub(crate) fn workflow_failure(error: WorkflowError) -> Failure {
    let error_class = match &error {
        WorkflowError::NotFound { .. } => "not_found",
        WorkflowError::NotRequester { .. } | WorkflowError::NotCurrentApprover { .. } => {
            "authorization"
        }
        WorkflowError::Conflict(_) => "conflict",
        WorkflowError::Store(_) => return ("persistence", error.to_string(), 4),
        WorkflowError::RequesterWithoutDepartment(_)
        | WorkflowError::NotPending { .. }
        | WorkflowError::Domain(_) => "workflow_rule",
    };
    (error_class, error.to_string(), 6)
}

pub(crate) fn repository_failure(error: RepositoryError) -> Failure {
    ("persistence", error.to_string(), 4)
}

pub(crate) fn to_data(value: &impl Serialize) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(data) => Some(data),
        Err(error) => {
            tracing::warn!(
                event_name = "cli.payload.data_dropped",
                error = %error,
                "command data could not be serialized; payload sent without data"
            );
            None
        }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
