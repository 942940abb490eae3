use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use hrflow_core::config::{AppConfig, LoadOptions, CONFIG_SEARCH_PATHS};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let entries: [(&str, String, &[&str]); 11] = [
        ("database.url", redact_url(&config.database.url), &["HRFLOW_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["HRFLOW_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["HRFLOW_DATABASE_TIMEOUT_SECS"],
        ),
        ("server.bind_address", config.server.bind_address.clone(), &["HRFLOW_SERVER_BIND_ADDRESS"]),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["HRFLOW_SERVER_HEALTH_CHECK_PORT"],
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["HRFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        (
            "workflow.sweep_enabled",
            config.workflow.sweep_enabled.to_string(),
            &["HRFLOW_WORKFLOW_SWEEP_ENABLED"],
        ),
        (
            "workflow.sweep_interval_secs",
            config.workflow.sweep_interval_secs.to_string(),
            &["HRFLOW_WORKFLOW_SWEEP_INTERVAL_SECS"],
        ),
        ("logging.level", config.logging.level.clone(), &["HRFLOW_LOGGING_LEVEL", "HRFLOW_LOG_LEVEL"]),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["HRFLOW_LOGGING_FORMAT", "HRFLOW_LOG_FORMAT"],
        ),
        ("config.file", config_file_label(config_file_path.as_deref()), &[]),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in entries {
        let source = if key == "config.file" {
            "discovery".to_string()
        } else {
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
        };
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    CONFIG_SEARCH_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn config_file_label(path: Option<&Path>) -> String {
    path.map(|path| path.display().to_string()).unwrap_or_else(|| "<none>".to_string())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Hides a password embedded in the database URL.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}
