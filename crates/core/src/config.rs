//! Runtime settings for the hrflow CLI and server.
//!
//! Values start from built-in defaults, then `hrflow.toml` (or
//! `config/hrflow.toml`), then `HRFLOW_*` environment variables, then any
//! overrides the caller passes in. The merged result is validated once.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Places searched, in order, when no explicit config path is given.
pub const CONFIG_SEARCH_PATHS: [&str; 2] = ["hrflow.toml", "config/hrflow.toml"];

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

/// SQLite store holding the organization, requests and attendance.
#[derive(Clone, Debug, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Seconds to wait for a free pool connection.
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    /// How long the server waits for an in-flight sweep after ctrl-c.
    pub graceful_shutdown_secs: u64,
}

/// Overdue sweep scheduling for the long-running server.
#[derive(Clone, Debug, Serialize)]
pub struct WorkflowConfig {
    pub sweep_interval_secs: u64,
    pub sweep_enabled: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter level; `RUST_LOG` is not consulted.
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Values supplied by the caller that beat every other source.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub sweep_enabled: Option<bool>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    /// Fail instead of falling back to defaults when no file is found.
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read hrflow config `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("hrflow config `{path}` is not valid TOML: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("hrflow config file `{0}` does not exist")]
    MissingConfigFile(PathBuf),
    #[error("config references `${{{var}}}` but the variable is not set")]
    MissingEnvInterpolation { var: String },
    #[error("config contains a `${{` without a closing `}}`")]
    UnterminatedInterpolation,
    #[error("`{key}` has an unusable value `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid hrflow config: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://hrflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            workflow: WorkflowConfig { sweep_interval_secs: 3600, sweep_enabled: true },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "log format `{other}` is not one of compact, pretty or json"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match find_config_file(options.config_path.as_deref()) {
            Some(path) => config.merge_file(read_file_layer(&path)?),
            None if options.require_file => {
                let wanted = options
                    .config_path
                    .unwrap_or_else(|| PathBuf::from(CONFIG_SEARCH_PATHS[0]));
                return Err(ConfigError::MissingConfigFile(wanted));
            }
            None => {}
        }

        config.merge_env()?;
        config.merge_overrides(options.overrides);
        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self, layer: FileLayer) {
        if let Some(database) = layer.database {
            set(&mut self.database.url, database.url);
            set(&mut self.database.max_connections, database.max_connections);
            set(&mut self.database.timeout_secs, database.timeout_secs);
        }
        if let Some(server) = layer.server {
            set(&mut self.server.bind_address, server.bind_address);
            set(&mut self.server.health_check_port, server.health_check_port);
            set(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }
        if let Some(workflow) = layer.workflow {
            set(&mut self.workflow.sweep_interval_secs, workflow.sweep_interval_secs);
            set(&mut self.workflow.sweep_enabled, workflow.sweep_enabled);
        }
        if let Some(logging) = layer.logging {
            set(&mut self.logging.level, logging.level);
            set(&mut self.logging.format, logging.format);
        }
    }

    fn merge_env(&mut self) -> Result<(), ConfigError> {
        set(&mut self.database.url, env_value(&["HRFLOW_DATABASE_URL"])?);
        set(&mut self.database.max_connections, env_value(&["HRFLOW_DATABASE_MAX_CONNECTIONS"])?);
        set(&mut self.database.timeout_secs, env_value(&["HRFLOW_DATABASE_TIMEOUT_SECS"])?);
        set(&mut self.server.bind_address, env_value(&["HRFLOW_SERVER_BIND_ADDRESS"])?);
        set(&mut self.server.health_check_port, env_value(&["HRFLOW_SERVER_HEALTH_CHECK_PORT"])?);
        set(
            &mut self.server.graceful_shutdown_secs,
            env_value(&["HRFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"])?,
        );
        set(
            &mut self.workflow.sweep_interval_secs,
            env_value(&["HRFLOW_WORKFLOW_SWEEP_INTERVAL_SECS"])?,
        );
        set(&mut self.workflow.sweep_enabled, env_value(&["HRFLOW_WORKFLOW_SWEEP_ENABLED"])?);
        set(&mut self.logging.level, env_value(&["HRFLOW_LOGGING_LEVEL", "HRFLOW_LOG_LEVEL"])?);
        set(&mut self.logging.format, env_value(&["HRFLOW_LOGGING_FORMAT", "HRFLOW_LOG_FORMAT"])?);
        Ok(())
    }

    fn merge_overrides(&mut self, overrides: ConfigOverrides) {
        set(&mut self.database.url, overrides.database_url);
        set(&mut self.logging.level, overrides.log_level);
        set(&mut self.workflow.sweep_enabled, overrides.sweep_enabled);
        set(&mut self.workflow.sweep_interval_secs, overrides.sweep_interval_secs);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_database()?;
        self.check_server()?;
        self.check_workflow()?;
        self.check_logging()
    }

    fn check_database(&self) -> Result<(), ConfigError> {
        let url = self.database.url.trim();
        if !(url.starts_with("sqlite:") || url == ":memory:") {
            return invalid(
                "database.url must point at SQLite (`sqlite://path`, `sqlite::memory:` or `:memory:`)",
            );
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be at least 1");
        }
        if !(1..=300).contains(&self.database.timeout_secs) {
            return invalid("database.timeout_secs must be between 1 and 300");
        }
        Ok(())
    }

    fn check_server(&self) -> Result<(), ConfigError> {
        if self.server.health_check_port == 0 {
            return invalid("server.health_check_port must be a non-zero port");
        }
        if self.server.graceful_shutdown_secs == 0 {
            return invalid("server.graceful_shutdown_secs must be at least 1");
        }
        Ok(())
    }

    fn check_workflow(&self) -> Result<(), ConfigError> {
        if self.workflow.sweep_enabled && self.workflow.sweep_interval_secs < 60 {
            return invalid("workflow.sweep_interval_secs must be at least 60 when the sweep is enabled");
        }
        Ok(())
    }

    fn check_logging(&self) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if LEVELS.contains(&self.logging.level.trim().to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            invalid("logging.level must be trace, debug, info, warn or error")
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Validation(message.to_string()))
}

/// First non-blank variable among `keys`, parsed into the field type.
fn env_value<T: FromStr>(keys: &[&str]) -> Result<Option<T>, ConfigError> {
    let found = keys.iter().find_map(|key| {
        env::var(key).ok().filter(|value| !value.trim().is_empty()).map(|value| (*key, value))
    });
    let Some((key, raw)) = found else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: raw })
}

fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => CONFIG_SEARCH_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists()),
    }
}

fn read_file_layer(path: &Path) -> Result<FileLayer, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&expand_env_refs(&raw)?)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces every `${NAME}` in the raw file text with the variable's value.
fn expand_env_refs(raw: &str) -> Result<String, ConfigError> {
    let mut expanded = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let name = &after[..end];
        let value = env::var(name)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: name.to_string() })?;
        expanded.push_str(&value);
        rest = &after[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

/// Partial `hrflow.toml`; absent keys keep the lower layer's value.
#[derive(Debug, Default, Deserialize)]
struct FileLayer {
    database: Option<DatabaseLayer>,
    server: Option<ServerLayer>,
    workflow: Option<WorkflowLayer>,
    logging: Option<LoggingLayer>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseLayer {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerLayer {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowLayer {
    sweep_interval_secs: Option<u64>,
    sweep_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingLayer {
    level: Option<String>,
    format: Option<LogFormat>,
}
