//! Runtime configuration.
//!
//! Every setting is a command-line flag backed by an environment variable.
//! Before parsing, a dotenv-style secrets file (default
//! [`DEFAULT_SECRETS_FILE`], overridable with `SECRETS_FILE`) is loaded when it
//! exists; its values take precedence over the process environment.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use autoapply::{SecretString, WorkspaceId};
use listener::HEALTH_PATH;

/// Where mounted secrets are looked for when `SECRETS_FILE` is unset.
pub const DEFAULT_SECRETS_FILE: &str = "/etc/secrets/.env";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable, for local development.
    Pretty,
}

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "tfc-autoapply",
    version,
    about = "Run task that auto-applies run-triggered Terraform Cloud runs"
)]
pub struct Args {
    /// HMAC key configured on the run task.
    #[arg(long, env = "HMAC_SECRET", hide_env_values = true)]
    pub hmac_secret: SecretString,

    /// API token used to read runs and workspaces and to apply runs.
    #[arg(long, env = "TFC_API_TOKEN", hide_env_values = true)]
    pub api_token: SecretString,

    /// Platform API root.
    #[arg(long, env = "TFC_API_BASE_URL", default_value = tfc::DEFAULT_BASE_URL)]
    pub api_base_url: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Route receiving run-task callbacks.
    #[arg(long, env = "CALLBACK_PATH", default_value = "/")]
    pub callback_path: String,

    /// Seconds between polls of a run that is not yet confirmable.
    #[arg(long, env = "RETRY_INTERVAL_SECS", default_value_t = 5)]
    pub retry_interval_secs: u64,

    /// Longest time the worker parks while only delayed runs are queued.
    #[arg(long, env = "QUEUE_POLL_INTERVAL_SECS", default_value_t = 2)]
    pub queue_poll_interval_secs: u64,

    /// Comma-separated workspace ids allowed to trigger auto-apply. Empty
    /// means any source workspace.
    #[arg(long, env = "SOURCE_WORKSPACE_ALLOWLIST", value_delimiter = ',')]
    pub source_workspace_allowlist: Vec<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// OTLP collector endpoint; tracing export is disabled when unset.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

/// Configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must not be empty")]
    Empty { name: &'static str },

    #[error("TFC_API_BASE_URL must be an http(s) URL, got '{0}'")]
    InvalidBaseUrl(String),

    #[error("CALLBACK_PATH must start with '/' and differ from the health probe path, got '{0}'")]
    InvalidCallbackPath(String),

    #[error("{name} must be at least 1 second")]
    ZeroInterval { name: &'static str },

    #[error("SOURCE_WORKSPACE_ALLOWLIST contains an empty workspace id")]
    EmptyAllowlistEntry,

    #[error("failed to load secrets file {path}: {source}")]
    SecretsFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub hmac_secret: SecretString,
    pub api_token: SecretString,
    pub api_base_url: String,
    pub listen_addr: SocketAddr,
    pub callback_path: String,
    pub retry_interval: Duration,
    pub queue_poll_interval: Duration,
    pub source_allowlist: Vec<WorkspaceId>,
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl TryFrom<Args> for AppConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.hmac_secret.is_blank() {
            return Err(ConfigError::Empty { name: "HMAC_SECRET" });
        }
        if args.api_token.is_blank() {
            return Err(ConfigError::Empty {
                name: "TFC_API_TOKEN",
            });
        }

        let api_base_url = args.api_base_url.trim().to_string();
        if !(api_base_url.starts_with("https://") || api_base_url.starts_with("http://")) {
            return Err(ConfigError::InvalidBaseUrl(api_base_url));
        }

        if !args.callback_path.starts_with('/') || args.callback_path == HEALTH_PATH {
            return Err(ConfigError::InvalidCallbackPath(args.callback_path));
        }

        if args.retry_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "RETRY_INTERVAL_SECS",
            });
        }
        if args.queue_poll_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "QUEUE_POLL_INTERVAL_SECS",
            });
        }

        let entries: Vec<&str> = args
            .source_workspace_allowlist
            .iter()
            .map(|id| id.trim())
            .collect();
        // An unset-but-present variable parses as one empty entry.
        let source_allowlist = if entries.iter().all(|id| id.is_empty()) {
            Vec::new()
        } else {
            entries
                .into_iter()
                .map(|id| WorkspaceId::new(id).ok_or(ConfigError::EmptyAllowlistEntry))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            hmac_secret: args.hmac_secret,
            api_token: args.api_token,
            api_base_url,
            listen_addr: SocketAddr::new(args.host, args.port),
            callback_path: args.callback_path,
            retry_interval: Duration::from_secs(args.retry_interval_secs),
            queue_poll_interval: Duration::from_secs(args.queue_poll_interval_secs),
            source_allowlist,
            log_format: args.log_format,
            otlp_endpoint: args.otlp_endpoint.filter(|e| !e.trim().is_empty()),
        })
    }
}

/// Path of the secrets file: `SECRETS_FILE` if set, else [`DEFAULT_SECRETS_FILE`].
pub fn secrets_file_path() -> PathBuf {
    std::env::var_os("SECRETS_FILE")
        .filter(|p| !p.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_SECRETS_FILE), PathBuf::from)
}

/// Loads `path` into the process environment if it exists, overriding
/// variables already set. Returns whether a file was loaded.
///
/// # Errors
///
/// [`ConfigError::SecretsFile`] if the file exists but cannot be read or parsed.
pub fn load_secrets_file(path: &Path) -> Result<bool, ConfigError> {
    if !path.is_file() {
        return Ok(false);
    }
    dotenvy::from_path_override(path).map_err(|source| ConfigError::SecretsFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}
