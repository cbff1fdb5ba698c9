//! Client configuration and credentials.
//!
//! Layering: built-in defaults, then an optional TOML file, then
//! environment overrides. Credentials only ever come from the environment
//! and loading them fails fast when they are absent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::poll::PollPolicy;

pub const DEFAULT_BASE_URL: &str = "https://dune.xyz";
pub const DEFAULT_GRAPH_URL: &str = "https://core-hsr.dune.xyz/v1/graphql";
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_USER: &str = "DUNE_USER";
pub const ENV_PASSWORD: &str = "DUNE_PASSWORD";
pub const ENV_QUERY_ID: &str = "DUNE_QUERY_ID";
pub const ENV_BASE_URL: &str = "DUNE_BASE_URL";
pub const ENV_GRAPH_URL: &str = "DUNE_GRAPH_URL";
pub const ENV_MAX_RETRIES: &str = "DUNE_MAX_RETRIES";
pub const ENV_POLL_INTERVAL: &str = "DUNE_POLL_INTERVAL_SECS";

/// Errors while loading configuration or credentials.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {var} is not set")]
    MissingEnv { var: String },

    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv { var: String, value: String },

    #[error("could not read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

/// Login credentials for the service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `DUNE_USER` and `DUNE_PASSWORD` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Credentials::from_env`] with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Credentials {
            username: required_var(&lookup, ENV_USER)?,
            password: required_var(&lookup, ENV_PASSWORD)?,
        })
    }
}

/// The pre-existing query identifier from `DUNE_QUERY_ID`, if set.
pub fn query_id_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<u64>, ConfigError> {
    match lookup(ENV_QUERY_ID) {
        None => Ok(None),
        Some(raw) => parse_var(ENV_QUERY_ID, &raw).map(Some),
    }
}

/// Endpoints and timing for a client instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub graph_url: String,
    pub max_retries: u32,
    pub poll: PollPolicy,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            poll: PollPolicy::constant(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Optional keys accepted in the TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    base_url: Option<String>,
    graph_url: Option<String>,
    max_retries: Option<u32>,
    poll_interval_secs: Option<u64>,
    poll_backoff: Option<f64>,
    max_poll_interval_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Defaults, overlaid with `path` (if any), overlaid with the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text).map_err(|message| ConfigError::Parse {
                    path: p.to_path_buf(),
                    message,
                })?
            }
            None => ClientConfig::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Defaults overlaid with the keys present in `text`.
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        let file: FileConfig = toml::from_str(text).map_err(|e| e.to_string())?;
        let mut config = ClientConfig::default();

        if let Some(url) = file.base_url {
            config.base_url = url;
        }
        if let Some(url) = file.graph_url {
            config.graph_url = url;
        }
        if let Some(n) = file.max_retries {
            config.max_retries = n;
        }
        if let Some(secs) = file.poll_interval_secs {
            config.poll.interval = Duration::from_secs(secs);
        }
        if let Some(factor) = file.poll_backoff {
            if !(factor.is_finite() && factor >= 1.0) {
                return Err(format!("poll_backoff must be >= 1.0, got {}", factor));
            }
            config.poll.backoff = factor;
        }
        if let Some(secs) = file.max_poll_interval_secs {
            config.poll.max_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Apply `DUNE_*` overrides found through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(url) = lookup(ENV_GRAPH_URL) {
            self.graph_url = url;
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            self.max_retries = parse_var(ENV_MAX_RETRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL) {
            self.poll.interval = Duration::from_secs(parse_var(ENV_POLL_INTERVAL, &raw)?);
        }
        Ok(())
    }

    pub(crate) fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn required_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<String, ConfigError> {
    match lookup(var) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv {
            var: var.to_string(),
        }),
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: raw.to_string(),
    })
}
