use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use tracing::info;
use url::Url;

use crate::error::ConfigError;

/// Backend used when nothing else is configured.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";
/// Cadence of the conversation sync loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const ENV_SERVER_URL: &str = "CIPHERLINE_SERVER_URL";
const ENV_DATA_DIR: &str = "CIPHERLINE_DATA_DIR";
const ENV_POLL_INTERVAL_MS: &str = "CIPHERLINE_POLL_INTERVAL_MS";
const ENV_REQUEST_TIMEOUT_SECS: &str = "CIPHERLINE_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: Url,
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_url: Url, data_dir: PathBuf) -> Self {
        Self {
            server_url,
            data_dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Priority: build-time env -> runtime env -> default
        let build_time_url = option_env!("CIPHERLINE_SERVER_URL");
        let runtime_url = lookup(ENV_SERVER_URL);

        let raw_url = build_time_url
            .map(String::from)
            .or(runtime_url)
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let server_url = parse_server_url(&raw_url)?;
        info!(url = %server_url, "Using backend URL");

        let data_dir = match lookup(ENV_DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let mut config = Self::new(server_url, data_dir);
        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS) {
            config.poll_interval = Duration::from_millis(parse_positive(ENV_POLL_INTERVAL_MS, &ms)?);
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout =
                Duration::from_secs(parse_positive(ENV_REQUEST_TIMEOUT_SECS, &secs)?);
        }
        Ok(config)
    }

    pub fn with_server_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.server_url = parse_server_url(raw)?;
        Ok(self)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("cipherline.db")
    }
}

pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("dev", "cipherline", "cipherline")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDir)
}

fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|source| ConfigError::ServerUrl {
        value: raw.to_string(),
        source,
    })
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Number {
            name,
            value: value.to_string(),
        }),
    }
}
