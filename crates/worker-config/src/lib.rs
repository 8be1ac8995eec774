//! Configuration management for the benchmark worker
//!
//! Settings are resolved in layers: built-in defaults, an optional TOML file,
//! `BENCH_WORKER__*` environment variables and finally command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::error::{Error, Result};
use common::{LogLevel, RetryPolicy};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "BENCH_WORKER";

/// Default orchestrator endpoint
pub const DEFAULT_ORCHESTRATOR_URL: &str = "http://localhost:5000";

/// Default Redis host, replaced by the orchestrator host when that is remote
pub const DEFAULT_REDIS_HOST: &str = "localhost";

/// Redis connection and queue naming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: i64,
    /// Queue result payloads are pushed to
    pub results_queue: String,
    /// Prefix of the per-worker in-flight list
    pub processing_prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_REDIS_HOST.to_string(),
            port: 6379,
            db: 0,
            results_queue: "results".to_string(),
            processing_prefix: "jobs:processing".to_string(),
        }
    }
}

impl RedisSettings {
    /// Connection URL understood by the redis client
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Logging output settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Emit one JSON object per line
    pub json: bool,
    /// Also write a daily-rolling log file at this path
    pub file: Option<PathBuf>,
}

/// HTTP client timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

/// Complete worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Base URL of the orchestrator HTTP API
    pub orchestrator_url: String,
    /// Overrides the detected device name
    pub device_name: Option<String>,
    pub redis: RedisSettings,
    pub log: LogConfig,
    pub heartbeat_interval_secs: u64,
    /// Blocking timeout of one broker poll
    pub poll_timeout_ms: u64,
    /// Run count used when a job omits it
    pub default_run_count: u32,
    /// Resource sampling period during load and inference
    pub sample_interval_ms: u64,
    pub http: HttpSettings,
    /// Where downloaded model artifacts are stored; system temp dir when unset
    pub download_dir: Option<PathBuf>,
    pub registration_retry: RetryPolicy,
    pub broker_retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            orchestrator_url: DEFAULT_ORCHESTRATOR_URL.to_string(),
            device_name: None,
            redis: RedisSettings::default(),
            log: LogConfig::default(),
            heartbeat_interval_secs: 10,
            poll_timeout_ms: 1000,
            default_run_count: common::DEFAULT_RUN_COUNT,
            sample_interval_ms: 5,
            http: HttpSettings::default(),
            download_dir: None,
            registration_retry: RetryPolicy::default(),
            broker_retry: RetryPolicy {
                max_attempts: 5,
                base_delay_ms: 500,
                multiplier: 2.0,
                max_delay_ms: 10_000,
                jitter: 0.2,
            },
        }
    }
}

impl WorkerConfig {
    /// Heartbeat period
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Broker poll timeout
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Resource sampling period
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// HTTP connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http.connect_timeout_secs)
    }

    /// HTTP request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_secs)
    }

    /// Directory for downloaded artifacts
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Checks the configuration for values the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.orchestrator_url)
            .map_err(|e| Error::Config(format!("Invalid orchestrator URL '{}': {}", self.orchestrator_url, e)))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(Error::Config(format!(
                "Orchestrator URL '{}' has no host",
                self.orchestrator_url
            )));
        }

        if self.redis.host.trim().is_empty() {
            return Err(Error::Config("Redis host must not be empty".to_string()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(Error::Config("Heartbeat interval must be positive".to_string()));
        }
        if self.poll_timeout_ms == 0 {
            return Err(Error::Config("Poll timeout must be positive".to_string()));
        }
        if self.default_run_count == 0 {
            return Err(Error::Config("Default run count must be positive".to_string()));
        }
        if self.sample_interval_ms == 0 {
            return Err(Error::Config("Sample interval must be positive".to_string()));
        }

        validate_retry("registration_retry", &self.registration_retry)?;
        validate_retry("broker_retry", &self.broker_retry)?;

        Ok(())
    }

    /// Takes the Redis host from the orchestrator URL when Redis is still
    /// pointed at the local default and the orchestrator is remote
    pub fn apply_redis_autodetect(&mut self) {
        if self.redis.host != DEFAULT_REDIS_HOST {
            return;
        }

        let host = match reqwest::Url::parse(&self.orchestrator_url) {
            Ok(url) => match url.host_str() {
                Some(host) => host.trim_matches(|c| c == '[' || c == ']').to_string(),
                None => return,
            },
            Err(_) => return,
        };

        if !is_loopback(&host) {
            info!("Using orchestrator host {} as Redis host", host);
            self.redis.host = host;
        }
    }

    /// Renders the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("Failed to render configuration: {}", e)))
    }
}

fn validate_retry(name: &str, policy: &RetryPolicy) -> Result<()> {
    if policy.max_attempts == 0 {
        return Err(Error::Config(format!("{}.max_attempts must be at least 1", name)));
    }
    if policy.multiplier < 1.0 {
        return Err(Error::Config(format!("{}.multiplier must be >= 1.0", name)));
    }
    if !(0.0..=1.0).contains(&policy.jitter) {
        return Err(Error::Config(format!("{}.jitter must be within [0, 1]", name)));
    }
    Ok(())
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "0.0.0.0")
}

/// Values supplied on the command line; they win over every other layer
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub orchestrator_url: Option<String>,
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    pub device_name: Option<String>,
    pub log_level: Option<LogLevel>,
    pub json_logs: bool,
}

impl CliOverrides {
    fn apply(&self, config: &mut WorkerConfig) {
        if let Some(url) = &self.orchestrator_url {
            config.orchestrator_url = url.clone();
        }
        if let Some(host) = &self.redis_host {
            config.redis.host = host.clone();
        }
        if let Some(port) = self.redis_port {
            config.redis.port = port;
        }
        if let Some(name) = &self.device_name {
            config.device_name = Some(name.clone());
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if self.json_logs {
            config.log.json = true;
        }
    }
}

/// Loads a [`WorkerConfig`] from its layered sources
pub struct ConfigLoader {
    /// Explicit file; missing explicit files are an error
    file: Option<PathBuf>,
    env_prefix: String,
    overrides: CliOverrides,
}

impl ConfigLoader {
    /// Creates a loader reading the default file location and environment
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: ENV_PREFIX.to_string(),
            overrides: CliOverrides::default(),
        }
    }

    /// Uses an explicit configuration file
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Uses a different environment variable prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Applies command-line overrides as the final layer
    pub fn with_overrides(mut self, overrides: CliOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bench-worker").join("config.toml"))
    }

    /// Resolves all layers into a configuration
    pub fn load(&self) -> Result<WorkerConfig> {
        let mut builder = Config::builder();

        match &self.file {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml).required(true));
            }
            None => {
                if let Some(path) = Self::default_path() {
                    builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml).required(false));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: WorkerConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        self.overrides.apply(&mut config);
        config.apply_redis_autodetect();

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
