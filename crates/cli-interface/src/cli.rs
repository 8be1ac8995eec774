//! CLI command definitions using clap

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use common::error::Result;
use common::LogLevel;
use worker_config::{CliOverrides, ConfigLoader, WorkerConfig};

/// Distributed ML inference benchmarking worker
#[derive(Parser, Debug)]
#[command(name = "bench-worker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags accepted by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Orchestrator base URL
    #[arg(long, visible_alias = "host", global = true)]
    pub orchestrator_url: Option<String>,

    /// Redis host (defaults to the orchestrator host when that is remote)
    #[arg(long, global = true)]
    pub redis_host: Option<String>,

    /// Redis port
    #[arg(long, global = true)]
    pub redis_port: Option<u16>,

    /// Name reported to the orchestrator instead of the detected one
    #[arg(long, global = true)]
    pub device_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Configuration file path
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the platform, device metadata and compute units
    Info {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Check configuration, hardware detection and inference engines
    Validate,

    /// Check that the orchestrator and Redis are reachable
    Test,

    /// Register with the orchestrator and print the worker id
    Enroll,

    /// Run the worker until interrupted
    Start,
}

impl Cli {
    /// Command-line values as the last configuration layer
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            orchestrator_url: self.global.orchestrator_url.clone(),
            redis_host: self.global.redis_host.clone(),
            redis_port: self.global.redis_port,
            device_name: self.global.device_name.clone(),
            log_level: self.global.log_level,
            json_logs: self.global.json_logs,
        }
    }

    /// Resolves the configuration from file, environment and flags
    pub fn load_config(&self) -> Result<WorkerConfig> {
        let mut loader = ConfigLoader::new().with_overrides(self.overrides());
        if let Some(path) = &self.global.config {
            loader = loader.with_file(path);
        }
        loader.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_host_alias_and_globals_after_subcommand() {
        let cli = Cli::try_parse_from([
            "bench-worker",
            "--host",
            "http://10.0.0.5:5000",
            "info",
            "--json",
            "--redis-port",
            "6380",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.command, Command::Info { json: true });
        let overrides = cli.overrides();
        assert_eq!(overrides.orchestrator_url.as_deref(), Some("http://10.0.0.5:5000"));
        assert_eq!(overrides.redis_port, Some(6380));
        assert_eq!(overrides.log_level, Some(LogLevel::Debug));
        assert!(!overrides.json_logs);
    }

    #[test]
    fn test_subcommands() {
        for (arg, expected) in [
            ("validate", Command::Validate),
            ("test", Command::Test),
            ("enroll", Command::Enroll),
            ("start", Command::Start),
        ] {
            let cli = Cli::try_parse_from(["bench-worker", arg]).unwrap();
            assert_eq!(cli.command, expected);
        }
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["bench-worker", "--redis-port", "70000", "start"]).is_err());
        assert!(Cli::try_parse_from(["bench-worker", "--log-level", "loud", "start"]).is_err());
        assert!(Cli::try_parse_from(["bench-worker"]).is_err());
    }

    #[test]
    fn test_flags_win_over_file() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "orchestrator_url = \"http://file-host:5000\"\n[redis]\nport = 7000").unwrap();

        let cli = Cli::try_parse_from([
            "bench-worker",
            "--config",
            file.path().to_str().unwrap(),
            "--redis-host",
            "cache.internal",
            "--device-name",
            "bench-01",
            "validate",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();

        assert_eq!(config.orchestrator_url, "http://file-host:5000");
        assert_eq!(config.redis.host, "cache.internal");
        assert_eq!(config.redis.port, 7000);
        assert_eq!(config.device_name.as_deref(), Some("bench-01"));
    }
}
