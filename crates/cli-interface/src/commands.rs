//! Subcommand implementations

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use common::{ComputeUnit, HostMetadata, WorkerIdentity};
use hardware_profiler::{CapabilityDetector, DetectionReport, SystemSnapshot};
use inference_engine::{EngineInfo, EngineRegistry};
use job_broker::{JobBroker, RedisBroker};
use model_manager::{ArtifactFetcher, ModelLoader};
use orchestrator_client::{HttpOrchestratorClient, OrchestratorApi};
use performance_monitor::BenchmarkEngine;
use worker_agent::{install_shutdown_handler, register_with_retry, AgentSettings, WorkerAgent};
use worker_config::WorkerConfig;

use crate::cli::{Cli, Command};

/// Loads configuration, installs logging and runs the selected subcommand
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config().context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.log).context("Failed to initialize logging")?;
    if let Ok(rendered) = config.to_toml() {
        debug!("Effective configuration:\n{}", rendered);
    }

    match cli.command {
        Command::Info { json } => info(&config, json),
        Command::Validate => validate(&config),
        Command::Test => test(&config).await,
        Command::Enroll => enroll(&config).await,
        Command::Start => start(&config).await,
    }
}

fn detector(config: &WorkerConfig, registry: Arc<EngineRegistry>) -> CapabilityDetector {
    CapabilityDetector::new(registry).with_device_name(config.device_name.clone())
}

fn orchestrator(config: &WorkerConfig) -> Result<HttpOrchestratorClient> {
    HttpOrchestratorClient::new(&config.orchestrator_url, config.connect_timeout(), config.request_timeout())
        .context("Failed to create orchestrator client")
}

fn identity(report: DetectionReport) -> WorkerIdentity {
    if report.available_units().is_empty() {
        warn!("No compute unit is available; every job will be rejected");
    }
    WorkerIdentity::new(report.host.device_name.clone(), report.units, report.host)
}

#[derive(Serialize)]
struct InfoOutput<'a> {
    platform: String,
    host: &'a HostMetadata,
    compute_units: Vec<UnitOutput>,
    engines: Vec<EngineInfo>,
}

#[derive(Serialize)]
struct UnitOutput {
    label: String,
    available: bool,
}

impl From<&ComputeUnit> for UnitOutput {
    fn from(unit: &ComputeUnit) -> Self {
        Self {
            label: unit.label(),
            available: unit.available,
        }
    }
}

fn info(config: &WorkerConfig, json: bool) -> Result<()> {
    let registry = Arc::new(EngineRegistry::with_defaults());
    let report = detector(config, registry.clone())
        .detect_all()
        .context("Hardware detection failed")?;
    let host = &report.host;
    let platform = format!("{} {} ({})", host.os, host.os_version, host.architecture);

    if json {
        let output = InfoOutput {
            platform,
            host,
            compute_units: report.units.iter().map(UnitOutput::from).collect(),
            engines: registry.describe(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Platform:      {}", platform);
    println!("Device:        {}", host.device_name);
    println!("Hostname:      {}", host.hostname);
    println!("SoC:           {}", host.soc);
    println!("CPU cores:     {}", host.cpu_cores);
    println!("RAM:           {} GB", host.ram_gb);
    match (&host.discrete_gpu, host.vram_mb) {
        (Some(gpu), Some(vram)) => println!("Discrete GPU:  {} ({} MB)", gpu, vram),
        (Some(gpu), None) => println!("Discrete GPU:  {}", gpu),
        (None, _) => println!("Discrete GPU:  none"),
    }
    println!("UDID:          {}", host.udid);

    println!("\nCompute units:");
    for unit in &report.units {
        let mark = if unit.available { "x" } else { " " };
        println!("  [{}] {}", mark, unit.label());
    }

    println!("\nEngines:");
    for engine in registry.describe() {
        let state = if engine.available { "available" } else { "unavailable" };
        println!("  {} ({}): {} [{}]", engine.name, engine.kind, state, engine.formats.join(", "));
    }

    Ok(())
}

fn validate(config: &WorkerConfig) -> Result<()> {
    let mut problems = Vec::new();

    match config.validate() {
        Ok(()) => println!("Configuration:   ok"),
        Err(e) => problems.push(e.to_string()),
    }

    let registry = Arc::new(EngineRegistry::with_defaults());
    match registry.unavailable_reason() {
        None => println!("Engines:         {}", registry.supported_formats().join(", ")),
        Some(reason) => problems.push(reason),
    }

    match detector(config, registry).detect_all() {
        Ok(report) => {
            let available = report.available_units();
            if available.is_empty() {
                problems.push("No compute unit is available on this host".to_string());
            } else {
                let labels: Vec<String> = available.iter().map(ComputeUnit::label).collect();
                println!("Compute units:   {}", labels.join(", "));
            }
        }
        Err(e) => problems.push(e.to_string()),
    }

    if problems.is_empty() {
        println!("Worker environment is valid");
        return Ok(());
    }

    for problem in &problems {
        eprintln!("  - {}", problem);
    }
    bail!("Validation failed with {} problem(s)", problems.len())
}

async fn test(config: &WorkerConfig) -> Result<()> {
    let hostname = SystemSnapshot::capture()
        .hostname
        .unwrap_or_else(|| "unknown".to_string());
    println!("Hostname:      {}", hostname);

    let client = orchestrator(config)?;
    let orchestrator_ok = match client.health().await {
        Ok(()) => {
            println!("Orchestrator:  reachable at {}", client.base_url());
            true
        }
        Err(e) => {
            println!("Orchestrator:  unreachable ({})", e);
            false
        }
    };

    let redis_ok = match ping_redis(config).await {
        Ok(()) => {
            println!("Redis:         reachable at {}:{}", config.redis.host, config.redis.port);
            true
        }
        Err(e) => {
            println!("Redis:         unreachable ({})", e);
            false
        }
    };

    if !(orchestrator_ok && redis_ok) {
        bail!("Connectivity test failed");
    }
    Ok(())
}

async fn ping_redis(config: &WorkerConfig) -> Result<()> {
    let broker = RedisBroker::new(&config.redis)?;
    tokio::time::timeout(config.connect_timeout(), broker.ping())
        .await
        .context("timed out")??;
    Ok(())
}

async fn enroll(config: &WorkerConfig) -> Result<()> {
    config.validate()?;
    let registry = Arc::new(EngineRegistry::with_defaults());
    let report = detector(config, registry)
        .detect_all()
        .context("Hardware detection failed")?;

    let client = orchestrator(config)?;
    let registered = register_with_retry(&client, identity(report), &config.registration_retry).await?;

    println!("{}", registered.worker_id());
    Ok(())
}

async fn start(config: &WorkerConfig) -> Result<()> {
    config.validate()?;

    let registry = Arc::new(EngineRegistry::with_defaults());
    if let Some(reason) = registry.unavailable_reason() {
        bail!("Cannot start worker: {}", reason);
    }
    let report = detector(config, registry.clone())
        .detect_all()
        .context("Hardware detection failed")?;
    let identity = identity(report);

    let cancel = install_shutdown_handler();

    let api = Arc::new(orchestrator(config)?);
    let broker = Arc::new(RedisBroker::new(&config.redis).context("Failed to create Redis client")?);
    let fetcher = ArtifactFetcher::new(config.download_dir(), config.connect_timeout())?;
    let loader = Arc::new(ModelLoader::new(fetcher, registry, config.sample_interval()));
    let benchmark = Arc::new(BenchmarkEngine::new(config.sample_interval()));

    let agent = WorkerAgent::new(AgentSettings::from(config), api, broker, loader, benchmark);

    info!(
        orchestrator = %config.orchestrator_url,
        redis = %format!("{}:{}", config.redis.host, config.redis.port),
        "Starting worker"
    );

    match agent.run(identity, cancel).await {
        Ok(report) => {
            info!(
                worker_id = %report.worker_id,
                heartbeats = report.heartbeats,
                unpublished = report.unpublished,
                "Worker shut down cleanly"
            );
            Ok(())
        }
        Err(e) if e.is_interrupted() => {
            info!("Shutdown requested before the worker registered");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Worker stopped")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn test_start_names_the_missing_engine_feature() {
        let err = start(&WorkerConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("--features onnx"), "{}", err);
    }

    #[test]
    fn test_invalid_config_fails_validation() {
        let config = WorkerConfig {
            poll_timeout_ms: 0,
            ..WorkerConfig::default()
        };
        assert!(validate(&config).is_err());
    }
}
