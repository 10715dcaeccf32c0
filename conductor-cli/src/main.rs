use anyhow::{Context, Result};
use clap::Parser;
use conductor_config::{
    ConductorConfig, ConfigLoader, DistributionKind, LabConfig, LogLevel, Validatable,
};
use conductor_exchange::{
    BrokerAddress, Controller, Lab, MemoryBroker, MqttTransport, PeerNode, ReconnectPolicy,
    SimulatedWorker, Transport,
};
use conductor_execution::{
    strategy_for, CycleReport, IncrementalTestExecutor, NoopDownloader, TestProfile,
};
use conductor_logging::init_logging;
use conductor_protocol::{PeerInfo, Role, Topics};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod cli;

const PEER_WATCH_INTERVAL: Duration = Duration::from_millis(500);

use cli::{Cli, Commands, ConfigCommands};

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<ConductorConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                info!("Loading configuration from: {:?}", path);
                loader
                    .from_file(path)
                    .context(format!("Failed to load configuration from {:?}", path))
            } else {
                warn!("Configuration file not found: {:?}. Using defaults.", path);
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

/// Transport for the networked broker named by `exchange.url`
fn networked_transport(config: &ConductorConfig, client_name: &str) -> Result<Arc<dyn Transport>> {
    let url = config.exchange.url.as_str();
    match BrokerAddress::parse(url)? {
        BrokerAddress::Mqtt { host, port } => {
            info!("Using MQTT broker {}:{}", host, port);
            Ok(Arc::new(MqttTransport::new(host, port, client_name)))
        }
        BrokerAddress::Memory => Err(anyhow::anyhow!(
            "{} is the in-process broker; use `conductor lab` or point exchange.url at an MQTT broker",
            url
        )),
    }
}

/// Drive the ramp to completion or interruption and print its history
async fn execute(
    controller: Arc<Controller>,
    config: &ConductorConfig,
    distribution: DistributionKind,
) -> bool {
    let mut execution = config.execution.clone();
    execution.distribution = distribution;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the test");
            interrupt.cancel();
        }
    });

    let mut executor = IncrementalTestExecutor::new(
        controller.clone(),
        strategy_for(execution.distribution, controller),
        Arc::new(NoopDownloader),
        TestProfile::from_config(&config.test),
        &execution,
    )
    .with_cancellation(cancel);

    let passed = executor.run().await;
    print_history(executor.history());
    passed
}

fn verdict(passed: bool) -> Result<()> {
    if passed {
        println!("✅ Test passed");
        Ok(())
    } else {
        Err(anyhow::anyhow!("Test failed"))
    }
}

/// Run the ramp against a lab on an in-process broker
async fn lab_command(
    config: ConductorConfig,
    distribution: Option<DistributionKind>,
    workers: Option<usize>,
    inspectors: Option<usize>,
    breaking_point: Option<u64>,
) -> Result<()> {
    let mut lab_config = config.lab.clone().unwrap_or_default();
    if let Some(workers) = workers {
        lab_config.workers = workers;
    }
    if let Some(inspectors) = inspectors {
        lab_config.inspectors = inspectors;
    }
    if let Some(breaking_point) = breaking_point {
        lab_config.breaking_point = breaking_point;
    }
    lab_config
        .validate()
        .context("Invalid lab configuration")?;

    let distribution = distribution.unwrap_or(config.execution.distribution);

    let broker = MemoryBroker::new();
    let controller = Arc::new(
        Controller::connect(Arc::new(broker.transport()), &config.exchange)
            .await
            .context("Failed to connect the controller")?,
    );

    // Fixed-topology strategies expect peers that already carry their role
    let preassigned = matches!(
        distribution,
        DistributionKind::Legacy | DistributionKind::NonAssigning
    );
    let lab = start_lab(&broker, &config, &lab_config, preassigned).await?;

    let passed = execute(controller.clone(), &config, distribution).await;

    lab.shutdown().await;
    if let Err(err) = controller.disconnect().await {
        warn!("Controller did not disconnect cleanly: {}", err);
    }

    verdict(passed)
}

/// Run the ramp against the peers connected to the configured broker
async fn run_command(config: ConductorConfig, distribution: Option<DistributionKind>) -> Result<()> {
    let distribution = distribution.unwrap_or(config.execution.distribution);
    let transport = networked_transport(&config, &config.exchange.client_name)?;
    let controller = Arc::new(
        Controller::connect(transport, &config.exchange)
            .await
            .context(format!("Failed to connect to {}", config.exchange.url))?,
    );

    let passed = execute(controller.clone(), &config, distribution).await;

    if let Err(err) = controller.disconnect().await {
        warn!("Controller did not disconnect cleanly: {}", err);
    }

    verdict(passed)
}

/// Serve as a simulated peer on the configured broker until halted or interrupted
async fn peer_command(
    config: ConductorConfig,
    name: String,
    role: Option<Role>,
    host: String,
) -> Result<()> {
    let transport = networked_transport(&config, &name)?;
    let lab_config = config.lab.clone().unwrap_or_default();
    let role = role.unwrap_or(Role::Other);

    let node = PeerNode::start(
        transport,
        ReconnectPolicy::from_config(&config.exchange.reconnect),
        Topics::new(config.exchange.topic_root.as_str()),
        PeerInfo::new(name, host, role),
        Arc::new(SimulatedWorker::from_config(&lab_config)),
    )
    .await
    .context(format!("Failed to join {}", config.exchange.url))?;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("Interrupted, leaving the exchange");
                break;
            }
            _ = tokio::time::sleep(PEER_WATCH_INTERVAL) => {
                if node.is_stopped() {
                    info!("Peer halted by the controller");
                    break;
                }
            }
        }
    }

    node.shutdown().await;
    Ok(())
}

async fn start_lab(
    broker: &MemoryBroker,
    config: &ConductorConfig,
    lab_config: &LabConfig,
    preassigned: bool,
) -> Result<Lab> {
    info!(
        "Starting lab with {} workers and {} inspectors",
        lab_config.workers, lab_config.inspectors
    );
    Lab::start(
        broker,
        &Topics::new(config.exchange.topic_root.as_str()),
        lab_config,
        preassigned,
    )
    .await
    .context("Failed to start the lab")
}

fn print_history(history: &[CycleReport]) {
    println!("{:>5}  {:>8}  {:>8}  verdict", "cycle", "rate", "parallel");
    for report in history {
        let verdict = if report.successful { "passed" } else { "failed" };
        println!(
            "{:>5}  {:>8}  {:>8}  {}",
            report.cycle, report.rate, report.parallel_count, verdict
        );
        for reason in &report.reasons {
            println!("{:>27}{}", "", reason);
        }
    }
}

/// Print every step of the configured ramp
fn plan_command(config: &ConductorConfig) {
    let mut profile = TestProfile::from_config(&config.test);
    println!("{:>5}  {:>8}  {:>8}", "cycle", "rate", "parallel");
    loop {
        println!(
            "{:>5}  {:>8}  {:>8}",
            profile.test_execution_number, profile.rate, profile.parallel_count
        );
        if profile.is_completed() {
            break;
        }
        profile.increment();
    }
}

/// Handle configuration validation
fn handle_config_validate(config_file: &Path) -> Result<()> {
    if !config_file.exists() {
        return Err(anyhow::anyhow!(
            "Configuration file not found: {:?}",
            config_file
        ));
    }

    match ConfigLoader::new().from_file(config_file) {
        Ok(_config) => {
            println!("✅ Configuration file is valid");
            info!("Configuration validation passed");
            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration validation failed: {}", e);
            error!("Configuration validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handle sample configuration output
fn handle_config_sample(output: Option<&PathBuf>, force: bool) -> Result<()> {
    let sample = ConductorConfig::generate_sample();

    let Some(output) = output else {
        print!("{}", sample);
        return Ok(());
    };

    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    fs::write(output, sample).context(format!("Failed to write {:?}", output))?;
    println!("✅ Sample configuration written to {:?}", output);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first
    let mut config = load_config(cli.config.as_ref())?;

    if let Some(ref level) = cli.log_level {
        config.logging.level = level
            .parse::<LogLevel>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Lab {
            distribution,
            workers,
            inspectors,
            breaking_point,
        } => lab_command(config, distribution, workers, inspectors, breaking_point).await,
        Commands::Run { distribution } => run_command(config, distribution).await,
        Commands::Peer { name, role, host } => peer_command(config, name, role, host).await,
        Commands::Plan => {
            plan_command(&config);
            Ok(())
        }
        Commands::Config { config_cmd } => match config_cmd {
            ConfigCommands::Validate { config_file } => handle_config_validate(&config_file),
            ConfigCommands::Sample { output, force } => {
                handle_config_sample(output.as_ref(), force)
            }
        },
    }
}
