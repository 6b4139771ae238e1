// linegate command line interface
// Runs the line controller, polls PLC registers for diagnosis and checks configuration files

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use linegate_core::{LineConfig, PlcConfig};
use linegate_eye::{source_from_config, CameraManager, Detector, NullDetector, ReplayDetector};
use linegate_plc::{ModbusTcpTransport, RegisterMonitor, RegisterTransport, SimulatedPlc};
use linegate_server::{modbus_transports, ConfigWatcher, ControlLoop, EventBus, TransportFactory};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linegate")]
#[command(about = "Vision-to-PLC line controller", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON or TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop
    Run {
        /// Replay detections from a JSON-lines script instead of detecting nothing
        #[arg(long)]
        detections: Option<PathBuf>,

        /// Restart the replay script after its last frame
        #[arg(long)]
        cycle: bool,

        /// Talk to an in-memory PLC instead of the configured endpoint
        #[arg(long)]
        simulate_plc: bool,

        /// Do not watch the configuration file for changes
        #[arg(long)]
        no_watch: bool,
    },

    /// Poll PLC registers on a separate connection and print them
    Monitor {
        /// Poll interval in milliseconds
        #[arg(long, short, default_value = "1000")]
        interval: u64,

        /// Extra register to poll, as NAME=ADDRESS
        #[arg(long = "register", short)]
        registers: Vec<String>,

        /// Stop after this many polls
        #[arg(long)]
        count: Option<u64>,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show {
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Run {
            detections,
            cycle,
            simulate_plc,
            no_watch,
        } => run(cli.config, detections, cycle, simulate_plc, no_watch).await,
        Commands::Monitor {
            interval,
            registers,
            count,
        } => monitor(cli.config, interval, registers, count).await,
        Commands::Config(cmd) => handle_config_command(cli.config, cmd),
    }
}

async fn run(
    config_path: Option<PathBuf>,
    detections: Option<PathBuf>,
    cycle: bool,
    simulate_plc: bool,
    no_watch: bool,
) -> anyhow::Result<()> {
    let mut config = LineConfig::load_or_default(config_path.as_deref());

    let transports = if simulate_plc {
        config.plc.enabled = true;
        let plc = SimulatedPlc::new();
        plc.set_register(config.line.status_register, config.line.operative_value);
        info!("🧪 Using simulated PLC (line reported operative)");
        simulated_transports(plc)
    } else {
        modbus_transports()
    };
    if !config.plc.enabled {
        warn!("PLC disabled in configuration: detections will not be signalled");
    }

    let detector: Box<dyn Detector> = match detections {
        Some(path) => Box::new(
            ReplayDetector::from_path(&path)
                .with_context(|| format!("loading detection script {}", path.display()))?
                .cycle(cycle),
        ),
        None => Box::new(NullDetector),
    };

    let mut cameras = CameraManager::new(config.control.event_capacity);
    for camera in &config.cameras {
        match source_from_config(&camera.source) {
            Ok(source) => {
                cameras.spawn(camera.id, source);
            }
            Err(e) => error!("{} not started: {}", camera.id, e),
        }
    }

    let events = EventBus::new(config.control.event_capacity);
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => debug!("event {}", json),
                Err(e) => warn!("Unserializable event {:?}: {}", event, e),
            }
        }
    });

    let (reload_tx, reload_rx) = mpsc::channel(4);
    let watched = config_path.or_else(LineConfig::default_path).filter(|p| p.exists());
    match watched {
        Some(path) if !no_watch => {
            ConfigWatcher::new(path, config.control.reload_check()).spawn(reload_tx);
        }
        _ => drop(reload_tx),
    }

    let mut control = ControlLoop::new(config, detector, transports, events);
    control.attach_cameras(cameras);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(control.run(shutdown_rx, reload_rx));

    wait_for_shutdown().await;
    let _ = shutdown_tx.send(true);
    let stats = handle.await.context("control loop task failed")?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn simulated_transports(plc: SimulatedPlc) -> TransportFactory {
    Box::new(move |_: &PlcConfig| Box::new(plc.transport()) as Box<dyn RegisterTransport>)
}

async fn monitor(
    config_path: Option<PathBuf>,
    interval: u64,
    extra: Vec<String>,
    count: Option<u64>,
) -> anyhow::Result<()> {
    let config = LineConfig::load_or_default(config_path.as_deref());

    let mut registers = RegisterMonitor::registers_for(&config);
    for entry in &extra {
        registers.push(parse_register(entry)?);
    }

    let transport = ModbusTcpTransport::from_config(&config.plc);
    let mut monitor = RegisterMonitor::new(Box::new(transport), registers);
    println!("Monitoring {} every {} ms (Ctrl+C to stop)", monitor.endpoint(), interval);

    let mut ticker = tokio::time::interval(Duration::from_millis(interval.max(50)));
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);
    let mut polls = 0u64;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        if !monitor.is_connected() {
            if let Err(e) = monitor.connect().await {
                println!("{}  not connected: {}", timestamp(), e);
                continue;
            }
        }

        let readings = monitor.poll_once().await;
        println!("{}", timestamp());
        for reading in readings {
            let value = reading.value.map_or_else(|| "-".to_string(), |v| v.to_string());
            println!("  {:<16} {:>6}  {}", reading.name, reading.address, value);
        }

        polls += 1;
        if count.is_some_and(|limit| polls >= limit) {
            break;
        }
    }

    monitor.close().await;
    Ok(())
}

fn parse_register(spec: &str) -> anyhow::Result<(String, u16)> {
    let Some((name, address)) = spec.split_once('=') else {
        bail!("register '{}' must look like NAME=ADDRESS", spec);
    };
    let address = address
        .trim()
        .parse::<u16>()
        .with_context(|| format!("invalid register address in '{}'", spec))?;
    Ok((name.trim().to_string(), address))
}

fn timestamp() -> String {
    chrono::Local::now().format("[%H:%M:%S%.3f]").to_string()
}

fn handle_config_command(config_path: Option<PathBuf>, cmd: ConfigCommands) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show { json } => {
            let config = LineConfig::load_or_default(config_path.as_deref());
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        ConfigCommands::Check => {
            let Some(path) = config_path.or_else(LineConfig::default_path) else {
                bail!("no configuration file given and no default location available");
            };
            let config = LineConfig::from_file(&path).with_context(|| format!("reading {}", path.display()))?;
            let (_, issues) = config.sanitized();
            if issues.is_empty() {
                println!("✅ {} is valid", path.display());
            } else {
                println!("⚠️  {} loads with {} correction(s):", path.display(), issues.len());
                for issue in &issues {
                    println!("  - {}", issue);
                }
            }
        }
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("🛑 Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register() {
        assert_eq!(parse_register("belt=30001").unwrap(), ("belt".to_string(), 30001));
        assert_eq!(parse_register(" belt = 7 ").unwrap(), ("belt".to_string(), 7));
        assert!(parse_register("belt").is_err());
        assert!(parse_register("belt=70000").is_err());
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from(["linegate", "-c", "line.toml", "run", "--simulate-plc", "--cycle"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("line.toml")));
        match cli.command {
            Commands::Run {
                simulate_plc, cycle, ..
            } => assert!(simulate_plc && cycle),
            _ => panic!("expected run"),
        }
    }
}
