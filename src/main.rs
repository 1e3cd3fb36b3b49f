//! # caramel
//!
//! Command-line entry point: run the host driver, look for a host on the
//! network, or ping one.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use caramel_client::{validate_endpoint, ControlChannel, Discovery};
use caramel_core::protocol::STATUS_HEALTHY;
use caramel_host::{AllJoints, HostDriver};
use caramel_settings::{load_settings_from_path, settings_path, CaramelSettings};
use caramel_telemetry::{
    init_telemetry, names, parse_level, LogFormat, MetricsRecorder, TelemetryConfig,
};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Caramel skeletal-tracking link.
#[derive(Parser, Debug)]
#[command(name = "caramel", about = "Caramel skeletal-tracking link", version)]
struct Cli {
    /// Settings file (defaults to ~/.caramel/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level (overrides settings; RUST_LOG still wins).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the host driver until Ctrl-C.
    Host {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Silence budget in milliseconds.
        #[arg(long)]
        watchdog_ms: Option<u64>,
        /// Answer legacy UDP discovery queries.
        #[arg(long)]
        legacy_discovery: bool,
        /// Skip the DNS-SD advertisement.
        #[arg(long)]
        no_advertise: bool,
    },
    /// Look for a host on the local network and print its endpoint.
    Discover {
        /// Also send legacy UDP broadcast queries.
        #[arg(long)]
        legacy: bool,
    },
    /// Check a host's driver service.
    Ping {
        address: String,
        #[arg(long)]
        port: Option<u16>,
    },
}

fn telemetry_config(settings: &CaramelSettings, cli: &Cli) -> TelemetryConfig {
    let logging = &settings.logging;
    let level_name = cli.log_level.as_deref().unwrap_or(&logging.level);
    let log_level = parse_level(level_name).unwrap_or_else(|| {
        eprintln!("unknown log level '{level_name}', using info");
        tracing::Level::INFO
    });
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        logging.format.parse().unwrap_or_default()
    };
    let module_levels = logging
        .module_levels
        .iter()
        .filter_map(|(module, level)| parse_level(level).map(|l| (module.clone(), l)))
        .collect();
    TelemetryConfig {
        log_level,
        module_levels,
        format,
        metrics_enabled: logging.metrics,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;

    let telemetry = init_telemetry(telemetry_config(&settings, &cli));
    let metrics = telemetry
        .metrics()
        .unwrap_or_else(|| Arc::new(MetricsRecorder::new()));

    match cli.command {
        Command::Host {
            bind,
            port,
            watchdog_ms,
            legacy_discovery,
            no_advertise,
        } => {
            let mut host = settings.host;
            if let Some(bind) = bind {
                host.bind = bind;
            }
            if let Some(port) = port {
                host.port = port;
            }
            if let Some(ms) = watchdog_ms {
                host.watchdog_timeout_ms = ms;
            }
            host.legacy_discovery |= legacy_discovery;
            host.advertise &= !no_advertise;
            run_host(host, metrics).await
        }
        Command::Discover { legacy } => {
            let mut discovery = settings.discovery;
            discovery.legacy_broadcast |= legacy;
            let endpoint = Discovery::from_settings(&discovery, settings.client.port)?
                .run()
                .await
                .context("no host found; enter the address manually")?;
            println!("{endpoint}");
            Ok(())
        }
        Command::Ping { address, port } => {
            let client = settings.client;
            let endpoint = validate_endpoint(&address, port.unwrap_or(client.port))?;
            let timeout = client.ping_timeout();
            let control = tokio::time::timeout(timeout, ControlChannel::connect(endpoint))
                .await
                .context("connect timed out")??;
            let status = control.ping_driver_service(timeout).await?;
            let greeting = control.ping(&client.device_name, timeout).await?;
            control.close().await;
            println!("{greeting}");
            if status != STATUS_HEALTHY {
                bail!("driver service at {endpoint} reported status {status}");
            }
            println!("driver service at {endpoint} is healthy");
            Ok(())
        }
    }
}

async fn run_host(
    settings: caramel_settings::HostSettings,
    metrics: Arc<MetricsRecorder>,
) -> Result<()> {
    let driver = HostDriver::with_parts(settings, Arc::new(AllJoints), Arc::clone(&metrics), None);
    let addr = driver
        .initialize()
        .await
        .with_context(|| driver.status_message())?;
    info!(%addr, "host ready, waiting for a capture client");

    let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                break;
            }
            _ = ticker.tick() => {
                let snapshot = driver.update();
                let tracked = snapshot.joints.iter().filter(|j| j.is_tracked).count();
                info!(
                    status = %snapshot.status,
                    skeleton_tracked = snapshot.skeleton_tracked,
                    tracked,
                    frames = metrics.counter_total(names::FRAMES_RECEIVED),
                    transitions = metrics.counter_total(names::STATUS_TRANSITIONS),
                    "tracking status"
                );
            }
        }
    }

    info!("shutting down");
    driver.shutdown().await;
    Ok(())
}
