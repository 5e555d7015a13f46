//! LanScope Daemon - Main entry point
//!
//! Runs discovery scans on demand, either once from the command line or
//! behind a small HTTP/WebSocket API.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use lanscope_core::DeviceRecord;
use lanscope_discovery::{progress_channel, ProgressEvent, ScanMode};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lanscope")]
#[command(about = "LAN device discovery and aggregation daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lanscope.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single scan and exit
    #[arg(long)]
    scan_once: bool,

    /// Scan mode (fast, complete); the configured default otherwise
    #[arg(short, long)]
    mode: Option<ScanMode>,

    /// Print the scan-once result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("LanScope v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    if let Some(mode) = args.mode {
        config.daemon.default_mode = mode;
    }

    info!(
        bind = %config.daemon.bind,
        mode = %config.daemon.default_mode,
        subnet = ?config.discovery.subnet,
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone());

    if args.scan_once {
        let mode = config.daemon.default_mode;
        info!(mode = %mode, "Running single discovery scan");

        let (tx, mut rx) = progress_channel(lanscope_discovery::progress::PROGRESS_CHANNEL_CAPACITY);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                print_progress(&event);
            }
        });

        let devices = state.scanner.run_scan(mode, tx).await;
        let _ = printer.await;

        if args.json {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        } else {
            print_devices(&devices);
        }
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}

fn print_progress(event: &ProgressEvent) {
    eprintln!(
        "[{:>3}%] {:<18} {:<8} {}",
        event.percentage,
        event.step,
        event.status.as_str(),
        event.message
    );
}

fn print_devices(devices: &[DeviceRecord]) {
    println!("Discovered {} devices:", devices.len());
    for device in devices {
        let local = if device.is_local { " (this host)" } else { "" };
        println!("  - {}{} mac {} host {}", device.ip, local, device.mac, device.hostname);
        if device.manufacturer_identified {
            println!("    Manufacturer: {}", device.manufacturer);
        }
        if device.has_device_type() {
            println!("    Type: {}", device.device_type);
        }
        let sources: Vec<&str> = device.sources.iter().map(|s| s.as_str()).collect();
        println!("    Seen by: {}", sources.join(", "));
    }
}
