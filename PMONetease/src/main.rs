//! pmonetease-monitor: prints what NetEase Cloud Music is playing.
//!
//! Start the client with `--remote-debugging-port=9222`, then:
//!
//! ```text
//! pmonetease-monitor --port 9222 --json --count 10
//! ```

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pmoconfig::Config;
use pmonetease::{
    ConnectionState, DriverConfig, LoggingOptions, NeteaseDriver, PlaybackSnapshot, init_logging,
};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "pmonetease-monitor")]
#[command(about = "Watch NetEase Cloud Music playback over its DevTools port")]
#[command(version)]
struct Cli {
    /// Remote debugging port of the client (defaults to the configured one)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding config.yaml
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Debug output
    #[arg(short, long, conflicts_with = "silent")]
    verbose: bool,

    /// No console output besides the snapshots
    #[arg(short, long)]
    silent: bool,

    /// Append logs to this file
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// One JSON object per line instead of text
    #[arg(long)]
    json: bool,

    /// Delay between two printed snapshots (defaults to the poll interval)
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Stop after this many snapshots
    #[arg(long, value_name = "N")]
    count: Option<u64>,
}

#[derive(Serialize)]
struct Report<'a> {
    connection: ConnectionState,
    #[serde(flatten)]
    snapshot: &'a PlaybackSnapshot,
}

fn print_snapshot(connection: ConnectionState, snapshot: &PlaybackSnapshot, json: bool) -> Result<()> {
    if json {
        let report = Report {
            connection,
            snapshot,
        };
        println!("{}", serde_json::to_string(&report)?);
    } else {
        let track = if snapshot.track_id.is_empty() {
            "-"
        } else {
            &snapshot.track_id
        };
        println!(
            "[{connection}] {} {:>7.1}s / {:>7.1}s  track {track}",
            if snapshot.is_playing { "▶" } else { "⏸" },
            snapshot.current_progress,
            snapshot.total_duration,
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ========== Configuration ==========
    let dir = cli
        .config_dir
        .as_deref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let config = Config::load_config(&dir).context("cannot load configuration")?;

    let mut logging = LoggingOptions::from_config(&config);
    if cli.verbose {
        logging.level = LevelFilter::DEBUG;
    }
    if cli.silent {
        logging.enable_console = false;
    }
    logging.log_file = cli.log.clone();
    init_logging(logging)?;

    let mut driver_config = DriverConfig::from_config(&config);
    if let Some(port) = cli.port {
        driver_config.port = port;
    }
    let port = driver_config.port;
    let interval = cli
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or(driver_config.poll_interval);

    // ========== Driver ==========
    let json = cli.json;
    let driver = NeteaseDriver::builder()
        .config(driver_config)
        .on_track_changed(move |track_id| {
            if json {
                println!("{}", serde_json::json!({ "track_changed": track_id }));
            } else {
                println!("♪ track changed: {track_id}");
            }
        })
        .build();

    if let Err(err) = driver.try_connect(port) {
        error!(port, error = %err, "❌ Cannot connect to NetEase Cloud Music");
        return Err(err).with_context(|| {
            format!("is the client running with --remote-debugging-port={port}?")
        });
    }
    info!(port, "✅ Monitoring NetEase Cloud Music");

    // ========== Boucle d'affichage ==========
    let mut printed = 0u64;
    loop {
        thread::sleep(interval);
        print_snapshot(driver.connection_state(), &driver.state(), json)?;

        printed += 1;
        if cli.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    driver.disconnect();
    info!("Monitor stopped");
    Ok(())
}
