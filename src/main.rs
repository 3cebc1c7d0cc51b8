// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! chunkline: gapless recording and playback of chunked video
//!
//! Usage:
//!   chunkline record --config chunkline.toml     # record with segment rotation
//!   chunkline play   --config chunkline.toml     # play a day of chunks gaplessly
//!   chunkline index  --directory recordings      # print the day timeline

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use gstreamer as gst;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chunkline::config::Config;
use chunkline::graph::gst::GstGraph;
use chunkline::index::probe::DiscovererProbe;
use chunkline::index::{scan_directory, ChunkIndexBuilder, Entry, Index};
use chunkline::playback::{PlaybackOptions, PlaybackScheduler};
use chunkline::recorder::{RotatorOptions, SegmentRotator, SystemClock};

#[derive(Parser)]
#[command(name = "chunkline", about = "Gapless chunked video recorder and player", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record the configured source into rotating chunk files.
    Record {
        /// Path to the TOML configuration file.
        #[arg(short, long, default_value = "chunkline.toml")]
        config: PathBuf,
    },
    /// Play one directory of chunks as a single continuous stream.
    Play {
        #[arg(short, long, default_value = "chunkline.toml")]
        config: PathBuf,
        /// Overrides `player.directory`.
        #[arg(short, long)]
        directory: Option<PathBuf>,
    },
    /// Print the gap-filled timeline of a directory and exit.
    Index {
        #[arg(short, long)]
        directory: PathBuf,
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = gst::init() {
        error!(error = %e, "GStreamer initialisation failed");
        std::process::exit(1);
    }

    match cli.command {
        Command::Record { config } => run_record(config).await,
        Command::Play { config, directory } => run_play(config, directory).await,
        Command::Index { directory, json } => run_index(&directory, json),
    }
}

fn load_config(path: &Path) -> Config {
    match Config::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    }
}

/// Cancellation token tripped by CTRL+C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received CTRL+C, shutting down…"),
            Err(e) => error!(error = %e, "Signal error"),
        }
        trigger.cancel();
    });
    token
}

fn build_index(directory: &Path) -> Index {
    let listing = match scan_directory(directory) {
        Ok(l) => l,
        Err(e) => {
            error!(directory = ?directory, error = %e, "Cannot list chunk directory");
            std::process::exit(1);
        }
    };
    let probe = match DiscovererProbe::new() {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "Cannot create duration probe");
            std::process::exit(1);
        }
    };
    ChunkIndexBuilder::new(probe).build(listing)
}

async fn run_record(config_path: PathBuf) {
    let cfg = load_config(&config_path);
    let rec = match cfg.recorder() {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Recording not configured");
            std::process::exit(1);
        }
    };

    info!(
        url = rec.url,
        directory = ?rec.directory,
        period_s = rec.rotation_period_secs,
        "Starting recorder"
    );

    let graph = match GstGraph::launch(&rec.pipeline_description()) {
        Ok(g) => g,
        Err(e) => {
            error!(error = %e, "Failed to build recording graph");
            std::process::exit(1);
        }
    };
    let rotator = match SegmentRotator::new(graph, RotatorOptions::from(rec), SystemClock) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Failed to attach segment rotator");
            std::process::exit(1);
        }
    };

    match rotator.run(shutdown_token()).await {
        Ok(summary) => info!(files = summary.files.len(), "Recording stopped"),
        Err(e) => {
            error!(error = %e, "Recording failed");
            std::process::exit(1);
        }
    }
}

async fn run_play(config_path: PathBuf, directory: Option<PathBuf>) {
    let cfg = load_config(&config_path);
    let directory = directory.unwrap_or_else(|| cfg.player.directory.clone());

    let index = Arc::new(build_index(&directory));
    if index.is_empty() {
        error!(directory = ?directory, "No playable chunks found");
        std::process::exit(1);
    }

    let graph = GstGraph::new("chunkline-player");
    let scheduler = match PlaybackScheduler::new(graph, index.cursor(), PlaybackOptions::from(&cfg.player)) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to build playback graph");
            std::process::exit(1);
        }
    };

    match scheduler.run(shutdown_token()).await {
        Ok(summary) => info!(
            switches = summary.switches,
            entries = summary.entries_loaded,
            "Playback finished"
        ),
        Err(e) => {
            error!(error = %e, "Playback failed");
            std::process::exit(1);
        }
    }
}

fn run_index(directory: &Path, json: bool) {
    let index = build_index(directory);

    if json {
        match serde_json::to_string_pretty(&index) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    println!("=== Index: {} ===", directory.display());
    println!("Entries : {} ({} chunks, {} gaps)", index.len(), index.chunk_count(), index.gap_count());
    for entry in index.entries() {
        let start = chrono::DateTime::from_timestamp_nanos(entry.start_ns())
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S%.3f");
        let secs = entry.duration_ns() as f64 / 1e9;
        match entry {
            Entry::Chunk(c) => println!("  {start}  {secs:>9.3}s  {}", c.filename),
            Entry::Gap(_) => println!("  {start}  {secs:>9.3}s  <gap>"),
        }
    }
}
