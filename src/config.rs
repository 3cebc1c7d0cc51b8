// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ChunkError, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Playback configuration.
    #[serde(default)]
    pub player: PlayerConfig,
    /// Recording configuration (optional, required by `record`).
    pub recorder: Option<RecorderConfig>,
}

/// Playback parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct PlayerConfig {
    /// Directory holding the chunk files of one day.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Element factory used for the output sink.
    #[serde(default = "default_sink")]
    pub sink: String,
    /// Decode every branch before splicing. When disabled the encoded
    /// stream is spliced as-is.
    #[serde(default = "default_decode")]
    pub decode: bool,
    /// Number of reusable branches in the ring.
    #[serde(default = "default_branch_count")]
    pub branch_count: usize,
    /// How often a playing gap branch is checked for completion.
    #[serde(default = "default_gap_poll_interval_ms")]
    pub gap_poll_interval_ms: u64,
    /// Write graph snapshots after priming (uses GST_DEBUG_DUMP_DOT_DIR).
    #[serde(default)]
    pub dump_graphs: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            sink: default_sink(),
            decode: default_decode(),
            branch_count: default_branch_count(),
            gap_poll_interval_ms: default_gap_poll_interval_ms(),
            dump_graphs: false,
        }
    }
}

impl PlayerConfig {
    pub fn gap_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gap_poll_interval_ms)
    }
}

/// Recording parameters for one RTSP source.
#[derive(Debug, Deserialize, Clone)]
pub struct RecorderConfig {
    /// RTSP URL of the camera stream.
    pub url: String,
    /// Directory receiving the chunk files. Created if missing.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Rotate to a new file every N seconds (at the next keyframe).
    #[serde(default = "default_rotation_period")]
    pub rotation_period_secs: u64,
    /// Jitterbuffer latency handed to the RTSP source.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u32,
    /// Container extension of the written files.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Name of the parser node whose output is gated at rotation time.
    #[serde(default = "default_parser_node")]
    pub parser_node: String,
    /// Name of the muxer node that is flushed and reset.
    #[serde(default = "default_muxer_node")]
    pub muxer_node: String,
    /// Name of the file sink node that receives the new location.
    #[serde(default = "default_sink_node")]
    pub sink_node: String,
}

impl RecorderConfig {
    pub fn rotation_period(&self) -> Duration {
        Duration::from_secs(self.rotation_period_secs)
    }

    /// Pipeline description for the recording graph. Node names match the
    /// configured lookups.
    pub fn pipeline_description(&self) -> String {
        format!(
            "rtspsrc name=source location={url} latency={latency} ! \
             rtph264depay ! h264parse name={parser} ! \
             matroskamux name={muxer} ! queue ! filesink name={sink}",
            url = self.url,
            latency = self.latency_ms,
            parser = self.parser_node,
            muxer = self.muxer_node,
            sink = self.sink_node,
        )
    }
}

fn default_directory() -> PathBuf { PathBuf::from("recordings") }
fn default_sink() -> String { "autovideosink".into() }
fn default_decode() -> bool { true }
fn default_branch_count() -> usize { 2 }
fn default_gap_poll_interval_ms() -> u64 { 200 }
fn default_rotation_period() -> u64 { 10 }
fn default_latency_ms() -> u32 { 100 }
fn default_extension() -> String { "mkv".into() }
fn default_parser_node() -> String { "parser".into() }
fn default_muxer_node() -> String { "muxer".into() }
fn default_sink_node() -> String { "destination".into() }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChunkError::Config(format!("Cannot read config file: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ChunkError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// The `[recorder]` section, which only recording needs.
    pub fn recorder(&self) -> Result<&RecorderConfig> {
        self.recorder
            .as_ref()
            .ok_or_else(|| ChunkError::Config("No [recorder] section defined".into()))
    }

    fn validate(&self) -> Result<()> {
        if self.player.branch_count < 2 {
            return Err(ChunkError::Config("branch_count must be >= 2".into()));
        }
        if self.player.gap_poll_interval_ms == 0 {
            return Err(ChunkError::Config("gap_poll_interval_ms must be > 0".into()));
        }
        if self.player.sink.is_empty() {
            return Err(ChunkError::Config("sink must not be empty".into()));
        }
        if self.player.directory.as_os_str().is_empty() {
            return Err(ChunkError::Config("player.directory must not be empty".into()));
        }
        if let Some(rec) = &self.recorder {
            if rec.url.is_empty() {
                return Err(ChunkError::Config("recorder.url must not be empty".into()));
            }
            if rec.directory.as_os_str().is_empty() {
                return Err(ChunkError::Config("recorder.directory must not be empty".into()));
            }
            // Filenames have second resolution; a shorter period could reuse one.
            if rec.rotation_period_secs == 0 {
                return Err(ChunkError::Config("rotation_period_secs must be >= 1".into()));
            }
            for (field, value) in [
                ("parser_node", &rec.parser_node),
                ("muxer_node", &rec.muxer_node),
                ("sink_node", &rec.sink_node),
                ("extension", &rec.extension),
            ] {
                if value.is_empty() {
                    return Err(ChunkError::Config(format!("recorder.{field} must not be empty")));
                }
            }
        }
        Ok(())
    }
}
