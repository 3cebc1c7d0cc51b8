// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Media graph error: {0}")]
    Graph(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse timestamp from '{filename}': {reason}")]
    Timestamp { filename: String, reason: String },

    #[error("Node '{name}' not found in the recording graph")]
    MissingNode { name: String },

    #[error("Duration probe error: {0}")]
    Probe(String),
}

pub type Result<T> = std::result::Result<T, ChunkError>;
