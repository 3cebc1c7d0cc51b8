// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Timeline entries and the timestamp encoding used in chunk filenames.
//!
//! ```text
//! 19-10-2026_13-05-00.mkv     primary  DD-MM-YYYY_HH-MM-SS
//! 19-10-2026_13;05;00.mkv     legacy   DD-MM-YYYY_HH;MM;SS
//! ```
//!
//! Filename times are local wall-clock time, as written by the recorder.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, TimeZone};
use serde::Serialize;

use crate::error::{ChunkError, Result};

pub const PRIMARY_FORMAT: &str = "%d-%m-%Y_%H-%M-%S";
pub const LEGACY_FORMAT: &str = "%d-%m-%Y_%H;%M;%S";

/// One recorded segment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub path: PathBuf,
    pub filename: String,
    pub start_ns: i64,
    pub stop_ns: i64,
    pub duration_ns: i64,
}

impl Chunk {
    pub fn new(path: PathBuf, filename: String, start_ns: i64, duration_ns: i64) -> Self {
        let duration_ns = duration_ns.max(0);
        Self {
            path,
            filename,
            start_ns,
            stop_ns: start_ns.saturating_add(duration_ns),
            duration_ns,
        }
    }
}

/// An interval without recorded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub start_ns: i64,
    pub stop_ns: i64,
    pub duration_ns: i64,
}

impl Gap {
    /// Gap covering `[start_ns, stop_ns)`. An inverted range yields a
    /// zero-width gap at `start_ns`.
    pub fn between(start_ns: i64, stop_ns: i64) -> Self {
        let duration_ns = (stop_ns - start_ns).max(0);
        Self {
            start_ns,
            stop_ns: start_ns + duration_ns,
            duration_ns,
        }
    }
}

/// Element of an [`Index`](super::Index).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entry {
    Chunk(Chunk),
    Gap(Gap),
}

impl Entry {
    pub fn start_ns(&self) -> i64 {
        match self {
            Entry::Chunk(c) => c.start_ns,
            Entry::Gap(g) => g.start_ns,
        }
    }

    pub fn stop_ns(&self) -> i64 {
        match self {
            Entry::Chunk(c) => c.stop_ns,
            Entry::Gap(g) => g.stop_ns,
        }
    }

    pub fn duration_ns(&self) -> i64 {
        match self {
            Entry::Chunk(c) => c.duration_ns,
            Entry::Gap(g) => g.duration_ns,
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, Entry::Gap(_))
    }

    /// File backing this entry; `None` for gaps.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Entry::Chunk(c) => Some(&c.path),
            Entry::Gap(_) => None,
        }
    }

    pub fn as_chunk(&self) -> Option<&Chunk> {
        match self {
            Entry::Chunk(c) => Some(c),
            Entry::Gap(_) => None,
        }
    }
}

/// Parse the timestamp at the start of a chunk filename.
///
/// The legacy pattern is selected when the name contains a `;`. The
/// timestamp may only be followed by an extension.
pub fn parse_filename_timestamp(filename: &str) -> Result<NaiveDateTime> {
    let format = if filename.contains(';') { LEGACY_FORMAT } else { PRIMARY_FORMAT };

    let (time, rest) = NaiveDateTime::parse_and_remainder(filename, format).map_err(|e| {
        ChunkError::Timestamp {
            filename: filename.to_string(),
            reason: e.to_string(),
        }
    })?;

    if !rest.is_empty() && !rest.starts_with('.') {
        return Err(ChunkError::Timestamp {
            filename: filename.to_string(),
            reason: format!("unexpected trailing text '{rest}'"),
        });
    }
    Ok(time)
}

/// Build a chunk filename in the primary pattern.
pub fn chunk_filename(time: &NaiveDateTime, extension: &str) -> String {
    format!("{}.{}", time.format(PRIMARY_FORMAT), extension)
}

/// Local wall-clock time → nanoseconds since the epoch.
///
/// Ambiguous times (DST fold) resolve to the earliest instant; times that
/// do not exist locally yield `None`.
pub fn local_to_ns(time: &NaiveDateTime) -> Option<i64> {
    Local.from_local_datetime(time).earliest()?.timestamp_nanos_opt()
}

/// Local midnight of the day containing `ns`.
pub fn local_midnight_ns(ns: i64) -> Option<i64> {
    let midnight = Local.timestamp_nanos(ns).date_naive().and_hms_opt(0, 0, 0)?;
    local_to_ns(&midnight)
}
