// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Chunk duration probing.

use std::path::Path;

/// Measures the playable duration of a chunk file.
///
/// Returns nanoseconds, or 0 when the duration cannot be determined.
pub trait DurationProbe {
    fn probe(&self, path: &Path) -> u64;
}

impl<F> DurationProbe for F
where
    F: Fn(&Path) -> u64,
{
    fn probe(&self, path: &Path) -> u64 {
        self(path)
    }
}

#[cfg(feature = "gst")]
pub use discoverer::DiscovererProbe;

#[cfg(feature = "gst")]
mod discoverer {
    use std::path::Path;

    use gstreamer as gst;
    use gstreamer_pbutils as pbutils;
    use tracing::warn;

    use super::DurationProbe;
    use crate::error::{ChunkError, Result};

    /// Duration probe backed by the GStreamer discoverer.
    pub struct DiscovererProbe {
        discoverer: pbutils::Discoverer,
    }

    impl DiscovererProbe {
        /// `gst::init()` must have been called.
        pub fn new() -> Result<Self> {
            let discoverer = pbutils::Discoverer::new(gst::ClockTime::SECOND)
                .map_err(|e| ChunkError::Probe(format!("discoverer: {e}")))?;
            Ok(Self { discoverer })
        }

        fn discover(&self, path: &Path) -> Result<u64> {
            let absolute = std::fs::canonicalize(path)?;
            let uri = format!("file://{}", absolute.display());
            let info = self
                .discoverer
                .discover_uri(&uri)
                .map_err(|e| ChunkError::Probe(format!("{uri}: {e}")))?;
            Ok(info.duration().map(|d| d.nseconds()).unwrap_or(0))
        }
    }

    impl DurationProbe for DiscovererProbe {
        fn probe(&self, path: &Path) -> u64 {
            match self.discover(path) {
                Ok(ns) => ns,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Duration probe failed");
                    0
                }
            }
        }
    }
}
