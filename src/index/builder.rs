// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Index construction: filename parsing, duration probing, ordering and
//! gap synthesis.
//!
//! ```text
//!  day_start                                                   day_end
//!  |--Gap--|==chunk==|==chunk==|~jitter~|==chunk==|-----Gap-----|
//! ```
//!
//! Uncovered intervals longer than [`GAP_THRESHOLD_NS`] become `Gap`
//! entries; shorter ones are recorder timing noise and stay uncovered.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ChunkError, Result};
use crate::index::entry::{local_midnight_ns, local_to_ns, parse_filename_timestamp, Chunk, Entry, Gap};
use crate::index::probe::DurationProbe;
use crate::index::{Index, DAY_NS};

/// Uncovered intervals up to this length are tolerated as jitter.
pub const GAP_THRESHOLD_NS: i64 = 1_100_000_000;

/// One file of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub filename: String,
    pub directory: PathBuf,
}

impl Listing {
    pub fn new(filename: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            directory: directory.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }
}

/// List the regular files of `directory`.
///
/// The directory is canonicalized first so every chunk path is absolute.
/// Symlinks, sub-directories and non UTF-8 names are skipped.
pub fn scan_directory(directory: &Path) -> Result<Vec<Listing>> {
    let directory = std::fs::canonicalize(directory)?;
    let mut listing = Vec::new();

    for dir_entry in std::fs::read_dir(&directory)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_file() {
            continue;
        }
        match dir_entry.file_name().into_string() {
            Ok(filename) => listing.push(Listing::new(filename, directory.clone())),
            Err(name) => warn!(name = ?name, "Skipping file with non UTF-8 name"),
        }
    }

    debug!(directory = ?directory, files = listing.len(), "Directory scanned");
    Ok(listing)
}

/// Builds an [`Index`] from a directory listing.
pub struct ChunkIndexBuilder<P> {
    probe: P,
}

impl<P: DurationProbe> ChunkIndexBuilder<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// Turn one listed file into a [`Chunk`]. Fails only on the filename;
    /// a failed probe gives a zero-length chunk.
    pub fn parse_chunk(&self, listing: &Listing) -> Result<Chunk> {
        let time = parse_filename_timestamp(&listing.filename)?;
        let start_ns = local_to_ns(&time).ok_or_else(|| ChunkError::Timestamp {
            filename: listing.filename.clone(),
            reason: "time does not exist in the local time zone".into(),
        })?;

        let path = listing.path();
        let duration_ns = i64::try_from(self.probe.probe(&path)).unwrap_or(i64::MAX);
        if duration_ns == 0 {
            warn!(path = ?path, "Duration probe returned 0, chunk will be zero-length");
        }

        Ok(Chunk::new(path, listing.filename.clone(), start_ns, duration_ns))
    }

    /// Parse, probe, sort and gap-fill. Unparseable files are skipped; no
    /// usable file at all yields an empty index.
    pub fn build<I>(&self, listing: I) -> Index
    where
        I: IntoIterator<Item = Listing>,
    {
        let mut chunks = Vec::new();
        let mut skipped = 0usize;

        for item in listing {
            match self.parse_chunk(&item) {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => {
                    skipped += 1;
                    warn!(file = item.filename, error = %e, "Skipping file");
                }
            }
        }

        // Stable: equal start times keep listing order.
        chunks.sort_by_key(|c| c.start_ns);

        let Some(first) = chunks.first() else {
            info!(skipped, "No usable chunks found, index is empty");
            return Index::empty();
        };

        let day_start_ns = local_midnight_ns(first.start_ns).unwrap_or_else(|| {
            warn!(start_ns = first.start_ns, "Local midnight unresolvable, day starts at first chunk");
            first.start_ns
        });

        let index = Index::from_sorted_chunks(chunks, day_start_ns);
        info!(
            entries = index.len(),
            chunks = index.chunk_count(),
            gaps = index.gap_count(),
            skipped,
            "Index built"
        );
        index
    }
}

/// Gap synthesis over chunks sorted by start time.
///
/// Chunks starting at or after the end of the day, or overlapping already
/// covered time by more than the jitter threshold, are dropped.
pub fn fill_gaps(chunks: Vec<Chunk>, day_start_ns: i64) -> Vec<Entry> {
    fill_entry_gaps(chunks.into_iter().map(Entry::Chunk).collect(), day_start_ns)
}

/// Gap synthesis over a timeline that may already hold gaps.
///
/// Existing gaps count as covered time. A new gap that would sit next to
/// an existing one is merged into it, so an already gap-filled timeline
/// comes back unchanged.
pub fn fill_entry_gaps(entries: Vec<Entry>, day_start_ns: i64) -> Vec<Entry> {
    let day_end_ns = day_start_ns + DAY_NS;
    let mut out = Vec::with_capacity(entries.len() * 2 + 1);
    let mut cursor = day_start_ns;

    for entry in entries {
        let (start_ns, stop_ns) = (entry.start_ns(), entry.stop_ns());
        if start_ns >= day_end_ns {
            warn!(entry = label(&entry), "Entry starts after the end of the day, skipped");
            continue;
        }
        if cursor - start_ns > GAP_THRESHOLD_NS {
            warn!(
                entry = label(&entry),
                overlap_ms = (cursor - start_ns) / 1_000_000,
                "Entry overlaps covered time, skipped"
            );
            continue;
        }

        if start_ns - cursor > GAP_THRESHOLD_NS {
            push_gap(&mut out, cursor, start_ns);
        }
        cursor = cursor.max(stop_ns);
        match entry {
            Entry::Gap(gap) => push_gap(&mut out, gap.start_ns, gap.stop_ns),
            chunk => out.push(chunk),
        }
    }

    if day_end_ns - cursor > GAP_THRESHOLD_NS {
        push_gap(&mut out, cursor, day_end_ns);
    }
    out
}

fn label(entry: &Entry) -> &str {
    match entry {
        Entry::Chunk(c) => &c.filename,
        Entry::Gap(_) => "gap",
    }
}

/// Append a gap, extending the last entry instead when it is a gap too.
fn push_gap(out: &mut Vec<Entry>, start_ns: i64, stop_ns: i64) {
    if let Some(Entry::Gap(last)) = out.last_mut() {
        *last = Gap::between(last.start_ns, stop_ns.max(last.stop_ns));
        return;
    }
    out.push(Entry::Gap(Gap::between(start_ns, stop_ns)));
}
