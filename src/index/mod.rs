// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Chunk index: the complete, gap-filled timeline of one recorded day.
//!
//! The index is built once from a directory snapshot and is immutable
//! afterwards. It is shared as `Arc<Index>`; each consumer walks it through
//! its own [`IndexCursor`].

pub mod builder;
pub mod cursor;
pub mod entry;
pub mod probe;

use std::sync::Arc;

use serde::Serialize;

pub use builder::{fill_entry_gaps, fill_gaps, scan_directory, ChunkIndexBuilder, Listing, GAP_THRESHOLD_NS};
pub use cursor::IndexCursor;
pub use entry::{Chunk, Entry, Gap};
pub use probe::DurationProbe;

/// Nanoseconds in one calendar day.
pub const DAY_NS: i64 = 86_400 * 1_000_000_000;

/// Ordered, contiguous timeline covering `[day_start_ns, day_end_ns)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Index {
    day_start_ns: i64,
    entries: Vec<Entry>,
}

impl Index {
    /// Index without entries (no usable chunk files).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Synthesize the timeline for chunks already sorted by start time.
    pub fn from_sorted_chunks(chunks: Vec<Chunk>, day_start_ns: i64) -> Self {
        Self {
            day_start_ns,
            entries: fill_gaps(chunks, day_start_ns),
        }
    }

    /// Run gap synthesis again over the full timeline, gaps included.
    pub fn resynthesize(&self) -> Self {
        Self {
            day_start_ns: self.day_start_ns,
            entries: fill_entry_gaps(self.entries.clone(), self.day_start_ns),
        }
    }

    pub fn day_start_ns(&self) -> i64 {
        self.day_start_ns
    }

    pub fn day_end_ns(&self) -> i64 {
        self.day_start_ns + DAY_NS
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, offset: usize) -> Option<&Entry> {
        self.entries.get(offset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().filter_map(Entry::as_chunk)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks().count()
    }

    pub fn gap_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_gap()).count()
    }

    /// Fresh cursor positioned before the first entry.
    pub fn cursor(self: &Arc<Self>) -> IndexCursor {
        IndexCursor::new(Arc::clone(self))
    }
}
