// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::sync::Arc;

use crate::index::{Entry, Index};

/// Bidirectional position in an [`Index`]; `0 <= offset <= len`.
///
/// Exhaustion in either direction returns `None` and leaves the offset
/// untouched. Entries are handed out as owned clones so the owner can keep
/// mutating its own state while holding one.
#[derive(Debug, Clone)]
pub struct IndexCursor {
    index: Arc<Index>,
    offset: usize,
}

impl IndexCursor {
    pub fn new(index: Arc<Index>) -> Self {
        Self { index, offset: 0 }
    }

    /// Entry at the offset, then step forward.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Entry> {
        let entry = self.index.get(self.offset)?.clone();
        self.offset += 1;
        Some(entry)
    }

    /// Step back, then return the entry at the new offset.
    pub fn prev(&mut self) -> Option<Entry> {
        if self.offset == 0 {
            return None;
        }
        self.offset -= 1;
        self.index.get(self.offset).cloned()
    }

    /// What `next()` would return, without moving.
    pub fn peek(&self) -> Option<&Entry> {
        self.index.get(self.offset)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Entries not yet returned by `next()`.
    pub fn remaining(&self) -> usize {
        self.index.len() - self.offset
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Chunk;

    fn index_of(n: i64) -> Arc<Index> {
        let s = 1_000_000_000;
        let chunks = (0..n)
            .map(|i| Chunk::new(format!("/r/{i}").into(), i.to_string(), i * 10 * s, 10 * s))
            .collect();
        Arc::new(Index::from_sorted_chunks(chunks, 0))
    }

    #[test]
    fn test_next_walks_every_entry_then_none() {
        let index = index_of(3);
        let mut cursor = index.cursor();
        for expected in index.entries() {
            assert_eq!(cursor.next().as_ref(), Some(expected));
        }
        assert!(cursor.next().is_none());
        assert!(cursor.next().is_none());
        assert_eq!(cursor.offset(), index.len());
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_prev_after_next_returns_same_entry() {
        let index = index_of(2);
        let mut cursor = index.cursor();
        let first = cursor.next().expect("first");
        let second = cursor.next().expect("second");
        assert_eq!(cursor.prev(), Some(second));
        assert_eq!(cursor.prev(), Some(first));
        assert!(cursor.prev().is_none());
        assert_eq!(cursor.offset(), 0);
    }

    #[test]
    fn test_peek_does_not_move() {
        let index = index_of(1);
        let mut cursor = index.cursor();
        let peeked = cursor.peek().cloned();
        assert_eq!(cursor.offset(), 0);
        assert_eq!(cursor.next(), peeked);
    }

    #[test]
    fn test_empty_index() {
        let mut cursor = Arc::new(Index::empty()).cursor();
        assert!(cursor.peek().is_none());
        assert!(cursor.next().is_none());
        assert!(cursor.prev().is_none());
    }
}
