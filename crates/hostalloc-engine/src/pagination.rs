//! Pagination cursor shared by every stage of one allocation request.
//!
//! The engine creates one [`PaginationState`] per request and hands the same
//! `Arc` to every stage in every round, so a restart continues from the next
//! page instead of re-reading the one that just failed.

use std::sync::atomic::{AtomicUsize, Ordering};

/// `{limit, offset}` cursor over a paginated inventory query.
#[derive(Debug)]
pub struct PaginationState {
    limit: usize,
    offset: AtomicUsize,
}

/// One page of an inventory query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: usize,
    pub limit: usize,
}

impl PaginationState {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            offset: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset.load(Ordering::Acquire)
    }

    /// Current cursor position without moving it.
    pub fn window(&self) -> PageWindow {
        PageWindow {
            offset: self.offset(),
            limit: self.limit,
        }
    }

    /// Claim the page at the cursor and move the cursor past it.
    pub fn next_page(&self) -> PageWindow {
        let limit = self.limit;
        let offset = self
            .offset
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(limit))
            })
            .unwrap_or_else(|current| current);
        PageWindow { offset, limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_advance_by_limit() {
        let state = PaginationState::new(10);
        assert_eq!(state.window(), PageWindow { offset: 0, limit: 10 });

        assert_eq!(state.next_page().offset, 0);
        assert_eq!(state.next_page().offset, 10);
        assert_eq!(state.offset(), 20);
        assert_eq!(state.limit(), 10);
    }

    #[test]
    fn cursor_saturates_instead_of_wrapping() {
        let state = PaginationState::new(usize::MAX);
        state.next_page();
        assert_eq!(state.next_page().offset, usize::MAX);
        assert_eq!(state.offset(), usize::MAX);
    }

    #[test]
    fn concurrent_claims_hand_out_distinct_pages() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let state = Arc::new(PaginationState::new(5));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                thread::spawn(move || (0..25).map(|_| state.next_page().offset).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for offset in h.join().unwrap() {
                assert!(seen.insert(offset), "offset {offset} handed out twice");
            }
        }
        assert_eq!(seen.len(), 100);
        assert_eq!(state.offset(), 500);
    }
}
