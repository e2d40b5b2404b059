// Paginator - windowed view over an ordered collection
//
// Used for both the job list (window 50) and the selected-file list
// (window 30). The paginator only tracks offsets; the owning collection
// keeps it behind the same lock as the items it windows.

use std::ops::Range;

/// Snapshot of the visible window, suitable for a "41-90 / 120 (page 2/3)" label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageInfo {
    pub start: usize,
    pub end: usize,
    pub page_number: usize,
    pub total_pages: usize,
    pub total: usize,
}

impl PageInfo {
    pub fn has_prev(&self) -> bool {
        self.start > 0
    }

    pub fn has_next(&self) -> bool {
        self.end < self.total
    }

    /// Label shown next to the pagination buttons; empty when everything fits.
    pub fn label(&self) -> String {
        if self.total_pages <= 1 {
            return String::new();
        }
        format!(
            "Showing {}-{} / {} (page {}/{})",
            self.start + 1,
            self.end,
            self.total,
            self.page_number,
            self.total_pages
        )
    }
}

/// Window of fixed size over `total` items, starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paginator {
    window_size: usize,
    offset: usize,
    total: usize,
}

impl Paginator {
    /// A zero window size is treated as 1.
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            offset: 0,
            total: 0,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Largest valid offset: `max(0, total - window_size)`.
    pub fn max_offset(&self) -> usize {
        self.total.saturating_sub(self.window_size)
    }

    /// `ceil(total / window_size)`, zero for an empty collection.
    pub fn page_count(&self) -> usize {
        self.total.div_ceil(self.window_size)
    }

    /// Item range of 1-indexed page `page`, if it exists.
    pub fn page_range(&self, page: usize) -> Option<Range<usize>> {
        if page == 0 || page > self.page_count() {
            return None;
        }
        let start = (page - 1) * self.window_size;
        Some(start..(start + self.window_size).min(self.total))
    }

    /// Update the item count after the collection grew or shrank.
    ///
    /// Returns true when the offset had to be re-clamped.
    pub fn set_total(&mut self, total: usize) -> bool {
        self.total = total;
        self.clamp()
    }

    pub fn set_window_size(&mut self, window_size: usize) -> bool {
        self.window_size = window_size.max(1);
        self.clamp()
    }

    fn clamp(&mut self) -> bool {
        let max = self.max_offset();
        if self.offset > max {
            tracing::debug!("Re-clamping window offset {} -> {}", self.offset, max);
            self.offset = max;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Shift forward one window, clamped to the last full window.
    pub fn next_page(&mut self) -> bool {
        let next = (self.offset + self.window_size).min(self.max_offset());
        let moved = next != self.offset;
        self.offset = next;
        moved
    }

    /// Shift back one window, clamped at zero.
    pub fn prev_page(&mut self) -> bool {
        let prev = self.offset.saturating_sub(self.window_size);
        let moved = prev != self.offset;
        self.offset = prev;
        moved
    }

    /// Jump to the start of 1-indexed `page`, clamped like `next_page`.
    pub fn go_to_page(&mut self, page: usize) -> bool {
        let Some(range) = self.page_range(page) else {
            return false;
        };
        let target = range.start.min(self.max_offset());
        let moved = target != self.offset;
        self.offset = target;
        moved
    }

    /// Visible item range.
    pub fn current_slice(&self) -> Range<usize> {
        let start = self.offset.min(self.total);
        start..(start + self.window_size).min(self.total)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.current_slice().contains(&index)
    }

    /// Visible range plus page numbering. A window clamped against the end
    /// reports itself as the last page.
    pub fn page_info(&self) -> PageInfo {
        let range = self.current_slice();
        let total_pages = self.page_count();
        let page_number = if total_pages == 0 {
            0
        } else if self.offset >= self.max_offset() && self.total > self.window_size {
            total_pages
        } else {
            self.offset / self.window_size + 1
        };

        PageInfo {
            start: range.start,
            end: range.end,
            page_number,
            total_pages,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn paginator(total: usize, window: usize) -> Paginator {
        let mut p = Paginator::new(window);
        p.set_total(total);
        p
    }

    #[test]
    fn test_page_count_and_ranges() {
        let p = paginator(120, 50);
        assert_eq!(p.page_count(), 3);
        assert_eq!(p.page_range(1), Some(0..50));
        assert_eq!(p.page_range(2), Some(50..100));
        assert_eq!(p.page_range(3), Some(100..120));
        assert_eq!(p.page_range(4), None);
        assert_eq!(p.page_range(0), None);
    }

    #[test]
    fn test_next_page_from_first_page() {
        let mut p = paginator(120, 50);
        assert!(p.next_page());
        assert_eq!(p.offset(), 50);
        assert_eq!(p.current_slice(), 50..100);
        assert_eq!(p.page_info().page_number, 2);
    }

    #[test]
    fn test_next_page_clamps_to_last_full_window() {
        let mut p = paginator(120, 50);
        p.next_page();
        p.next_page();
        assert_eq!(p.offset(), 70);
        assert_eq!(p.current_slice(), 70..120);
        assert_eq!(p.page_info().page_number, 3);
        assert!(!p.next_page());
    }

    #[test]
    fn test_prev_page_clamps_at_zero() {
        let mut p = paginator(120, 50);
        p.next_page();
        p.next_page();
        assert!(p.prev_page());
        assert_eq!(p.offset(), 20);
        assert!(p.prev_page());
        assert_eq!(p.offset(), 0);
        assert!(!p.prev_page());
    }

    #[test]
    fn test_shrinkage_reclamps_offset() {
        let mut p = paginator(120, 50);
        p.next_page();
        p.next_page();
        assert!(p.set_total(60));
        assert_eq!(p.offset(), 10);
        assert!(p.set_total(20));
        assert_eq!(p.offset(), 0);
        assert!(!p.set_total(0));
        assert_eq!(p.current_slice(), 0..0);
    }

    #[test]
    fn test_small_collection_single_page() {
        let p = paginator(10, 50);
        let info = p.page_info();
        assert_eq!(info.total_pages, 1);
        assert_eq!(info.page_number, 1);
        assert_eq!(info.label(), "");
        assert!(!info.has_next());
    }

    #[test]
    fn test_empty_collection() {
        let p = paginator(0, 30);
        let info = p.page_info();
        assert_eq!(info.total_pages, 0);
        assert_eq!(info.page_number, 0);
        assert_eq!(p.current_slice(), 0..0);
    }

    #[test]
    fn test_label_format() {
        let mut p = paginator(120, 50);
        p.next_page();
        assert_eq!(p.page_info().label(), "Showing 51-100 / 120 (page 2/3)");
    }

    #[test]
    fn test_go_to_page() {
        let mut p = paginator(120, 50);
        assert!(p.go_to_page(2));
        assert_eq!(p.offset(), 50);
        assert!(p.go_to_page(3));
        assert_eq!(p.offset(), 70);
        assert!(!p.go_to_page(9));
    }

    proptest! {
        #[test]
        fn prop_offset_stays_in_bounds(
            total in 0usize..1000,
            window in 1usize..100,
            moves in proptest::collection::vec(0u8..3, 0..50),
            shrink_to in 0usize..1000,
        ) {
            let mut p = paginator(total, window);
            for m in moves {
                match m {
                    0 => { p.next_page(); }
                    1 => { p.prev_page(); }
                    _ => { p.set_total(shrink_to.min(p.total())); }
                }
                prop_assert!(p.offset() <= p.max_offset());
                let slice = p.current_slice();
                prop_assert!(slice.end <= p.total());
                prop_assert!(slice.len() <= window);
            }
        }

        #[test]
        fn prop_pages_cover_all_items(total in 0usize..1000, window in 1usize..100) {
            let p = paginator(total, window);
            prop_assert_eq!(p.page_count(), total.div_ceil(window));
            let mut covered = 0;
            for k in 1..=p.page_count() {
                let range = p.page_range(k).unwrap();
                prop_assert_eq!(range.start, (k - 1) * window);
                covered += range.len();
            }
            prop_assert_eq!(covered, total);
        }
    }
}
