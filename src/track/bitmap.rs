//! Dirty page bitmap
//!
//! One bit per fixed-size page, growable by page index. The write path pays
//! one or-into-word per touched page; enumeration walks set bits in order.

/// Growable bit-set recording which pages of one file have been written
/// since the last reset.
#[derive(Clone, Debug)]
pub struct DirtyBitmap {
    words: Vec<u64>,
    total_pages: u32,
    page_size: u32,
}

const WORD_BITS: u32 = 64;

impl DirtyBitmap {
    /// Create an empty bitmap for the given page size
    pub fn new(page_size: u32) -> Self {
        Self {
            words: Vec::new(),
            total_pages: 0,
            page_size,
        }
    }

    /// Page size this bitmap counts in
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Highest page index ever touched + 1; monotonic, survives `reset`
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    /// Number of currently dirty pages
    pub fn count_dirty(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Mark every page intersecting the byte range `[offset, offset + len)`
    /// as dirty, growing the bitmap as needed. `len <= 0` is a no-op.
    pub fn mark_range(&mut self, offset: i64, len: i64) {
        if len <= 0 || offset < 0 {
            return;
        }
        let page_size = self.page_size as i64;
        let start = (offset / page_size) as u32;
        let end = ((offset + len - 1) / page_size) as u32;

        self.grow_to(end + 1);
        for page in start..=end {
            self.words[(page / WORD_BITS) as usize] |= 1u64 << (page % WORD_BITS);
        }
    }

    /// Test a single page's bit
    pub fn contains(&self, page_index: u32) -> bool {
        match self.words.get((page_index / WORD_BITS) as usize) {
            Some(word) => word & (1u64 << (page_index % WORD_BITS)) != 0,
            None => false,
        }
    }

    /// Dirty page indices in ascending order; allocates exactly as many
    /// entries as there are set bits.
    pub fn collect_dirty(&self) -> Vec<u32> {
        let mut pages = Vec::with_capacity(self.count_dirty() as usize);
        for (word_idx, &word) in self.words.iter().enumerate() {
            let mut bits = word;
            while bits != 0 {
                let bit = bits.trailing_zeros();
                pages.push(word_idx as u32 * WORD_BITS + bit);
                bits &= bits - 1;
            }
        }
        pages
    }

    /// Clear all bits in place. Keeps the allocation and `total_pages`.
    pub fn reset(&mut self) {
        self.words.fill(0);
    }

    /// Ensure capacity for `pages` pages, rounded up to whole words,
    /// zero-filling the new suffix.
    fn grow_to(&mut self, pages: u32) {
        let needed_words = pages.div_ceil(WORD_BITS) as usize;
        if needed_words > self.words.len() {
            self.words.resize(needed_words, 0);
        }
        if pages > self.total_pages {
            self.total_pages = pages;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_empty_bitmap() {
        let bitmap = DirtyBitmap::new(4096);
        assert_eq!(bitmap.total_pages(), 0);
        assert_eq!(bitmap.count_dirty(), 0);
        assert!(bitmap.collect_dirty().is_empty());
        assert!(!bitmap.contains(0));
    }

    #[test]
    fn test_mark_single_page() {
        let mut bitmap = DirtyBitmap::new(4096);
        bitmap.mark_range(0, 4096);
        assert_eq!(bitmap.collect_dirty(), vec![0]);
        assert_eq!(bitmap.total_pages(), 1);
    }

    #[test]
    fn test_mark_spanning_page_boundary() {
        let mut bitmap = DirtyBitmap::new(4096);
        // One byte before the boundary, one after
        bitmap.mark_range(4095, 2);
        assert_eq!(bitmap.collect_dirty(), vec![0, 1]);
    }

    #[test]
    fn test_partial_page_write_marks_containing_page() {
        let mut bitmap = DirtyBitmap::new(4096);
        bitmap.mark_range(10_000, 100);
        assert_eq!(bitmap.collect_dirty(), vec![2]);
        assert_eq!(bitmap.total_pages(), 3);
    }

    #[test]
    fn test_zero_length_is_noop() {
        let mut bitmap = DirtyBitmap::new(4096);
        bitmap.mark_range(0, 0);
        bitmap.mark_range(4096, -5);
        assert_eq!(bitmap.total_pages(), 0);
        assert!(bitmap.collect_dirty().is_empty());
    }

    #[test]
    fn test_overlapping_marks_are_idempotent() {
        let mut bitmap = DirtyBitmap::new(4096);
        bitmap.mark_range(0, 8192);
        bitmap.mark_range(4096, 4096);
        bitmap.mark_range(100, 1);
        assert_eq!(bitmap.collect_dirty(), vec![0, 1]);
    }

    #[test]
    fn test_reset_keeps_total_pages() {
        let mut bitmap = DirtyBitmap::new(4096);
        bitmap.mark_range(0, 65 * 4096);
        assert_eq!(bitmap.total_pages(), 65);

        bitmap.reset();
        assert!(bitmap.collect_dirty().is_empty());
        assert_eq!(bitmap.total_pages(), 65);

        // Marks after a reset land in the retained allocation
        bitmap.mark_range(64 * 4096, 1);
        assert_eq!(bitmap.collect_dirty(), vec![64]);
    }

    #[test]
    fn test_growth_to_large_index_leaves_lower_bits_zero() {
        let mut bitmap = DirtyBitmap::new(4096);
        let offset = 1_000_000i64 * 4096;
        bitmap.mark_range(offset, 1);
        assert_eq!(bitmap.total_pages(), 1_000_001);
        assert_eq!(bitmap.collect_dirty(), vec![1_000_000]);
        for page in [0, 1, 999_999] {
            assert!(!bitmap.contains(page));
        }
    }

    #[test]
    fn test_small_page_size() {
        let mut bitmap = DirtyBitmap::new(512);
        bitmap.mark_range(511, 2);
        assert_eq!(bitmap.collect_dirty(), vec![0, 1]);
    }

    proptest! {
        /// collect_dirty covers exactly the pages intersecting any marked
        /// range, strictly ascending and pairwise distinct.
        #[test]
        fn prop_mark_collect_matches_model(
            ranges in prop::collection::vec((0i64..2_000_000, 0i64..100_000), 0..40),
            page_size in prop::sample::select(vec![512u32, 1024, 4096]),
        ) {
            let mut bitmap = DirtyBitmap::new(page_size);
            let mut model = BTreeSet::new();

            for &(offset, len) in &ranges {
                bitmap.mark_range(offset, len);
                if len > 0 {
                    let start = offset / page_size as i64;
                    let end = (offset + len - 1) / page_size as i64;
                    for page in start..=end {
                        model.insert(page as u32);
                    }
                }
            }

            let collected = bitmap.collect_dirty();
            let expected: Vec<u32> = model.iter().copied().collect();
            prop_assert_eq!(&collected, &expected);

            // Strictly ascending (pairwise distinct follows)
            for pair in collected.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
        }

        /// reset empties the set and keeps total_pages
        #[test]
        fn prop_reset_preserves_total_pages(
            ranges in prop::collection::vec((0i64..1_000_000, 1i64..50_000), 1..20),
        ) {
            let mut bitmap = DirtyBitmap::new(4096);
            for &(offset, len) in &ranges {
                bitmap.mark_range(offset, len);
            }
            let total = bitmap.total_pages();
            bitmap.reset();
            prop_assert_eq!(bitmap.count_dirty(), 0);
            prop_assert_eq!(bitmap.total_pages(), total);
        }
    }
}
