//! Splitting block ranges into query-sized windows

/// Inclusive, non-overlapping windows covering `[from, to]`, each at most
/// `max_range` blocks wide, in ascending order.
pub fn block_windows(from: u64, to: u64, max_range: u64) -> BlockWindows {
    BlockWindows {
        next: from,
        to,
        max_range: max_range.max(1),
        done: from > to,
    }
}

#[derive(Clone, Debug)]
pub struct BlockWindows {
    next: u64,
    to: u64,
    max_range: u64,
    done: bool,
}

impl Iterator for BlockWindows {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let start = self.next;
        let end = start.saturating_add(self.max_range - 1).min(self.to);
        if end == self.to {
            self.done = true;
        } else {
            self.next = end + 1;
        }
        Some((start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_multiple() {
        let windows: Vec<_> = block_windows(1, 4096, 2048).collect();
        assert_eq!(windows, vec![(1, 2048), (2049, 4096)]);
    }

    #[test]
    fn test_remainder_window() {
        let windows: Vec<_> = block_windows(10, 25, 10).collect();
        assert_eq!(windows, vec![(10, 19), (20, 25)]);
    }

    #[test]
    fn test_single_block() {
        let windows: Vec<_> = block_windows(7, 7, 2048).collect();
        assert_eq!(windows, vec![(7, 7)]);
    }

    #[test]
    fn test_empty_when_inverted() {
        assert_eq!(block_windows(8, 7, 10).count(), 0);
    }

    #[test]
    fn test_no_overflow_at_top_of_range() {
        let windows: Vec<_> = block_windows(u64::MAX - 3, u64::MAX, 3).collect();
        assert_eq!(
            windows,
            vec![(u64::MAX - 3, u64::MAX - 1), (u64::MAX, u64::MAX)]
        );
    }

    #[test]
    fn test_windows_cover_range_without_gaps() {
        let windows: Vec<_> = block_windows(100, 10_000, 333).collect();
        assert_eq!(windows.first().map(|w| w.0), Some(100));
        assert_eq!(windows.last().map(|w| w.1), Some(10_000));
        for pair in windows.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0);
            assert!(pair[0].1 - pair[0].0 < 333);
        }
    }
}
