//! Fixed-size time windows over a half-open `[start, end)` range.

/// Half-open time range in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: i64,
    /// Exclusive end.
    pub end: i64,
}

impl TimeWindow {
    /// Returns true if `ts` falls inside the window.
    #[must_use]
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Window length in milliseconds.
    #[must_use]
    pub fn len_ms(&self) -> i64 {
        self.end - self.start
    }
}

/// Iterator over contiguous windows of `step_ms` covering `[start, end)`.
///
/// The last window is clipped to `end`. An empty range yields nothing.
#[derive(Debug, Clone)]
pub struct TimeWindows {
    cursor: i64,
    end: i64,
    step_ms: i64,
}

impl TimeWindows {
    /// Creates the iterator. `step_ms` must be positive.
    ///
    /// # Panics
    ///
    /// Panics if `step_ms <= 0`; callers validate the window size first.
    #[must_use]
    pub fn new(start: i64, end: i64, step_ms: i64) -> Self {
        assert!(step_ms > 0, "window size must be positive");
        Self {
            cursor: start,
            end,
            step_ms,
        }
    }

    /// Windows of `minutes` minutes.
    #[must_use]
    pub fn minutes(start: i64, end: i64, minutes: u32) -> Self {
        Self::new(start, end, i64::from(minutes) * 60 * 1000)
    }
}

impl Iterator for TimeWindows {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.cursor >= self.end {
            return None;
        }
        let start = self.cursor;
        let end = start.saturating_add(self.step_ms).min(self.end);
        self.cursor = end;
        Some(TimeWindow { start, end })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.cursor >= self.end {
            return (0, Some(0));
        }
        let span = (self.end as i128) - (self.cursor as i128);
        let step = self.step_ms as i128;
        let count = usize::try_from((span + step - 1) / step).unwrap_or(usize::MAX);
        (count, Some(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    #[test]
    fn test_two_hour_range_in_one_hour_windows() {
        let windows: Vec<_> = TimeWindows::minutes(0, 2 * HOUR_MS, 60).collect();
        assert_eq!(
            windows,
            vec![
                TimeWindow {
                    start: 0,
                    end: HOUR_MS
                },
                TimeWindow {
                    start: HOUR_MS,
                    end: 2 * HOUR_MS
                },
            ]
        );
    }

    #[test]
    fn test_last_window_is_clipped() {
        let windows: Vec<_> = TimeWindows::new(0, 25, 10).collect();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[2], TimeWindow { start: 20, end: 25 });
    }

    #[test]
    fn test_empty_and_inverted_ranges() {
        assert_eq!(TimeWindows::new(5, 5, 10).count(), 0);
        assert_eq!(TimeWindows::new(10, 5, 10).count(), 0);
    }

    #[test]
    fn test_window_near_i64_max_does_not_overflow() {
        let windows: Vec<_> = TimeWindows::new(i64::MAX - 5, i64::MAX, 10).collect();
        assert_eq!(
            windows,
            vec![TimeWindow {
                start: i64::MAX - 5,
                end: i64::MAX
            }]
        );
    }

    #[test]
    fn test_contains_is_half_open() {
        let w = TimeWindow {
            start: 100,
            end: 200,
        };
        assert!(w.contains(100));
        assert!(w.contains(199));
        assert!(!w.contains(200));
        assert!(!w.contains(99));
        assert_eq!(w.len_ms(), 100);
    }

    #[test]
    #[should_panic(expected = "window size must be positive")]
    fn test_zero_step_panics() {
        let _ = TimeWindows::new(0, 10, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Windows are contiguous, non-overlapping, non-empty and cover [start, end).
        #[test]
        fn prop_windows_partition_range(
            start in -1_000_000_000i64..1_000_000_000,
            len in 0i64..50_000_000,
            step in 1i64..10_000_000,
        ) {
            let end = start + len;
            let windows: Vec<_> = TimeWindows::new(start, end, step).collect();

            if len == 0 {
                prop_assert!(windows.is_empty());
            } else {
                prop_assert_eq!(windows.first().map(|w| w.start), Some(start));
                prop_assert_eq!(windows.last().map(|w| w.end), Some(end));
                for w in &windows {
                    prop_assert!(w.start < w.end);
                    prop_assert!(w.len_ms() <= step);
                }
                for pair in windows.windows(2) {
                    prop_assert_eq!(pair[0].end, pair[1].start);
                    prop_assert_eq!(pair[0].len_ms(), step);
                }
                let covered: i64 = windows.iter().map(TimeWindow::len_ms).sum();
                prop_assert_eq!(covered, len);
            }
        }

        /// size_hint matches the number of windows produced.
        #[test]
        fn prop_size_hint_is_exact(
            start in 0i64..1_000_000,
            len in 0i64..1_000_000,
            step in 1i64..100_000,
        ) {
            let windows = TimeWindows::new(start, start + len, step);
            let (lower, upper) = windows.size_hint();
            let count = windows.count();
            prop_assert_eq!(lower, count);
            prop_assert_eq!(upper, Some(count));
        }
    }
}
