//! Sliding time-window counter with one-second buckets.
//!
//! A fixed ring of `duration` buckets. The window always covers the seconds
//! `(latest - duration, latest]`, where `latest` is the newest time ever
//! passed to [`TimeWindow::add`]. Aged-out buckets are only cleared when
//! `add` moves `latest` forward, so [`TimeWindow::total`] reflects the window
//! as of the last `add`, not as of the wall clock.

// ─── TimeWindow ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    /// `buckets[second.rem_euclid(duration)]` holds the count for `second`.
    buckets: Vec<u64>,
    /// Newest second seen (head of the window).
    latest: i64,
    /// Running sum of all buckets.
    total: u64,
}

impl TimeWindow {
    /// Create an empty window whose head is `start` (unix seconds).
    /// A zero `duration` is treated as one second.
    pub fn new(start: i64, duration: u64) -> Self {
        let len = usize::try_from(duration.max(1)).unwrap_or(usize::MAX);
        Self {
            buckets: vec![0; len],
            latest: start,
            total: 0,
        }
    }

    /// Add `delta` to the bucket for `time`.
    ///
    /// A `time` newer than the head slides the window forward first,
    /// evicting buckets that fall out. A `time` older than the window is
    /// dropped. `delta == 0` is a pure slide ("touch").
    pub fn add(&mut self, time: i64, delta: u64) {
        let duration = self.duration_secs();

        if time > self.latest {
            let steps = time.saturating_sub(self.latest).min(duration);
            for offset in 0..steps {
                let idx = self.index(time - offset);
                self.total -= self.buckets[idx];
                self.buckets[idx] = 0;
            }
            self.latest = time;
        } else if time <= self.latest.saturating_sub(duration) {
            return;
        }

        let idx = self.index(time);
        self.buckets[idx] += delta;
        self.total += delta;
    }

    /// Sum of all buckets in the window as of the last `add`.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Head of the window (unix seconds).
    pub fn latest(&self) -> i64 {
        self.latest
    }

    /// Window length in seconds.
    pub fn duration(&self) -> u64 {
        self.buckets.len() as u64
    }

    fn duration_secs(&self) -> i64 {
        i64::try_from(self.buckets.len()).unwrap_or(i64::MAX)
    }

    fn index(&self, second: i64) -> usize {
        // rem_euclid keeps pre-epoch seconds in range.
        second.rem_euclid(self.duration_secs()) as usize
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
