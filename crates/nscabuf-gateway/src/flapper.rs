//! Flap detection: has a service changed state too often recently?
//!
//! Keeps one [`TimeWindow`] per service, created lazily on the first noted
//! transition. A service is flapping when at least `max` transitions fall
//! inside the trailing `duration` seconds.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::time_window::TimeWindow;

// ─── Flapper ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Flapper {
    /// Transitions within the window at which a service counts as flapping.
    max: u64,
    /// Window length in seconds.
    duration: u64,
    services: HashMap<String, TimeWindow>,
}

impl Flapper {
    pub fn new(max: u64, duration: u64) -> Self {
        Self {
            max,
            duration,
            services: HashMap::new(),
        }
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Record one transition for `service` at `now`.
    pub fn note_state_change(&mut self, service: &str, now: DateTime<Utc>) {
        let secs = now.timestamp();
        match self.services.get_mut(service) {
            Some(window) => window.add(secs, 1),
            None => {
                let mut window = TimeWindow::new(secs, self.duration);
                window.add(secs, 1);
                self.services.insert(service.to_owned(), window);
            }
        }
    }

    /// Whether `service` is flapping. Unknown services never are.
    ///
    /// With `recompute` the window is first slid to `now` so aged-out
    /// transitions are dropped. Without it the answer reflects the window as
    /// of its last mutation and can overstate the count after a quiet period.
    pub fn is_flapping(&mut self, service: &str, recompute: bool, now: DateTime<Utc>) -> bool {
        let Some(window) = self.services.get_mut(service) else {
            return false;
        };
        if recompute {
            window.add(now.timestamp(), 0);
        }
        window.total() >= self.max
    }

    /// Read-only view of a service's window.
    pub fn window(&self, service: &str) -> Option<&TimeWindow> {
        self.services.get(service)
    }

    /// Slide every window to `now`.
    pub fn touch_all(&mut self, now: DateTime<Utc>) {
        let secs = now.timestamp();
        for window in self.services.values_mut() {
            window.add(secs, 0);
        }
    }

    /// Drop windows whose total is zero. Returns how many were dropped.
    ///
    /// Totals are as of each window's last mutation; call
    /// [`Self::touch_all`] first to compact against the current time.
    pub fn compact(&mut self) -> usize {
        let before = self.services.len();
        self.services.retain(|_, window| window.total() > 0);
        before - self.services.len()
    }

    /// Number of services with a window.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
