//! Last-known-state cache, keyed by service name.
//!
//! Holds the current and previous message per service plus the two
//! deadlines derived from them. Deadlines are never timers: a periodic
//! [`Registry::sweep`] compares them against `now` and reports which have
//! passed as [`GatewayEvent`]s. Expiry drives decisions, not deletion;
//! records only leave via [`Registry::compact`].

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, TimeDelta, Utc};

use nscabuf_core::{BufferConfig, GatewayEvent, Message, ServiceState};

use crate::flapper::Flapper;
use crate::time_window::TimeWindow;

// ─── Service Record ─────────────────────────────────────────────────

/// Everything the registry knows about one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub current: Message,
    /// `None` only until the second message for the service arrives.
    pub previous: Option<Message>,
    /// When the init-buffer hold for `current` ends.
    pub init_buffer_expire_at: DateTime<Utc>,
    /// When `current` goes stale.
    pub expire_at: DateTime<Utc>,
    /// Last state pushed upstream for this service. `None` until the first
    /// push, and again after the record is retired.
    pub upstream: Option<ServiceState>,
    /// Set once the state expired and was dealt with. The next `update`
    /// starts the record over instead of shifting `current` to `previous`.
    retired: bool,
    /// Set once the sweep has reported the init-buffer deadline.
    init_buffer_signaled: bool,
    /// Set once the sweep has reported the expiry deadline.
    expiry_signaled: bool,
}

impl ServiceRecord {
    /// Whether the sweep has already reported this record as expired.
    pub fn is_expired(&self) -> bool {
        self.expiry_signaled
    }
}

// ─── Registry ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Registry {
    records: HashMap<String, ServiceRecord>,
    flapper: Flapper,
    cache_ttl: TimeDelta,
    init_buffer_ttl: TimeDelta,
}

impl Registry {
    /// Build a registry from validated configuration.
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            records: HashMap::new(),
            flapper: Flapper::new(config.flap_count_threshold, config.flap_window_secs),
            cache_ttl: config.cache_ttl(),
            init_buffer_ttl: config.init_buffer_ttl(),
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Upsert the record for `message.service`.
    ///
    /// The old `current` becomes `previous`, both deadlines restart from
    /// `now`, and a state transition is noted with the flapper. Emits
    /// nothing; the sweep reports deadlines later. A retired record starts
    /// over with no `previous` and no transition noted.
    pub fn update(&mut self, message: Message, now: DateTime<Utc>) {
        let init_buffer_expire_at = deadline(now, self.init_buffer_ttl);
        let expire_at = deadline(now, self.cache_ttl);

        match self.records.get_mut(&message.service) {
            Some(record) if record.retired => {
                record.current = message;
                record.previous = None;
                record.retired = false;
                record.init_buffer_expire_at = init_buffer_expire_at;
                record.expire_at = expire_at;
                record.init_buffer_signaled = false;
                record.expiry_signaled = false;
            }
            Some(record) => {
                if record.current.state != message.state {
                    self.flapper.note_state_change(&message.service, now);
                }
                let previous = std::mem::replace(&mut record.current, message);
                record.previous = Some(previous);
                record.init_buffer_expire_at = init_buffer_expire_at;
                record.expire_at = expire_at;
                record.init_buffer_signaled = false;
                record.expiry_signaled = false;
            }
            None => {
                let service = message.service.clone();
                self.records.insert(
                    service,
                    ServiceRecord {
                        current: message,
                        previous: None,
                        init_buffer_expire_at,
                        expire_at,
                        upstream: None,
                        retired: false,
                        init_buffer_signaled: false,
                        expiry_signaled: false,
                    },
                );
            }
        }
    }

    /// Remember what upstream was last told about `service`.
    pub fn mark_upstream(&mut self, service: &str, state: ServiceState) {
        if let Some(record) = self.records.get_mut(service) {
            record.upstream = Some(state);
        }
    }

    /// Close out an expired record. Upstream knowledge is dropped and the
    /// next message for the service is treated as its first, exactly as if
    /// compaction had removed the record in between.
    pub fn retire(&mut self, service: &str) {
        if let Some(record) = self.records.get_mut(service) {
            record.upstream = None;
            record.retired = true;
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────

    /// Current message for `service`.
    pub fn get(&self, service: &str) -> Option<&Message> {
        self.records.get(service).map(|r| &r.current)
    }

    /// Previous message for `service`. `None` if unknown or seen only once.
    pub fn get_prev(&self, service: &str) -> Option<&Message> {
        self.records.get(service).and_then(|r| r.previous.as_ref())
    }

    /// Flap window for `service`, if it has ever changed state.
    pub fn get_flap(&self, service: &str) -> Option<&TimeWindow> {
        self.flapper.window(service)
    }

    pub fn contains(&self, message: &Message) -> bool {
        self.records.contains_key(&message.service)
    }

    pub fn record(&self, service: &str) -> Option<&ServiceRecord> {
        self.records.get(service)
    }

    /// Whether `service` is flapping as of `now` (window recomputed).
    pub fn is_flapping(&mut self, service: &str, now: DateTime<Utc>) -> bool {
        self.flapper.is_flapping(service, true, now)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ── Sweep ────────────────────────────────────────────────────────

    /// Report every deadline that has passed since the last sweep.
    ///
    /// A record past `expire_at` yields `StateExpiry`; one past only
    /// `init_buffer_expire_at` yields `InitBufferExpiry`. Each deadline is
    /// reported once per `update`. Events come back ordered by service name.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();

        for (service, record) in &mut self.records {
            if now >= record.expire_at {
                if !record.expiry_signaled {
                    record.expiry_signaled = true;
                    // An expired record no longer owes an init-buffer decision.
                    record.init_buffer_signaled = true;
                    events.push(GatewayEvent::StateExpiry(service.clone()));
                }
            } else if now >= record.init_buffer_expire_at && !record.init_buffer_signaled {
                record.init_buffer_signaled = true;
                events.push(GatewayEvent::InitBufferExpiry(service.clone()));
            }
        }

        events.sort_by(|a, b| a.service().cmp(b.service()));
        events
    }

    // ── Compaction ───────────────────────────────────────────────────

    /// Bound memory for services that have gone quiet.
    ///
    /// Drops flap windows with nothing left in them as of `now`, then drops
    /// records that have already expired and have no flap window left.
    /// Returns the number of records removed.
    pub fn compact(&mut self, now: DateTime<Utc>) -> usize {
        self.flapper.touch_all(now);
        self.flapper.compact();

        let before = self.records.len();
        let flapper = &self.flapper;
        self.records
            .retain(|service, record| !record.expiry_signaled || flapper.window(service).is_some());
        before - self.records.len()
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// One line per service, sorted, for trace logging.
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        let mut services: Vec<&String> = self.records.keys().collect();
        services.sort();

        let mut out = String::new();
        for service in services {
            let record = &self.records[service];
            let previous = record
                .previous
                .as_ref()
                .map_or("-", |m| m.state.as_str());
            let flaps = self.flapper.window(service).map_or(0, TimeWindow::total);
            let _ = writeln!(
                out,
                "{service}: host={} state={} previous={previous} buffer_in={}s expire_in={}s flaps={flaps}",
                record.current.host,
                record.current.state,
                (record.init_buffer_expire_at - now).num_seconds().max(0),
                (record.expire_at - now).num_seconds().max(0),
            );
        }
        out
    }
}

fn deadline(now: DateTime<Utc>, ttl: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ─── Tests ──────────────────────────────────────────────────────────
