//! Gateway: turns registry observations into push-or-silence decisions.
//!
//! The gateway is the only writer of the [`Registry`]. It is fed one
//! [`GatewayEvent`] at a time by the runtime's decision loop:
//!
//! 1. `NewMessage` is written through to the registry. No decision yet:
//!    the new state is held for the init-buffer TTL so bursts collapse.
//! 2. `InitBufferExpiry` compares `current` with `previous` and forwards
//!    new services and state changes. Equal states are still forwarded when
//!    upstream was last told something else.
//! 3. `StateExpiry` fires when a service has been silent for a full cache
//!    TTL. Alarm states are reset to OK upstream and the record is retired,
//!    so the next report counts as a new state.
//!
//! Per-service phase is never stored; [`Gateway::phase`] derives it from the
//! registry on demand.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, trace};

use nscabuf_core::{BufferConfig, GatewayEvent, Message, ServiceState};

use crate::registry::Registry;

// ─── Decisions ───────────────────────────────────────────────────────

/// Why an update is being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushReason {
    /// First settled state for a service.
    NewState,
    /// Settled state differs from the one before it.
    StateChange,
    /// Service went silent while in WARNING/CRITICAL.
    ResetToOk,
}

impl PushReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewState => "new_state",
            Self::StateChange => "state_change",
            Self::ResetToOk => "reset_to_ok",
        }
    }
}

/// Why nothing is forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SilenceReason {
    /// Message recorded; decision deferred to the init-buffer expiry.
    Buffered,
    /// Settled state equals the previous one.
    Unchanged,
    /// Silent service whose last state was OK.
    SettledOk,
    /// Silent service whose last state was UNKNOWN. Logged only.
    UnknownExpired,
    /// Event for a service the registry does not hold.
    NotTracked,
    /// State change held back because the service is flapping.
    Flapping,
}

/// What the upstream publisher receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamUpdate {
    pub host: String,
    pub service: String,
    pub state: ServiceState,
    pub description: String,
    pub reason: PushReason,
}

impl UpstreamUpdate {
    fn from_message(message: &Message, reason: PushReason) -> Self {
        Self {
            host: message.host.clone(),
            service: message.service.clone(),
            state: message.state,
            description: message.description.clone(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Push(UpstreamUpdate),
    Silence(SilenceReason),
}

impl Decision {
    pub fn is_push(&self) -> bool {
        matches!(self, Self::Push(_))
    }
}

/// Derived per-service phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "state")]
pub enum ServicePhase {
    Unseen,
    /// Latest state is still inside its init-buffer hold.
    Buffering,
    Settled(ServiceState),
}

/// Running counters, for logging on shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub messages: u64,
    pub pushes: u64,
    pub resets: u64,
    pub held: u64,
}

// ─── Gateway ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Gateway {
    registry: Registry,
    /// Hold state changes for flapping services.
    suppress_flapping: bool,
    /// Cache TTL in seconds, quoted in reset descriptions.
    cache_ttl_secs: u64,
    stats: GatewayStats,
}

impl Gateway {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            registry: Registry::new(config),
            suppress_flapping: config.suppress_flapping,
            cache_ttl_secs: config.cache_ttl_secs,
            stats: GatewayStats::default(),
        }
    }

    /// Apply one event and decide. Never fails.
    pub fn handle(&mut self, event: GatewayEvent, now: DateTime<Utc>) -> Decision {
        let decision = match event {
            GatewayEvent::NewMessage(message) => self.on_new_message(message, now),
            GatewayEvent::InitBufferExpiry(service) => self.on_init_buffer_expiry(&service, now),
            GatewayEvent::StateExpiry(service) => self.on_state_expiry(&service),
        };

        match &decision {
            Decision::Push(update) => {
                self.stats.pushes += 1;
                if update.reason == PushReason::ResetToOk {
                    self.stats.resets += 1;
                }
            }
            Decision::Silence(SilenceReason::Buffered) => {}
            Decision::Silence(_) => self.stats.held += 1,
        }
        decision
    }

    /// Deadlines passed as of `now`, ready to be fed back into [`Self::handle`].
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<GatewayEvent> {
        self.registry.sweep(now)
    }

    /// Drop quiet, expired services. Returns the number removed.
    pub fn compact(&mut self, now: DateTime<Utc>) -> usize {
        let removed = self.registry.compact(now);
        if removed > 0 {
            debug!(removed, remaining = self.registry.len(), "compacted registry");
        }
        removed
    }

    pub fn phase(&self, service: &str, now: DateTime<Utc>) -> ServicePhase {
        match self.registry.record(service) {
            None => ServicePhase::Unseen,
            Some(record) if now < record.init_buffer_expire_at => ServicePhase::Buffering,
            Some(record) => ServicePhase::Settled(record.current.state),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    // ── Event handlers ───────────────────────────────────────────────

    fn on_new_message(&mut self, message: Message, now: DateTime<Utc>) -> Decision {
        self.stats.messages += 1;
        trace!(
            service = %message.service,
            host = %message.host,
            state = %message.state,
            observed_at = %message.observed_at(),
            "BUFFER message"
        );
        self.registry.update(message, now);
        trace!("registry:\n{}", self.registry.summary(now));
        Decision::Silence(SilenceReason::Buffered)
    }

    fn on_init_buffer_expiry(&mut self, service: &str, now: DateTime<Utc>) -> Decision {
        let Some(record) = self.registry.record(service) else {
            debug!(service, "init buffer expiry for untracked service");
            return Decision::Silence(SilenceReason::NotTracked);
        };
        let current = record.current.clone();
        let previous_state = record.previous.as_ref().map(|m| m.state);
        let upstream = record.upstream;

        let (from, reason) = match previous_state {
            None => (None, PushReason::NewState),
            Some(previous) if previous != current.state => {
                (Some(previous), PushReason::StateChange)
            }
            Some(_) => match upstream {
                Some(told) if told == current.state => {
                    trace!(service, state = %current.state, "HOLD duplicate state");
                    return Decision::Silence(SilenceReason::Unchanged);
                }
                None => (None, PushReason::NewState),
                // Upstream still has an older state, e.g. one from before a
                // change held back while the service was flapping.
                Some(told) => (Some(told), PushReason::StateChange),
            },
        };

        if reason == PushReason::StateChange
            && self.suppress_flapping
            && self.registry.is_flapping(service, now)
        {
            info!(
                service,
                from = ?from,
                to = %current.state,
                "HOLD state change, service is flapping"
            );
            return Decision::Silence(SilenceReason::Flapping);
        }

        match reason {
            PushReason::NewState => {
                info!(service, state = %current.state, "PUSH new state upstream");
            }
            _ => info!(
                service,
                from = ?from,
                to = %current.state,
                "PUSH state change upstream"
            ),
        }
        self.registry.mark_upstream(service, current.state);
        Decision::Push(UpstreamUpdate::from_message(&current, reason))
    }

    fn on_state_expiry(&mut self, service: &str) -> Decision {
        let Some(current) = self.registry.get(service) else {
            debug!(service, "state expiry for untracked service");
            return Decision::Silence(SilenceReason::NotTracked);
        };

        let decision = match current.state {
            state if state.is_alarm() => {
                info!(
                    service,
                    expired_state = %state,
                    "PUSH reset to OK for expired service upstream"
                );
                Decision::Push(UpstreamUpdate {
                    host: current.host.clone(),
                    service: current.service.clone(),
                    state: ServiceState::Ok,
                    description: format!(
                        "no check result for {}s, clearing {state} state",
                        self.cache_ttl_secs
                    ),
                    reason: PushReason::ResetToOk,
                })
            }
            ServiceState::Unknown => {
                info!(service, "expired in UNKNOWN state, not forwarding");
                Decision::Silence(SilenceReason::UnknownExpired)
            }
            _ => {
                debug!(service, "expired in OK state, nothing to clear");
                Decision::Silence(SilenceReason::SettledOk)
            }
        };

        // Whatever the state was, it is gone now. The next report for the
        // service is announced as new.
        self.registry.retire(service);
        decision
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
