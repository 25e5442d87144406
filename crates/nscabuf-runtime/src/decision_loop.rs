//! The single decision task.
//!
//! Owns the [`Gateway`] outright, so nothing else can touch the registry.
//! Inputs are the bounded inbound queue (fed by connection tasks) and two
//! local tickers: the sweep, which turns passed deadlines into expiry
//! events, and the optional compaction. Sweep output lands in a local FIFO
//! that is drained before the next inbound event is taken.
//!
//! The loop never does IO. Push decisions are handed to the publisher task
//! over a second channel.

use std::collections::VecDeque;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at};
use tracing::{debug, info, trace, warn};

use nscabuf_core::{BufferConfig, Clock, GatewayEvent};
use nscabuf_gateway::{Decision, Gateway, UpstreamUpdate};

pub struct DecisionLoop {
    gateway: Gateway,
    inbound_rx: mpsc::Receiver<GatewayEvent>,
    push_tx: mpsc::Sender<UpstreamUpdate>,
    clock: Arc<dyn Clock>,
    sweep_every: Duration,
    /// `None` disables compaction.
    compact_every: Option<Duration>,
    /// Expiry events found by the last sweep, not yet handled.
    pending: VecDeque<GatewayEvent>,
}

impl DecisionLoop {
    pub fn new(
        config: &BufferConfig,
        inbound_rx: mpsc::Receiver<GatewayEvent>,
        push_tx: mpsc::Sender<UpstreamUpdate>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let compact_every = match config.compact_interval() {
            d if d.is_zero() => None,
            d => Some(d),
        };
        Self {
            gateway: Gateway::new(config),
            inbound_rx,
            push_tx,
            clock,
            sweep_every: config.sweep_interval(),
            compact_every,
            pending: VecDeque::new(),
        }
    }

    /// Run until every inbound sender is gone and the queue is empty.
    /// Hands the gateway back for final reporting.
    pub async fn run(mut self) -> Gateway {
        info!(
            sweep_ms = self.sweep_every.as_millis() as u64,
            compact_secs = self.compact_every.map(|d| d.as_secs()),
            "decision loop started"
        );

        let mut sweep = interval(self.sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut compact = self.compact_every.map(|every| {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            while let Some(event) = self.pending.pop_front() {
                self.dispatch(event).await;
            }

            tokio::select! {
                biased;
                _ = sweep.tick() => {
                    let now = self.clock.now();
                    let due = self.gateway.sweep(now);
                    if !due.is_empty() {
                        debug!(count = due.len(), "sweep found passed deadlines");
                    }
                    self.pending.extend(due);
                }
                () = tick_optional(&mut compact) => {
                    let now = self.clock.now();
                    self.gateway.compact(now);
                }
                event = self.inbound_rx.recv() => {
                    match event {
                        Some(event) => self.dispatch(event).await,
                        None => {
                            info!("decision loop: inbound queue closed and drained, stopping");
                            break;
                        }
                    }
                }
            }
        }

        let stats = self.gateway.stats();
        info!(
            messages = stats.messages,
            pushes = stats.pushes,
            resets = stats.resets,
            held = stats.held,
            tracked = self.gateway.registry().len(),
            "decision loop stopped"
        );
        self.gateway
    }

    async fn dispatch(&mut self, event: GatewayEvent) {
        let now = self.clock.now();
        trace!(kind = event.kind(), service = event.service(), "dispatch");
        if let Decision::Push(update) = self.gateway.handle(event, now) {
            if let Err(rejected) = self.push_tx.send(update).await {
                warn!(
                    service = %rejected.0.service,
                    "publisher is gone, dropping upstream update"
                );
            }
        }
    }
}

async fn tick_optional(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};
    use nscabuf_core::clock::ManualClock;
    use nscabuf_core::{Message, ServiceState};
    use nscabuf_gateway::PushReason;
    use tokio::task::JoinHandle;

    fn config() -> BufferConfig {
        BufferConfig {
            cache_ttl_secs: 60,
            init_buffer_ttl_secs: 10,
            sweep_interval_ms: 100,
            compact_interval_secs: 0,
            ..BufferConfig::default()
        }
    }

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
    }

    fn msg(service: &str, state: ServiceState) -> GatewayEvent {
        GatewayEvent::NewMessage(Message::new(0, state, "web-01", service, "text"))
    }

    struct Harness {
        clock: ManualClock,
        inbound: mpsc::Sender<GatewayEvent>,
        pushes: mpsc::Receiver<UpstreamUpdate>,
        task: JoinHandle<Gateway>,
    }

    fn spawn_loop(config: BufferConfig) -> Harness {
        let clock = ManualClock::new(start());
        let (inbound, inbound_rx) = mpsc::channel(16);
        let (push_tx, pushes) = mpsc::channel(16);
        let decision = DecisionLoop::new(&config, inbound_rx, push_tx, Arc::new(clock.clone()));
        Harness {
            clock,
            inbound,
            pushes,
            task: tokio::spawn(decision.run()),
        }
    }

    /// Let a few sweep ticks run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(350)).await;
    }

    // ── 1. settled_new_service_is_pushed ────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn settled_new_service_is_pushed() {
        let mut h = spawn_loop(config());
        h.inbound.send(msg("http", ServiceState::Critical)).await.unwrap();
        settle().await;
        assert!(h.pushes.try_recv().is_err(), "still buffering");

        h.clock.advance(TimeDelta::seconds(10));
        settle().await;

        let update = h.pushes.try_recv().expect("one push after the buffer");
        assert_eq!(update.service, "http");
        assert_eq!(update.state, ServiceState::Critical);
        assert_eq!(update.reason, PushReason::NewState);
        assert!(h.pushes.try_recv().is_err());
    }

    // ── 2. burst_yields_single_push ─────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn burst_yields_single_push() {
        let mut h = spawn_loop(config());
        for state in [
            ServiceState::Ok,
            ServiceState::Critical,
            ServiceState::Ok,
            ServiceState::Warning,
        ] {
            h.inbound.send(msg("disk", state)).await.unwrap();
        }
        settle().await;
        h.clock.advance(TimeDelta::seconds(10));
        settle().await;

        let update = h.pushes.try_recv().expect("push");
        assert_eq!(update.state, ServiceState::Warning);
        assert!(h.pushes.try_recv().is_err());
    }

    // ── 3. silence_resets_alarm_to_ok ───────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn silence_resets_alarm_to_ok() {
        let mut h = spawn_loop(config());
        h.inbound.send(msg("http", ServiceState::Critical)).await.unwrap();
        settle().await;
        h.clock.advance(TimeDelta::seconds(10));
        settle().await;
        assert_eq!(h.pushes.try_recv().expect("new state").reason, PushReason::NewState);

        h.clock.advance(TimeDelta::seconds(50));
        settle().await;
        let reset = h.pushes.try_recv().expect("reset");
        assert_eq!(reset.reason, PushReason::ResetToOk);
        assert_eq!(reset.state, ServiceState::Ok);

        // Exactly once.
        h.clock.advance(TimeDelta::seconds(120));
        settle().await;
        assert!(h.pushes.try_recv().is_err());
    }

    // ── 4. queue_drains_before_exit ─────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn queue_drains_before_exit() {
        let h = spawn_loop(config());
        for i in 0..10 {
            h.inbound
                .send(msg(&format!("svc-{i}"), ServiceState::Ok))
                .await
                .unwrap();
        }
        drop(h.inbound);

        let gateway = h.task.await.expect("loop task");
        assert_eq!(gateway.stats().messages, 10);
        assert_eq!(gateway.registry().len(), 10);
    }

    // ── 5. sweep_events_run_before_next_message ─────────────────────

    #[tokio::test(start_paused = true)]
    async fn sweep_events_run_before_next_message() {
        let mut h = spawn_loop(config());
        h.inbound.send(msg("http", ServiceState::Ok)).await.unwrap();
        settle().await;

        // Buffer has passed; a changed state arrives right after the sweep.
        h.clock.advance(TimeDelta::seconds(10));
        settle().await;
        h.inbound.send(msg("http", ServiceState::Critical)).await.unwrap();
        settle().await;
        h.clock.advance(TimeDelta::seconds(10));
        settle().await;

        let first = h.pushes.try_recv().expect("first");
        let second = h.pushes.try_recv().expect("second");
        assert_eq!(
            (first.state, first.reason),
            (ServiceState::Ok, PushReason::NewState)
        );
        assert_eq!(
            (second.state, second.reason),
            (ServiceState::Critical, PushReason::StateChange)
        );
    }

    // ── 6. compaction_forgets_expired_services ──────────────────────

    #[tokio::test(start_paused = true)]
    async fn compaction_forgets_expired_services() {
        let h = spawn_loop(BufferConfig {
            compact_interval_secs: 1,
            ..config()
        });
        h.inbound.send(msg("http", ServiceState::Ok)).await.unwrap();
        settle().await;
        h.clock.advance(TimeDelta::seconds(60));
        // One sweep signals expiry, the next compaction tick drops it.
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        drop(h.inbound);
        let gateway = h.task.await.expect("loop task");
        assert!(gateway.registry().is_empty());
    }

    // ── 7. zero_compact_interval_disables_compaction ────────────────

    #[tokio::test(start_paused = true)]
    async fn zero_compact_interval_disables_compaction() {
        let h = spawn_loop(config());
        h.inbound.send(msg("http", ServiceState::Ok)).await.unwrap();
        settle().await;
        h.clock.advance(TimeDelta::seconds(60));
        tokio::time::sleep(Duration::from_secs(5)).await;

        drop(h.inbound);
        let gateway = h.task.await.expect("loop task");
        assert_eq!(gateway.registry().len(), 1);
    }

    // ── 8. closed_publisher_does_not_stop_loop ──────────────────────

    #[tokio::test(start_paused = true)]
    async fn closed_publisher_does_not_stop_loop() {
        let h = spawn_loop(config());
        drop(h.pushes);
        h.inbound.send(msg("http", ServiceState::Critical)).await.unwrap();
        settle().await;
        h.clock.advance(TimeDelta::seconds(10));
        settle().await;

        h.inbound.send(msg("db", ServiceState::Ok)).await.unwrap();
        drop(h.inbound);
        let gateway = h.task.await.expect("loop task");
        assert_eq!(gateway.stats().messages, 2);
        assert_eq!(gateway.stats().pushes, 1);
    }
}
