//! Daemon wiring: config first, then tasks in dependency order.
//!
//! ```text
//! connections ──► inbound queue ──► decision loop ──► push queue ──► publisher
//!      ▲
//!  listener (cancelled on ctrl-c / SIGTERM)
//! ```
//!
//! Shutdown runs front to back: the listener stops accepting, connection
//! tasks finish, the decision loop drains the inbound queue, the publisher
//! drains the push queue.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nscabuf_core::{BufferConfig, Clock, SystemClock};
use nscabuf_gateway::{GatewayStats, UpstreamPublisher};

use crate::cli::DaemonOpts;
use crate::decision_loop::DecisionLoop;
use crate::health::run_health;
use crate::listener::run_listener;
use crate::publish::{LogPublisher, run_publisher};

pub async fn run_daemon(opts: &DaemonOpts) -> anyhow::Result<()> {
    let config = BufferConfig::load(&opts.config)
        .with_context(|| format!("loading {}", opts.config.display()))?;
    info!(
        queue = config.gateway_queue_capacity,
        cache_ttl_secs = config.cache_ttl_secs,
        init_buffer_ttl_secs = config.init_buffer_ttl_secs,
        flap_threshold = config.flap_count_threshold,
        flap_window_secs = config.flap_window_secs,
        suppress_flapping = config.suppress_flapping,
        "configuration loaded"
    );

    let listener = TcpListener::bind(&opts.listen)
        .await
        .with_context(|| format!("binding {}", opts.listen))?;

    let health_cancel = CancellationToken::new();
    let health_task = match &opts.health_listen {
        Some(addr) => {
            let health = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding health endpoint {addr}"))?;
            Some(tokio::spawn(run_health(health, health_cancel.clone())))
        }
        None => None,
    };

    let served = serve(
        &config,
        listener,
        Arc::new(SystemClock),
        LogPublisher::default(),
        shutdown_signal(),
    )
    .await;

    health_cancel.cancel();
    if let Some(task) = health_task {
        task.await.context("health endpoint panicked")??;
    }
    let (stats, publisher) = served?;

    info!(
        messages = stats.messages,
        pushes = stats.pushes,
        published = publisher.published(),
        "daemon stopped"
    );
    Ok(())
}

/// Run every task until `shutdown` resolves (or the listener dies), then
/// drain. Returns the final gateway counters and the publisher.
pub async fn serve<P>(
    config: &BufferConfig,
    listener: TcpListener,
    clock: Arc<dyn Clock>,
    publisher: P,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<(GatewayStats, P)>
where
    P: UpstreamPublisher + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::channel(config.gateway_queue_capacity);
    let (push_tx, push_rx) = mpsc::channel(config.gateway_queue_capacity);

    let publisher_task = tokio::spawn(run_publisher(publisher, push_rx));
    let decision_task = tokio::spawn(DecisionLoop::new(config, inbound_rx, push_tx, clock).run());

    let cancel = CancellationToken::new();
    let mut listener_task = tokio::spawn(run_listener(listener, inbound_tx, cancel.clone()));

    let early_exit = tokio::select! {
        () = shutdown => None,
        result = &mut listener_task => {
            warn!("listener exited unexpectedly");
            Some(result)
        }
    };
    cancel.cancel();
    let listener_result = match early_exit {
        Some(result) => result,
        None => listener_task.await,
    };

    let gateway = decision_task.await.context("decision loop panicked")?;
    let publisher = publisher_task.await.context("publisher panicked")?;
    listener_result.context("listener panicked")??;

    Ok((gateway.stats(), publisher))
}

/// Resolves on ctrl-c or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "could not register SIGTERM handler, waiting for ctrl-c only");
                ctrl_c.await.ok();
                info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received ctrl-c, shutting down");
    }
}
