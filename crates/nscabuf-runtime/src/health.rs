//! Liveness endpoint: every HTTP request gets `200 OK` with body `hello`.

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const HELLO: &str = "hello";

fn router() -> Router {
    Router::new().fallback(hello)
}

async fn hello() -> &'static str {
    HELLO
}

/// Serve health checks until `cancel` fires.
pub async fn run_health(listener: TcpListener, cancel: CancellationToken) -> anyhow::Result<()> {
    let local = listener.local_addr().context("health listener has no local address")?;
    info!(addr = %local, "health endpoint listening");

    axum::serve(listener, router())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("health endpoint failed")?;
    debug!("health endpoint stopped");
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
