//! TCP front end: one short-lived task per connection.
//!
//! Each connection carries at most one frame. The task reads it, decodes it
//! and either enqueues a `NewMessage` or answers with a one-line rejection.
//! Enqueueing waits for room in the bounded queue, so a slow decision loop
//! slows down intake instead of losing messages.

use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use nscabuf_core::{FRAME_LEN, GatewayEvent, decode_frame};

pub const READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const REJECTION: &[u8] = b"message could not be processed\n";
/// How long to wait for bytes past a full frame before taking it as complete.
const TRAILING_GRACE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Accepted,
    Rejected,
}

/// Accept connections until `cancel` fires. Dropping out of this function
/// releases the listener's queue sender; in-flight connection tasks keep
/// their own clones until they finish.
pub async fn run_listener(
    listener: TcpListener,
    inbound: mpsc::Sender<GatewayEvent>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let local = listener.local_addr().context("listener has no local address")?;
    info!(addr = %local, "listening for check results");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    match handle_connection(stream, inbound).await {
                        Ok(outcome) => trace!(%peer, ?outcome, "connection done"),
                        Err(e) => debug!(%peer, "connection error: {e:#}"),
                    }
                });
            }
            _ = cancel.cancelled() => {
                info!("listener: cancellation requested, no longer accepting");
                break;
            }
        }
    }
    Ok(())
}

/// Read one frame from `stream`, decode it, and enqueue or reject it.
pub async fn handle_connection<S>(
    mut stream: S,
    inbound: mpsc::Sender<GatewayEvent>,
) -> anyhow::Result<ConnectionOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = match timeout(READ_TIMEOUT, read_frame(&mut stream)).await {
        Ok(read) => read.context("reading frame")?,
        Err(_) => {
            debug!(timeout_secs = READ_TIMEOUT.as_secs(), "frame read timed out");
            reject(&mut stream).await?;
            return Ok(ConnectionOutcome::Rejected);
        }
    };

    match decode_frame(&bytes) {
        Ok(message) => {
            trace!(
                host = %message.host,
                service = %message.service,
                state = %message.state,
                "frame decoded"
            );
            inbound
                .send(GatewayEvent::NewMessage(message))
                .await
                .context("gateway queue closed")?;
            Ok(ConnectionOutcome::Accepted)
        }
        Err(e) => {
            warn!(error = %e, "rejecting frame");
            reject(&mut stream).await?;
            Ok(ConnectionOutcome::Rejected)
        }
    }
}

/// Read up to one frame, stopping early at EOF. Bytes past a full frame are
/// kept so the decoder sees the wrong length.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(FRAME_LEN + 1);
    (&mut *reader)
        .take(FRAME_LEN as u64)
        .read_to_end(&mut buf)
        .await?;
    if buf.len() == FRAME_LEN {
        let mut extra = [0u8; 1];
        if let Ok(read) = timeout(TRAILING_GRACE, reader.read(&mut extra)).await {
            buf.extend_from_slice(&extra[..read?]);
        }
    }
    Ok(buf)
}

async fn reject<W: AsyncWrite + Unpin>(writer: &mut W) -> std::io::Result<()> {
    writer.write_all(REJECTION).await?;
    writer.shutdown().await
}

// ─── Tests ──────────────────────────────────────────────────────────
