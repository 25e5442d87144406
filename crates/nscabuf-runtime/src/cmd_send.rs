//! `nscabuf send`: submit one check result, like a tiny send_nsca.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use nscabuf_core::{Message, encode_frame};

use crate::cli::SendOpts;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn cmd_send(opts: &SendOpts) -> anyhow::Result<()> {
    let timestamp = u32::try_from(Utc::now().timestamp())
        .context("system clock is outside the frame's timestamp range")?;
    let message = Message::new(
        timestamp,
        opts.state,
        opts.host.as_str(),
        opts.service.as_str(),
        opts.message.as_str(),
    );

    match send_frame(&opts.addr, &message).await? {
        None => {
            println!("sent {} {} {}", message.host, message.service, message.state);
            Ok(())
        }
        Some(reply) => anyhow::bail!("daemon rejected the message: {reply}"),
    }
}

/// Send one encoded frame. Returns the daemon's reply if it sent one;
/// an accepted frame gets no reply.
pub async fn send_frame(addr: &str, message: &Message) -> anyhow::Result<Option<String>> {
    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .with_context(|| format!("timed out connecting to {addr}"))?
        .with_context(|| format!("could not connect to {addr}"))?;

    stream.write_all(&encode_frame(message)).await?;
    stream.shutdown().await?;

    let mut reply = String::new();
    timeout(REPLY_TIMEOUT, stream.read_to_string(&mut reply))
        .await
        .context("timed out waiting for the daemon to close the connection")??;

    let reply = reply.trim();
    Ok((!reply.is_empty()).then(|| reply.to_owned()))
}
