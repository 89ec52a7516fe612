use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::bot::Bot;
use crate::engine::events::GatewayEvent;

/// Maximum bytes per bridge line. History batches are the largest events.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// How long queued replies may take to reach a closing client.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Read one `\n`-terminated line into `buf`, capped at MAX_LINE_LENGTH bytes.
/// Returns Ok(0) on EOF, Ok(n) on success, Err on I/O error or line too long.
/// A final line without a terminator is returned as-is before EOF.
async fn read_bounded_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
) -> std::io::Result<usize> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(buf.len());
        }
        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (&available[..=pos], true),
            None => (available, false),
        };
        let len = chunk.len();
        buf.extend_from_slice(chunk);
        reader.consume(len);

        if buf.len() > MAX_LINE_LENGTH + 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "bridge line exceeds maximum length",
            ));
        }
        if done {
            return Ok(buf.len());
        }
    }
}

/// Handle one bridge client from accept to close.
///
/// Inbound lines are decoded as [`GatewayEvent`]s and handed to the bot in
/// order. Every action the bot emits while the client is connected is
/// written back as one JSON line. Replies already queued when the client
/// goes away are still written, within [`WRITER_DRAIN_TIMEOUT`].
pub async fn handle_bridge_connection<S>(
    stream: S,
    peer: String,
    bot: Arc<Bot>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    info!(%peer, "bridge client connected");

    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut actions = bot.subscribe();

    let closing = CancellationToken::new();
    let writer_closing = closing.clone();
    let writer_peer = peer.clone();
    let mut write_handle = tokio::spawn(async move {
        loop {
            // queued actions win over the close signal
            let received = tokio::select! {
                biased;
                received = actions.recv() => received,
                _ = writer_closing.cancelled() => break,
            };
            let action = match received {
                Ok(action) => action,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(peer = %writer_peer, skipped, "bridge client too slow, actions dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let mut line = match serde_json::to_vec(&action) {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "failed to encode bot action");
                    continue;
                }
            };
            line.push(b'\n');
            if writer.write_all(&line).await.is_err() {
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut line = Vec::new();
    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = read_bounded_line(&mut reader, &mut line) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(%peer, error = %e, "closing bridge connection");
                break;
            }
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<GatewayEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(%peer, error = %e, "malformed bridge event, skipping");
                continue;
            }
        };
        debug!(%peer, ?event, "bridge event");
        if let Err(e) = bot.handle_event(event).await {
            error!(%peer, error = %e, "failed to handle bridge event");
        }
    }

    closing.cancel();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut write_handle)
        .await
        .is_err()
    {
        warn!(%peer, "bridge client not reading, dropping queued actions");
        write_handle.abort();
    }
    info!(%peer, "bridge client disconnected");
}
