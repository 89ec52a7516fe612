use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::bot::Bot;

use super::connection::handle_bridge_connection;

/// Accept platform bridge clients and spawn a handler task for each.
///
/// Stops accepting when the token is cancelled, then waits for every open
/// connection to finish so no event is handled after this returns.
pub async fn start_bridge_listener(
    listener: TcpListener,
    bot: Arc<Bot>,
    cancel: CancellationToken,
) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "bridge listener started"),
        Err(e) => info!(error = %e, "bridge listener started"),
    }

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("bridge listener shutting down");
                break;
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let bot = bot.clone();
                        let cancel = cancel.clone();
                        let peer = addr.to_string();
                        connections.spawn(async move {
                            handle_bridge_connection(stream, peer, bot, cancel).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept bridge connection");
                    }
                }
            }
        }
    }

    while connections.join_next().await.is_some() {}
}
