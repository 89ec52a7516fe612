use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;

use super::buffer::RecommendationBuffer;

/// Flush the buffer every `period` until cancelled, then flush once more.
///
/// The final flush runs after the loop exits, so cancelling the timer can
/// never skip it. A failed periodic flush is logged and retried on the next tick.
/// Returns the result of the final flush.
pub async fn run_flusher(
    buffer: Arc<RecommendationBuffer>,
    pool: SqlitePool,
    period: Duration,
    cancel: CancellationToken,
) -> Result<usize> {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(?period, "recommendation flusher started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                info!("automatically inserting songs into database");
                if let Err(e) = buffer.flush(&pool).await {
                    error!(error = %e, pending = buffer.pending_len(), "periodic flush failed, keeping records for next attempt");
                }
            }
        }
    }

    info!(pending = buffer.pending_len(), "inserting remaining recommendations before shutdown");
    let result = buffer.flush(&pool).await;
    if let Err(ref e) = result {
        error!(error = %e, pending = buffer.pending_len(), "final flush failed");
    }
    result
}
