use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db::queries::recommendations::insert_recommendations;
use crate::error::Result;

use super::events::{IncomingMessage, MessageId};
use super::recommendation::{CollectFilter, RecommendationRecord, recommendations_from_message};

/// Recommendations waiting to be written to the database.
///
/// Appends only touch `pending` briefly. Every pending -> persisted transition
/// goes through `flush`, which holds `flush_lock` for its whole duration, so a
/// periodic flush and the shutdown flush can never interleave.
pub struct RecommendationBuffer {
    filter: CollectFilter,
    pending: Mutex<Vec<RecommendationRecord>>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl RecommendationBuffer {
    pub fn new(filter: CollectFilter) -> Self {
        Self {
            filter,
            pending: Mutex::new(Vec::new()),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn filter(&self) -> CollectFilter {
        self.filter
    }

    fn pending(&self) -> MutexGuard<'_, Vec<RecommendationRecord>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Extract the message's recommendations and queue them. Returns what was queued.
    pub fn collect(&self, msg: &IncomingMessage) -> Vec<RecommendationRecord> {
        debug!(message_id = msg.id, embeds = msg.embeds.len(), "inspecting embeds");
        let records = recommendations_from_message(msg, self.filter);
        if !records.is_empty() {
            debug!(message_id = msg.id, count = records.len(), "buffering recommendations");
            self.pending().extend(records.iter().cloned());
        }
        records
    }

    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    pub fn pending_message_ids(&self) -> HashSet<MessageId> {
        self.pending().iter().map(|r| r.message_id).collect()
    }

    /// Identifiers still queued for one message.
    pub fn pending_uris(&self, message_id: MessageId) -> HashSet<String> {
        self.pending()
            .iter()
            .filter(|r| r.message_id == message_id)
            .map(|r| r.uri.clone())
            .collect()
    }

    /// Write everything pending to the database, oldest first.
    ///
    /// Records appended while the insert is in flight stay queued for the next
    /// flush. On failure nothing is removed, so the next flush retries the
    /// same records plus whatever arrived since.
    pub async fn flush(&self, pool: &SqlitePool) -> Result<usize> {
        let _guard = self.flush_lock.lock().await;

        let batch: Vec<RecommendationRecord> = self.pending().clone();
        if batch.is_empty() {
            return Ok(0);
        }

        info!(count = batch.len(), "inserting new recommendations into the database");
        insert_recommendations(pool, &batch).await?;

        // Only this function removes from the front, and it holds flush_lock.
        self.pending().drain(..batch.len());
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::{create_pool, run_migrations};
    use crate::db::queries::recommendations::count_recommendations;
    use crate::engine::events::Embed;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    async fn setup_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn message(id: MessageId, links: &[&str]) -> IncomingMessage {
        IncomingMessage {
            id,
            author_id: 7,
            guild_id: Some(1),
            channel_id: 10,
            created_at: Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap()
                + chrono::Duration::seconds(id as i64),
            embeds: links.iter().map(|l| Embed::link(*l)).collect(),
        }
    }

    #[test]
    fn test_collect_appends_valid_tracks() {
        let buffer = RecommendationBuffer::new(CollectFilter::Tracks);
        let recs = buffer.collect(&message(
            1,
            &[
                "https://open.spotify.com/track/abc123",
                "https://open.spotify.com/artist/xyz789",
            ],
        ));
        assert_eq!(recs.len(), 1);
        assert_eq!(buffer.pending_len(), 1);
        assert_eq!(buffer.pending_message_ids(), HashSet::from([1]));
        assert_eq!(buffer.pending_uris(1), HashSet::from(["abc123".to_string()]));
        assert!(buffer.pending_uris(2).is_empty());
    }

    #[test]
    fn test_collect_nothing_leaves_buffer_empty() {
        let buffer = RecommendationBuffer::new(CollectFilter::Tracks);
        assert!(buffer.collect(&message(1, &["https://example.com"])).is_empty());
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_flush_moves_records_to_database() {
        let pool = setup_db().await;
        let buffer = RecommendationBuffer::new(CollectFilter::Tracks);
        buffer.collect(&message(1, &["https://open.spotify.com/track/a"]));
        buffer.collect(&message(2, &["https://open.spotify.com/track/b"]));

        assert_eq!(buffer.flush(&pool).await.unwrap(), 2);
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(count_recommendations(&pool).await.unwrap(), 2);

        // nothing left, nothing written
        assert_eq!(buffer.flush(&pool).await.unwrap(), 0);
        assert_eq!(count_recommendations(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_records_for_retry() {
        let pool = setup_db().await;
        let buffer = RecommendationBuffer::new(CollectFilter::Tracks);
        buffer.collect(&message(1, &["https://open.spotify.com/track/a"]));

        sqlx::query("ALTER TABLE recommendations RENAME TO recommendations_aside")
            .execute(&pool)
            .await
            .unwrap();
        assert!(buffer.flush(&pool).await.is_err());
        assert_eq!(buffer.pending_len(), 1);

        // more arrives while storage is down
        buffer.collect(&message(2, &["https://open.spotify.com/track/b"]));

        sqlx::query("ALTER TABLE recommendations_aside RENAME TO recommendations")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(buffer.flush(&pool).await.unwrap(), 2);
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(count_recommendations(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_flush_preserves_collection_order() {
        let pool = setup_db().await;
        let buffer = RecommendationBuffer::new(CollectFilter::Tracks);
        for i in 0..20 {
            buffer.collect(&message(i, &[format!("https://open.spotify.com/track/t{i}").as_str()]));
        }
        buffer.flush(&pool).await.unwrap();

        let uris: Vec<String> = sqlx::query_scalar("SELECT uri FROM recommendations ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        let expected: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
        assert_eq!(uris, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_flushes_neither_duplicate_nor_drop() {
        let pool = setup_db().await;
        let buffer = Arc::new(RecommendationBuffer::new(CollectFilter::Tracks));

        let mut handles = Vec::new();
        let mut total = 0u64;
        for round in 0..10u64 {
            for i in 0..5u64 {
                let id = round * 100 + i;
                buffer.collect(&message(id, &[format!("https://open.spotify.com/track/t{id}").as_str()]));
                total += 1;
            }
            for _ in 0..3 {
                let buffer = buffer.clone();
                let pool = pool.clone();
                handles.push(tokio::spawn(async move { buffer.flush(&pool).await }));
            }
        }

        let mut flushed = 0;
        for handle in handles {
            flushed += handle.await.unwrap().unwrap();
        }
        flushed += buffer.flush(&pool).await.unwrap();

        assert_eq!(flushed as u64, total);
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(count_recommendations(&pool).await.unwrap(), total as i64);

        let distinct: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT message) FROM recommendations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(distinct, total as i64);
    }
}
