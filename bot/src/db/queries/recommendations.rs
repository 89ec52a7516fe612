use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::{RecommendationRow, format_timestamp, from_sql_id, to_sql_id};
use crate::engine::events::{ChannelId, GuildId, MessageId};
use crate::engine::recommendation::RecommendationRecord;

/// Rows per INSERT statement (7 bound parameters each).
const INSERT_CHUNK: usize = 500;

/// Insert a batch of recommendations in one transaction, preserving order.
/// Either every row lands or none does.
pub async fn insert_recommendations(
    pool: &SqlitePool,
    records: &[RecommendationRecord],
) -> Result<u64, sqlx::Error> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for chunk in records.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO recommendations \
             (resource_type, uri, guild, channel, message, \"user\", timestamp) ",
        );
        builder.push_values(chunk, |mut row, rec| {
            row.push_bind(rec.resource_type.as_str().to_string())
                .push_bind(rec.uri.clone())
                .push_bind(to_sql_id(rec.guild_id))
                .push_bind(to_sql_id(rec.channel_id))
                .push_bind(to_sql_id(rec.message_id))
                .push_bind(to_sql_id(rec.user_id))
                .push_bind(format_timestamp(rec.timestamp));
        });
        inserted += builder.build().execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

/// All recommendations of a guild with `start <= timestamp <= end`, oldest first.
pub async fn recommendations_in_window(
    pool: &SqlitePool,
    guild_id: GuildId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<RecommendationRow>, sqlx::Error> {
    sqlx::query_as::<_, RecommendationRow>(
        "SELECT id, resource_type, uri, guild, channel, message, \"user\", timestamp \
         FROM recommendations \
         WHERE guild = ? AND timestamp >= ? AND timestamp <= ? \
         ORDER BY timestamp, id",
    )
    .bind(to_sql_id(guild_id))
    .bind(format_timestamp(start))
    .bind(format_timestamp(end))
    .fetch_all(pool)
    .await
}

/// Ids of every message in the channel that already has stored recommendations.
pub async fn message_ids_in_channel(
    pool: &SqlitePool,
    channel_id: ChannelId,
) -> Result<HashSet<MessageId>, sqlx::Error> {
    let ids: Vec<i64> =
        sqlx::query_scalar("SELECT DISTINCT message FROM recommendations WHERE channel = ?")
            .bind(to_sql_id(channel_id))
            .fetch_all(pool)
            .await?;
    Ok(ids.into_iter().map(from_sql_id).collect())
}

pub async fn count_recommendations(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM recommendations")
        .fetch_one(pool)
        .await
}
