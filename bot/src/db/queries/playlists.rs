use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{PlaylistRow, format_timestamp, to_sql_id};
use crate::engine::events::GuildId;

/// Record a published playlist. Returns the new row id.
pub async fn insert_playlist(
    pool: &SqlitePool,
    media_type: &str,
    uri: &str,
    guild_id: GuildId,
    created_at: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO playlists (media_type, uri, guild, creation_timestamp) VALUES (?, ?, ?, ?)",
    )
    .bind(media_type)
    .bind(uri)
    .bind(to_sql_id(guild_id))
    .bind(format_timestamp(created_at))
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Playlists of a guild, newest first.
pub async fn list_playlists(
    pool: &SqlitePool,
    guild_id: GuildId,
) -> Result<Vec<PlaylistRow>, sqlx::Error> {
    sqlx::query_as::<_, PlaylistRow>(
        "SELECT id, media_type, uri, guild, creation_timestamp \
         FROM playlists \
         WHERE guild = ? \
         ORDER BY creation_timestamp DESC, id DESC",
    )
    .bind(to_sql_id(guild_id))
    .fetch_all(pool)
    .await
}
