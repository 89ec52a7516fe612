use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::recommendation::RecommendationRecord;
use crate::engine::uri::ResourceType;
use crate::error::BotError;

/// A stored recommendation from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecommendationRow {
    pub id: i64,
    pub resource_type: String,
    pub uri: String,
    pub guild: i64,
    pub channel: i64,
    pub message: i64,
    pub user: i64,
    pub timestamp: String,
}

/// A published playlist.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlaylistRow {
    pub id: i64,
    pub media_type: String,
    pub uri: String,
    pub guild: i64,
    pub creation_timestamp: String,
}

/// Snowflakes are u64; SQLite integers are i64. The cast keeps every bit.
pub fn to_sql_id(id: u64) -> i64 {
    id as i64
}

pub fn from_sql_id(id: i64) -> u64 {
    id as u64
}

/// Fixed-width RFC 3339 so string order matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, BotError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BotError::InvalidInput(format!("bad stored timestamp {s:?}: {e}")))
}

impl TryFrom<RecommendationRow> for RecommendationRecord {
    type Error = BotError;

    fn try_from(row: RecommendationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            resource_type: ResourceType::from_segment(&row.resource_type),
            timestamp: parse_timestamp(&row.timestamp)?,
            uri: row.uri,
            guild_id: from_sql_id(row.guild),
            channel_id: from_sql_id(row.channel),
            message_id: from_sql_id(row.message),
            user_id: from_sql_id(row.user),
        })
    }
}
