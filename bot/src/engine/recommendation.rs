use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{ChannelId, GuildId, IncomingMessage, MessageId, UserId};
use super::uri::{ResourceType, ResourceUri};

/// Which parsed links count as recommendations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectFilter {
    /// Only track links.
    #[default]
    Tracks,
    /// Every valid link (albums, artists, playlists, ...).
    All,
}

impl CollectFilter {
    pub fn accepts(self, uri: &ResourceUri) -> bool {
        match self {
            Self::Tracks => uri.is_track(),
            Self::All => uri.is_valid(),
        }
    }
}

/// One harvested link, tagged with where and when it was posted.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRecord {
    pub resource_type: ResourceType,
    /// Resource identifier (the last path segment of the share link).
    pub uri: String,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

impl RecommendationRecord {
    pub fn resource(&self) -> ResourceUri {
        ResourceUri::new(self.resource_type.clone(), self.uri.clone())
    }
}

/// Parse every embed of a message and keep the links the filter accepts.
/// Messages outside a guild never yield recommendations.
pub fn recommendations_from_message(
    msg: &IncomingMessage,
    filter: CollectFilter,
) -> Vec<RecommendationRecord> {
    let Some(guild_id) = msg.guild_id else {
        return Vec::new();
    };

    msg.embeds
        .iter()
        .filter_map(|e| e.url.as_deref())
        .map(ResourceUri::parse)
        .filter(|uri| filter.accepts(uri))
        .filter_map(|uri| {
            let resource_type = uri.resource_type()?.clone();
            let identifier = uri.identifier()?.to_string();
            Some(RecommendationRecord {
                resource_type,
                uri: identifier,
                guild_id,
                channel_id: msg.channel_id,
                message_id: msg.id,
                user_id: msg.author_id,
                timestamp: msg.created_at,
            })
        })
        .collect()
}
