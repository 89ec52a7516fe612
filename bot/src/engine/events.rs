use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Platform snowflake identifiers.
pub type GuildId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;
pub type UserId = u64;

/// Outbound actions are fanned out to every connected platform client.
pub type Outbox = broadcast::Sender<BotAction>;

/// Rich preview the platform attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub url: Option<String>,
}

impl Embed {
    pub fn link(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
        }
    }
}

/// A created or edited message as delivered by the platform client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub author_id: UserId,
    /// None for direct messages.
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

/// Inbound event from the platform bridge, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A message was posted.
    MessageCreate { message: IncomingMessage },

    /// A message was edited (embeds often arrive this way, after the link unfurls).
    MessageUpdate {
        before: IncomingMessage,
        after: IncomingMessage,
    },

    /// A user invoked a bot command. `content` is the text after the bot mention.
    Command {
        #[serde(default)]
        guild_id: Option<GuildId>,
        channel_id: ChannelId,
        author_id: UserId,
        content: String,
    },

    /// Channel history fetched in answer to [`BotAction::FetchHistory`].
    History {
        guild_id: GuildId,
        channel_id: ChannelId,
        #[serde(default)]
        after: Option<DateTime<Utc>>,
        messages: Vec<IncomingMessage>,
    },
}

/// Outbound request for the platform client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotAction {
    SendMessage { channel_id: ChannelId, content: String },

    /// Ask the client for every message in the channel after `after` (all history if None).
    FetchHistory {
        guild_id: GuildId,
        channel_id: ChannelId,
        #[serde(skip_serializing_if = "Option::is_none")]
        after: Option<DateTime<Utc>>,
    },
}

/// `<#id>` channel mention.
pub fn channel_mention(channel_id: ChannelId) -> String {
    format!("<#{channel_id}>")
}
