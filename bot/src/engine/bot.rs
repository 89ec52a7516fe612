use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::db::queries::recommendations::{insert_recommendations, message_ids_in_channel};
use crate::error::Result;

use super::buffer::RecommendationBuffer;
use super::commands::{Command, SlurpSince, parse_since};
use super::events::{
    BotAction, ChannelId, Embed, GatewayEvent, GuildId, IncomingMessage, Outbox, UserId,
    channel_mention,
};
use super::guild_config::GuildConfigStore;
use super::recommendation::recommendations_from_message;
use super::uri::ResourceUri;

/// Owned bot context. Every handler and background task receives one of
/// these (behind an `Arc`) instead of reaching for shared globals.
pub struct Bot {
    guilds: Arc<GuildConfigStore>,
    buffer: Arc<RecommendationBuffer>,
    db: SqlitePool,
    user_id: UserId,
    outbox: Outbox,
}

impl Bot {
    pub fn new(
        guilds: Arc<GuildConfigStore>,
        buffer: Arc<RecommendationBuffer>,
        db: SqlitePool,
        user_id: UserId,
        outbox: Outbox,
    ) -> Self {
        Self {
            guilds,
            buffer,
            db,
            user_id,
            outbox,
        }
    }

    pub fn guilds(&self) -> &Arc<GuildConfigStore> {
        &self.guilds
    }

    pub fn buffer(&self) -> &Arc<RecommendationBuffer> {
        &self.buffer
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Receiver for every action the bot emits from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BotAction> {
        self.outbox.subscribe()
    }

    fn emit(&self, actions: Vec<BotAction>) {
        for action in actions {
            // no connected client is not an error; the action is simply dropped
            if self.outbox.send(action).is_err() {
                debug!("no bridge client connected, dropping action");
            }
        }
    }

    /// Dispatch one inbound platform event.
    pub async fn handle_event(&self, event: GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::MessageCreate { message } => {
                self.on_message_create(&message);
            }
            GatewayEvent::MessageUpdate { before, after } => {
                self.on_message_update(&before, &after);
            }
            GatewayEvent::Command {
                guild_id,
                channel_id,
                author_id,
                content,
            } => {
                let actions = self.handle_command(guild_id, channel_id, author_id, &content);
                self.emit(actions);
            }
            GatewayEvent::History {
                guild_id,
                channel_id,
                after,
                messages,
            } => {
                let actions = self.backfill(guild_id, channel_id, after, &messages).await?;
                self.emit(actions);
            }
        }
        Ok(())
    }

    fn should_collect(&self, msg: &IncomingMessage) -> Option<GuildId> {
        if msg.author_id == self.user_id {
            return None;
        }
        let guild_id = msg.guild_id?;
        self.guilds
            .is_listening(guild_id, msg.channel_id)
            .then_some(guild_id)
    }

    /// Buffer the recommendations of a new message. Returns how many were buffered.
    pub fn on_message_create(&self, msg: &IncomingMessage) -> usize {
        if msg.embeds.is_empty() || self.should_collect(msg).is_none() {
            return 0;
        }
        self.buffer.collect(msg).len()
    }

    /// Link previews usually resolve after the message is sent and arrive as an
    /// edit that adds embeds. The whole edited message is collected, minus links
    /// already queued for it, so a missed create event loses nothing.
    pub fn on_message_update(&self, before: &IncomingMessage, after: &IncomingMessage) -> usize {
        if after.embeds.len() <= before.embeds.len() || self.should_collect(after).is_none() {
            return 0;
        }
        let queued = self.buffer.pending_uris(after.id);
        let is_queued = |embed: &Embed| {
            embed
                .url
                .as_deref()
                .map(ResourceUri::parse)
                .and_then(|uri| uri.identifier().map(|id| queued.contains(id)))
                .unwrap_or(false)
        };
        let fresh = IncomingMessage {
            embeds: after.embeds.iter().filter(|e| !is_queued(e)).cloned().collect(),
            ..after.clone()
        };
        debug!(message_id = after.id, fresh = fresh.embeds.len(), "message edited with new embeds");
        self.buffer.collect(&fresh).len()
    }

    /// Run a command and return the replies. Never fails: rejected commands
    /// produce a user-facing reply instead.
    pub fn handle_command(
        &self,
        guild_id: Option<GuildId>,
        channel_id: ChannelId,
        author_id: UserId,
        content: &str,
    ) -> Vec<BotAction> {
        let reply = |content: String| vec![BotAction::SendMessage { channel_id, content }];

        let command = match Command::parse(content) {
            Ok(command) => command,
            Err(e) => {
                debug!(%channel_id, %author_id, error = %e, "rejected command");
                return reply(e.to_string());
            }
        };
        let Some(guild_id) = guild_id else {
            return reply("Commands only work inside a server.".into());
        };
        info!(%guild_id, %channel_id, %author_id, ?command, "command received");

        match command {
            Command::Listen(target) => {
                let target = target.unwrap_or(channel_id);
                self.guilds.add_listen_channel(guild_id, target);
                vec![BotAction::SendMessage {
                    channel_id: target,
                    content: format!(
                        "I am now listening to recommendations in {}",
                        channel_mention(target)
                    ),
                }]
            }
            Command::Announce(target) => {
                let target = target.unwrap_or(channel_id);
                self.guilds.add_announce_channel(guild_id, target);
                vec![BotAction::SendMessage {
                    channel_id: target,
                    content: format!(
                        "I am now announcing my playlists in {}",
                        channel_mention(target)
                    ),
                }]
            }
            Command::Channels => reply(self.describe_channels(guild_id)),
            Command::Ignore(target) => {
                if !self.guilds.is_configured(guild_id) {
                    return Vec::new();
                }
                let target = target.unwrap_or(channel_id);
                self.guilds.remove_channel(guild_id, target);
                reply(format!(
                    "No longer using {} for anything.",
                    channel_mention(target)
                ))
            }
            Command::Slurp(arg) => {
                // a bad datetime is reported even where nothing is configured
                let since = match parse_since(&arg) {
                    Ok(since) => since,
                    Err(e) => return reply(e.to_string()),
                };
                if !self.guilds.is_configured(guild_id) {
                    return Vec::new();
                }
                let after = match since {
                    SlurpSince::All => None,
                    SlurpSince::After(dt) => Some(dt),
                };
                info!(%guild_id, %channel_id, ?after, "requesting channel history");
                vec![BotAction::FetchHistory {
                    guild_id,
                    channel_id,
                    after,
                }]
            }
        }
    }

    fn describe_channels(&self, guild_id: GuildId) -> String {
        let Some(config) = self.guilds.get(guild_id) else {
            return "I am not configured to do anything in this server yet!".into();
        };
        let mentions = |channels: &HashSet<ChannelId>| {
            let mut ids: Vec<ChannelId> = channels.iter().copied().collect();
            ids.sort_unstable();
            ids.into_iter()
                .map(channel_mention)
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "I am listening for recommendations in {}. I am announcing playlists in {}.",
            mentions(&config.listening_channels),
            mentions(&config.announcing_channels)
        )
    }

    /// Store recommendations from fetched channel history that were never seen.
    ///
    /// Messages already stored or still buffered are skipped, as are the bot's
    /// own messages and anything not strictly after `after`. New records go
    /// straight to the database.
    pub async fn backfill(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        after: Option<DateTime<Utc>>,
        messages: &[IncomingMessage],
    ) -> Result<Vec<BotAction>> {
        if !self.guilds.is_configured(guild_id) {
            warn!(%guild_id, "history received for unconfigured guild, ignoring");
            return Ok(Vec::new());
        }

        let mut known = message_ids_in_channel(&self.db, channel_id).await?;
        known.extend(self.buffer.pending_message_ids());

        let records: Vec<_> = messages
            .iter()
            .filter(|m| m.author_id != self.user_id && !known.contains(&m.id))
            .filter(|m| after.is_none_or(|a| m.created_at > a))
            .flat_map(|m| {
                let scoped = IncomingMessage {
                    guild_id: Some(guild_id),
                    channel_id,
                    ..m.clone()
                };
                recommendations_from_message(&scoped, self.buffer.filter())
            })
            .collect();

        insert_recommendations(&self.db, &records).await?;
        info!(
            %guild_id,
            %channel_id,
            scanned = messages.len(),
            inserted = records.len(),
            "backfilled recommendations"
        );

        let content = match after {
            Some(a) => format!(
                "Found {} old recommendations sent after {} that I didn't have!",
                records.len(),
                a.format("%Y-%m-%d:%H:%M")
            ),
            None => format!(
                "Found {} old recommendations in {} that I didn't have!",
                records.len(),
                channel_mention(channel_id)
            ),
        };
        Ok(vec![BotAction::SendMessage {
            channel_id,
            content,
        }])
    }
}
