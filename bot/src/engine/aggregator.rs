use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, error, info};

use crate::db::queries::{playlists, recommendations};
use crate::error::Result;

use super::events::{BotAction, GuildId, Outbox, UserId};
use super::guild_config::GuildConfigStore;
use super::recommendation::RecommendationRecord;
use super::scheduler::WeeklyJob;
use super::uri::{ResourceUri, UriIdentity};

/// One user's recommendation of one track in one guild.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SongRecMeta {
    pub track: ResourceUri,
    pub user_id: UserId,
    pub guild_id: GuildId,
}

/// Deduplicate track recommendations by (track, user, guild), keeping first-seen order.
pub fn song_recs(records: &[RecommendationRecord], identity: UriIdentity) -> Vec<SongRecMeta> {
    let mut seen = HashSet::new();
    records
        .iter()
        .map(|r| SongRecMeta {
            track: r.resource(),
            user_id: r.user_id,
            guild_id: r.guild_id,
        })
        .filter(|m| m.track.is_track())
        .filter(|m| seen.insert((m.track.key(identity), m.user_id, m.guild_id)))
        .collect()
}

/// Group track recommendations by the ISO (year, week) they were posted in.
fn group_by_iso_week(
    records: &[RecommendationRecord],
    identity: UriIdentity,
) -> BTreeMap<(i32, u32), Vec<SongRecMeta>> {
    let mut weeks: BTreeMap<(i32, u32), Vec<RecommendationRecord>> = BTreeMap::new();
    for r in records {
        let week = r.timestamp.iso_week();
        weeks
            .entry((week.year(), week.week()))
            .or_default()
            .push(r.clone());
    }
    weeks
        .into_iter()
        .map(|(week, recs)| (week, song_recs(&recs, identity)))
        .collect()
}

/// Track recommendations posted in one ISO week of a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsoWeekTracks {
    pub year: i32,
    pub week: u32,
    pub tracks: Vec<SongRecMeta>,
}

/// Everything a guild recommended in one aggregation window.
#[derive(Debug, Clone, Serialize)]
pub struct WeeklyDigest {
    pub guild_id: GuildId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub recommendation_count: usize,
    pub tracks: Vec<SongRecMeta>,
    /// The window's tracks split by ISO week, oldest first. A window that
    /// is not aligned to Monday spans two weeks.
    pub weeks: Vec<IsoWeekTracks>,
}

/// Where digests go to become playlists on the music service.
pub trait PlaylistSink: Send + Sync + 'static {
    /// Returns the link of the created playlist, if one was created.
    fn publish(&self, digest: &WeeklyDigest) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Sink that only logs; no playlist is created.
pub struct LogSink;

impl PlaylistSink for LogSink {
    async fn publish(&self, digest: &WeeklyDigest) -> Result<Option<String>> {
        info!(
            guild_id = digest.guild_id,
            tracks = digest.tracks.len(),
            recommendations = digest.recommendation_count,
            weeks = digest.weeks.len(),
            "weekly digest ready (no playlist publisher configured)"
        );
        debug!(?digest, "weekly digest");
        Ok(None)
    }
}

pub struct PlaylistAggregator<S> {
    db: SqlitePool,
    guilds: Arc<GuildConfigStore>,
    sink: S,
    window: Duration,
    identity: UriIdentity,
    outbox: Outbox,
}

impl<S: PlaylistSink> PlaylistAggregator<S> {
    pub fn new(
        db: SqlitePool,
        guilds: Arc<GuildConfigStore>,
        sink: S,
        window: Duration,
        identity: UriIdentity,
        outbox: Outbox,
    ) -> Self {
        Self {
            db,
            guilds,
            sink,
            window,
            identity,
            outbox,
        }
    }

    /// Stored recommendations of a guild in `[window_end - window_width, window_end]`.
    pub async fn aggregate(
        &self,
        guild_id: GuildId,
        window_end: DateTime<Utc>,
        window_width: Duration,
    ) -> Result<Vec<RecommendationRecord>> {
        let start = window_end - window_width;
        recommendations::recommendations_in_window(&self.db, guild_id, start, window_end)
            .await?
            .into_iter()
            .map(RecommendationRecord::try_from)
            .collect()
    }

    pub async fn weekly_digest(
        &self,
        guild_id: GuildId,
        window_end: DateTime<Utc>,
    ) -> Result<WeeklyDigest> {
        let records = self.aggregate(guild_id, window_end, self.window).await?;
        Ok(WeeklyDigest {
            guild_id,
            window_start: window_end - self.window,
            window_end,
            recommendation_count: records.len(),
            tracks: song_recs(&records, self.identity),
            weeks: group_by_iso_week(&records, self.identity)
                .into_iter()
                .map(|((year, week), tracks)| IsoWeekTracks { year, week, tracks })
                .collect(),
        })
    }

    /// Build the guild's digest, hand it to the sink, and announce the result.
    /// Returns the playlist link if the sink produced one.
    pub async fn run_for_guild(
        &self,
        guild_id: GuildId,
        window_end: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let digest = self.weekly_digest(guild_id, window_end).await?;
        if digest.tracks.is_empty() {
            info!(%guild_id, %window_end, "no track recommendations this week");
            return Ok(None);
        }

        let Some(link) = self.sink.publish(&digest).await? else {
            return Ok(None);
        };
        playlists::insert_playlist(&self.db, "playlist", &link, guild_id, window_end).await?;
        info!(%guild_id, %link, tracks = digest.tracks.len(), "weekly playlist published");

        for channel_id in self.guilds.announcing_channels(guild_id) {
            let _ = self.outbox.send(BotAction::SendMessage {
                channel_id,
                content: format!(
                    "This week's playlist ({} songs): {link}",
                    digest.tracks.len()
                ),
            });
        }
        Ok(Some(link))
    }
}

impl<S: PlaylistSink> WeeklyJob for PlaylistAggregator<S> {
    async fn run(&self, window_end: DateTime<Utc>) -> Result<()> {
        for guild_id in self.guilds.guild_ids() {
            // one guild failing must not hold up the others
            if let Err(e) = self.run_for_guild(guild_id, window_end).await {
                error!(%guild_id, error = %e, "weekly aggregation failed for guild");
            }
        }
        Ok(())
    }
}
