use std::collections::HashSet;
use std::path::Path;

use dashmap::DashMap;
use tracing::{error, info};

use crate::error::Result;

use super::events::{ChannelId, GuildId, UserId};
use super::snapshot::{
    AnnouncerSnapshot, GuildSnapshot, SNAPSHOT_VERSION, StateSnapshot, read_snapshot_file,
    write_snapshot_file,
};

/// Who publishes a guild's playlists on the music service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Announcer {
    pub discord_id: UserId,
    pub sp_user: String,
}

/// Per-guild channel configuration. A channel may sit in either set, both or neither.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuildConfig {
    pub guild_id: GuildId,
    pub listening_channels: HashSet<ChannelId>,
    pub announcing_channels: HashSet<ChannelId>,
    pub announcer: Announcer,
}

impl GuildConfig {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            ..Self::default()
        }
    }
}

/// In-memory guild -> channel configuration. Guilds only exist once a
/// configuring command has been issued in them.
#[derive(Default)]
pub struct GuildConfigStore {
    guilds: DashMap<GuildId, GuildConfig>,
}

impl GuildConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the snapshot file. A missing or unreadable snapshot leaves the store empty.
    pub fn load(path: &Path) -> Self {
        let store = Self::new();
        match read_snapshot_file(path) {
            Ok(Some(snapshot)) => {
                store.restore(snapshot);
                info!(count = store.len(), path = %path.display(), "loaded guild configuration");
            }
            Ok(None) => {
                info!(path = %path.display(), "no guild configuration snapshot, starting empty");
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "guild configuration snapshot unreadable, starting empty");
            }
        }
        store
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_snapshot_file(path, &self.snapshot())?;
        info!(count = self.len(), path = %path.display(), "saved guild configuration");
        Ok(())
    }

    /// Insert an empty configuration for the guild. Returns true if it was absent.
    pub fn ensure_guild(&self, guild_id: GuildId) -> bool {
        if self.guilds.contains_key(&guild_id) {
            return false;
        }
        let mut inserted = false;
        self.guilds.entry(guild_id).or_insert_with(|| {
            inserted = true;
            GuildConfig::new(guild_id)
        });
        if inserted {
            info!(%guild_id, "now configured in guild");
        }
        inserted
    }

    /// Returns true if the channel was not already listened to.
    pub fn add_listen_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        self.ensure_guild(guild_id);
        let added = self
            .guilds
            .get_mut(&guild_id)
            .is_some_and(|mut g| g.listening_channels.insert(channel_id));
        info!(%guild_id, %channel_id, "now listening to channel");
        added
    }

    /// Returns true if the channel was not already announced in.
    pub fn add_announce_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        self.ensure_guild(guild_id);
        let added = self
            .guilds
            .get_mut(&guild_id)
            .is_some_and(|mut g| g.announcing_channels.insert(channel_id));
        info!(%guild_id, %channel_id, "now announcing playlists to channel");
        added
    }

    /// Drop the channel from both sets. Returns true if it was in either.
    pub fn remove_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let Some(mut guild) = self.guilds.get_mut(&guild_id) else {
            return false;
        };
        let listened = guild.listening_channels.remove(&channel_id);
        let announced = guild.announcing_channels.remove(&channel_id);
        if listened || announced {
            info!(%guild_id, %channel_id, "dropped channel");
        }
        listened || announced
    }

    pub fn is_configured(&self, guild_id: GuildId) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    pub fn is_listening(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        self.guilds
            .get(&guild_id)
            .is_some_and(|g| g.listening_channels.contains(&channel_id))
    }

    pub fn get(&self, guild_id: GuildId) -> Option<GuildConfig> {
        self.guilds.get(&guild_id).map(|g| g.clone())
    }

    /// Announcing channels of a guild, sorted.
    pub fn announcing_channels(&self, guild_id: GuildId) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self
            .guilds
            .get(&guild_id)
            .map(|g| g.announcing_channels.iter().copied().collect())
            .unwrap_or_default();
        channels.sort_unstable();
        channels
    }

    /// All configured guild ids, sorted.
    pub fn guild_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.guilds.iter().map(|g| *g.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    /// Serializable form of the whole store; sets become sorted sequences.
    pub fn snapshot(&self) -> StateSnapshot {
        let mut guilds: Vec<GuildSnapshot> = self
            .guilds
            .iter()
            .map(|g| {
                let mut listening_to: Vec<ChannelId> =
                    g.listening_channels.iter().copied().collect();
                listening_to.sort_unstable();
                let mut announcing_in: Vec<ChannelId> =
                    g.announcing_channels.iter().copied().collect();
                announcing_in.sort_unstable();
                GuildSnapshot {
                    guild_id: g.guild_id,
                    announcer: AnnouncerSnapshot {
                        discord_id: g.announcer.discord_id,
                        sp_user: g.announcer.sp_user.clone(),
                    },
                    listening_to,
                    announcing_in,
                }
            })
            .collect();
        guilds.sort_unstable_by_key(|g| g.guild_id);
        StateSnapshot {
            version: SNAPSHOT_VERSION,
            guilds,
        }
    }

    /// Replace the whole store with the snapshot's contents.
    pub fn restore(&self, snapshot: StateSnapshot) {
        self.guilds.clear();
        for g in snapshot.guilds {
            self.guilds.insert(
                g.guild_id,
                GuildConfig {
                    guild_id: g.guild_id,
                    listening_channels: g.listening_to.into_iter().collect(),
                    announcing_channels: g.announcing_in.into_iter().collect(),
                    announcer: Announcer {
                        discord_id: g.announcer.discord_id,
                        sp_user: g.announcer.sp_user,
                    },
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_guild_is_idempotent() {
        let store = GuildConfigStore::new();
        assert!(store.ensure_guild(1));
        store.add_listen_channel(1, 10);
        assert!(!store.ensure_guild(1));
        // existing config untouched
        assert!(store.is_listening(1, 10));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_listen_creates_guild() {
        let store = GuildConfigStore::new();
        assert!(!store.is_configured(1));
        assert!(store.add_listen_channel(1, 10));
        assert!(store.is_configured(1));
        assert!(store.is_listening(1, 10));
        assert!(!store.is_listening(1, 11));
        assert!(!store.is_listening(2, 10));
    }

    #[test]
    fn test_add_is_idempotent() {
        let store = GuildConfigStore::new();
        assert!(store.add_listen_channel(1, 10));
        assert!(!store.add_listen_channel(1, 10));
        assert_eq!(store.get(1).unwrap().listening_channels.len(), 1);

        assert!(store.add_announce_channel(1, 10));
        assert!(!store.add_announce_channel(1, 10));
        assert_eq!(store.get(1).unwrap().announcing_channels.len(), 1);
    }

    #[test]
    fn test_sets_are_independent() {
        let store = GuildConfigStore::new();
        store.add_announce_channel(1, 20);
        assert!(store.is_configured(1));
        assert!(!store.is_listening(1, 20));
        store.add_listen_channel(1, 20);
        assert!(store.is_listening(1, 20));
        assert_eq!(store.announcing_channels(1), vec![20]);
    }

    #[test]
    fn test_remove_channel_clears_both_sets() {
        let store = GuildConfigStore::new();
        store.add_listen_channel(1, 10);
        store.add_announce_channel(1, 10);
        store.add_listen_channel(1, 11);

        assert!(store.remove_channel(1, 10));
        let g = store.get(1).unwrap();
        assert!(!g.listening_channels.contains(&10));
        assert!(!g.announcing_channels.contains(&10));
        assert!(g.listening_channels.contains(&11));

        // second removal is a no-op
        assert!(!store.remove_channel(1, 10));
        assert!(store.is_configured(1));
    }

    #[test]
    fn test_remove_from_absent_guild_is_noop() {
        let store = GuildConfigStore::new();
        assert!(!store.remove_channel(99, 10));
        assert!(!store.is_configured(99));
    }

    #[test]
    fn test_membership_follows_net_operations() {
        let store = GuildConfigStore::new();
        let ops: &[(bool, ChannelId)] = &[
            (true, 1),
            (true, 2),
            (true, 1),
            (false, 2),
            (false, 3),
            (true, 3),
            (false, 1),
            (true, 2),
        ];
        let mut expected = HashSet::new();
        for &(add, ch) in ops {
            if add {
                store.add_listen_channel(7, ch);
                expected.insert(ch);
            } else {
                store.remove_channel(7, ch);
                expected.remove(&ch);
            }
            for channel in 1..=3 {
                assert_eq!(store.is_listening(7, channel), expected.contains(&channel));
            }
        }
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let store = GuildConfigStore::new();
        store.add_listen_channel(1, 30);
        store.add_listen_channel(1, 10);
        store.add_announce_channel(1, 20);
        store.add_announce_channel(2, 40);
        store.ensure_guild(3);

        let mut snapshot = store.snapshot();
        assert_eq!(snapshot.guilds[0].listening_to, vec![10, 30]);
        snapshot.guilds[1].announcer = AnnouncerSnapshot {
            discord_id: 5,
            sp_user: "dj".into(),
        };

        let restored = GuildConfigStore::new();
        restored.add_listen_channel(99, 1);
        restored.restore(snapshot.clone());

        assert_eq!(restored.guild_ids(), vec![1, 2, 3]);
        for id in [1, 3] {
            assert_eq!(restored.get(id), store.get(id));
        }
        assert_eq!(
            restored.get(2).unwrap().announcer,
            Announcer {
                discord_id: 5,
                sp_user: "dj".into(),
            }
        );
        assert_eq!(restored.snapshot(), snapshot);
        assert!(!restored.is_configured(99));
    }

    #[test]
    fn test_load_missing_file_gives_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = GuildConfigStore::load(&dir.path().join("spotify.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_gives_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spotify.json");
        std::fs::write(&path, "{\"version\": 1, \"guilds\": [").unwrap();
        let store = GuildConfigStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spotify.json");
        let store = GuildConfigStore::new();
        store.add_listen_channel(1, 10);
        store.add_announce_channel(1, 11);
        store.save(&path).unwrap();

        let loaded = GuildConfigStore::load(&path);
        assert_eq!(loaded.get(1), store.get(1));
    }
}
