//! On-disk form of the guild configuration.
//!
//! Current documents look like `{"version": 1, "guilds": [...]}`. The older
//! unversioned shape, a map keyed by guild id string, is still read:
//!
//! ```json
//! {"1234": {"announcer": {"discord_id": 0, "sp_user": 0},
//!           "listening_to": [1], "announcing_in": []}}
//! ```
//!
//! Announcer fields are normalised at deserialization: null, `false`, `0`
//! and `""` all become the default value.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{BotError, Result};

use super::events::{ChannelId, GuildId, UserId};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub guilds: Vec<GuildSnapshot>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            guilds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildSnapshot {
    pub guild_id: GuildId,
    #[serde(default)]
    pub announcer: AnnouncerSnapshot,
    #[serde(default)]
    pub listening_to: Vec<ChannelId>,
    #[serde(default)]
    pub announcing_in: Vec<ChannelId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnouncerSnapshot {
    #[serde(default, deserialize_with = "lenient_id")]
    pub discord_id: UserId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sp_user: String,
}

#[derive(Deserialize)]
struct LegacyGuild {
    #[serde(default)]
    announcer: AnnouncerSnapshot,
    #[serde(default)]
    listening_to: Vec<ChannelId>,
    #[serde(default)]
    announcing_in: Vec<ChannelId>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotDocument {
    Versioned(StateSnapshot),
    Legacy(BTreeMap<String, LegacyGuild>),
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) if n.as_f64() != Some(0.0) => n.to_string(),
        _ => String::new(),
    })
}

/// Parse a snapshot document of either shape.
pub fn parse_snapshot(json: &str) -> Result<StateSnapshot> {
    match serde_json::from_str::<SnapshotDocument>(json)? {
        SnapshotDocument::Versioned(snapshot) => {
            if snapshot.version > SNAPSHOT_VERSION {
                return Err(BotError::InvalidInput(format!(
                    "unsupported snapshot version {}",
                    snapshot.version
                )));
            }
            Ok(snapshot)
        }
        SnapshotDocument::Legacy(map) => {
            let mut guilds = Vec::with_capacity(map.len());
            for (key, legacy) in map {
                let guild_id = key
                    .parse()
                    .map_err(|_| BotError::InvalidInput(format!("bad guild id {key:?}")))?;
                guilds.push(GuildSnapshot {
                    guild_id,
                    announcer: legacy.announcer,
                    listening_to: legacy.listening_to,
                    announcing_in: legacy.announcing_in,
                });
            }
            Ok(StateSnapshot {
                version: SNAPSHOT_VERSION,
                guilds,
            })
        }
    }
}

/// Read the snapshot file. A missing file is `Ok(None)`.
pub fn read_snapshot_file(path: &Path) -> Result<Option<StateSnapshot>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    parse_snapshot(&contents).map(Some)
}

/// Write the snapshot next to its final location, then rename it into place.
pub fn write_snapshot_file(path: &Path, snapshot: &StateSnapshot) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versioned() {
        let json = r#"{"version":1,"guilds":[{"guild_id":5,"announcer":{"discord_id":9,"sp_user":"dj"},"listening_to":[1,2],"announcing_in":[3]}]}"#;
        let snapshot = parse_snapshot(json).unwrap();
        assert_eq!(snapshot.guilds.len(), 1);
        let g = &snapshot.guilds[0];
        assert_eq!(g.guild_id, 5);
        assert_eq!(g.announcer.discord_id, 9);
        assert_eq!(g.announcer.sp_user, "dj");
        assert_eq!(g.listening_to, vec![1, 2]);
        assert_eq!(g.announcing_in, vec![3]);
    }

    #[test]
    fn test_parse_versioned_with_missing_fields() {
        let json = r#"{"version":1,"guilds":[{"guild_id":5}]}"#;
        let snapshot = parse_snapshot(json).unwrap();
        let g = &snapshot.guilds[0];
        assert_eq!(g.announcer, AnnouncerSnapshot::default());
        assert!(g.listening_to.is_empty());
        assert!(g.announcing_in.is_empty());
    }

    #[test]
    fn test_parse_legacy_normalises_falsy_announcer() {
        let json = r#"{
            "123": {"announcer": {"discord_id": null, "sp_user": 0},
                    "listening_to": [10, 11], "announcing_in": [12]},
            "456": {"announcer": {"discord_id": 77, "sp_user": false},
                    "listening_to": [], "announcing_in": []}
        }"#;
        let snapshot = parse_snapshot(json).unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.guilds.len(), 2);

        let g123 = snapshot.guilds.iter().find(|g| g.guild_id == 123).unwrap();
        assert_eq!(g123.announcer.discord_id, 0);
        assert_eq!(g123.announcer.sp_user, "");
        assert_eq!(g123.listening_to, vec![10, 11]);

        let g456 = snapshot.guilds.iter().find(|g| g.guild_id == 456).unwrap();
        assert_eq!(g456.announcer.discord_id, 77);
        assert_eq!(g456.announcer.sp_user, "");
    }

    #[test]
    fn test_parse_empty_legacy_document() {
        let snapshot = parse_snapshot("{}").unwrap();
        assert!(snapshot.guilds.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_snapshot("not json").is_err());
        assert!(parse_snapshot("[1, 2, 3]").is_err());
        assert!(parse_snapshot(r#"{"abc": {"listening_to": []}}"#).is_err());
    }

    #[test]
    fn test_parse_rejects_future_version() {
        let err = parse_snapshot(r#"{"version":99,"guilds":[]}"#).unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_snapshot_file(&dir.path().join("absent.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spotify.json");
        let snapshot = StateSnapshot {
            version: SNAPSHOT_VERSION,
            guilds: vec![GuildSnapshot {
                guild_id: 1,
                announcer: AnnouncerSnapshot::default(),
                listening_to: vec![2],
                announcing_in: vec![],
            }],
        };
        write_snapshot_file(&path, &snapshot).unwrap();
        assert_eq!(read_snapshot_file(&path).unwrap(), Some(snapshot));
        assert!(!path.with_extension("json.tmp").exists());
    }
}
