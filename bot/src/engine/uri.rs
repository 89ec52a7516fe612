use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Path segment that marks a share link as belonging to the music service.
pub const SHARE_HOST: &str = "open.spotify.com";

/// Kind of resource a share link points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Track,
    Album,
    Playlist,
    User,
    Artist,
    /// Any other kind (episodes, shows, ...), keeping the raw path segment.
    Unknown(String),
}

impl ResourceType {
    pub fn from_segment(segment: &str) -> Self {
        match segment {
            "track" => Self::Track,
            "album" => Self::Album,
            "playlist" => Self::Playlist,
            "user" => Self::User,
            "artist" => Self::Artist,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Playlist => "playlist",
            Self::User => "user",
            Self::Artist => "artist",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which fields make two URIs "the same" when deduplicating recommendations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UriIdentity {
    /// Identifier only. Matches `ResourceUri`'s own `Eq`/`Hash`.
    #[default]
    Identifier,
    /// Resource type and identifier.
    TypeAndIdentifier,
}

/// Dedup key produced by [`ResourceUri::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UriKey {
    resource_type: Option<String>,
    identifier: Option<String>,
}

/// A typed reference to a music-service resource.
///
/// Equality and hashing consider the identifier only, so a track and an album
/// sharing an id compare equal. Use [`ResourceUri::key`] with
/// [`UriIdentity::TypeAndIdentifier`] where the type must be part of identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "UriRecord", into = "UriRecord")]
pub struct ResourceUri {
    resource_type: Option<ResourceType>,
    identifier: Option<String>,
}

impl ResourceUri {
    pub fn new(resource_type: ResourceType, identifier: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type),
            identifier: Some(identifier.into()),
        }
    }

    /// The rejection value: neither a type nor an identifier.
    pub fn invalid() -> Self {
        Self {
            resource_type: None,
            identifier: None,
        }
    }

    /// Parse a share link of the form `.../open.spotify.com/.../<type>/<id>[?query]`.
    ///
    /// Anything that doesn't have that shape yields [`ResourceUri::invalid`].
    pub fn parse(link: &str) -> Self {
        let segments: Vec<&str> = link.trim().split('/').collect();
        let Some(host_pos) = segments.iter().position(|s| *s == SHARE_HOST) else {
            return Self::invalid();
        };
        // Need at least <type>/<id> after the host.
        if segments.len() < host_pos + 3 {
            return Self::invalid();
        }

        let kind = segments[segments.len() - 2];
        let last = segments[segments.len() - 1];
        let identifier = last.split(['?', '&']).next().unwrap_or_default();

        if kind.is_empty() || identifier.is_empty() {
            return Self::invalid();
        }
        Self::new(ResourceType::from_segment(kind), identifier)
    }

    pub fn resource_type(&self) -> Option<&ResourceType> {
        self.resource_type.as_ref()
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.resource_type.is_some() && self.identifier.is_some()
    }

    pub fn is_track(&self) -> bool {
        self.resource_type == Some(ResourceType::Track)
    }

    pub fn is_album(&self) -> bool {
        self.resource_type == Some(ResourceType::Album)
    }

    pub fn is_playlist(&self) -> bool {
        self.resource_type == Some(ResourceType::Playlist)
    }

    pub fn is_user(&self) -> bool {
        self.resource_type == Some(ResourceType::User)
    }

    pub fn is_artist(&self) -> bool {
        self.resource_type == Some(ResourceType::Artist)
    }

    pub fn key(&self, identity: UriIdentity) -> UriKey {
        let resource_type = match identity {
            UriIdentity::Identifier => None,
            UriIdentity::TypeAndIdentifier => {
                self.resource_type.as_ref().map(|t| t.as_str().to_string())
            }
        };
        UriKey {
            resource_type,
            identifier: self.identifier.clone(),
        }
    }
}

impl PartialEq for ResourceUri {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for ResourceUri {}

impl Hash for ResourceUri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "spotify:{}:{}",
            self.resource_type.as_ref().map(|t| t.as_str()).unwrap_or(""),
            self.identifier.as_deref().unwrap_or("")
        )
    }
}

/// Structured record form: `{"resource_type": "...", "id": "..."}`.
#[derive(Serialize, Deserialize)]
struct UriRecord {
    resource_type: Option<String>,
    id: Option<String>,
}

impl From<UriRecord> for ResourceUri {
    fn from(record: UriRecord) -> Self {
        match (record.resource_type, record.id) {
            (Some(kind), Some(id)) => Self::new(ResourceType::from_segment(&kind), id),
            _ => Self::invalid(),
        }
    }
}

impl From<ResourceUri> for UriRecord {
    fn from(uri: ResourceUri) -> Self {
        Self {
            resource_type: uri.resource_type.map(|t| t.as_str().to_string()),
            id: uri.identifier,
        }
    }
}
