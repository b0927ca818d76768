// ── Classified server notifications ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::media::{Library, MediaKey, MediaType};

/// What a notification means for the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum EventKind {
    LibraryChanged,
    ItemAdded,
    ItemRemoved,
    PlayerStarted,
    PlayerStopped,
    PropertyChanged,
    Unknown,
}

/// Who caused a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Origin {
    /// Echo of a change this session made.
    SelfOrigin,
    Other,
}

/// A server notification after classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Notification method as sent by the server; empty for malformed frames.
    pub method: String,
    pub sender: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<u64>,
    pub player_id: Option<i64>,
    pub playlist_id: Option<i64>,
    /// Library namespace the notification came from, if any.
    pub library: Option<Library>,
    pub origin: Origin,
    pub received_at: DateTime<Utc>,
}

impl Event {
    /// The library entity this event refers to, when it names one.
    pub fn media_key(&self) -> Option<MediaKey> {
        let media_type = MediaType::from_wire(self.entity_type.as_deref()?)?;
        Some(MediaKey::new(media_type, self.entity_id?))
    }

    pub fn is_self_originated(&self) -> bool {
        self.origin == Origin::SelfOrigin
    }

    /// Playlist notifications carry the pseudo entity type `playlist`.
    pub fn is_playlist(&self) -> bool {
        self.entity_type.as_deref() == Some("playlist")
    }

    pub fn is_player(&self) -> bool {
        self.method.starts_with("Player.")
    }
}
