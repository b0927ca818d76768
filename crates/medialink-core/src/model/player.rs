// ── Player and playlist state ──
//
// Rebuilt wholesale by refresh jobs; never predicted locally.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::media::{MediaKey, MediaType};

/// Server playlist ids for the two queues the mirror tracks.
pub const AUDIO_PLAYLIST_ID: i64 = 0;
pub const VIDEO_PLAYLIST_ID: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerKind {
    Audio,
    Video,
    Picture,
    #[serde(other)]
    Unknown,
}

/// One entry of `Player.GetActivePlayers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePlayerRef {
    #[serde(rename = "playerid")]
    pub player_id: i64,
    #[serde(rename = "type")]
    pub kind: PlayerKind,
}

/// `{hours, minutes, seconds, milliseconds}` as the server reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTime {
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub seconds: u32,
    #[serde(default)]
    pub milliseconds: u32,
}

impl MediaTime {
    pub fn as_duration(self) -> Duration {
        let secs = u64::from(self.hours) * 3600 + u64::from(self.minutes) * 60 + u64::from(self.seconds);
        Duration::from_secs(secs) + Duration::from_millis(u64::from(self.milliseconds))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerProperties {
    /// 0 when paused, 1 at normal speed.
    #[serde(default)]
    pub speed: i32,
    #[serde(default)]
    pub time: MediaTime,
    #[serde(default, rename = "totaltime")]
    pub total_time: MediaTime,
    #[serde(default)]
    pub percentage: f64,
    /// Index into the active playlist, -1 when not playing from one.
    #[serde(default)]
    pub position: i64,
    #[serde(default, rename = "playlistid")]
    pub playlist_id: i64,
    #[serde(default)]
    pub repeat: String,
    #[serde(default)]
    pub shuffled: bool,
}

impl PlayerProperties {
    pub fn is_paused(&self) -> bool {
        self.speed == 0
    }
}

/// An item as it appears in a playlist or as a player's current item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Absent for items that are not in the library (plain files, streams).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file: String,
}

impl PlaylistItem {
    /// The library entity this entry refers to, if any.
    pub fn media_key(&self) -> Option<MediaKey> {
        Some(MediaKey::new(MediaType::from_wire(&self.item_type)?, self.id?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePlayer {
    pub player_id: i64,
    pub kind: PlayerKind,
    pub properties: PlayerProperties,
    pub current_item: Option<PlaylistItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub playlist_id: i64,
    pub items: Vec<PlaylistItem>,
}

/// Everything the mirror knows about playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub players: Vec<ActivePlayer>,
    pub audio_playlist: Playlist,
    pub video_playlist: Playlist,
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            players: Vec::new(),
            audio_playlist: Playlist {
                playlist_id: AUDIO_PLAYLIST_ID,
                items: Vec::new(),
            },
            video_playlist: Playlist {
                playlist_id: VIDEO_PLAYLIST_ID,
                items: Vec::new(),
            },
            last_update: None,
        }
    }
}

impl PlayerState {
    pub fn player(&self, player_id: i64) -> Option<&ActivePlayer> {
        self.players.iter().find(|p| p.player_id == player_id)
    }

    pub fn is_playing(&self) -> bool {
        self.players.iter().any(|p| !p.properties.is_paused())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_active_players() {
        let players: Vec<ActivePlayerRef> = serde_json::from_value(json!([
            { "playerid": 0, "playertype": "internal", "type": "audio" },
            { "playerid": 2, "playertype": "internal", "type": "slideshow" }
        ]))
        .unwrap();
        assert_eq!(players[0].kind, PlayerKind::Audio);
        assert_eq!(players[1].kind, PlayerKind::Unknown);
    }

    #[test]
    fn media_time_to_duration() {
        let t = MediaTime {
            hours: 1,
            minutes: 2,
            seconds: 3,
            milliseconds: 400,
        };
        assert_eq!(t.as_duration(), Duration::from_millis(3_723_400));
    }

    #[test]
    fn playlist_item_media_key() {
        let item: PlaylistItem =
            serde_json::from_value(json!({ "id": 5, "type": "song", "label": "Crystalised" }))
                .unwrap();
        assert_eq!(item.media_key(), Some(MediaKey::new(MediaType::Song, 5)));

        let stream: PlaylistItem =
            serde_json::from_value(json!({ "type": "unknown", "file": "http://radio" })).unwrap();
        assert_eq!(stream.media_key(), None);
    }
}
