// ── Library entities ──
//
// Field names follow the server's JSON so list and detail payloads decode
// straight into these types. Mutable play-state fields are flattened into a
// shared `PlayState` so the reconciler can treat every type alike.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::media::{MediaKey, MediaType};

/// Resume bookmark in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub total: f64,
}

/// The user-mutable part of an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayState {
    #[serde(default)]
    pub playcount: u32,
    /// `YYYY-MM-DD HH:MM:SS` in server local time, empty when never played.
    #[serde(default, rename = "lastplayed")]
    pub last_played: String,
    /// 0 (unrated) to 10.
    #[serde(default, rename = "userrating")]
    pub user_rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumePoint>,
}

impl PlayState {
    pub fn is_watched(&self) -> bool {
        self.playcount > 0
    }

    pub fn is_in_progress(&self) -> bool {
        self.resume.is_some_and(|r| r.position > 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    #[serde(rename = "movieid")]
    pub id: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub file: String,
    #[serde(flatten)]
    pub play_state: PlayState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TvShow {
    #[serde(rename = "tvshowid")]
    pub id: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<u32>,
    /// Number of episodes.
    #[serde(default, rename = "episode")]
    pub episode_count: u32,
    #[serde(default, rename = "watchedepisodes")]
    pub watched_episodes: u32,
    #[serde(flatten)]
    pub play_state: PlayState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(rename = "episodeid")]
    pub id: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "showtitle")]
    pub show_title: String,
    #[serde(default, rename = "tvshowid")]
    pub tvshow_id: Option<i64>,
    #[serde(default)]
    pub season: i32,
    #[serde(default)]
    pub episode: i32,
    #[serde(flatten)]
    pub play_state: PlayState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicVideo {
    #[serde(rename = "musicvideoid")]
    pub id: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: Vec<String>,
    #[serde(flatten)]
    pub play_state: PlayState,
}

/// Artists carry no play state of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    #[serde(rename = "artistid")]
    pub id: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub artist: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    #[serde(rename = "albumid")]
    pub id: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: Vec<String>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(flatten)]
    pub play_state: PlayState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    #[serde(rename = "songid")]
    pub id: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: Vec<String>,
    #[serde(default)]
    pub album: String,
    #[serde(default, rename = "albumid")]
    pub album_id: Option<u64>,
    #[serde(default)]
    pub track: i32,
    /// Seconds.
    #[serde(default)]
    pub duration: u32,
    #[serde(flatten)]
    pub play_state: PlayState,
}

/// Any entity held in the mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryItem {
    Movie(Movie),
    TvShow(TvShow),
    Episode(Episode),
    MusicVideo(MusicVideo),
    Artist(Artist),
    Album(Album),
    Song(Song),
}

impl LibraryItem {
    /// Decode a server object of a known type.
    pub fn from_value(media_type: MediaType, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match media_type {
            MediaType::Movie => Self::Movie(serde_json::from_value(value)?),
            MediaType::TvShow => Self::TvShow(serde_json::from_value(value)?),
            MediaType::Episode => Self::Episode(serde_json::from_value(value)?),
            MediaType::MusicVideo => Self::MusicVideo(serde_json::from_value(value)?),
            MediaType::Artist => Self::Artist(serde_json::from_value(value)?),
            MediaType::Album => Self::Album(serde_json::from_value(value)?),
            MediaType::Song => Self::Song(serde_json::from_value(value)?),
        })
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            Self::Movie(_) => MediaType::Movie,
            Self::TvShow(_) => MediaType::TvShow,
            Self::Episode(_) => MediaType::Episode,
            Self::MusicVideo(_) => MediaType::MusicVideo,
            Self::Artist(_) => MediaType::Artist,
            Self::Album(_) => MediaType::Album,
            Self::Song(_) => MediaType::Song,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Movie(m) => m.id,
            Self::TvShow(t) => t.id,
            Self::Episode(e) => e.id,
            Self::MusicVideo(v) => v.id,
            Self::Artist(a) => a.id,
            Self::Album(a) => a.id,
            Self::Song(s) => s.id,
        }
    }

    pub fn key(&self) -> MediaKey {
        MediaKey::new(self.media_type(), self.id())
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Movie(m) => &m.label,
            Self::TvShow(t) => &t.label,
            Self::Episode(e) => &e.label,
            Self::MusicVideo(v) => &v.label,
            Self::Artist(a) => &a.label,
            Self::Album(a) => &a.label,
            Self::Song(s) => &s.label,
        }
    }

    pub fn play_state(&self) -> Option<&PlayState> {
        match self {
            Self::Movie(m) => Some(&m.play_state),
            Self::TvShow(t) => Some(&t.play_state),
            Self::Episode(e) => Some(&e.play_state),
            Self::MusicVideo(v) => Some(&v.play_state),
            Self::Album(a) => Some(&a.play_state),
            Self::Song(s) => Some(&s.play_state),
            Self::Artist(_) => None,
        }
    }

    pub fn play_state_mut(&mut self) -> Option<&mut PlayState> {
        match self {
            Self::Movie(m) => Some(&mut m.play_state),
            Self::TvShow(t) => Some(&mut t.play_state),
            Self::Episode(e) => Some(&mut e.play_state),
            Self::MusicVideo(v) => Some(&mut v.play_state),
            Self::Album(a) => Some(&mut a.play_state),
            Self::Song(s) => Some(&mut s.play_state),
            Self::Artist(_) => None,
        }
    }
}
