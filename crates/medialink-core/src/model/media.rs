// ── Media identity types ──

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// The seven kinds of library entity the mirror tracks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MediaType {
    Movie,
    TvShow,
    Episode,
    MusicVideo,
    Artist,
    Album,
    Song,
}

impl MediaType {
    /// Name of the id member in server payloads (`movieid`, `songid`, ...).
    pub fn id_field(self) -> &'static str {
        match self {
            Self::Movie => "movieid",
            Self::TvShow => "tvshowid",
            Self::Episode => "episodeid",
            Self::MusicVideo => "musicvideoid",
            Self::Artist => "artistid",
            Self::Album => "albumid",
            Self::Song => "songid",
        }
    }

    pub fn library(self) -> Library {
        match self {
            Self::Movie | Self::TvShow | Self::Episode | Self::MusicVideo => Library::Video,
            Self::Artist | Self::Album | Self::Song => Library::Audio,
        }
    }

    /// Parse the `type` member of an event payload. Unknown types
    /// (`channel`, `picture`, ...) yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

/// Which half of the server's library a collection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Library {
    Video,
    Audio,
}

impl Library {
    pub fn media_types(self) -> impl Iterator<Item = MediaType> {
        MediaType::iter().filter(move |t| t.library() == self)
    }

    /// Map a notification namespace (`VideoLibrary`, `AudioLibrary`) to a library.
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            "VideoLibrary" => Some(Self::Video),
            "AudioLibrary" => Some(Self::Audio),
            _ => None,
        }
    }
}

/// Which libraries a session mirrors.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MediaScope {
    #[default]
    All,
    Music,
    Video,
}

impl MediaScope {
    pub fn includes(self, library: Library) -> bool {
        match self {
            Self::All => true,
            Self::Music => library == Library::Audio,
            Self::Video => library == Library::Video,
        }
    }
}

// ── MediaKey ────────────────────────────────────────────────────────

/// Identity of one library entity: `(type, id)`. Ids are only unique
/// within a type, so both halves are always needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaKey {
    pub media_type: MediaType,
    pub id: u64,
}

impl MediaKey {
    pub fn new(media_type: MediaType, id: u64) -> Self {
        Self { media_type, id }
    }
}

impl fmt::Display for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.media_type, self.id)
    }
}

/// Error returned when a `type:id` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected `<type>:<id>` (e.g. `song:12`), got `{0}`")]
pub struct ParseMediaKeyError(pub String);

impl FromStr for MediaKey {
    type Err = ParseMediaKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMediaKeyError(s.to_owned());
        let (kind, id) = s.split_once(':').ok_or_else(err)?;
        let media_type = MediaType::from_wire(kind.trim()).ok_or_else(err)?;
        let id = id.trim().parse().map_err(|_| err())?;
        Ok(Self { media_type, id })
    }
}
