// ── Refresh targets and mirror segments ──

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::model::{AUDIO_PLAYLIST_ID, Library, MediaKey, MediaScope, MediaType, VIDEO_PLAYLIST_ID};

/// A fixed slice of the mirror that is refreshed and persisted as a unit.
///
/// The string form doubles as the snapshot blob name.
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
pub enum Segment {
    #[strum(serialize = "movies")]
    #[serde(rename = "movies")]
    Movies,
    #[strum(serialize = "tvshows")]
    #[serde(rename = "tvshows")]
    TvShows,
    #[strum(serialize = "episodes")]
    #[serde(rename = "episodes")]
    Episodes,
    #[strum(serialize = "musicvideos")]
    #[serde(rename = "musicvideos")]
    MusicVideos,
    #[strum(serialize = "artists")]
    #[serde(rename = "artists")]
    Artists,
    #[strum(serialize = "albums")]
    #[serde(rename = "albums")]
    Albums,
    #[strum(serialize = "songs")]
    #[serde(rename = "songs")]
    Songs,
    #[strum(serialize = "players")]
    #[serde(rename = "players")]
    Players,
    #[strum(serialize = "audio-playlist")]
    #[serde(rename = "audio-playlist")]
    AudioPlaylist,
    #[strum(serialize = "video-playlist")]
    #[serde(rename = "video-playlist")]
    VideoPlaylist,
}

impl Segment {
    /// Collection segment for a media type.
    pub fn for_media_type(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Movie => Self::Movies,
            MediaType::TvShow => Self::TvShows,
            MediaType::Episode => Self::Episodes,
            MediaType::MusicVideo => Self::MusicVideos,
            MediaType::Artist => Self::Artists,
            MediaType::Album => Self::Albums,
            MediaType::Song => Self::Songs,
        }
    }

    /// Playlist segment for a server playlist id.
    pub fn for_playlist(playlist_id: i64) -> Option<Self> {
        match playlist_id {
            AUDIO_PLAYLIST_ID => Some(Self::AudioPlaylist),
            VIDEO_PLAYLIST_ID => Some(Self::VideoPlaylist),
            _ => None,
        }
    }

    /// Media type held by a collection segment; `None` for player slices.
    pub fn media_type(self) -> Option<MediaType> {
        match self {
            Self::Movies => Some(MediaType::Movie),
            Self::TvShows => Some(MediaType::TvShow),
            Self::Episodes => Some(MediaType::Episode),
            Self::MusicVideos => Some(MediaType::MusicVideo),
            Self::Artists => Some(MediaType::Artist),
            Self::Albums => Some(MediaType::Album),
            Self::Songs => Some(MediaType::Song),
            Self::Players | Self::AudioPlaylist | Self::VideoPlaylist => None,
        }
    }

    pub fn is_collection(self) -> bool {
        self.media_type().is_some()
    }

    /// Library a segment belongs to. `Players` spans both.
    pub fn library(self) -> Option<Library> {
        match self {
            Self::AudioPlaylist => Some(Library::Audio),
            Self::VideoPlaylist => Some(Library::Video),
            Self::Players => None,
            collection => collection.media_type().map(MediaType::library),
        }
    }

    pub fn in_scope(self, scope: MediaScope) -> bool {
        self.library().is_none_or(|library| scope.includes(library))
    }

    /// Every segment a session with `scope` keeps populated.
    pub fn all_in_scope(scope: MediaScope) -> impl Iterator<Item = Self> {
        Self::iter().filter(move |s| s.in_scope(scope))
    }

    /// Collection segments of one library.
    pub fn collections_of(library: Library) -> impl Iterator<Item = Self> {
        library.media_types().map(Self::for_media_type)
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// What a refresh job fetches: a whole segment or a single entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshTarget {
    Segment(Segment),
    Item(MediaKey),
}

impl fmt::Display for RefreshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segment(segment) => write!(f, "{segment}"),
            Self::Item(key) => write!(f, "item {key}"),
        }
    }
}

impl From<Segment> for RefreshTarget {
    fn from(segment: Segment) -> Self {
        Self::Segment(segment)
    }
}

impl From<MediaKey> for RefreshTarget {
    fn from(key: MediaKey) -> Self {
        Self::Item(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_names() {
        let names: Vec<&str> = Segment::iter().map(Segment::as_str).collect();
        assert_eq!(
            names,
            [
                "movies",
                "tvshows",
                "episodes",
                "musicvideos",
                "artists",
                "albums",
                "songs",
                "players",
                "audio-playlist",
                "video-playlist"
            ]
        );
        assert_eq!("audio-playlist".parse::<Segment>(), Ok(Segment::AudioPlaylist));
    }

    #[test]
    fn media_type_round_trip() {
        for segment in Segment::iter().filter(|s| s.is_collection()) {
            let media_type = segment.media_type();
            assert!(media_type.is_some());
            assert_eq!(media_type.map(Segment::for_media_type), Some(segment));
        }
    }

    #[test]
    fn scope_selection() {
        let music: Vec<_> = Segment::all_in_scope(MediaScope::Music).collect();
        assert_eq!(
            music,
            [
                Segment::Artists,
                Segment::Albums,
                Segment::Songs,
                Segment::Players,
                Segment::AudioPlaylist
            ]
        );
        assert_eq!(Segment::all_in_scope(MediaScope::All).count(), 10);
    }

    #[test]
    fn playlist_ids() {
        assert_eq!(Segment::for_playlist(0), Some(Segment::AudioPlaylist));
        assert_eq!(Segment::for_playlist(1), Some(Segment::VideoPlaylist));
        assert_eq!(Segment::for_playlist(2), None);
    }
}
