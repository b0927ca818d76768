// ── Domain model ──
//
// Library entities, player state, and classified events as the mirror
// stores them. Wire names follow the server's JSON-RPC payloads.

pub mod event;
pub mod item;
pub mod media;
pub mod player;

pub use event::{Event, EventKind, Origin};
pub use item::{
    Album, Artist, Episode, LibraryItem, Movie, MusicVideo, PlayState, ResumePoint, Song, TvShow,
};
pub use media::{Library, MediaKey, MediaScope, MediaType, ParseMediaKeyError};
pub use player::{
    AUDIO_PLAYLIST_ID, ActivePlayer, ActivePlayerRef, MediaTime, PlayerKind, PlayerProperties,
    PlayerState, Playlist, PlaylistItem, VIDEO_PLAYLIST_ID,
};
