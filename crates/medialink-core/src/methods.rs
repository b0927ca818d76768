// ── Server methods the engine issues ──
//
// Method names, requested properties, and parameter builders. The rest of
// the server's catalog is out of reach on purpose: callers that need it go
// through `Transport::call` directly.

use serde_json::{Value, json};

use crate::model::{LibraryItem, MediaType, PlayState};

pub const PING: &str = "JSONRPC.Ping";
pub const NOTIFY_ALL: &str = "JSONRPC.NotifyAll";
pub const GET_ACTIVE_PLAYERS: &str = "Player.GetActivePlayers";
pub const GET_PLAYER_PROPERTIES: &str = "Player.GetProperties";
pub const GET_PLAYER_ITEM: &str = "Player.GetItem";
pub const GET_PLAYLIST_ITEMS: &str = "Playlist.GetItems";

/// Message name of the echo this engine broadcasts after a write-back.
/// Other clients receive it as `Other.OnMutation`.
pub const MUTATION_MESSAGE: &str = "OnMutation";

pub const PLAYER_PROPERTIES: &[&str] = &[
    "speed",
    "time",
    "totaltime",
    "percentage",
    "position",
    "playlistid",
    "repeat",
    "shuffled",
];

pub const PLAYLIST_ITEM_PROPERTIES: &[&str] = &["title", "file"];

/// `(method, result member)` of the list call for a media type.
pub fn list(media_type: MediaType) -> (&'static str, &'static str) {
    match media_type {
        MediaType::Movie => ("VideoLibrary.GetMovies", "movies"),
        MediaType::TvShow => ("VideoLibrary.GetTVShows", "tvshows"),
        MediaType::Episode => ("VideoLibrary.GetEpisodes", "episodes"),
        MediaType::MusicVideo => ("VideoLibrary.GetMusicVideos", "musicvideos"),
        MediaType::Artist => ("AudioLibrary.GetArtists", "artists"),
        MediaType::Album => ("AudioLibrary.GetAlbums", "albums"),
        MediaType::Song => ("AudioLibrary.GetSongs", "songs"),
    }
}

/// `(method, result member)` of the detail call for a media type.
pub fn details(media_type: MediaType) -> (&'static str, &'static str) {
    match media_type {
        MediaType::Movie => ("VideoLibrary.GetMovieDetails", "moviedetails"),
        MediaType::TvShow => ("VideoLibrary.GetTVShowDetails", "tvshowdetails"),
        MediaType::Episode => ("VideoLibrary.GetEpisodeDetails", "episodedetails"),
        MediaType::MusicVideo => ("VideoLibrary.GetMusicVideoDetails", "musicvideodetails"),
        MediaType::Artist => ("AudioLibrary.GetArtistDetails", "artistdetails"),
        MediaType::Album => ("AudioLibrary.GetAlbumDetails", "albumdetails"),
        MediaType::Song => ("AudioLibrary.GetSongDetails", "songdetails"),
    }
}

/// Setter for a media type's play state. Artists have none.
pub fn setter(media_type: MediaType) -> Option<&'static str> {
    match media_type {
        MediaType::Movie => Some("VideoLibrary.SetMovieDetails"),
        MediaType::TvShow => Some("VideoLibrary.SetTVShowDetails"),
        MediaType::Episode => Some("VideoLibrary.SetEpisodeDetails"),
        MediaType::MusicVideo => Some("VideoLibrary.SetMusicVideoDetails"),
        MediaType::Album => Some("AudioLibrary.SetAlbumDetails"),
        MediaType::Song => Some("AudioLibrary.SetSongDetails"),
        MediaType::Artist => None,
    }
}

/// Properties requested for list and detail calls.
pub fn properties(media_type: MediaType) -> &'static [&'static str] {
    match media_type {
        MediaType::Movie => &["title", "year", "file", "playcount", "lastplayed", "userrating", "resume"],
        MediaType::TvShow => &[
            "title",
            "year",
            "episode",
            "watchedepisodes",
            "playcount",
            "lastplayed",
            "userrating",
        ],
        MediaType::Episode => &[
            "title",
            "showtitle",
            "tvshowid",
            "season",
            "episode",
            "playcount",
            "lastplayed",
            "userrating",
            "resume",
        ],
        MediaType::MusicVideo => &["title", "artist", "playcount", "lastplayed", "userrating", "resume"],
        MediaType::Artist => &[],
        MediaType::Album => &["title", "artist", "year", "playcount", "lastplayed", "userrating"],
        MediaType::Song => &[
            "title",
            "artist",
            "album",
            "albumid",
            "track",
            "duration",
            "playcount",
            "lastplayed",
            "userrating",
        ],
    }
}

/// Params for one page of a list call: `[start, end)`.
pub fn list_params(media_type: MediaType, start: u32, end: u32) -> Value {
    json!({
        "properties": properties(media_type),
        "limits": { "start": start, "end": end },
    })
}

pub fn details_params(media_type: MediaType, id: u64) -> Value {
    let mut params = json!({ "properties": properties(media_type) });
    params[media_type.id_field()] = json!(id);
    params
}

/// Absolute play-state values for a setter call.
pub fn setter_params(item: &LibraryItem, state: &PlayState) -> Value {
    let media_type = item.media_type();
    let mut params = json!({
        "playcount": state.playcount,
        "lastplayed": state.last_played,
        "userrating": state.user_rating,
    });
    params[media_type.id_field()] = json!(item.id());
    if let Some(resume) = state.resume {
        params["resume"] = json!({ "position": resume.position, "total": resume.total });
    }
    params
}

pub fn player_properties_params(player_id: i64) -> Value {
    json!({ "playerid": player_id, "properties": PLAYER_PROPERTIES })
}

pub fn player_item_params(player_id: i64) -> Value {
    json!({ "playerid": player_id, "properties": PLAYLIST_ITEM_PROPERTIES })
}

pub fn playlist_items_params(playlist_id: i64) -> Value {
    json!({ "playlistid": playlist_id, "properties": PLAYLIST_ITEM_PROPERTIES })
}

/// `JSONRPC.NotifyAll` echo naming the entity that was just written.
pub fn mutation_echo(session_id: &str, item: &LibraryItem) -> Value {
    json!({
        "sender": session_id,
        "message": MUTATION_MESSAGE,
        "data": { "item": { "id": item.id(), "type": item.media_type().to_string() } },
    })
}
