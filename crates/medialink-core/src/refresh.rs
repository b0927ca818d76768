// ── Refresh execution ──
//
// Runs coalesced refresh jobs against the transport and commits results to
// the mirror. Results of a job whose generation is no longer current are
// dropped by the store's generation check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use medialink_api::Transport;

use crate::coalesce::{JobRunner, RefreshJob};
use crate::error::CoreError;
use crate::methods;
use crate::model::{
    AUDIO_PLAYLIST_ID, ActivePlayer, ActivePlayerRef, LibraryItem, MediaKey, MediaType,
    PlayerProperties, Playlist, PlaylistItem, VIDEO_PLAYLIST_ID,
};
use crate::store::{MirrorStore, RefreshTarget, Segment};

/// [`JobRunner`] that fetches from the server and commits into the mirror.
pub(crate) struct RefreshRunner {
    transport: Arc<dyn Transport>,
    store: Arc<MirrorStore>,
    timeout: Duration,
    page_size: u32,
}

impl RefreshRunner {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        store: Arc<MirrorStore>,
        timeout: Duration,
        page_size: u32,
    ) -> Self {
        Self {
            transport,
            store,
            timeout,
            page_size: page_size.max(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, CoreError> {
        Ok(self.transport.call(method, params, self.timeout).await?)
    }

    async fn refresh_segment(&self, generation: u64, segment: Segment) -> Result<(), CoreError> {
        self.store.begin_loading(generation, segment)?;

        let result = match segment.media_type() {
            Some(media_type) => self
                .fetch_collection(media_type)
                .await
                .and_then(|items| self.store.commit_collection(generation, media_type, items)),
            None if segment == Segment::Players => self
                .fetch_players()
                .await
                .and_then(|players| self.store.commit_players(generation, players)),
            None => self
                .fetch_playlist(segment)
                .await
                .and_then(|playlist| self.store.commit_playlist(generation, playlist)),
        };

        if result.is_err() {
            self.store.end_loading_failed(generation, segment);
        }
        result
    }

    async fn refresh_item(&self, generation: u64, key: MediaKey) -> Result<(), CoreError> {
        let (method, member) = methods::details(key.media_type);
        let params = methods::details_params(key.media_type, key.id);

        match self.transport.call(method, params, self.timeout).await {
            Ok(mut result) => {
                let value = result.get_mut(member).map(Value::take).ok_or_else(|| {
                    CoreError::Decode {
                        context: method.to_owned(),
                        message: format!("missing `{member}`"),
                    }
                })?;
                let item = LibraryItem::from_value(key.media_type, value)
                    .map_err(|e| CoreError::decode(method, &e))?;
                self.store.commit_item(generation, item)
            }
            Err(e) if e.is_not_found() => {
                debug!(%key, "entity no longer exists on server");
                self.store.remove_item(generation, &key).map(|_| ())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a whole collection, page by page.
    async fn fetch_collection(&self, media_type: MediaType) -> Result<Vec<LibraryItem>, CoreError> {
        let (method, member) = methods::list(media_type);
        let mut items = Vec::new();
        let mut start = 0_u32;

        loop {
            let end = start.saturating_add(self.page_size);
            let mut result = self
                .call(method, methods::list_params(media_type, start, end))
                .await?;

            let total = result
                .get("limits")
                .and_then(|l| l.get("total"))
                .and_then(Value::as_u64);
            // An empty library omits the member entirely.
            let page = match result.get_mut(member).map(Value::take) {
                Some(Value::Array(page)) => page,
                _ => Vec::new(),
            };
            let count = page.len();

            for value in page {
                match LibraryItem::from_value(media_type, value) {
                    Ok(item) => items.push(item),
                    Err(e) => warn!(method, error = %e, "skipping undecodable item"),
                }
            }

            let short_page = count < usize::try_from(self.page_size).unwrap_or(usize::MAX);
            if short_page || total.is_some_and(|t| u64::from(end) >= t) {
                break;
            }
            start = end;
        }

        Ok(items)
    }

    async fn fetch_players(&self) -> Result<Vec<ActivePlayer>, CoreError> {
        let refs: Vec<ActivePlayerRef> = decode(
            methods::GET_ACTIVE_PLAYERS,
            self.call(methods::GET_ACTIVE_PLAYERS, Value::Null).await?,
        )?;

        let mut players = Vec::with_capacity(refs.len());
        for player in refs {
            match self.fetch_player(player).await {
                Ok(active) => players.push(active),
                // A player that stopped between calls is simply gone.
                Err(e) if !e.is_transient() => {
                    debug!(player_id = player.player_id, error = %e, "player vanished during refresh");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(players)
    }

    async fn fetch_player(&self, player: ActivePlayerRef) -> Result<ActivePlayer, CoreError> {
        let properties: PlayerProperties = decode(
            methods::GET_PLAYER_PROPERTIES,
            self.call(
                methods::GET_PLAYER_PROPERTIES,
                methods::player_properties_params(player.player_id),
            )
            .await?,
        )?;

        let mut item = self
            .call(
                methods::GET_PLAYER_ITEM,
                methods::player_item_params(player.player_id),
            )
            .await?;
        let current_item: Option<PlaylistItem> = match item.get_mut("item").map(Value::take) {
            Some(value) => Some(decode(methods::GET_PLAYER_ITEM, value)?),
            None => None,
        };

        Ok(ActivePlayer {
            player_id: player.player_id,
            kind: player.kind,
            properties,
            current_item,
        })
    }

    async fn fetch_playlist(&self, segment: Segment) -> Result<Playlist, CoreError> {
        let playlist_id = match segment {
            Segment::AudioPlaylist => AUDIO_PLAYLIST_ID,
            _ => VIDEO_PLAYLIST_ID,
        };
        let mut result = self
            .call(
                methods::GET_PLAYLIST_ITEMS,
                methods::playlist_items_params(playlist_id),
            )
            .await?;
        let items = match result.get_mut("items").map(Value::take) {
            Some(value) => decode(methods::GET_PLAYLIST_ITEMS, value)?,
            None => Vec::new(),
        };
        Ok(Playlist { playlist_id, items })
    }
}

#[async_trait]
impl JobRunner for RefreshRunner {
    async fn run(&self, job: RefreshJob) {
        let target = job.target;
        if job.generation != self.store.generation() {
            debug!(%target, generation = job.generation, "skipping job from previous session");
            return;
        }

        let started = Instant::now();
        let result = match target {
            RefreshTarget::Segment(segment) => self.refresh_segment(job.generation, segment).await,
            RefreshTarget::Item(key) => self.refresh_item(job.generation, key).await,
        };

        match result {
            Ok(()) => debug!(
                %target,
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "refresh committed"
            ),
            Err(CoreError::StaleGeneration { got, current }) => {
                debug!(%target, got, current, "discarded stale refresh result");
            }
            Err(e) => warn!(%target, error = %e, "refresh failed"),
        }
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, CoreError> {
    serde_json::from_value(value).map_err(|e| CoreError::decode(method, &e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::SegmentState;
    use crate::test_support::{FakeTransport, song_json};
    use serde_json::json;

    fn runner(transport: &Arc<FakeTransport>, store: &Arc<MirrorStore>, page_size: u32) -> RefreshRunner {
        RefreshRunner::new(
            transport.clone(),
            Arc::clone(store),
            Duration::from_secs(5),
            page_size,
        )
    }

    fn job(target: RefreshTarget, generation: u64) -> RefreshJob {
        RefreshJob {
            target,
            triggered_at: Instant::now(),
            policy: crate::coalesce::Policy::IMMEDIATE,
            generation,
        }
    }

    fn fresh_store() -> Arc<MirrorStore> {
        let store = Arc::new(MirrorStore::new());
        store.reset(1, true);
        store
    }

    #[tokio::test]
    async fn collection_is_fetched_in_pages() {
        let transport = Arc::new(FakeTransport::new());
        transport.on("AudioLibrary.GetSongs", |params| {
            let start = params["limits"]["start"].as_u64().unwrap();
            let songs: Vec<Value> = (start..(start + 2).min(3)).map(|id| song_json(id + 1, 0)).collect();
            Ok(json!({ "songs": songs, "limits": { "start": start, "end": start + 2, "total": 3 } }))
        });
        let store = fresh_store();

        runner(&transport, &store, 2)
            .run(job(Segment::Songs.into(), 1))
            .await;

        assert_eq!(transport.call_count("AudioLibrary.GetSongs"), 2);
        let songs = store.collection(MediaType::Song);
        assert_eq!(songs.ids().collect::<Vec<_>>(), [1, 2, 3]);
        assert_eq!(store.segment_state(Segment::Songs), SegmentState::Populated);
    }

    #[tokio::test]
    async fn empty_library_omits_member() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(
            "VideoLibrary.GetMovies",
            json!({ "limits": { "start": 0, "end": 0, "total": 0 } }),
        );
        let store = fresh_store();

        runner(&transport, &store, 500).run(job(Segment::Movies.into(), 1)).await;

        assert!(store.collection(MediaType::Movie).is_empty());
        assert_eq!(store.segment_state(Segment::Movies), SegmentState::Populated);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_contents() {
        let transport = Arc::new(FakeTransport::new());
        let store = fresh_store();
        store
            .commit_collection(1, MediaType::Song, vec![LibraryItem::from_value(MediaType::Song, song_json(1, 0)).unwrap()])
            .unwrap();

        // No handler registered: the fake answers "method not found".
        runner(&transport, &store, 500).run(job(Segment::Songs.into(), 1)).await;

        assert_eq!(store.collection(MediaType::Song).len(), 1);
        assert_eq!(store.segment_state(Segment::Songs), SegmentState::Populated);
    }

    #[tokio::test]
    async fn point_refresh_commits_or_removes() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(
            "AudioLibrary.GetSongDetails",
            json!({ "songdetails": song_json(4, 9) }),
        );
        let store = fresh_store();
        let key = MediaKey::new(MediaType::Song, 4);

        runner(&transport, &store, 500).run(job(key.into(), 1)).await;
        assert_eq!(store.item(&key).unwrap().play_state().unwrap().playcount, 9);

        transport.fail_with("AudioLibrary.GetSongDetails", || medialink_api::Error::Rpc {
            method: "AudioLibrary.GetSongDetails".into(),
            code: medialink_api::error::RPC_INVALID_PARAMS,
            message: "Invalid params.".into(),
        });
        runner(&transport, &store, 500).run(job(key.into(), 1)).await;
        assert!(store.item(&key).is_none());
    }

    #[tokio::test]
    async fn players_and_current_item() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(
            methods::GET_ACTIVE_PLAYERS,
            json!([{ "playerid": 0, "playertype": "internal", "type": "audio" }]),
        );
        transport.respond(
            methods::GET_PLAYER_PROPERTIES,
            json!({ "speed": 1, "time": { "minutes": 1 }, "playlistid": 0, "position": 2 }),
        );
        transport.respond(
            methods::GET_PLAYER_ITEM,
            json!({ "item": { "id": 12, "type": "song", "label": "Intro" } }),
        );
        let store = fresh_store();

        runner(&transport, &store, 500).run(job(Segment::Players.into(), 1)).await;

        let state = store.player_state();
        let player = state.player(0).unwrap();
        assert_eq!(player.properties.position, 2);
        assert_eq!(
            player.current_item.as_ref().and_then(PlaylistItem::media_key),
            Some(MediaKey::new(MediaType::Song, 12))
        );
        assert!(state.is_playing());
    }

    #[tokio::test]
    async fn playlist_refresh() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(
            methods::GET_PLAYLIST_ITEMS,
            json!({ "items": [{ "id": 1, "type": "song", "label": "a" }, { "type": "unknown", "label": "stream" }] }),
        );
        let store = fresh_store();

        runner(&transport, &store, 500)
            .run(job(Segment::AudioPlaylist.into(), 1))
            .await;

        assert_eq!(store.player_state().audio_playlist.items.len(), 2);
        assert_eq!(store.segment_state(Segment::AudioPlaylist), SegmentState::Populated);
    }

    #[tokio::test]
    async fn stale_job_is_not_executed() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("AudioLibrary.GetSongs", json!({ "songs": [song_json(1, 0)] }));
        let store = fresh_store();

        runner(&transport, &store, 500).run(job(Segment::Songs.into(), 0)).await;

        assert_eq!(transport.call_count("AudioLibrary.GetSongs"), 0);
        assert!(store.collection(MediaType::Song).is_empty());
    }
}
