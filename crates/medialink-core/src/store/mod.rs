// ── Mirror store ──
//
// Single-writer, many-reader storage for the mirrored library and player
// state. Every write path takes the writer lock, checks the caller's
// generation, and publishes a fresh `Arc` snapshot on a `watch` channel.

mod collection;
mod target;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use indexmap::IndexMap;
use strum::IntoEnumIterator;
use tokio::sync::{broadcast, watch};

use crate::error::CoreError;
use crate::model::{ActivePlayer, LibraryItem, MediaKey, MediaType, PlayerState, Playlist};
use crate::stream::EntityStream;

pub use collection::{Collection, Entry};
pub use target::{RefreshTarget, Segment};

const CHANGE_CHANNEL_SIZE: usize = 256;

/// Load state of one segment. `Loading` never blanks the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SegmentState {
    #[default]
    Empty,
    Loading,
    Populated,
}

/// Load state of every segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentStates(BTreeMap<Segment, SegmentState>);

impl SegmentStates {
    pub fn get(&self, segment: Segment) -> SegmentState {
        self.0.get(&segment).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Segment, SegmentState)> + '_ {
        self.0.iter().map(|(s, st)| (*s, *st))
    }
}

/// Notification that the mirror changed, for consumers that persist or
/// redraw on any change rather than watching one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Segment(Segment),
    Item(MediaKey),
    Removed(MediaKey),
    Reset,
}

/// The subset of the mirror that was (or will be) persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialMirror {
    pub collections: IndexMap<MediaType, Vec<LibraryItem>>,
    pub players: Option<Vec<ActivePlayer>>,
    pub audio_playlist: Option<Playlist>,
    pub video_playlist: Option<Playlist>,
}

impl PartialMirror {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
            && self.players.is_none()
            && self.audio_playlist.is_none()
            && self.video_playlist.is_none()
    }

    pub fn segments(&self) -> Vec<Segment> {
        let mut segments: Vec<Segment> = self
            .collections
            .keys()
            .copied()
            .map(Segment::for_media_type)
            .collect();
        if self.players.is_some() {
            segments.push(Segment::Players);
        }
        if self.audio_playlist.is_some() {
            segments.push(Segment::AudioPlaylist);
        }
        if self.video_playlist.is_some() {
            segments.push(Segment::VideoPlaylist);
        }
        segments
    }
}

/// Outcome of [`MirrorStore::apply_optimistic`].
#[derive(Debug, Clone)]
pub struct Optimistic {
    pub revision: u64,
    pub predicted: Arc<LibraryItem>,
}

struct Writer {
    generation: u64,
    revision: u64,
    populated: BTreeSet<Segment>,
}

struct Collections {
    movies: watch::Sender<Arc<Collection>>,
    tvshows: watch::Sender<Arc<Collection>>,
    episodes: watch::Sender<Arc<Collection>>,
    musicvideos: watch::Sender<Arc<Collection>>,
    artists: watch::Sender<Arc<Collection>>,
    albums: watch::Sender<Arc<Collection>>,
    songs: watch::Sender<Arc<Collection>>,
}

impl Collections {
    fn new() -> Self {
        let empty = || watch::channel(Arc::new(Collection::default())).0;
        Self {
            movies: empty(),
            tvshows: empty(),
            episodes: empty(),
            musicvideos: empty(),
            artists: empty(),
            albums: empty(),
            songs: empty(),
        }
    }

    fn get(&self, media_type: MediaType) -> &watch::Sender<Arc<Collection>> {
        match media_type {
            MediaType::Movie => &self.movies,
            MediaType::TvShow => &self.tvshows,
            MediaType::Episode => &self.episodes,
            MediaType::MusicVideo => &self.musicvideos,
            MediaType::Artist => &self.artists,
            MediaType::Album => &self.albums,
            MediaType::Song => &self.songs,
        }
    }
}

/// The local mirror of one server.
///
/// Reads never block and always return the latest committed value. Writes
/// are serialized and rejected with [`CoreError::StaleGeneration`] when the
/// caller's session is no longer current.
pub struct MirrorStore {
    writer: Mutex<Writer>,
    collections: Collections,
    players: watch::Sender<Arc<PlayerState>>,
    states: watch::Sender<SegmentStates>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for MirrorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorStore {
    pub fn new() -> Self {
        let (players, _) = watch::channel(Arc::new(PlayerState::default()));
        let (states, _) = watch::channel(SegmentStates::default());
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Self {
            writer: Mutex::new(Writer {
                generation: 0,
                revision: 0,
                populated: BTreeSet::new(),
            }),
            collections: Collections::new(),
            players,
            states,
            changes,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn collection(&self, media_type: MediaType) -> Arc<Collection> {
        self.collections.get(media_type).borrow().clone()
    }

    pub fn item(&self, key: &MediaKey) -> Option<Arc<LibraryItem>> {
        self.collection(key.media_type).get(key.id).cloned()
    }

    pub fn entry(&self, key: &MediaKey) -> Option<Entry> {
        self.collection(key.media_type).entry(key.id).cloned()
    }

    pub fn player_state(&self) -> Arc<PlayerState> {
        self.players.borrow().clone()
    }

    pub fn segment_state(&self, segment: Segment) -> SegmentState {
        self.states.borrow().get(segment)
    }

    pub fn subscribe_collection(&self, media_type: MediaType) -> EntityStream<Collection> {
        EntityStream::new(self.collections.get(media_type).subscribe())
    }

    pub fn subscribe_players(&self) -> EntityStream<PlayerState> {
        EntityStream::new(self.players.subscribe())
    }

    pub fn subscribe_states(&self) -> watch::Receiver<SegmentStates> {
        self.states.subscribe()
    }

    pub fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Confirmed values of every populated segment.
    pub fn export(&self) -> PartialMirror {
        let populated = self.lock().populated.clone();
        let mut mirror = PartialMirror::default();
        let players = self.player_state();

        for segment in populated {
            match segment {
                Segment::Players => mirror.players = Some(players.players.clone()),
                Segment::AudioPlaylist => mirror.audio_playlist = Some(players.audio_playlist.clone()),
                Segment::VideoPlaylist => mirror.video_playlist = Some(players.video_playlist.clone()),
                collection => {
                    if let Some(media_type) = collection.media_type() {
                        let items = self
                            .collection(media_type)
                            .confirmed_items()
                            .map(|item| (**item).clone())
                            .collect();
                        mirror.collections.insert(media_type, items);
                    }
                }
            }
        }
        mirror
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Move to a new generation. With `clear`, discard all contents.
    pub fn reset(&self, generation: u64, clear: bool) {
        let mut w = self.lock();
        w.generation = generation;
        if clear {
            for media_type in MediaType::iter() {
                self.collections
                    .get(media_type)
                    .send_replace(Arc::new(Collection::default()));
            }
            self.players.send_replace(Arc::new(PlayerState::default()));
            self.states.send_replace(SegmentStates::default());
            w.populated.clear();
        }
        drop(w);
        let _ = self.changes.send(StoreChange::Reset);
    }

    /// Seed empty segments from a snapshot. Returns the segments restored;
    /// segments that already hold data are left alone.
    pub fn restore(&self, generation: u64, mirror: PartialMirror) -> Result<Vec<Segment>, CoreError> {
        let mut w = self.lock();
        check(&w, generation)?;
        w.revision += 1;
        let revision = w.revision;

        let mut restored = Vec::new();
        let is_empty = |segment: Segment| self.states.borrow().get(segment) == SegmentState::Empty;

        for (media_type, items) in mirror.collections {
            let segment = Segment::for_media_type(media_type);
            if !is_empty(segment) {
                continue;
            }
            self.collections
                .get(media_type)
                .send_replace(Arc::new(Collection::from_items(items, revision)));
            restored.push(segment);
        }

        let mut players = (*self.player_state()).clone();
        if let Some(list) = mirror.players.filter(|_| is_empty(Segment::Players)) {
            players.players = list;
            restored.push(Segment::Players);
        }
        if let Some(list) = mirror.audio_playlist.filter(|_| is_empty(Segment::AudioPlaylist)) {
            players.audio_playlist = list;
            restored.push(Segment::AudioPlaylist);
        }
        if let Some(list) = mirror.video_playlist.filter(|_| is_empty(Segment::VideoPlaylist)) {
            players.video_playlist = list;
            restored.push(Segment::VideoPlaylist);
        }
        self.players.send_replace(Arc::new(players));

        for segment in &restored {
            self.mark_populated(&mut w, *segment);
        }
        Ok(restored)
    }

    // ── Segment state ────────────────────────────────────────────────

    pub fn begin_loading(&self, generation: u64, segment: Segment) -> Result<(), CoreError> {
        let w = self.lock();
        check(&w, generation)?;
        self.set_state(segment, SegmentState::Loading);
        Ok(())
    }

    /// A refresh failed: fall back to whatever the segment held before.
    pub fn end_loading_failed(&self, generation: u64, segment: Segment) {
        let w = self.lock();
        if check(&w, generation).is_err() {
            return;
        }
        let state = if w.populated.contains(&segment) {
            SegmentState::Populated
        } else {
            SegmentState::Empty
        };
        self.set_state(segment, state);
    }

    // ── Confirmed writes ─────────────────────────────────────────────

    /// Replace a whole collection with a server listing.
    ///
    /// Outstanding predictions are dropped: the server listing wins.
    pub fn commit_collection(
        &self,
        generation: u64,
        media_type: MediaType,
        items: Vec<LibraryItem>,
    ) -> Result<(), CoreError> {
        let mut w = self.lock();
        check(&w, generation)?;
        w.revision += 1;
        let collection = Collection::from_items(
            items.into_iter().filter(|i| i.media_type() == media_type),
            w.revision,
        );
        self.collections
            .get(media_type)
            .send_replace(Arc::new(collection));

        let segment = Segment::for_media_type(media_type);
        self.mark_populated(&mut w, segment);
        drop(w);
        let _ = self.changes.send(StoreChange::Segment(segment));
        Ok(())
    }

    /// Upsert one server-confirmed entity.
    pub fn commit_item(&self, generation: u64, item: LibraryItem) -> Result<(), CoreError> {
        let mut w = self.lock();
        check(&w, generation)?;
        w.revision += 1;
        let key = item.key();
        let revision = w.revision;
        self.edit_collection(key.media_type, |col| {
            col.insert(Entry::confirmed(Arc::new(item), revision));
        });
        drop(w);
        let _ = self.changes.send(StoreChange::Item(key));
        Ok(())
    }

    /// Drop one entity. Returns whether it was present.
    pub fn remove_item(&self, generation: u64, key: &MediaKey) -> Result<bool, CoreError> {
        let mut w = self.lock();
        check(&w, generation)?;
        if self.collection(key.media_type).entry(key.id).is_none() {
            return Ok(false);
        }
        w.revision += 1;
        self.edit_collection(key.media_type, |col| {
            col.remove(key.id);
        });
        drop(w);
        let _ = self.changes.send(StoreChange::Removed(*key));
        Ok(true)
    }

    pub fn commit_players(&self, generation: u64, players: Vec<ActivePlayer>) -> Result<(), CoreError> {
        let mut w = self.lock();
        check(&w, generation)?;
        self.players.send_modify(|state| {
            let mut next = (**state).clone();
            next.players = players;
            next.last_update = Some(Utc::now());
            *state = Arc::new(next);
        });
        self.mark_populated(&mut w, Segment::Players);
        drop(w);
        let _ = self.changes.send(StoreChange::Segment(Segment::Players));
        Ok(())
    }

    pub fn commit_playlist(&self, generation: u64, playlist: Playlist) -> Result<(), CoreError> {
        let segment = Segment::for_playlist(playlist.playlist_id).ok_or_else(|| CoreError::Decode {
            context: "playlist".into(),
            message: format!("unknown playlist id {}", playlist.playlist_id),
        })?;

        let mut w = self.lock();
        check(&w, generation)?;
        self.players.send_modify(|state| {
            let mut next = (**state).clone();
            if segment == Segment::AudioPlaylist {
                next.audio_playlist = playlist;
            } else {
                next.video_playlist = playlist;
            }
            next.last_update = Some(Utc::now());
            *state = Arc::new(next);
        });
        self.mark_populated(&mut w, segment);
        drop(w);
        let _ = self.changes.send(StoreChange::Segment(segment));
        Ok(())
    }

    // ── Optimistic writes ────────────────────────────────────────────

    /// Apply a local prediction on top of the current value.
    ///
    /// The server-confirmed base is kept alongside so snapshots persist only
    /// confirmed data and a failed write-back can be undone.
    pub fn apply_optimistic<F>(
        &self,
        generation: u64,
        key: &MediaKey,
        predict: F,
    ) -> Result<Optimistic, CoreError>
    where
        F: FnOnce(&mut LibraryItem) -> Result<(), CoreError>,
    {
        let mut w = self.lock();
        check(&w, generation)?;

        let current = self
            .collection(key.media_type)
            .entry(key.id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                key: key.to_string(),
            })?;

        let mut predicted = (*current.item).clone();
        predict(&mut predicted)?;
        let predicted = Arc::new(predicted);

        w.revision += 1;
        let revision = w.revision;
        let base = current.confirmed.unwrap_or(current.item);
        let entry = Entry {
            item: Arc::clone(&predicted),
            confirmed: Some(base),
            revision,
        };
        self.edit_collection(key.media_type, |col| col.insert(entry));
        drop(w);
        let _ = self.changes.send(StoreChange::Item(*key));

        Ok(Optimistic {
            revision,
            predicted,
        })
    }

    /// Restore the confirmed value, but only if the entry still carries
    /// `revision`. Returns whether anything was reverted.
    pub fn revert_optimistic(
        &self,
        generation: u64,
        key: &MediaKey,
        revision: u64,
    ) -> Result<bool, CoreError> {
        let mut w = self.lock();
        check(&w, generation)?;

        let Some(entry) = self.collection(key.media_type).entry(key.id).cloned() else {
            return Ok(false);
        };
        if entry.revision != revision {
            return Err(CoreError::ReconciliationConflict {
                key: *key,
                expected: revision,
                actual: entry.revision,
            });
        }
        let Some(base) = entry.confirmed else {
            return Ok(false);
        };

        w.revision += 1;
        let revision = w.revision;
        self.edit_collection(key.media_type, |col| {
            col.insert(Entry::confirmed(base, revision));
        });
        drop(w);
        let _ = self.changes.send(StoreChange::Item(*key));
        Ok(true)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone the collection, edit the copy, publish it.
    fn edit_collection(&self, media_type: MediaType, edit: impl FnOnce(&mut Collection)) {
        let tx = self.collections.get(media_type);
        let mut next = (**tx.borrow()).clone();
        edit(&mut next);
        tx.send_replace(Arc::new(next));
    }

    fn set_state(&self, segment: Segment, state: SegmentState) {
        self.states.send_if_modified(|states| {
            let previous = states.0.insert(segment, state);
            previous != Some(state)
        });
    }

    fn mark_populated(&self, w: &mut Writer, segment: Segment) {
        w.populated.insert(segment);
        self.set_state(segment, SegmentState::Populated);
    }
}

fn check(w: &Writer, generation: u64) -> Result<(), CoreError> {
    if w.generation == generation {
        Ok(())
    } else {
        Err(CoreError::StaleGeneration {
            got: generation,
            current: w.generation,
        })
    }
}
