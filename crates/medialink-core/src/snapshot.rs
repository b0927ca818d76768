// ── Snapshot cache ──
//
// Persists the confirmed mirror as one versioned blob per segment so a cold
// start can show the last known library before the server answers. Writes
// go through a single writer task; the newest queued snapshot always wins.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{ActivePlayer, LibraryItem, Playlist};
use crate::store::{PartialMirror, Segment};

/// Bumped whenever the blob layout changes; older blobs are ignored.
pub const BLOB_VERSION: u32 = 1;

// ── Storage backends ─────────────────────────────────────────────────

/// Byte storage for snapshot blobs, keyed `"<identity>/<segment>"`.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError>;
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), CoreError>;
    /// Remove every blob whose key starts with `prefix/`.
    async fn clear(&self, prefix: &str) -> Result<(), CoreError>;
}

/// One JSON file per blob under a cache directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, prefix: &str) -> PathBuf {
        prefix
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(sanitize(part)))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let (prefix, name) = key.rsplit_once('/').unwrap_or(("", key));
        self.dir_for(prefix).join(format!("{}.json", sanitize(name)))
    }
}

/// Keep path components to a safe alphabet; `.` and `..` never survive.
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), CoreError> {
        let path = self.path_for(key);
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        tokio::fs::create_dir_all(&parent).await?;

        let tmp = parent.join(format!(".snapshot.tmp-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<(), CoreError> {
        match tokio::fs::remove_dir_all(self.dir_for(prefix)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// In-process blob storage, for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Overwrite a blob directly, bypassing encoding.
    pub fn insert_raw(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.insert(key.into(), bytes);
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self.blobs.get(key).map(|b| b.clone()))
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), CoreError> {
        self.blobs.insert(key.to_owned(), bytes);
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<(), CoreError> {
        let scoped = format!("{prefix}/");
        self.blobs.retain(|key, _| !key.starts_with(&scoped));
        Ok(())
    }
}

// ── Blob format ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct SegmentBlob {
    version: u32,
    segment: Segment,
    saved_at: DateTime<Utc>,
    data: SegmentData,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
enum SegmentData {
    Items(Vec<LibraryItem>),
    Players(Vec<ActivePlayer>),
    Playlist(Playlist),
}

fn blob_key(identity: &str, segment: Segment) -> String {
    format!("{identity}/{segment}")
}

fn encode_segments(mirror: &PartialMirror) -> Vec<(Segment, Result<Vec<u8>, serde_json::Error>)> {
    let saved_at = Utc::now();
    let mut blobs = Vec::new();
    let mut push = |segment: Segment, data: SegmentData| {
        let blob = SegmentBlob {
            version: BLOB_VERSION,
            segment,
            saved_at,
            data,
        };
        blobs.push((segment, serde_json::to_vec(&blob)));
    };

    for (media_type, items) in &mirror.collections {
        push(Segment::for_media_type(*media_type), SegmentData::Items(items.clone()));
    }
    if let Some(players) = &mirror.players {
        push(Segment::Players, SegmentData::Players(players.clone()));
    }
    if let Some(playlist) = &mirror.audio_playlist {
        push(Segment::AudioPlaylist, SegmentData::Playlist(playlist.clone()));
    }
    if let Some(playlist) = &mirror.video_playlist {
        push(Segment::VideoPlaylist, SegmentData::Playlist(playlist.clone()));
    }
    blobs
}

/// Fold one decoded blob into `mirror`. Returns `false` when the blob does
/// not belong in `segment`.
fn merge(mirror: &mut PartialMirror, segment: Segment, blob: SegmentBlob) -> bool {
    if blob.version != BLOB_VERSION || blob.segment != segment {
        return false;
    }
    match (segment, blob.data) {
        (Segment::Players, SegmentData::Players(players)) => mirror.players = Some(players),
        (Segment::AudioPlaylist, SegmentData::Playlist(p)) => mirror.audio_playlist = Some(p),
        (Segment::VideoPlaylist, SegmentData::Playlist(p)) => mirror.video_playlist = Some(p),
        (collection, SegmentData::Items(items)) => {
            let Some(media_type) = collection.media_type() else {
                return false;
            };
            if items.iter().any(|i| i.media_type() != media_type) {
                return false;
            }
            mirror.collections.insert(media_type, items);
        }
        _ => return false,
    }
    true
}

// ── Cache ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Queued {
    seq: u64,
    identity: String,
    mirror: Arc<PartialMirror>,
}

struct Shared {
    store: Arc<dyn SnapshotStore>,
    /// Sequence number of the newest snapshot on disk.
    written: tokio::sync::Mutex<u64>,
}

impl Shared {
    async fn write(&self, queued: &Queued) {
        let mut written = self.written.lock().await;
        if queued.seq <= *written {
            return;
        }
        *written = queued.seq;

        let mut segments = 0_usize;
        for (segment, encoded) in encode_segments(&queued.mirror) {
            let key = blob_key(&queued.identity, segment);
            let result = match encoded {
                Ok(bytes) => self.store.save(&key, bytes).await,
                Err(e) => Err(CoreError::decode(key.as_str(), &e)),
            };
            match result {
                Ok(()) => segments += 1,
                Err(e) => warn!(%key, error = %e, "snapshot segment not saved"),
            }
        }
        debug!(identity = %queued.identity, segments, "snapshot written");
    }
}

/// Versioned per-segment snapshots on top of a [`SnapshotStore`].
///
/// Failures are logged and never propagate: a missing snapshot only costs a
/// slower cold start.
pub struct SnapshotCache {
    shared: Arc<Shared>,
    queue: watch::Sender<Option<Arc<Queued>>>,
    seq: AtomicU64,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        let (queue, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                store,
                written: tokio::sync::Mutex::new(0),
            }),
            queue,
            seq: AtomicU64::new(0),
            writer: Mutex::new(None),
        }
    }

    /// Read every segment saved for `identity`. Segments that are missing,
    /// unreadable, corrupt, or from another blob version are skipped.
    pub async fn load(&self, identity: &str) -> Option<PartialMirror> {
        let mut mirror = PartialMirror::default();

        for segment in Segment::iter() {
            let key = blob_key(identity, segment);
            let bytes = match self.shared.store.load(&key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%key, error = %e, "snapshot segment unreadable");
                    continue;
                }
            };
            match serde_json::from_slice::<SegmentBlob>(&bytes) {
                Ok(blob) => {
                    if !merge(&mut mirror, segment, blob) {
                        warn!(%key, "snapshot segment has wrong version or shape, skipping");
                    }
                }
                Err(e) => warn!(%key, error = %e, "corrupt snapshot segment, skipping"),
            }
        }

        if mirror.is_empty() {
            None
        } else {
            debug!(identity, segments = ?mirror.segments(), "snapshot loaded");
            Some(mirror)
        }
    }

    /// Queue `mirror` for writing. Never blocks; a newer call replaces an
    /// older one that has not been written yet.
    pub fn save(&self, identity: &str, mirror: Arc<PartialMirror>) {
        if mirror.is_empty() {
            return;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.queue.send_replace(Some(Arc::new(Queued {
            seq,
            identity: identity.to_owned(),
            mirror,
        })));
        self.ensure_writer();
    }

    /// Write the newest queued snapshot now, if it is not on disk yet.
    pub async fn flush(&self) {
        let queued = self.queue.borrow().clone();
        if let Some(queued) = queued {
            self.shared.write(&queued).await;
        }
    }

    /// Drop every segment stored for `identity`.
    pub async fn clear(&self, identity: &str) -> Result<(), CoreError> {
        self.shared.store.clear(identity).await
    }

    fn ensure_writer(&self) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if writer.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, snapshot will be written on flush");
            return;
        };
        let shared = Arc::clone(&self.shared);
        let mut rx = self.queue.subscribe();
        rx.mark_changed();
        *writer = Some(runtime.spawn(async move {
            while rx.changed().await.is_ok() {
                let queued = rx.borrow_and_update().clone();
                if let Some(queued) = queued {
                    shared.write(&queued).await;
                }
            }
        }));
    }
}

impl Drop for SnapshotCache {
    fn drop(&mut self) {
        if let Some(writer) = self
            .writer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            writer.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{MediaType, PlayerKind, PlayerProperties, PlaylistItem};
    use crate::test_support::song_json;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const IDENTITY: &str = "htpc.local:8080/all";

    fn mirror() -> PartialMirror {
        let mut mirror = PartialMirror::default();
        mirror.collections.insert(
            MediaType::Song,
            vec![
                LibraryItem::from_value(MediaType::Song, song_json(1, 4)).unwrap(),
                LibraryItem::from_value(MediaType::Song, song_json(2, 0)).unwrap(),
            ],
        );
        mirror.collections.insert(
            MediaType::Movie,
            vec![
                LibraryItem::from_value(
                    MediaType::Movie,
                    json!({
                        "movieid": 9,
                        "title": "Heat",
                        "playcount": 1,
                        "lastplayed": "2026-01-02 21:00:00",
                        "userrating": 8,
                        "resume": { "position": 120.5, "total": 10200.0 }
                    }),
                )
                .unwrap(),
            ],
        );
        mirror.players = Some(vec![ActivePlayer {
            player_id: 1,
            kind: PlayerKind::Video,
            properties: PlayerProperties::default(),
            current_item: None,
        }]);
        mirror.audio_playlist = Some(Playlist {
            playlist_id: 0,
            items: vec![PlaylistItem {
                id: Some(1),
                item_type: "song".into(),
                label: "Song 1".into(),
                ..PlaylistItem::default()
            }],
        });
        mirror
    }

    #[tokio::test]
    async fn round_trip_preserves_ids_and_play_state() {
        let store = Arc::new(MemorySnapshotStore::new());
        let cache = SnapshotCache::new(store.clone());

        cache.save(IDENTITY, Arc::new(mirror()));
        cache.flush().await;
        assert_eq!(store.len(), 4);

        let loaded = cache.load(IDENTITY).await.unwrap();
        assert_eq!(loaded.collections[&MediaType::Song], mirror().collections[&MediaType::Song]);
        assert_eq!(loaded.collections[&MediaType::Movie], mirror().collections[&MediaType::Movie]);
        assert_eq!(loaded.players, mirror().players);
        assert_eq!(loaded.audio_playlist, mirror().audio_playlist);
        assert_eq!(loaded.video_playlist, None);
    }

    #[tokio::test]
    async fn corrupt_segment_is_skipped() {
        let store = Arc::new(MemorySnapshotStore::new());
        let cache = SnapshotCache::new(store.clone());
        cache.save(IDENTITY, Arc::new(mirror()));
        cache.flush().await;

        store.insert_raw(format!("{IDENTITY}/songs"), b"{not json".to_vec());
        store.insert_raw(
            format!("{IDENTITY}/players"),
            serde_json::to_vec(&json!({
                "version": BLOB_VERSION + 1,
                "segment": "players",
                "saved_at": "2026-01-01T00:00:00Z",
                "data": { "kind": "players", "value": [] }
            }))
            .unwrap(),
        );

        let loaded = cache.load(IDENTITY).await.unwrap();
        assert!(!loaded.collections.contains_key(&MediaType::Song));
        assert!(loaded.collections.contains_key(&MediaType::Movie));
        assert_eq!(loaded.players, None);
    }

    #[tokio::test]
    async fn unknown_identity_loads_nothing() {
        let cache = SnapshotCache::new(Arc::new(MemorySnapshotStore::new()));
        assert!(cache.load("elsewhere:8080/all").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn writer_task_keeps_latest() {
        let store = Arc::new(MemorySnapshotStore::new());
        let cache = SnapshotCache::new(store.clone());

        let mut older = mirror();
        older.collections.shift_remove(&MediaType::Movie);
        cache.save(IDENTITY, Arc::new(older));
        cache.save(IDENTITY, Arc::new(mirror()));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let loaded = cache.load(IDENTITY).await.unwrap();
        assert!(loaded.collections.contains_key(&MediaType::Movie));
    }

    #[tokio::test]
    async fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileSnapshotStore::new(dir.path()));
        let cache = SnapshotCache::new(store.clone());

        cache.save(IDENTITY, Arc::new(mirror()));
        cache.flush().await;

        let songs = dir.path().join("htpc.local_8080").join("all").join("songs.json");
        assert!(songs.exists());
        assert_eq!(cache.load(IDENTITY).await.unwrap().segments().len(), 4);

        cache.clear(IDENTITY).await.unwrap();
        assert!(!songs.exists());
        assert!(cache.load(IDENTITY).await.is_none());
        // Clearing twice is fine.
        cache.clear(IDENTITY).await.unwrap();
    }

    #[test]
    fn path_components_are_sanitized() {
        let store = FileSnapshotStore::new("/cache");
        assert_eq!(
            store.path_for("../etc:1/all/songs"),
            PathBuf::from("/cache/__/etc_1/all/songs.json")
        );
    }
}
