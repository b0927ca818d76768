// ── Optimistic mutations ──
//
// A mutation is committed to the mirror before `mutate` returns; the
// write-back runs in a background task. Writes for one entity are serialized
// by a per-key lock, and a write whose prediction was already superseded by
// a newer one is never sent: the newer write carries absolute values.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use dashmap::DashMap;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use medialink_api::Transport;

use crate::coalesce::{Coalescer, Policy};
use crate::error::CoreError;
use crate::methods;
use crate::model::{MediaKey, PlayState, ResumePoint};
use crate::store::{MirrorStore, Optimistic, RefreshTarget};

const LAST_PLAYED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

type CustomMutation = Arc<dyn Fn(&mut PlayState) + Send + Sync>;

/// A change to an entity's play state.
#[derive(Clone)]
pub enum Mutation {
    /// Bump the play count, stamp `lastplayed`, drop the resume point.
    MarkPlayed,
    /// Zero the play count and clear `lastplayed` and the resume point.
    MarkUnplayed,
    TogglePlayed,
    /// User rating, clamped to 0..=10.
    SetRating(u8),
    SetResume { position: f64, total: f64 },
    ClearResume,
    Custom(CustomMutation),
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkPlayed => f.write_str("MarkPlayed"),
            Self::MarkUnplayed => f.write_str("MarkUnplayed"),
            Self::TogglePlayed => f.write_str("TogglePlayed"),
            Self::SetRating(rating) => f.debug_tuple("SetRating").field(rating).finish(),
            Self::SetResume { position, total } => f
                .debug_struct("SetResume")
                .field("position", position)
                .field("total", total)
                .finish(),
            Self::ClearResume => f.write_str("ClearResume"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Mutation {
    pub fn custom(f: impl Fn(&mut PlayState) + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Apply to `state` as of `now` (server local time).
    pub fn apply(&self, state: &mut PlayState, now: NaiveDateTime) {
        match self {
            Self::MarkPlayed => {
                state.playcount = state.playcount.saturating_add(1);
                state.last_played = now.format(LAST_PLAYED_FORMAT).to_string();
                rewind(state);
            }
            Self::MarkUnplayed => {
                state.playcount = 0;
                state.last_played.clear();
                rewind(state);
            }
            Self::TogglePlayed => {
                if state.is_watched() {
                    Self::MarkUnplayed.apply(state, now);
                } else {
                    Self::MarkPlayed.apply(state, now);
                }
            }
            Self::SetRating(rating) => state.user_rating = (*rating).min(10),
            Self::SetResume { position, total } => {
                state.resume = Some(ResumePoint {
                    position: position.max(0.0),
                    total: total.max(0.0),
                });
            }
            Self::ClearResume => {
                state.resume = Some(ResumePoint {
                    position: 0.0,
                    total: state.resume.map_or(0.0, |r| r.total),
                });
            }
            Self::Custom(f) => f(state),
        }
    }
}

fn rewind(state: &mut PlayState) {
    if let Some(resume) = state.resume.as_mut() {
        resume.position = 0.0;
    }
}

/// How a write-back ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MutationOutcome {
    /// The server accepted the values; a point refresh will confirm them.
    Applied,
    /// The server rejected the write and the prediction was rolled back.
    Reverted,
    /// A newer mutation of the same entity took over.
    Superseded,
    /// The session ended before the write settled.
    Abandoned,
}

/// Returned by [`Reconciler::mutate`] once the prediction is visible.
#[derive(Debug)]
pub struct MutationHandle {
    key: MediaKey,
    revision: u64,
    outcome: oneshot::Receiver<MutationOutcome>,
}

impl MutationHandle {
    pub fn key(&self) -> MediaKey {
        self.key
    }

    /// Store revision of the optimistic value.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Wait for the write-back to finish.
    pub async fn settled(self) -> MutationOutcome {
        self.outcome.await.unwrap_or(MutationOutcome::Abandoned)
    }
}

struct Shared {
    store: Arc<MirrorStore>,
    transport: Arc<dyn Transport>,
    coalescer: Arc<Coalescer>,
    session_id: String,
    timeout: Duration,
    point_policy: Policy,
    cancel: CancellationToken,
    locks: DashMap<MediaKey, Arc<Mutex<()>>>,
    /// Newest optimistic revision per entity, kept for the whole session.
    latest: DashMap<MediaKey, u64>,
    in_flight: AtomicUsize,
}

/// Applies optimistic mutations for one session.
pub struct Reconciler {
    shared: Arc<Shared>,
}

impl Reconciler {
    pub fn new(
        store: Arc<MirrorStore>,
        transport: Arc<dyn Transport>,
        coalescer: Arc<Coalescer>,
        session_id: impl Into<String>,
        timeout: Duration,
        point_policy: Policy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                transport,
                coalescer,
                session_id: session_id.into(),
                timeout,
                point_policy,
                cancel,
                locks: DashMap::new(),
                latest: DashMap::new(),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Commit `mutation` to the mirror and start writing it back.
    ///
    /// The prediction is readable as soon as this returns.
    pub fn mutate(&self, key: MediaKey, mutation: &Mutation) -> Result<MutationHandle, CoreError> {
        let shared = &self.shared;
        let setter = methods::setter(key.media_type).ok_or(CoreError::NotMutable { key })?;
        if shared.cancel.is_cancelled() {
            return Err(CoreError::NotConnected);
        }

        let now = Local::now().naive_local();
        let optimistic =
            shared
                .store
                .apply_optimistic(shared.coalescer.generation(), &key, |item| {
                    let state = item.play_state_mut().ok_or(CoreError::NotMutable { key })?;
                    mutation.apply(state, now);
                    Ok(())
                })?;
        shared.latest.insert(key, optimistic.revision);
        shared.in_flight.fetch_add(1, Ordering::Relaxed);
        debug!(%key, ?mutation, revision = optimistic.revision, "optimistic mutation applied");

        let (tx, rx) = oneshot::channel();
        let revision = optimistic.revision;
        tokio::spawn(Arc::clone(shared).write_back(key, setter, optimistic, tx));

        Ok(MutationHandle {
            key,
            revision,
            outcome: rx,
        })
    }

    /// Mutations whose write-back has not settled yet.
    pub fn pending(&self) -> usize {
        self.shared.in_flight.load(Ordering::Relaxed)
    }
}

impl Shared {
    async fn write_back(
        self: Arc<Self>,
        key: MediaKey,
        setter: &'static str,
        optimistic: Optimistic,
        tx: oneshot::Sender<MutationOutcome>,
    ) {
        let revision = optimistic.revision;
        let lock = Arc::clone(&self.locks.entry(key).or_default());
        let guard = lock.lock().await;

        let outcome = if self.is_superseded(&key, revision) {
            debug!(%key, revision, "skipping superseded write-back");
            MutationOutcome::Superseded
        } else {
            self.send(key, setter, &optimistic).await
        };

        drop(guard);
        drop(lock);
        self.locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        let _ = tx.send(outcome);
    }

    fn is_superseded(&self, key: &MediaKey, revision: u64) -> bool {
        self.latest.get(key).is_some_and(|latest| *latest > revision)
    }

    async fn send(&self, key: MediaKey, setter: &str, optimistic: &Optimistic) -> MutationOutcome {
        let item = &optimistic.predicted;
        let Some(state) = item.play_state() else {
            return MutationOutcome::Abandoned;
        };
        let params = methods::setter_params(item, state);

        let result = tokio::select! {
            () = self.cancel.cancelled() => return MutationOutcome::Abandoned,
            result = self.transport.call(setter, params, self.timeout) => result,
        };

        match result {
            Ok(_) => {
                let echo = methods::mutation_echo(&self.session_id, item);
                if let Err(e) = self.transport.notify(methods::NOTIFY_ALL, echo).await {
                    debug!(%key, error = %e, "mutation echo not delivered");
                }
                self.coalescer
                    .schedule(RefreshTarget::Item(key), self.point_policy);
                info!(%key, "write-back applied");
                MutationOutcome::Applied
            }
            Err(e) => {
                let err = CoreError::from(e);
                warn!(%key, error = %err, "write-back failed");
                // The server may have applied it before the deadline hit.
                if err.is_transient() {
                    self.coalescer
                        .schedule(RefreshTarget::Item(key), self.point_policy);
                }
                self.revert(key, optimistic.revision)
            }
        }
    }

    fn revert(&self, key: MediaKey, revision: u64) -> MutationOutcome {
        match self
            .store
            .revert_optimistic(self.coalescer.generation(), &key, revision)
        {
            Ok(_) => MutationOutcome::Reverted,
            Err(CoreError::ReconciliationConflict { actual, .. }) => {
                debug!(%key, revision, actual, "prediction already superseded, not reverting");
                MutationOutcome::Superseded
            }
            Err(e) => {
                debug!(%key, error = %e, "revert skipped");
                MutationOutcome::Abandoned
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{LibraryItem, MediaType};
    use crate::refresh::RefreshRunner;
    use crate::test_support::{FakeTransport, song_json};
    use serde_json::json;

    const SETTER: &str = "AudioLibrary.SetSongDetails";

    struct Fixture {
        transport: Arc<FakeTransport>,
        store: Arc<MirrorStore>,
        reconciler: Reconciler,
    }

    fn fixture(transport: FakeTransport) -> Fixture {
        let transport = Arc::new(transport);
        let store = Arc::new(MirrorStore::new());
        store.reset(1, true);
        store
            .commit_collection(
                1,
                MediaType::Song,
                vec![LibraryItem::from_value(MediaType::Song, song_json(1, 0)).unwrap()],
            )
            .unwrap();

        let cancel = CancellationToken::new();
        let runner = Arc::new(RefreshRunner::new(
            transport.clone(),
            Arc::clone(&store),
            Duration::from_secs(5),
            500,
        ));
        let coalescer = Arc::new(Coalescer::new(1, runner, cancel.child_token()));
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            transport.clone(),
            coalescer,
            "medialink-test",
            Duration::from_secs(5),
            Policy::IMMEDIATE,
            cancel,
        );
        Fixture {
            transport,
            store,
            reconciler,
        }
    }

    fn song() -> MediaKey {
        MediaKey::new(MediaType::Song, 1)
    }

    fn playcount(store: &MirrorStore) -> u32 {
        store.item(&song()).unwrap().play_state().unwrap().playcount
    }

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-03-01 20:15:00", LAST_PLAYED_FORMAT).unwrap()
    }

    #[test]
    fn mark_played_and_unplayed() {
        let mut state = PlayState {
            resume: Some(ResumePoint {
                position: 300.0,
                total: 5400.0,
            }),
            ..PlayState::default()
        };
        Mutation::MarkPlayed.apply(&mut state, now());
        assert_eq!(state.playcount, 1);
        assert_eq!(state.last_played, "2026-03-01 20:15:00");
        assert_eq!(state.resume.unwrap().position, 0.0);
        assert_eq!(state.resume.unwrap().total, 5400.0);

        Mutation::TogglePlayed.apply(&mut state, now());
        assert_eq!(state.playcount, 0);
        assert!(state.last_played.is_empty());
    }

    #[test]
    fn rating_is_clamped_and_custom_runs() {
        let mut state = PlayState::default();
        Mutation::SetRating(42).apply(&mut state, now());
        assert_eq!(state.user_rating, 10);

        Mutation::custom(|s| s.playcount = 7).apply(&mut state, now());
        assert_eq!(state.playcount, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_back_reverts_prediction() {
        let transport = FakeTransport::new();
        transport.fail_with(SETTER, || medialink_api::Error::Rpc {
            method: SETTER.into(),
            code: -32100,
            message: "Failed to execute method.".into(),
        });
        let f = fixture(transport);

        let handle = f.reconciler.mutate(song(), &Mutation::MarkPlayed).unwrap();
        assert_eq!(playcount(&f.store), 1);

        assert_eq!(handle.settled().await, MutationOutcome::Reverted);
        assert_eq!(playcount(&f.store), 0);
        assert!(!f.store.entry(&song()).unwrap().is_pending());
        assert_eq!(f.reconciler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn applied_write_back_echoes_and_confirms() {
        let transport = FakeTransport::new();
        transport.respond(SETTER, json!("OK"));
        transport.respond(
            "AudioLibrary.GetSongDetails",
            json!({ "songdetails": song_json(1, 3) }),
        );
        let f = fixture(transport);

        let handle = f.reconciler.mutate(song(), &Mutation::MarkPlayed).unwrap();
        assert_eq!(handle.settled().await, MutationOutcome::Applied);

        let sent = f.transport.calls_to(SETTER);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["songid"], json!(1));
        assert_eq!(sent[0]["playcount"], json!(1));

        let notifications = f.transport.notifications();
        assert_eq!(notifications[0].0, methods::NOTIFY_ALL);
        assert_eq!(notifications[0].1["sender"], json!("medialink-test"));

        // The point refresh replaces the prediction with the server's value.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(playcount(&f.store), 3);
        assert!(!f.store.entry(&song()).unwrap().is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_write_is_never_sent() {
        let transport = FakeTransport::new();
        transport.fail_with(SETTER, || medialink_api::Error::Rpc {
            method: SETTER.into(),
            code: -32100,
            message: "Failed to execute method.".into(),
        });
        let f = fixture(transport);

        let first = f.reconciler.mutate(song(), &Mutation::MarkPlayed).unwrap();
        let second = f.reconciler.mutate(song(), &Mutation::SetRating(7)).unwrap();
        assert!(second.revision() > first.revision());

        assert_eq!(first.settled().await, MutationOutcome::Superseded);
        assert_eq!(second.settled().await, MutationOutcome::Reverted);
        assert_eq!(f.transport.call_count(SETTER), 1);

        // Reverting the newest prediction restores the confirmed base.
        let item = f.store.item(&song()).unwrap();
        assert_eq!(item.play_state().unwrap().playcount, 0);
        assert_eq!(item.play_state().unwrap().user_rating, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn double_toggle_settles_on_server_value() {
        let transport = FakeTransport::new();
        transport.respond(SETTER, json!("OK"));
        transport.respond(
            "AudioLibrary.GetSongDetails",
            json!({ "songdetails": song_json(1, 4) }),
        );
        let f = fixture(transport);

        let first = f.reconciler.mutate(song(), &Mutation::TogglePlayed).unwrap();
        assert_eq!(playcount(&f.store), 1);
        let second = f.reconciler.mutate(song(), &Mutation::TogglePlayed).unwrap();
        assert_eq!(playcount(&f.store), 0);

        assert_eq!(first.settled().await, MutationOutcome::Superseded);
        assert_eq!(second.settled().await, MutationOutcome::Applied);

        // Only the newest absolute value goes out.
        let sent = f.transport.calls_to(SETTER);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["playcount"], json!(0));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(playcount(&f.store), 4);
        assert!(!f.store.entry(&song()).unwrap().is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn undelivered_echo_keeps_applied_write() {
        let transport = FakeTransport::new();
        transport.respond(SETTER, json!("OK"));
        transport.fail_notifications();
        transport.respond(
            "AudioLibrary.GetSongDetails",
            json!({ "songdetails": song_json(1, 1) }),
        );
        let f = fixture(transport);

        let handle = f.reconciler.mutate(song(), &Mutation::MarkPlayed).unwrap();
        assert_eq!(handle.settled().await, MutationOutcome::Applied);
        assert_eq!(f.transport.notifications().len(), 1);
        assert_eq!(playcount(&f.store), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.transport.call_count("AudioLibrary.GetSongDetails"), 1);
        assert_eq!(playcount(&f.store), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reverts_and_schedules_point_refresh() {
        let transport = FakeTransport::new();
        transport.fail_with(SETTER, || medialink_api::Error::Timeout {
            method: SETTER.into(),
            timeout_ms: 5000,
        });
        transport.respond(
            "AudioLibrary.GetSongDetails",
            json!({ "songdetails": song_json(1, 1) }),
        );
        let f = fixture(transport);

        let handle = f.reconciler.mutate(song(), &Mutation::MarkPlayed).unwrap();
        assert_eq!(handle.settled().await, MutationOutcome::Reverted);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.transport.call_count("AudioLibrary.GetSongDetails"), 1);
        assert_eq!(playcount(&f.store), 1);
    }

    #[tokio::test]
    async fn artists_and_missing_items_are_refused() {
        let f = fixture(FakeTransport::new());

        let err = f
            .reconciler
            .mutate(MediaKey::new(MediaType::Artist, 1), &Mutation::MarkPlayed)
            .unwrap_err();
        assert!(matches!(err, CoreError::NotMutable { .. }));

        let err = f
            .reconciler
            .mutate(MediaKey::new(MediaType::Song, 99), &Mutation::MarkPlayed)
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }
}
