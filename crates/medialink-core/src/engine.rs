// ── Engine ──
//
// Owns one session at a time: the transport for the current endpoint, its
// coalescer and reconciler, and the background tasks that feed the mirror.
// Every session is stamped with a fresh generation so work left over from a
// previous endpoint can never land in the mirror.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use medialink_api::{Connector, RawEvent, StreamStatus, Transport};

use crate::classify::EventClassifier;
use crate::coalesce::{Coalescer, Policy};
use crate::config::{EngineConfig, Endpoint};
use crate::dispatch::{self, Action};
use crate::error::CoreError;
use crate::methods;
use crate::model::{Event, EventKind, MediaKey};
use crate::reconcile::{Mutation, MutationHandle, Reconciler};
use crate::refresh::RefreshRunner;
use crate::snapshot::{SnapshotCache, SnapshotStore};
use crate::store::{MirrorStore, RefreshTarget, Segment, StoreChange};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    /// No session, by request.
    Disconnected,
    Connecting,
    /// Events are flowing but no request has been answered yet.
    EventStreamUp,
    /// Requests answered and event stream open.
    Ready,
    /// Transport failure; reconnection is in progress.
    Offline,
}

// ── Session ──────────────────────────────────────────────────────────

struct Session {
    generation: u64,
    endpoint: Endpoint,
    session_id: String,
    transport: Arc<dyn Transport>,
    coalescer: Arc<Coalescer>,
    reconciler: Reconciler,
    cancel: CancellationToken,
}

impl Session {
    /// Refresh every segment the endpoint's scope covers.
    fn schedule_all(&self, policy: Policy) {
        for segment in Segment::all_in_scope(self.endpoint.scope) {
            self.coalescer.schedule(segment.into(), policy);
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// The entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`. The mirror outlives sessions:
/// it stays readable after [`disconnect()`](Self::disconnect) and is only
/// discarded when a new session starts.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    snapshots: Option<Arc<SnapshotCache>>,
    store: Arc<MirrorStore>,
    connection_state: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<Arc<Event>>,
    generation: AtomicU64,
    session: ArcSwapOption<Session>,
    /// Serializes connect/disconnect/switch.
    lifecycle: Mutex<()>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl EngineInner {
    fn set_state(&self, state: ConnectionState) -> bool {
        let changed = self.connection_state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(%state, "connection state changed");
        }
        changed
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Engine {
    /// Create an engine. Does NOT connect: call
    /// [`connect()`](Self::connect) with an endpoint.
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        snapshot_store: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Self {
            inner: Arc::new(EngineInner {
                config,
                connector,
                snapshots: snapshot_store.map(|s| Arc::new(SnapshotCache::new(s))),
                store: Arc::new(MirrorStore::new()),
                connection_state,
                event_tx,
                generation: AtomicU64::new(0),
                session: ArcSwapOption::empty(),
                lifecycle: Mutex::new(()),
                task_handles: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The local mirror.
    pub fn mirror(&self) -> &Arc<MirrorStore> {
        &self.inner.store
    }

    /// Endpoint of the current session, if any.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner.session.load().as_ref().map(|s| s.endpoint.clone())
    }

    /// Sender id stamped on this session's own notifications.
    pub fn session_id(&self) -> Option<String> {
        self.inner.session.load().as_ref().map(|s| s.session_id.clone())
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start a session against `endpoint`.
    ///
    /// Restores the endpoint's snapshot, opens the transport, and spawns
    /// the supervisor, ingestion, and persistence tasks. An unreachable
    /// server is not an error: the engine reports
    /// [`Offline`](ConnectionState::Offline) and keeps retrying. Only an
    /// endpoint that cannot be turned into a transport fails.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<(), CoreError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.teardown().await;
        self.start(endpoint).await
    }

    /// End the session. The mirror stays readable.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if let Some(session) = self.teardown().await {
            info!(identity = %session.endpoint.identity(), "disconnected");
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Tear down the current session, discard the mirror, and connect to
    /// `endpoint`.
    pub async fn switch_endpoint(&self, endpoint: Endpoint) -> Result<(), CoreError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if let Some(previous) = self.teardown().await {
            info!(
                from = %previous.endpoint.identity(),
                to = %endpoint.identity(),
                "switching endpoint"
            );
        }
        self.start(endpoint).await
    }

    async fn start(&self, endpoint: Endpoint) -> Result<(), CoreError> {
        let inner = &self.inner;
        let generation = inner.next_generation();
        inner.store.reset(generation, true);
        inner.set_state(ConnectionState::Connecting);

        let identity = endpoint.identity();
        if let Some(cache) = &inner.snapshots {
            if let Some(mirror) = cache.load(&identity).await {
                match inner.store.restore(generation, mirror) {
                    Ok(segments) => info!(%identity, restored = segments.len(), "mirror restored from snapshot"),
                    Err(e) => debug!(error = %e, "snapshot restore skipped"),
                }
            }
        }

        let transport = match inner.connector.connect(&endpoint.to_address()) {
            Ok(transport) => transport,
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        let cancel = inner.cancel.child_token();
        let session_id = format!("medialink-{}", Uuid::new_v4().simple());
        let runner = Arc::new(RefreshRunner::new(
            Arc::clone(&transport),
            Arc::clone(&inner.store),
            inner.config.request_timeout,
            inner.config.page_size,
        ));
        let coalescer = Arc::new(Coalescer::new(generation, runner, cancel.child_token()));
        let reconciler = Reconciler::new(
            Arc::clone(&inner.store),
            Arc::clone(&transport),
            Arc::clone(&coalescer),
            session_id.clone(),
            inner.config.request_timeout,
            inner.config.policies.point,
            cancel.child_token(),
        );

        // Subscribe before opening so no early frame or transition is missed.
        let events = transport.events();
        let status = transport.stream_status();
        if let Err(e) = transport.open().await {
            warn!(error = %e, "event stream did not open");
        }

        let session = Arc::new(Session {
            generation,
            endpoint,
            session_id,
            transport,
            coalescer,
            reconciler,
            cancel,
        });

        let mut handles = Vec::with_capacity(3);
        handles.push(tokio::spawn(supervise(
            Arc::clone(inner),
            Arc::clone(&session),
            status,
        )));
        handles.push(tokio::spawn(ingest(
            Arc::clone(inner),
            Arc::clone(&session),
            events,
        )));
        if let Some(cache) = &inner.snapshots {
            handles.push(tokio::spawn(persist(
                Arc::clone(inner),
                Arc::clone(&session),
                Arc::clone(cache),
            )));
        }
        *inner.task_handles.lock().await = handles;

        info!(%identity, generation, session_id = %session.session_id, "session started");
        inner.session.store(Some(session));
        Ok(())
    }

    /// Cancel the current session, wait for its tasks, and write its
    /// mirror to the snapshot cache. Bumps the generation so results still
    /// in flight are rejected.
    async fn teardown(&self) -> Option<Arc<Session>> {
        let session = self.inner.session.swap(None)?;
        session.cancel.cancel();
        let generation = self.inner.next_generation();
        self.inner.store.reset(generation, false);

        session.transport.close().await;
        let handles = std::mem::take(&mut *self.inner.task_handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(cache) = &self.inner.snapshots {
            cache.save(
                &session.endpoint.identity(),
                Arc::new(self.inner.store.export()),
            );
            cache.flush().await;
        }
        debug!(generation = session.generation, "session torn down");
        Some(session)
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.connection_state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Subscribe to classified server events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Arc<Event>> {
        self.inner.event_tx.subscribe()
    }

    /// Wait until the engine is [`Ready`](ConnectionState::Ready).
    pub async fn ready(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut rx = self.subscribe_state();
        let wait = rx.wait_for(|state| *state == ConnectionState::Ready);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(CoreError::NotConnected),
            Err(_) => Err(CoreError::Transport {
                message: format!("server not ready after {timeout:?}"),
                transient: true,
            }),
        }
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Apply `mutation` optimistically and write it back in the background.
    pub fn mutate(&self, key: MediaKey, mutation: &Mutation) -> Result<MutationHandle, CoreError> {
        let session = self.inner.session.load_full().ok_or(CoreError::NotConnected)?;
        session.reconciler.mutate(key, mutation)
    }

    /// Refresh `target` right away, bypassing its usual coalescing delay.
    pub fn refresh(&self, target: RefreshTarget) -> Result<(), CoreError> {
        let session = self.inner.session.load_full().ok_or(CoreError::NotConnected)?;
        session.coalescer.schedule(target, Policy::IMMEDIATE);
        Ok(())
    }

    /// Refresh every segment in the session's scope.
    pub fn refresh_all(&self) -> Result<(), CoreError> {
        let session = self.inner.session.load_full().ok_or(CoreError::NotConnected)?;
        session.schedule_all(Policy::IMMEDIATE);
        Ok(())
    }

    // ── One-shot convenience ─────────────────────────────────────────

    /// Connect, wait for `Ready`, run `f`, disconnect.
    pub async fn oneshot<F, Fut, T>(
        &self,
        endpoint: Endpoint,
        ready_timeout: Duration,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(Engine) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        self.connect(endpoint).await?;
        let result = match self.ready(ready_timeout).await {
            Ok(()) => f(self.clone()).await,
            Err(e) => Err(e),
        };
        self.disconnect().await;
        result
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Derive the connection state from stream status and probe results.
fn derive_state(stream: &StreamStatus, request_ok: bool, probe_failed: bool) -> ConnectionState {
    match stream {
        StreamStatus::Up if request_ok => ConnectionState::Ready,
        StreamStatus::Up => ConnectionState::EventStreamUp,
        StreamStatus::Connecting if !probe_failed => ConnectionState::Connecting,
        StreamStatus::Connecting | StreamStatus::Down { .. } | StreamStatus::Closed => {
            ConnectionState::Offline
        }
    }
}

/// Probe the request channel and track stream status. Entering `Ready`
/// schedules a refresh of every in-scope segment.
async fn supervise(
    inner: Arc<EngineInner>,
    session: Arc<Session>,
    mut status: watch::Receiver<StreamStatus>,
) {
    let backoff = inner.config.probe_backoff.clone();
    let timeout = inner.config.request_timeout;
    let mut request_ok = false;
    let mut probe_failed = false;
    let mut attempt = 0_u32;
    let mut probe_at = Some(Instant::now());

    loop {
        let stream = status.borrow_and_update().clone();
        if !request_ok && probe_at.is_none() {
            probe_at = Some(Instant::now() + backoff.delay_for(attempt));
        }

        let state = derive_state(&stream, request_ok, probe_failed);
        if inner.set_state(state) && state == ConnectionState::Ready {
            session.schedule_all(Policy::IMMEDIATE);
        }

        tokio::select! {
            biased;
            () = session.cancel.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    debug!("transport dropped its status channel");
                    break;
                }
                let up = status.borrow().is_up();
                if up && !request_ok {
                    attempt = 0;
                    probe_at = Some(Instant::now());
                } else if !up && request_ok {
                    // Losing the stream usually means losing the server.
                    request_ok = false;
                }
            }
            () = tokio::time::sleep_until(probe_at.unwrap_or_else(Instant::now)), if probe_at.is_some() && !request_ok => {
                let ping = session.transport.call(methods::PING, serde_json::Value::Null, timeout);
                let result = tokio::select! {
                    () = session.cancel.cancelled() => break,
                    result = ping => result,
                };
                probe_at = None;
                match result {
                    Ok(_) => {
                        debug!("request channel confirmed");
                        request_ok = true;
                        probe_failed = false;
                        attempt = 0;
                    }
                    Err(e) => {
                        if probe_failed {
                            debug!(error = %e, attempt, "probe failed");
                        } else {
                            warn!(error = %e, "server not answering requests");
                        }
                        probe_failed = true;
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        }
    }

    trace!(generation = session.generation, "supervisor exiting");
}

/// Classify every raw notification, act on it, and re-broadcast it.
async fn ingest(
    inner: Arc<EngineInner>,
    session: Arc<Session>,
    mut events: broadcast::Receiver<Arc<RawEvent>>,
) {
    let classifier = EventClassifier::new(session.session_id.clone());
    let scope = session.endpoint.scope;
    let policies = inner.config.policies;

    loop {
        tokio::select! {
            biased;
            () = session.cancel.cancelled() => break,
            result = events.recv() => match result {
                Ok(raw) => {
                    let event = classifier.classify(&raw);
                    if event.kind == EventKind::Unknown {
                        debug!(method = %event.method, "unhandled notification");
                    } else {
                        trace!(kind = %event.kind, method = %event.method, origin = %event.origin, "notification");
                    }

                    for action in dispatch::plan(&event, scope, &policies) {
                        match action {
                            Action::Schedule(target, policy) => session.coalescer.schedule(target, policy),
                            Action::Remove(key) => {
                                if let Err(e) = inner.store.remove_item(session.generation, &key) {
                                    debug!(%key, error = %e, "removal discarded");
                                }
                            }
                        }
                    }
                    let _ = inner.event_tx.send(Arc::new(event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event ingestion lagged, refreshing everything");
                    session.schedule_all(policies.collection);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    trace!(generation = session.generation, "ingestion exiting");
}

/// Persist the confirmed mirror once changes have settled.
async fn persist(inner: Arc<EngineInner>, session: Arc<Session>, cache: Arc<SnapshotCache>) {
    let mut changes = inner.store.changes();
    let identity = session.endpoint.identity();
    let debounce = inner.config.snapshot_debounce;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            () = session.cancel.cancelled() => break,
            change = changes.recv() => match change {
                Ok(StoreChange::Reset) => {}
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    deadline = Some(Instant::now() + debounce);
                }
                Err(RecvError::Closed) => break,
            },
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                cache.save(&identity, Arc::new(inner.store.export()));
            }
        }
    }
}
