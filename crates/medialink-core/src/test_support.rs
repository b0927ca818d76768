// ── In-process fakes for engine tests ──
//
// `FakeTransport` answers calls from registered handlers and lets tests push
// notification frames and stream status transitions by hand.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};

use medialink_api::error::RPC_METHOD_NOT_FOUND;
use medialink_api::{Connector, Error, RawEvent, ServerAddress, StreamStatus, Transport};

type Handler = Arc<dyn Fn(&Value) -> Result<Value, Error> + Send + Sync>;

pub(crate) struct FakeTransport {
    handlers: Mutex<HashMap<String, Handler>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, Value)>>,
    notifications: Mutex<Vec<(String, Value)>>,
    notify_fails: Mutex<bool>,
    status_on_open: Mutex<StreamStatus>,
    event_tx: broadcast::Sender<Arc<RawEvent>>,
    status_tx: watch::Sender<StreamStatus>,
    closed: Mutex<bool>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (status_tx, _) = watch::channel(StreamStatus::Connecting);
        let fake = Self {
            handlers: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            notify_fails: Mutex::new(false),
            status_on_open: Mutex::new(StreamStatus::Up),
            event_tx,
            status_tx,
            closed: Mutex::new(false),
        };
        fake.respond("JSONRPC.Ping", json!("pong"));
        fake
    }

    /// A server that answers pings and lists empty libraries.
    pub(crate) fn healthy() -> Self {
        let fake = Self::new();
        for (method, member) in [
            ("VideoLibrary.GetMovies", "movies"),
            ("VideoLibrary.GetTVShows", "tvshows"),
            ("VideoLibrary.GetEpisodes", "episodes"),
            ("VideoLibrary.GetMusicVideos", "musicvideos"),
            ("AudioLibrary.GetArtists", "artists"),
            ("AudioLibrary.GetAlbums", "albums"),
            ("AudioLibrary.GetSongs", "songs"),
        ] {
            fake.respond(method, json!({ member: [], "limits": { "start": 0, "end": 0, "total": 0 } }));
        }
        fake.respond("Player.GetActivePlayers", json!([]));
        fake.respond("Playlist.GetItems", json!({ "items": [] }));
        fake
    }

    pub(crate) fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_owned(), Arc::new(handler));
    }

    pub(crate) fn respond(&self, method: &str, result: Value) {
        self.on(method, move |_| Ok(result.clone()));
    }

    pub(crate) fn fail_with<F>(&self, method: &str, error: F)
    where
        F: Fn() -> Error + Send + Sync + 'static,
    {
        self.on(method, move |_| Err(error()));
    }

    /// Every `notify` is recorded, then times out.
    pub(crate) fn fail_notifications(&self) {
        *self.notify_fails.lock().unwrap() = true;
    }

    pub(crate) fn delay(&self, method: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(method.to_owned(), delay);
    }

    /// Status published when the engine opens the transport.
    pub(crate) fn open_with(&self, status: StreamStatus) {
        *self.status_on_open.lock().unwrap() = status;
    }

    pub(crate) fn set_status(&self, status: StreamStatus) {
        self.status_tx.send_replace(status);
    }

    pub(crate) fn emit(&self, frame: &Value) {
        let _ = self.event_tx.send(Arc::new(RawEvent::new(frame.to_string())));
    }

    pub(crate) fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub(crate) fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub(crate) fn notifications(&self) -> Vec<(String, Value)> {
        self.notifications.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self) -> Result<(), Error> {
        let status = self.status_on_open.lock().unwrap().clone();
        self.status_tx.send_replace(status);
        Ok(())
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.status_tx.send_replace(StreamStatus::Closed);
    }

    async fn call(&self, method: &str, params: Value, _timeout: Duration) -> Result<Value, Error> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_owned(), params.clone()));

        let delay = self.delays.lock().unwrap().get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let handler = self.handlers.lock().unwrap().get(method).cloned();
        match handler {
            Some(handler) => handler(&params),
            None => Err(Error::Rpc {
                method: method.to_owned(),
                code: RPC_METHOD_NOT_FOUND,
                message: "Method not found.".into(),
            }),
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), Error> {
        self.notifications
            .lock()
            .unwrap()
            .push((method.to_owned(), params));
        if *self.notify_fails.lock().unwrap() {
            return Err(Error::Timeout {
                method: method.to_owned(),
                timeout_ms: 5000,
            });
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<Arc<RawEvent>> {
        self.event_tx.subscribe()
    }

    fn stream_status(&self) -> watch::Receiver<StreamStatus> {
        self.status_tx.subscribe()
    }
}

/// Hands out prepared transports in order, then fresh healthy ones.
#[derive(Default)]
pub(crate) struct FakeConnector {
    queue: Mutex<VecDeque<Arc<FakeTransport>>>,
    addresses: Mutex<Vec<ServerAddress>>,
}

impl FakeConnector {
    pub(crate) fn with(transports: impl IntoIterator<Item = Arc<FakeTransport>>) -> Self {
        Self {
            queue: Mutex::new(transports.into_iter().collect()),
            addresses: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn hosts(&self) -> Vec<String> {
        self.addresses
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.host.clone())
            .collect()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, address: &ServerAddress) -> Result<Arc<dyn Transport>, Error> {
        address.rpc_url()?;
        self.addresses.lock().unwrap().push(address.clone());
        let transport = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Arc::new(FakeTransport::healthy()));
        Ok(transport)
    }
}

pub(crate) fn song_json(id: u64, playcount: u32) -> Value {
    json!({
        "songid": id,
        "label": format!("Song {id}"),
        "title": format!("Song {id}"),
        "artist": ["Artist"],
        "playcount": playcount,
        "lastplayed": "",
        "userrating": 0
    })
}

pub(crate) fn notification(method: &str, sender: &str, data: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": { "sender": sender, "data": data }
    })
}
