//! WebSocket event stream with auto-reconnect.
//!
//! Connects to a media server's notification endpoint and republishes every
//! text frame as a [`RawEvent`] through a [`tokio::sync::broadcast`] channel.
//! Connection health is exposed as a [`StreamStatus`] on a `watch` channel,
//! changing once per transition rather than once per failed read. Handles
//! reconnection with exponential backoff + jitter automatically.
//!
//! # Example
//!
//! ```rust,ignore
//! use medialink_api::websocket::{EventStream, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let ws_url = Url::parse("ws://192.168.1.20:9090/jsonrpc")?;
//! let stream = EventStream::new(ws_url, ReconnectConfig::default());
//! let mut rx = stream.subscribe();
//! stream.start(&CancellationToken::new());
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{}", event.payload);
//! }
//!
//! stream.shutdown();
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::rpc::RawEvent;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── StreamStatus ─────────────────────────────────────────────────────

/// Health of the event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    /// First connection attempt in progress.
    Connecting,
    /// Handshake completed, frames are flowing.
    Up,
    /// Channel lost; the reconnect loop is backing off.
    Down { reason: String },
    /// Loop stopped (shutdown or retry limit reached).
    Closed,
}

impl StreamStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up)
    }

    fn same_variant(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Publish `next` only when it changes the variant, so repeated failed
/// reconnect attempts surface as a single `Down`.
fn transition(status_tx: &watch::Sender<StreamStatus>, next: StreamStatus) -> bool {
    status_tx.send_if_modified(|current| {
        if current.same_variant(&next) {
            false
        } else {
            *current = next;
            true
        }
    })
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay before attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self)
    }
}

// ── EventStream ──────────────────────────────────────────────────────

/// Handle to the event channel of one server.
///
/// Subscribers obtained before [`start`](Self::start) keep receiving across
/// reconnects and restarts; the broadcast sender outlives every connection.
pub struct EventStream {
    ws_url: Url,
    reconnect: ReconnectConfig,
    event_tx: broadcast::Sender<Arc<RawEvent>>,
    status_tx: watch::Sender<StreamStatus>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl EventStream {
    pub fn new(ws_url: Url, reconnect: ReconnectConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(StreamStatus::Connecting);
        Self {
            ws_url,
            reconnect,
            event_tx,
            status_tx,
            cancel: Mutex::new(None),
        }
    }

    /// Spawn the reconnection loop under a child of `parent`.
    ///
    /// Does nothing if the loop is already running.
    pub fn start(&self, parent: &CancellationToken) {
        let mut guard = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(|c| !c.is_cancelled()) {
            return;
        }

        let cancel = parent.child_token();
        *guard = Some(cancel.clone());
        drop(guard);

        self.status_tx.send_replace(StreamStatus::Connecting);

        let ws_url = self.ws_url.clone();
        let event_tx = self.event_tx.clone();
        let status_tx = self.status_tx.clone();
        let reconnect = self.reconnect.clone();
        tokio::spawn(async move {
            ws_loop(ws_url, event_tx, status_tx, reconnect, cancel).await;
        });
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// If a consumer falls behind, it receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RawEvent>> {
        self.event_tx.subscribe()
    }

    /// Observe connection status transitions.
    pub fn status(&self) -> watch::Receiver<StreamStatus> {
        self.status_tx.subscribe()
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        if let Some(cancel) = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            cancel.cancel();
        }
        transition(&self.status_tx, StreamStatus::Closed);
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on loss, backoff → reconnect.
async fn ws_loop(
    ws_url: Url,
    event_tx: broadcast::Sender<Arc<RawEvent>>,
    status_tx: watch::Sender<StreamStatus>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &event_tx, &status_tx, &cancel, &mut attempt) => result,
        };

        if cancel.is_cancelled() {
            break;
        }

        let reason = match result {
            Ok(()) => "connection closed by server".to_owned(),
            Err(e) => e.to_string(),
        };
        if transition(&status_tx, StreamStatus::Down { reason: reason.clone() }) {
            tracing::warn!(reason = %reason, "event stream lost");
        } else {
            tracing::debug!(reason = %reason, attempt, "event stream reconnect failed");
        }

        if let Some(max) = reconnect.max_retries {
            if attempt >= max {
                tracing::error!(
                    max_retries = max,
                    "event stream reconnection limit reached, giving up"
                );
                break;
            }
        }

        let delay = calculate_backoff(attempt, &reconnect);
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    transition(&status_tx, StreamStatus::Closed);
    tracing::debug!("event stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish a single WebSocket connection, read frames until it drops.
///
/// Resets `attempt` once the handshake succeeds.
async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<Arc<RawEvent>>,
    status_tx: &watch::Sender<StreamStatus>,
    cancel: &CancellationToken,
    attempt: &mut u32,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting event stream");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    *attempt = 0;
    transition(status_tx, StreamStatus::Up);
    tracing::info!("event stream connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        publish(text.as_str(), event_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("event stream ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return match frame {
                            Some(cf) => Err(Error::WebSocketClosed {
                                code: cf.code.into(),
                                reason: cf.reason.to_string(),
                            }),
                            None => Ok(()),
                        };
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("event stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

/// Hand a text frame to subscribers untouched.
fn publish(text: &str, event_tx: &broadcast::Sender<Arc<RawEvent>>) {
    tracing::trace!(payload = %text, "event frame");
    // Ignore send errors -- just means no active subscribers right now
    let _ = event_tx.send(Arc::new(RawEvent::new(text)));
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
#[allow(clippy::as_conversions, clippy::cast_possible_wrap)]
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.min(30) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
