// ── Event classification ──
//
// Maps raw JSON-RPC notification frames to typed `Event`s. Pure and
// infallible: anything that does not parse becomes `EventKind::Unknown`.

use serde_json::Value;

use medialink_api::RawEvent;

use crate::model::{Event, EventKind, Library, Origin};

/// Classifies notifications for one session.
///
/// The session id is the `sender` this session stamps on its own
/// `JSONRPC.NotifyAll` echoes; frames carrying it are tagged
/// [`Origin::SelfOrigin`].
#[derive(Debug, Clone)]
pub struct EventClassifier {
    session_id: String,
}

impl EventClassifier {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn classify(&self, raw: &RawEvent) -> Event {
        let mut event = Event {
            kind: EventKind::Unknown,
            method: String::new(),
            sender: None,
            entity_type: None,
            entity_id: None,
            player_id: None,
            playlist_id: None,
            library: None,
            origin: Origin::Other,
            received_at: raw.received_at,
        };

        let Ok(frame) = serde_json::from_str::<Value>(&raw.payload) else {
            tracing::debug!(payload = %raw.payload, "unparseable notification");
            return event;
        };
        let Some(method) = frame.get("method").and_then(Value::as_str) else {
            return event;
        };
        event.method = method.to_owned();

        let params = frame.get("params").unwrap_or(&Value::Null);
        event.sender = params
            .get("sender")
            .and_then(Value::as_str)
            .map(str::to_owned);
        if event.sender.as_deref() == Some(self.session_id.as_str()) {
            event.origin = Origin::SelfOrigin;
        }

        let data = params.get("data").unwrap_or(&Value::Null);
        let (namespace, name) = method.split_once('.').unwrap_or((method, ""));
        event.library = Library::from_namespace(namespace);
        event.kind = kind_of(namespace, name, data);

        // Entity reference lives either under `data.item` or directly in `data`.
        let entity = data.get("item").filter(|v| v.is_object()).unwrap_or(data);
        event.entity_type = entity
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned);
        event.entity_id = entity.get("id").and_then(Value::as_u64);

        event.player_id = data
            .get("player")
            .and_then(|p| p.get("playerid"))
            .and_then(Value::as_i64);
        event.playlist_id = data.get("playlistid").and_then(Value::as_i64);

        if namespace == "Playlist" {
            event.entity_type = Some("playlist".to_owned());
            event.entity_id = event.playlist_id.and_then(|id| u64::try_from(id).ok());
        }

        event
    }
}

fn kind_of(namespace: &str, name: &str, data: &Value) -> EventKind {
    match (namespace, name) {
        (_, "OnScanFinished" | "OnCleanFinished" | "OnExport") => EventKind::LibraryChanged,
        (ns, "OnUpdate") if ns.ends_with("Library") => {
            if data.get("added").and_then(Value::as_bool).unwrap_or(false) {
                EventKind::ItemAdded
            } else {
                EventKind::PropertyChanged
            }
        }
        (ns, "OnRemove") if ns.ends_with("Library") => EventKind::ItemRemoved,
        ("Playlist", "OnAdd") => EventKind::ItemAdded,
        ("Playlist", "OnRemove" | "OnClear") => EventKind::ItemRemoved,
        ("Player", "OnPlay" | "OnResume" | "OnAVStart") => EventKind::PlayerStarted,
        ("Player", "OnStop" | "OnPause") => EventKind::PlayerStopped,
        ("Player", "OnPropertyChanged" | "OnSeek" | "OnSpeedChanged") | ("Other", _) => {
            EventKind::PropertyChanged
        }
        _ => EventKind::Unknown,
    }
}
