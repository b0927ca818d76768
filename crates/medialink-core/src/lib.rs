//! Mirror synchronization engine between `medialink-api` and UI consumers.
//!
//! Keeps a local copy of a media server's library and player state in step
//! with the server:
//!
//! - **[`Engine`]**: explicit facade owning one session at a time.
//!   [`connect()`](Engine::connect) restores the on-disk snapshot, opens the
//!   transport, and spawns the ingestion, supervision, and persistence tasks.
//!   [`switch_endpoint()`](Engine::switch_endpoint) discards everything tied
//!   to the previous server.
//!
//! - **[`MirrorStore`]**: single-writer store of library collections and
//!   player state. Readers get `Arc` snapshots or subscribe through an
//!   [`EntityStream`]; every write is checked against the session generation.
//!
//! - **[`EventClassifier`]**: turns raw server notifications into typed
//!   [`Event`]s, tagging the ones this session caused itself.
//!
//! - **[`Coalescer`]**: per-target debounce/throttle state machines so a
//!   burst of notifications becomes a single outbound refresh.
//!
//! - **[`Reconciler`]**: optimistic play-state mutations, written back to the
//!   server in the background and reverted if the write fails.
//!
//! - **[`SnapshotCache`]**: versioned per-segment blobs behind a
//!   [`SnapshotStore`] for fast cold starts.

pub mod classify;
pub mod coalesce;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod methods;
pub mod model;
pub mod reconcile;
mod refresh;
pub mod snapshot;
pub mod store;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

// ── Primary re-exports ──────────────────────────────────────────────
pub use classify::EventClassifier;
pub use coalesce::{Coalescer, JobRunner, Policy, RefreshJob};
pub use dispatch::Action;
pub use config::{EngineConfig, Endpoint, RefreshPolicies};
pub use engine::{ConnectionState, Engine};
pub use error::CoreError;
pub use reconcile::{Mutation, MutationHandle, MutationOutcome, Reconciler};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotCache, SnapshotStore};
pub use store::{
    Collection, Entry, MirrorStore, Optimistic, PartialMirror, RefreshTarget, Segment,
    SegmentState, SegmentStates, StoreChange,
};
pub use stream::EntityStream;

// Transport types that appear in this crate's public API.
pub use medialink_api::websocket::ReconnectConfig;
pub use medialink_api::{Connector, JsonRpcConnector, TlsMode, Transport, TransportConfig};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ActivePlayer, Album, Artist, Episode, Event, EventKind, Library, LibraryItem, MediaKey,
    MediaScope, MediaTime, MediaType, Movie, MusicVideo, Origin, PlayState, PlayerKind,
    PlayerProperties, PlayerState, Playlist, PlaylistItem, ResumePoint, Song, TvShow,
};
