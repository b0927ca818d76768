// ── Event dispatch ──
//
// Decides what a classified event means for the mirror. Pure: the engine's
// ingestion task executes the returned actions in order.

use crate::coalesce::Policy;
use crate::config::RefreshPolicies;
use crate::model::{Event, EventKind, MediaKey, MediaScope};
use crate::store::{RefreshTarget, Segment};

/// One step the ingestion task performs for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Schedule(RefreshTarget, Policy),
    /// Drop the entity from the mirror right away.
    Remove(MediaKey),
}

/// Actions for `event`, restricted to segments inside `scope`.
pub fn plan(event: &Event, scope: MediaScope, policies: &RefreshPolicies) -> Vec<Action> {
    let mut actions = Vec::new();

    // Echoes of our own write-backs only confirm the one entity.
    if event.is_self_originated() {
        if let Some(key) = event.media_key() {
            actions.push(Action::Schedule(key.into(), policies.point));
        }
        return retain_in_scope(actions, scope);
    }

    match event.kind {
        EventKind::LibraryChanged => {
            let segments: Vec<Segment> = match event.library {
                Some(library) => Segment::collections_of(library).collect(),
                None => Segment::all_in_scope(scope)
                    .filter(|s| s.is_collection())
                    .collect(),
            };
            for segment in segments {
                actions.push(Action::Schedule(segment.into(), policies.collection));
            }
        }
        EventKind::ItemAdded => {
            if let Some(segment) = playlist_segment(event) {
                actions.push(Action::Schedule(segment.into(), policies.playlist));
            } else if let Some(key) = event.media_key() {
                let segment = Segment::for_media_type(key.media_type);
                actions.push(Action::Schedule(segment.into(), policies.collection));
            } else if let Some(library) = event.library {
                for segment in Segment::collections_of(library) {
                    actions.push(Action::Schedule(segment.into(), policies.collection));
                }
            }
        }
        EventKind::ItemRemoved => {
            if let Some(segment) = playlist_segment(event) {
                actions.push(Action::Schedule(segment.into(), policies.playlist));
            } else if let Some(key) = event.media_key() {
                actions.push(Action::Remove(key));
                let segment = Segment::for_media_type(key.media_type);
                actions.push(Action::Schedule(segment.into(), policies.collection));
            }
        }
        EventKind::PropertyChanged => {
            if event.is_player() {
                actions.push(Action::Schedule(Segment::Players.into(), policies.players));
            } else if let Some(key) = event.media_key() {
                actions.push(Action::Schedule(key.into(), policies.point));
            }
        }
        EventKind::PlayerStarted => {
            actions.push(Action::Schedule(Segment::Players.into(), policies.players));
            for segment in [Segment::AudioPlaylist, Segment::VideoPlaylist] {
                actions.push(Action::Schedule(segment.into(), policies.playlist));
            }
        }
        EventKind::PlayerStopped => {
            actions.push(Action::Schedule(Segment::Players.into(), policies.players));
        }
        EventKind::Unknown => {}
    }

    retain_in_scope(actions, scope)
}

fn playlist_segment(event: &Event) -> Option<Segment> {
    if event.is_playlist() {
        event.playlist_id.and_then(Segment::for_playlist)
    } else {
        None
    }
}

fn retain_in_scope(mut actions: Vec<Action>, scope: MediaScope) -> Vec<Action> {
    actions.retain(|action| match action {
        Action::Schedule(RefreshTarget::Segment(segment), _) => segment.in_scope(scope),
        Action::Schedule(RefreshTarget::Item(key), _) | Action::Remove(key) => {
            scope.includes(key.media_type.library())
        }
    });
    actions
}
