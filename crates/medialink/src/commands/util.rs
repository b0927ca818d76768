//! Shared helpers for command handlers.

use serde::Serialize;
use tabled::Tabled;

use medialink_core::{MediaScope, MirrorStore, PartialMirror, Segment, SegmentState};

/// One row of a mirror summary.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct SegmentRow {
    #[tabled(rename = "Segment")]
    pub segment: String,
    #[tabled(rename = "State")]
    pub state: String,
    #[tabled(rename = "Items")]
    pub items: usize,
    #[tabled(rename = "Pending")]
    pub pending: usize,
}

/// Summarize the live mirror for every segment in `scope`.
pub fn live_segments(mirror: &MirrorStore, scope: MediaScope) -> Vec<SegmentRow> {
    let players = mirror.player_state();
    Segment::all_in_scope(scope)
        .map(|segment| {
            let (items, pending) = match segment {
                Segment::Players => (players.players.len(), 0),
                Segment::AudioPlaylist => (players.audio_playlist.items.len(), 0),
                Segment::VideoPlaylist => (players.video_playlist.items.len(), 0),
                collection => collection.media_type().map_or((0, 0), |media_type| {
                    let c = mirror.collection(media_type);
                    (c.len(), c.pending_count())
                }),
            };
            SegmentRow {
                segment: segment.to_string(),
                state: mirror.segment_state(segment).to_string(),
                items,
                pending,
            }
        })
        .collect()
}

/// Summarize a stored snapshot. Segments it lacks are reported empty.
pub fn snapshot_segments(snapshot: &PartialMirror) -> Vec<SegmentRow> {
    Segment::all_in_scope(MediaScope::All)
        .filter_map(|segment| {
            let items = match segment {
                Segment::Players => snapshot.players.as_ref().map(Vec::len),
                Segment::AudioPlaylist => snapshot.audio_playlist.as_ref().map(|p| p.items.len()),
                Segment::VideoPlaylist => snapshot.video_playlist.as_ref().map(|p| p.items.len()),
                collection => collection
                    .media_type()
                    .and_then(|media_type| snapshot.collections.get(&media_type))
                    .map(Vec::len),
            }?;
            Some(SegmentRow {
                segment: segment.to_string(),
                state: SegmentState::Populated.to_string(),
                items,
                pending: 0,
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use medialink_core::{LibraryItem, MediaType};
    use serde_json::json;

    #[test]
    fn snapshot_summary_lists_stored_segments_only() {
        let mut snapshot = PartialMirror::default();
        let song = LibraryItem::from_value(MediaType::Song, json!({ "songid": 4, "label": "x" })).unwrap();
        snapshot.collections.insert(MediaType::Song, vec![song]);
        snapshot.players = Some(Vec::new());

        let rows = snapshot_segments(&snapshot);
        let summary: Vec<(&str, usize)> = rows.iter().map(|r| (r.segment.as_str(), r.items)).collect();
        assert_eq!(summary, vec![("songs", 1), ("players", 0)]);
    }

    #[test]
    fn empty_mirror_reports_every_scoped_segment() {
        let mirror = MirrorStore::new();
        let rows = live_segments(&mirror, MediaScope::Video);
        assert!(rows.iter().all(|r| r.state == "empty" && r.items == 0));
        assert!(rows.iter().any(|r| r.segment == "video-playlist"));
        assert!(!rows.iter().any(|r| r.segment == "songs"));
    }
}
