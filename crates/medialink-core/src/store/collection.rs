// ── Immutable collection snapshots ──
//
// A `Collection` is never mutated after it has been published; writers
// clone-and-replace under the store's writer lock and readers keep whatever
// `Arc` they already hold.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::model::LibraryItem;

/// One entity plus its reconciliation bookkeeping.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Value readers see: server-confirmed, or an optimistic prediction.
    pub item: Arc<LibraryItem>,
    /// Last server-confirmed value while a prediction is outstanding.
    pub(crate) confirmed: Option<Arc<LibraryItem>>,
    /// Store-wide revision of the last write to this entry.
    pub revision: u64,
}

impl Entry {
    pub(crate) fn confirmed(item: Arc<LibraryItem>, revision: u64) -> Self {
        Self {
            item,
            confirmed: None,
            revision,
        }
    }

    /// `true` while an optimistic value has not been confirmed by the server.
    pub fn is_pending(&self) -> bool {
        self.confirmed.is_some()
    }

    /// The value to persist: never an unconfirmed prediction.
    pub fn confirmed_item(&self) -> &Arc<LibraryItem> {
        self.confirmed.as_ref().unwrap_or(&self.item)
    }
}

/// All entities of one media type, in server order.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    entries: IndexMap<u64, Entry>,
}

impl Collection {
    pub(crate) fn from_items(items: impl IntoIterator<Item = LibraryItem>, revision: u64) -> Self {
        let entries = items
            .into_iter()
            .map(|item| (item.id(), Entry::confirmed(Arc::new(item), revision)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, id: u64) -> Option<&Arc<LibraryItem>> {
        self.entries.get(&id).map(|e| &e.item)
    }

    pub fn entry(&self, id: u64) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    pub fn items(&self) -> impl Iterator<Item = &Arc<LibraryItem>> {
        self.entries.values().map(|e| &e.item)
    }

    /// Server-confirmed values only.
    pub fn confirmed_items(&self) -> impl Iterator<Item = &Arc<LibraryItem>> {
        self.entries.values().map(Entry::confirmed_item)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_pending()).count()
    }

    // ── Crate-internal edits on an owned copy ────────────────────────

    pub(crate) fn insert(&mut self, entry: Entry) {
        let id = entry.item.id();
        self.entries.insert(id, entry);
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<Entry> {
        self.entries.shift_remove(&id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::MediaType;
    use serde_json::json;

    fn song(id: u64, playcount: u32) -> LibraryItem {
        LibraryItem::from_value(
            MediaType::Song,
            json!({ "songid": id, "label": format!("song {id}"), "playcount": playcount }),
        )
        .unwrap()
    }

    #[test]
    fn keeps_server_order() {
        let col = Collection::from_items([song(3, 0), song(1, 0), song(2, 0)], 1);
        assert_eq!(col.ids().collect::<Vec<_>>(), [3, 1, 2]);
        col.get(1).unwrap();
    }

    #[test]
    fn pending_entry_exposes_confirmed_value() {
        let mut col = Collection::from_items([song(1, 0)], 1);
        let base = Arc::clone(col.get(1).unwrap());
        col.insert(Entry {
            item: Arc::new(song(1, 1)),
            confirmed: Some(base),
            revision: 2,
        });

        let entry = col.entry(1).unwrap();
        assert!(entry.is_pending());
        assert_eq!(entry.item.play_state().unwrap().playcount, 1);
        assert_eq!(entry.confirmed_item().play_state().unwrap().playcount, 0);
        assert_eq!(col.pending_count(), 1);
    }

    #[test]
    fn remove_preserves_order_of_rest() {
        let mut col = Collection::from_items([song(1, 0), song(2, 0), song(3, 0)], 1);
        assert!(col.remove(2).is_some());
        assert!(col.remove(2).is_none());
        assert_eq!(col.ids().collect::<Vec<_>>(), [1, 3]);
    }
}
