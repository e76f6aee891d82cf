use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::anchor::{decode_anchors, Anchor, HighlightSpan, TextRun};
use crate::identity::DocumentIdentity;
use crate::storage::{Persistence, PersistentStore, BOOKMARKS_KEY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: Uuid,
    pub selected_text: String,
    pub page_index: usize,
    /// Absolute offset from the start of the document to the bookmarked text.
    pub scroll_offset: f64,
    pub anchors: Vec<Anchor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Bookmark {
    /// Returns `None` when `anchors` is empty; a bookmark must point at some text.
    pub fn new(
        selected_text: impl Into<String>,
        page_index: usize,
        scroll_offset: f64,
        anchors: Vec<Anchor>,
    ) -> Option<Self> {
        if anchors.is_empty() {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            selected_text: selected_text.into(),
            page_index,
            scroll_offset: scroll_offset.max(0.0),
            anchors,
            name: None,
        })
    }

    pub fn page_number(&self) -> usize {
        self.page_index + 1
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.selected_text)
    }
}

/// Every document's bookmarks, as persisted under [`BOOKMARKS_KEY`].
pub type BookmarkSet = BTreeMap<DocumentIdentity, Vec<Bookmark>>;

/// Highlights of one bookmark on one rendered page.
#[derive(Debug, Clone, PartialEq)]
pub struct BookmarkHighlight {
    pub bookmark_id: Uuid,
    pub spans: Vec<HighlightSpan>,
}

/// Decodes every bookmark on `page_index` against that page's runs. Bookmarks whose anchors
/// no longer resolve are left out.
pub fn highlights_for_page<'a>(
    bookmarks: impl IntoIterator<Item = &'a Bookmark>,
    page_index: usize,
    runs: &[TextRun],
) -> Vec<BookmarkHighlight> {
    bookmarks
        .into_iter()
        .filter(|bookmark| bookmark.page_index == page_index)
        .filter_map(|bookmark| {
            let spans = decode_anchors(&bookmark.anchors, runs);
            (!spans.is_empty()).then(|| BookmarkHighlight {
                bookmark_id: bookmark.id,
                spans,
            })
        })
        .collect()
}

/// Bookmarks of the active document, backed by the full persisted [`BookmarkSet`].
pub struct BookmarkStore {
    store: PersistentStore,
    all: BookmarkSet,
    active: Option<DocumentIdentity>,
}

impl BookmarkStore {
    /// Reads the persisted set once. A missing or corrupt set starts empty.
    pub fn load(store: PersistentStore) -> Self {
        let all: BookmarkSet = store.load(BOOKMARKS_KEY).unwrap_or_default();
        debug!(documents = all.len(), "loaded bookmark set");
        Self {
            store,
            all,
            active: None,
        }
    }

    /// Re-slices the in-memory set for `identity` without touching storage.
    pub fn set_active(&mut self, identity: Option<DocumentIdentity>) {
        self.active = identity;
    }

    pub fn active(&self) -> Option<&DocumentIdentity> {
        self.active.as_ref()
    }

    pub fn list(&self) -> &[Bookmark] {
        self.active
            .as_ref()
            .and_then(|identity| self.all.get(identity))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list().is_empty()
    }

    pub fn find(&self, id: Uuid) -> Option<&Bookmark> {
        self.list().iter().find(|bookmark| bookmark.id == id)
    }

    pub fn contains(&self, selected_text: &str, page_index: usize) -> bool {
        self.list().iter().any(|bookmark| {
            bookmark.selected_text == selected_text && bookmark.page_index == page_index
        })
    }

    /// Appends `bookmark` unless the same text is already bookmarked on the same page.
    pub fn add(&mut self, bookmark: Bookmark) -> bool {
        if self.contains(&bookmark.selected_text, bookmark.page_index) {
            debug!(page = bookmark.page_index, "ignoring duplicate bookmark");
            return false;
        }
        let Some(identity) = self.active.clone() else {
            return false;
        };
        info!(id = %bookmark.id, page = bookmark.page_index, "adding bookmark");
        self.all.entry(identity).or_default().push(bookmark);
        self.persist();
        true
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Bookmark> {
        let identity = self.active.as_ref()?;
        let bookmarks = self.all.get_mut(identity)?;
        let position = bookmarks.iter().position(|bookmark| bookmark.id == id)?;
        let removed = bookmarks.remove(position);
        info!(%id, "removed bookmark");
        self.persist();
        Some(removed)
    }

    pub fn rename(&mut self, id: Uuid, name: Option<String>) -> bool {
        let Some(bookmark) = self
            .active
            .as_ref()
            .and_then(|identity| self.all.get_mut(identity))
            .and_then(|bookmarks| bookmarks.iter_mut().find(|bookmark| bookmark.id == id))
        else {
            return false;
        };
        bookmark.name = name.filter(|name| !name.trim().is_empty());
        self.persist();
        true
    }

    pub fn bookmarks_for_page(&self, page_index: usize) -> Vec<&Bookmark> {
        self.list()
            .iter()
            .filter(|bookmark| bookmark.page_index == page_index)
            .collect()
    }

    /// Bookmarks grouped by page index, pages ascending, insertion order within a page.
    pub fn grouped_by_page(&self) -> BTreeMap<usize, Vec<&Bookmark>> {
        let mut groups: BTreeMap<usize, Vec<&Bookmark>> = BTreeMap::new();
        for bookmark in self.list() {
            groups.entry(bookmark.page_index).or_default().push(bookmark);
        }
        groups
    }

    pub fn persistence(&self) -> Persistence {
        self.store.persistence()
    }

    fn persist(&self) {
        self.store.save(BOOKMARKS_KEY, &self.all);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{compute_anchor_hash, Transform};
    use crate::storage::testing::UnavailableStorage;
    use crate::storage::{KeyValueStorage, MemoryStorage};
    use std::sync::Arc;

    fn anchor(page_index: usize) -> Anchor {
        Anchor {
            hash: compute_anchor_hash(page_index, &Transform::IDENTITY),
            start_offset: Some(0),
            end_offset: Some(6),
        }
    }

    fn bookmark(text: &str, page_index: usize) -> Bookmark {
        Bookmark::new(text, page_index, 120.0, vec![anchor(page_index)]).unwrap()
    }

    fn store_for(storage: Arc<dyn KeyValueStorage>, identity: &str) -> BookmarkStore {
        let mut store = BookmarkStore::load(PersistentStore::new(storage));
        store.set_active(Some(DocumentIdentity::new(identity)));
        store
    }

    #[test]
    fn bookmark_requires_anchors() {
        assert!(Bookmark::new("text", 0, 0.0, Vec::new()).is_none());
    }

    #[test]
    fn duplicate_text_on_same_page_is_stored_once() {
        let mut store = store_for(Arc::new(MemoryStorage::new()), "doc");

        assert!(store.add(bookmark("Привет", 3)));
        assert!(!store.add(bookmark("Привет", 3)));
        assert!(store.add(bookmark("Привет", 4)));

        assert_eq!(store.bookmarks_for_page(3).len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn removing_unknown_id_is_a_no_op() {
        let mut store = store_for(Arc::new(MemoryStorage::new()), "doc");
        store.add(bookmark("alpha", 0));

        assert!(store.remove(Uuid::new_v4()).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn bookmarks_persist_per_document_identity() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let mut first = store_for(storage.clone(), "doc-a");
        first.add(bookmark("alpha", 0));
        first.set_active(Some(DocumentIdentity::new("doc-b")));
        first.add(bookmark("beta", 1));

        let mut reloaded = store_for(storage, "doc-a");
        assert_eq!(reloaded.list()[0].selected_text, "alpha");
        reloaded.set_active(Some(DocumentIdentity::new("doc-b")));
        assert_eq!(reloaded.list()[0].selected_text, "beta");
        reloaded.set_active(Some(DocumentIdentity::new("doc-c")));
        assert!(reloaded.is_empty());
    }

    #[test]
    fn groups_keep_insertion_order_within_a_page() {
        let mut store = store_for(Arc::new(MemoryStorage::new()), "doc");
        store.add(bookmark("late", 7));
        store.add(bookmark("first", 2));
        store.add(bookmark("second", 2));

        let groups = store.grouped_by_page();
        let pages: Vec<usize> = groups.keys().copied().collect();
        assert_eq!(pages, vec![2, 7]);
        let texts: Vec<&str> = groups[&2]
            .iter()
            .map(|bookmark| bookmark.selected_text.as_str())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn rename_changes_label_only() {
        let mut store = store_for(Arc::new(MemoryStorage::new()), "doc");
        let added = bookmark("selected words", 0);
        let id = added.id;
        store.add(added);

        assert!(store.rename(id, Some("Chapter opener".into())));
        let renamed = store.find(id).unwrap();
        assert_eq!(renamed.label(), "Chapter opener");
        assert_eq!(renamed.selected_text, "selected words");

        assert!(store.rename(id, Some("   ".into())));
        assert_eq!(store.find(id).unwrap().label(), "selected words");
    }

    #[test]
    fn unavailable_storage_keeps_bookmarks_in_memory() {
        let mut store = store_for(Arc::new(UnavailableStorage::default()), "doc");

        assert!(store.add(bookmark("alpha", 0)));
        assert!(store.add(bookmark("beta", 0)));
        assert_eq!(store.len(), 2);
        assert_eq!(store.persistence(), Persistence::SessionOnly);
    }

    #[test]
    fn highlights_skip_unresolved_bookmarks() {
        let runs = vec![TextRun {
            page_index: 0,
            text: "Привет, мир".into(),
            transform: Transform::IDENTITY,
            run_index: 0,
        }];
        let resolved = bookmark("Привет", 0);
        let mut stale = bookmark("gone", 0);
        stale.anchors[0].hash = compute_anchor_hash(0, &Transform::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0));

        let highlights = highlights_for_page([&resolved, &stale], 0, &runs);
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].bookmark_id, resolved.id);
        assert_eq!(highlights[0].spans[0].text, "Привет");
    }
}
