use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::anchor::{encode_selection, TextRun, TextRunCache};
use crate::bookmarks::{highlights_for_page, Bookmark, BookmarkHighlight, BookmarkStore};
use crate::config::ViewerConfig;
use crate::engine::{DocumentBackend, RenderRequest, RenderedPage};
use crate::identity::{DocumentHandle, DocumentIdentity, IdentityResolver, LoadedDocument};
use crate::navigation::{plan_navigation, NavigationRequest, ScrollPlan};
use crate::render_cache::RenderCache;
use crate::selection::{HostSelection, SelectionSource, SelectionTracker};
use crate::storage::{viewer_state_key, KeyValueStorage, Persistence, PersistentStore};
use crate::viewport::{Alignment, ViewportModel};

/// Persisted per-document viewing position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewerState {
    pub page_count: usize,
    /// 1-indexed.
    pub current_page: usize,
    pub scroll_offset: f64,
    pub scale: f64,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            page_count: 0,
            current_page: 1,
            scroll_offset: 0.0,
            scale: 1.0,
        }
    }
}

impl ViewerState {
    fn sanitized(mut self, page_count: usize, config: &ViewerConfig) -> Self {
        self.page_count = page_count;
        self.current_page = self.current_page.clamp(1, page_count.max(1));
        self.scroll_offset = if self.scroll_offset.is_finite() {
            self.scroll_offset.max(0.0)
        } else {
            0.0
        };
        self.scale = config.clamp_scale(self.scale);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    DocumentLoaded(LoadedDocument),
    DocumentUnloaded(DocumentIdentity),
    CurrentPageChanged { page_number: usize },
    VisiblePagesChanged(Vec<usize>),
    PageVisible { page_index: usize },
    ScaleChanged { scale: f64 },
    BookmarksChanged,
    SelectionChanged { bookmarkable: bool },
    /// The host should collapse its live selection.
    SelectionCleared,
    /// The host should reveal the bookmark sidebar.
    SidebarRequested,
}

/// Everything the viewer knows about the open document, owned in one place.
///
/// Construct one per process with its storage; it partitions persisted state by the identity
/// of whichever document is loaded.
pub struct Viewer {
    config: ViewerConfig,
    store: PersistentStore,
    resolver: IdentityResolver,
    document: Option<LoadedDocument>,
    state: ViewerState,
    viewport: ViewportModel,
    bookmarks: BookmarkStore,
    text_runs: TextRunCache,
    selection: SelectionTracker,
    render_cache: RenderCache,
    visible: Vec<usize>,
    events: Vec<ViewerEvent>,
}

impl Viewer {
    pub fn new(config: ViewerConfig, storage: Arc<dyn KeyValueStorage>) -> Self {
        let config = config.sanitized();
        let store = PersistentStore::new(storage);
        Self {
            viewport: ViewportModel::new(&config),
            bookmarks: BookmarkStore::load(store.clone()),
            render_cache: RenderCache::new(config.render_cache_capacity),
            config,
            store,
            resolver: IdentityResolver::new(),
            document: None,
            state: ViewerState::default(),
            text_runs: TextRunCache::new(),
            selection: SelectionTracker::new(),
            visible: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn document(&self) -> Option<&LoadedDocument> {
        self.document.as_ref()
    }

    pub fn identity(&self) -> Option<&DocumentIdentity> {
        self.document.as_ref().map(|document| &document.identity)
    }

    pub fn page_count(&self) -> usize {
        self.state.page_count
    }

    pub fn current_page(&self) -> usize {
        self.state.current_page
    }

    pub fn viewport(&self) -> &ViewportModel {
        &self.viewport
    }

    /// Position of `page_index` for the given alignment, in scroll coordinates.
    pub fn offset_for_page(&self, page_index: usize, alignment: Alignment) -> f64 {
        self.viewport.offset_for_page(page_index, alignment)
    }

    pub fn selection(&self) -> &SelectionTracker {
        &self.selection
    }

    pub fn persistence(&self) -> Persistence {
        self.store.persistence()
    }

    pub fn drain_events(&mut self) -> Vec<ViewerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Resolves the document identity and restores its persisted state. Repeated notifications
    /// for the same document are ignored.
    #[instrument(skip(self, handle))]
    pub fn on_document_loaded<H>(&mut self, handle: &H) -> LoadedDocument
    where
        H: DocumentHandle + ?Sized,
    {
        let (document, fresh) = self.resolver.resolve(handle);
        if !fresh && self.document.as_ref() == Some(&document) {
            return document;
        }

        let key = viewer_state_key(&document.identity);
        let state = self
            .store
            .load::<ViewerState>(&key)
            .unwrap_or_default()
            .sanitized(document.page_count, &self.config);
        info!(
            identity = %document.identity,
            pages = document.page_count,
            page = state.current_page,
            "document loaded"
        );

        self.viewport
            .initialize(document.page_count, state.scale, state.scroll_offset);
        self.state = state;
        self.bookmarks.set_active(Some(document.identity.clone()));
        self.text_runs.clear();
        self.render_cache.clear();
        self.selection.clear();
        self.document = Some(document.clone());
        self.persist_state();
        self.events.push(ViewerEvent::DocumentLoaded(document.clone()));
        self.refresh_visible();
        document
    }

    /// Persists the position and returns to the uninitialized state.
    pub fn unload(&mut self) {
        let Some(document) = self.document.take() else {
            return;
        };
        self.store
            .save(&viewer_state_key(&document.identity), &self.state);
        self.resolver.reset();
        self.viewport.unload();
        self.bookmarks.set_active(None);
        self.text_runs.clear();
        self.render_cache.clear();
        self.selection.clear();
        self.state = ViewerState::default();
        self.visible.clear();
        self.events.push(ViewerEvent::DocumentUnloaded(document.identity));
    }

    pub fn on_page_text_extracted(&mut self, page_index: usize, runs: Vec<TextRun>) {
        if page_index >= self.page_count() {
            return;
        }
        if self.text_runs.insert(page_index, runs) {
            debug!(page = page_index, "cached text runs");
        }
    }

    pub fn text_runs(&self, page_index: usize) -> Option<&[TextRun]> {
        self.text_runs.runs(page_index)
    }

    /// Records a page as shown. A clicked internal link yields the navigation to perform.
    ///
    /// `page_index` is 0-based; `clicked_page_number` is the 1-based page the link points at.
    pub fn on_page_visible(
        &mut self,
        page_index: usize,
        clicked_page_number: Option<usize>,
    ) -> Option<NavigationRequest> {
        if page_index < self.page_count() {
            self.events.push(ViewerEvent::PageVisible { page_index });
        }
        clicked_page_number.map(NavigationRequest::page)
    }

    pub fn set_page_size(&mut self, page_index: usize, unscaled_height: f64) {
        if self.viewport.set_page_size(page_index, unscaled_height) {
            self.refresh_visible();
        }
    }

    pub fn set_viewport_height(&mut self, height: f64) {
        self.viewport.set_viewport_height(height);
        self.refresh_visible();
    }

    pub fn visible_pages(&self) -> &[usize] {
        &self.visible
    }

    /// Host scroll callback. Returns the new current page number unless the event was
    /// suppressed or no document is loaded.
    pub fn on_scroll(&mut self, raw_offset: f64) -> Option<usize> {
        let index = self.viewport.on_scroll(raw_offset)?;
        let page_number = index + 1;
        self.state.scroll_offset = self.viewport.scroll_offset();
        if self.state.current_page != page_number {
            self.state.current_page = page_number;
            self.events
                .push(ViewerEvent::CurrentPageChanged { page_number });
        }
        self.persist_state();
        self.refresh_visible();
        Some(page_number)
    }

    /// Raises scroll suppression and plans the scroll for `request`.
    pub fn begin_navigation(&mut self, request: NavigationRequest) -> ScrollPlan {
        self.viewport.begin_suppression();
        plan_navigation(request, &self.viewport, self.state.current_page, &self.config)
    }

    /// Lowers suppression, then writes the navigation's final position into the viewer state.
    pub fn finish_navigation(&mut self, plan: &ScrollPlan) -> ViewerState {
        self.viewport.end_suppression();
        if !self.viewport.is_ready() {
            return self.state.clone();
        }

        let offset = plan.target.offset;
        self.viewport.set_scroll_offset(offset);
        let page_number = plan
            .page_number
            .unwrap_or_else(|| self.viewport.page_at_offset(offset) + 1);
        self.state.scroll_offset = self.viewport.scroll_offset();
        if self.state.current_page != page_number {
            self.state.current_page = page_number;
            self.events
                .push(ViewerEvent::CurrentPageChanged { page_number });
        }
        self.persist_state();
        self.refresh_visible();
        self.state.clone()
    }

    /// Applies a new zoom level, keeping the same relative position in view. Returns the new
    /// scroll offset, or `None` when the clamped scale did not change.
    pub fn set_scale(&mut self, scale: f64) -> Option<f64> {
        let scale = self.config.clamp_scale(scale);
        if (scale - self.state.scale).abs() < f64::EPSILON {
            return None;
        }
        let offset = self.viewport.on_scale_change(scale);
        self.state.scale = scale;
        self.state.scroll_offset = offset;
        self.events.push(ViewerEvent::ScaleChanged { scale });
        self.persist_state();
        self.refresh_visible();
        Some(offset)
    }

    pub fn on_selection_changed(&mut self, selection: Option<HostSelection>) -> bool {
        let was = self.selection.is_bookmarkable();
        let bookmarkable = self.selection.on_selection_changed(selection);
        if was != bookmarkable {
            self.events
                .push(ViewerEvent::SelectionChanged { bookmarkable });
        }
        bookmarkable
    }

    /// Re-reads the live selection from the host.
    pub fn refresh_selection(&mut self, source: &dyn SelectionSource) -> bool {
        self.on_selection_changed(source.current_selection())
    }

    pub fn can_bookmark_selection(&self) -> bool {
        self.selection.is_bookmarkable()
    }

    /// Bookmarks the live selection. `None` when nothing bookmarkable is selected, the
    /// selection cannot be anchored to cached runs, or it duplicates an existing bookmark.
    #[instrument(skip(self))]
    pub fn bookmark_current_selection(&mut self) -> Option<Bookmark> {
        let range = self.selection.range()?;
        if self.bookmarks.contains(&range.text, range.page_index) {
            debug!(page = range.page_index, "selection already bookmarked");
            return None;
        }

        let runs = self.text_runs.runs(range.page_index)?;
        let anchors = encode_selection(&range, runs);
        let scroll_offset = self.viewport.page_start(range.page_index) + range.start_offset_top
            - self.config.scroll_padding;
        let bookmark = Bookmark::new(range.text, range.page_index, scroll_offset, anchors)?;

        if !self.bookmarks.add(bookmark.clone()) {
            return None;
        }
        self.selection.clear();
        self.events.push(ViewerEvent::BookmarksChanged);
        self.events.push(ViewerEvent::SelectionCleared);
        self.events.push(ViewerEvent::SidebarRequested);
        Some(bookmark)
    }

    pub fn remove_bookmark(&mut self, id: Uuid) -> bool {
        let removed = self.bookmarks.remove(id).is_some();
        if removed {
            self.events.push(ViewerEvent::BookmarksChanged);
        }
        removed
    }

    pub fn rename_bookmark(&mut self, id: Uuid, name: Option<String>) -> bool {
        let renamed = self.bookmarks.rename(id, name);
        if renamed {
            self.events.push(ViewerEvent::BookmarksChanged);
        }
        renamed
    }

    pub fn list_bookmarks(&self) -> &[Bookmark] {
        self.bookmarks.list()
    }

    pub fn bookmarks_for_page(&self, page_index: usize) -> Vec<&Bookmark> {
        self.bookmarks.bookmarks_for_page(page_index)
    }

    pub fn grouped_bookmarks(&self) -> BTreeMap<usize, Vec<&Bookmark>> {
        self.bookmarks.grouped_by_page()
    }

    /// Highlights for every bookmark on a page whose text has been extracted.
    pub fn highlights_for_page(&self, page_index: usize) -> Vec<BookmarkHighlight> {
        match self.text_runs.runs(page_index) {
            Some(runs) => highlights_for_page(self.bookmarks.list(), page_index, runs),
            None => Vec::new(),
        }
    }

    pub fn bookmark_navigation(&self, id: Uuid) -> Option<NavigationRequest> {
        self.bookmarks
            .find(id)
            .map(|bookmark| NavigationRequest::offset(bookmark.scroll_offset))
    }

    pub fn rendered_page(&self, page_index: usize) -> Option<Arc<RenderedPage>> {
        self.render_cache.get(page_index, self.state.scale)
    }

    /// Renders every page in the visible window that is not cached yet, feeding measured sizes
    /// into the layout and extracted text into the anchor cache. A page that fails to render
    /// does not stop the others; the last failure is returned.
    #[instrument(skip(self, backend))]
    pub fn materialize(&mut self, backend: &dyn DocumentBackend) -> Result<Vec<usize>> {
        let mut rendered = Vec::new();
        let mut last_error: Option<Error> = None;
        let scale = self.state.scale;

        for page_index in self.visible.clone() {
            if self.render_cache.get(page_index, scale).is_some() {
                continue;
            }
            match backend.render_page(RenderRequest { page_index, scale }) {
                Ok(page) => {
                    self.viewport.set_page_size(page_index, page.size.height);
                    self.on_page_text_extracted(page_index, page.runs.clone());
                    self.render_cache
                        .insert(page, scale, self.state.current_page - 1);
                    rendered.push(page_index);
                }
                Err(err) => {
                    warn!(page = page_index, error = %err, "failed to render page");
                    last_error = Some(err);
                }
            }
        }

        if !rendered.is_empty() {
            self.refresh_visible();
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(rendered),
        }
    }

    fn refresh_visible(&mut self) {
        let visible = self.viewport.visible_window();
        if visible != self.visible {
            self.visible = visible.clone();
            self.events.push(ViewerEvent::VisiblePagesChanged(visible));
        }
    }

    fn persist_state(&self) {
        if let Some(document) = &self.document {
            self.store
                .save(&viewer_state_key(&document.identity), &self.state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::Transform;
    use crate::navigation::NavigateTo;
    use crate::selection::{NodeRole, SelectionEndpoint};
    use crate::storage::testing::UnavailableStorage;
    use crate::storage::{save_json, MemoryStorage};

    struct Doc {
        name: &'static str,
        pages: usize,
    }

    impl DocumentHandle for Doc {
        fn fingerprint(&self) -> DocumentIdentity {
            DocumentIdentity::from_bytes(self.name.as_bytes())
        }

        fn page_count(&self) -> usize {
            self.pages
        }
    }

    fn runs(page_index: usize) -> Vec<TextRun> {
        ["First line of text", "Привет, мир", "Closing words"]
            .iter()
            .enumerate()
            .map(|(run_index, text)| TextRun {
                page_index,
                text: (*text).to_owned(),
                transform: Transform::new(1.0, 0.0, 0.0, 1.0, 72.0, 700.0 - 20.0 * run_index as f64),
                run_index,
            })
            .collect()
    }

    fn endpoint(node_id: u64, page_index: usize, text: &str, offset: usize) -> SelectionEndpoint {
        SelectionEndpoint {
            node_id,
            ancestors: vec![NodeRole::TextSpan, NodeRole::TextLayer { page_index }],
            container_text: text.to_owned(),
            offset,
            offset_top: 120.0,
        }
    }

    fn select_privet(viewer: &mut Viewer, page_index: usize) {
        viewer.on_selection_changed(Some(HostSelection {
            anchor: Some(endpoint(7, page_index, "Привет, мир", 0)),
            focus: Some(endpoint(7, page_index, "Привет, мир", 6)),
            text: "Привет".to_owned(),
            backward: false,
        }));
    }

    fn viewer_with(storage: Arc<dyn KeyValueStorage>) -> Viewer {
        Viewer::new(ViewerConfig::default(), storage)
    }

    #[test]
    fn fresh_document_starts_at_defaults() {
        let mut viewer = viewer_with(Arc::new(MemoryStorage::new()));
        viewer.on_document_loaded(&Doc { name: "a", pages: 8 });

        assert_eq!(viewer.state(), &ViewerState {
            page_count: 8,
            current_page: 1,
            scroll_offset: 0.0,
            scale: 1.0,
        });
    }

    #[test]
    fn state_is_restored_per_identity() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let mut viewer = viewer_with(storage.clone());
        viewer.on_document_loaded(&Doc { name: "a", pages: 30 });
        viewer.set_viewport_height(900.0);
        let offset = viewer.offset_for_page(11, Alignment::Start);
        assert_eq!(viewer.on_scroll(offset), Some(12));
        viewer.unload();

        let mut reopened = viewer_with(storage);
        reopened.on_document_loaded(&Doc { name: "b", pages: 3 });
        assert_eq!(reopened.current_page(), 1);
        reopened.on_document_loaded(&Doc { name: "a", pages: 30 });
        assert_eq!(reopened.current_page(), 12);
        assert_eq!(reopened.state().scroll_offset, offset);
    }

    #[test]
    fn corrupt_persisted_state_falls_back_to_defaults() {
        let storage = Arc::new(MemoryStorage::new());
        let doc = Doc { name: "a", pages: 4 };
        storage
            .set(&viewer_state_key(&doc.fingerprint()), "{\"currentPage\": \"seven\"")
            .unwrap();

        let mut viewer = viewer_with(storage);
        viewer.on_document_loaded(&doc);
        assert_eq!(viewer.current_page(), 1);
    }

    #[test]
    fn restored_state_is_clamped_to_page_count() {
        let storage = Arc::new(MemoryStorage::new());
        let doc = Doc { name: "a", pages: 4 };
        let stale = ViewerState {
            page_count: 90,
            current_page: 77,
            scroll_offset: -5.0,
            scale: 9.0,
        };
        save_json(storage.as_ref(), &viewer_state_key(&doc.fingerprint()), &stale).unwrap();

        let mut viewer = viewer_with(storage);
        viewer.on_document_loaded(&doc);
        assert_eq!(viewer.current_page(), 4);
        assert_eq!(viewer.state().scroll_offset, 0.0);
        assert_eq!(viewer.state().scale, 2.5);
    }

    #[test]
    fn repeated_load_notifications_are_idempotent() {
        let mut viewer = viewer_with(Arc::new(MemoryStorage::new()));
        let doc = Doc { name: "a", pages: 8 };
        viewer.on_document_loaded(&doc);
        viewer.on_page_text_extracted(0, runs(0));
        viewer.drain_events();

        viewer.on_document_loaded(&doc);
        assert!(viewer.drain_events().is_empty());
        assert!(viewer.text_runs(0).is_some());
    }

    #[test]
    fn bookmarking_a_selection_anchors_it_to_runs() {
        let mut viewer = viewer_with(Arc::new(MemoryStorage::new()));
        viewer.on_document_loaded(&Doc { name: "a", pages: 8 });
        viewer.on_page_text_extracted(3, runs(3));
        select_privet(&mut viewer, 3);

        let bookmark = viewer.bookmark_current_selection().unwrap();
        assert_eq!(bookmark.selected_text, "Привет");
        assert_eq!(bookmark.page_index, 3);
        assert_eq!(
            bookmark.scroll_offset,
            viewer.viewport().page_start(3) + 120.0 - 32.0
        );
        assert!(!viewer.can_bookmark_selection());

        let highlights = viewer.highlights_for_page(3);
        assert_eq!(highlights[0].spans[0].text, "Привет");
    }

    #[test]
    fn same_selection_twice_creates_one_bookmark() {
        let mut viewer = viewer_with(Arc::new(MemoryStorage::new()));
        viewer.on_document_loaded(&Doc { name: "a", pages: 8 });
        viewer.on_page_text_extracted(3, runs(3));

        select_privet(&mut viewer, 3);
        assert!(viewer.bookmark_current_selection().is_some());
        select_privet(&mut viewer, 3);
        assert!(viewer.bookmark_current_selection().is_none());
        assert_eq!(viewer.list_bookmarks().len(), 1);
    }

    #[test]
    fn selection_on_unextracted_page_cannot_be_bookmarked() {
        let mut viewer = viewer_with(Arc::new(MemoryStorage::new()));
        viewer.on_document_loaded(&Doc { name: "a", pages: 8 });
        select_privet(&mut viewer, 5);

        assert!(viewer.can_bookmark_selection());
        assert!(viewer.bookmark_current_selection().is_none());
        assert!(viewer.list_bookmarks().is_empty());
    }

    #[test]
    fn unavailable_storage_does_not_interrupt_viewing() {
        let mut viewer = viewer_with(Arc::new(UnavailableStorage::default()));
        viewer.on_document_loaded(&Doc { name: "a", pages: 8 });
        viewer.on_page_text_extracted(3, runs(3));
        select_privet(&mut viewer, 3);

        assert!(viewer.bookmark_current_selection().is_some());
        assert_eq!(viewer.persistence(), Persistence::SessionOnly);
        assert_eq!(viewer.on_scroll(3000.0), Some(4));
    }

    #[test]
    fn rescale_keeps_relative_position() {
        let mut viewer = viewer_with(Arc::new(MemoryStorage::new()));
        viewer.on_document_loaded(&Doc { name: "a", pages: 100 });
        viewer.on_scroll(20_000.0);
        let before = viewer.state().scroll_offset / viewer.viewport().total_size();

        viewer.set_scale(1.5);
        let after = viewer.state().scroll_offset / viewer.viewport().total_size();
        assert!((before - after).abs() < 1e-12);
        assert_eq!(viewer.set_scale(1.5), None);
    }

    #[test]
    fn clicked_link_requests_navigation() {
        let mut viewer = viewer_with(Arc::new(MemoryStorage::new()));
        viewer.on_document_loaded(&Doc { name: "a", pages: 8 });

        assert_eq!(viewer.on_page_visible(0, None), None);
        viewer.drain_events();

        // the visible page is an index, the link target a page number
        let request = viewer.on_page_visible(2, Some(6)).unwrap();
        assert_eq!(request.target, NavigateTo::Page(6));
        assert_eq!(
            viewer.drain_events(),
            vec![ViewerEvent::PageVisible { page_index: 2 }]
        );
    }

    #[test]
    fn unload_returns_to_uninitialized() {
        let mut viewer = viewer_with(Arc::new(MemoryStorage::new()));
        viewer.on_document_loaded(&Doc { name: "a", pages: 8 });
        viewer.unload();

        assert!(!viewer.viewport().is_ready());
        assert!(viewer.visible_pages().is_empty());
        assert_eq!(viewer.on_scroll(400.0), None);
        assert!(viewer.list_bookmarks().is_empty());
    }
}
