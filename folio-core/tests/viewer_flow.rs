use std::sync::Arc;

use anyhow::{bail, Result};
use folio_core::{
    Alignment, DocumentBackend, DocumentHandle, DocumentIdentity, FileStorage, HostSelection,
    KeyValueStorage, MemoryStorage, NavigationController, NavigationRequest, NodeRole, PageSize,
    RenderImage, RenderRequest, RenderedPage, ScrollBehavior, ScrollInstruction, ScrollSurface,
    SelectionEndpoint, SelectionHub, TextRun, Transform, Viewer, ViewerConfig, ViewerEvent,
};
use tempfile::tempdir;

/// Pages of 612x792 points with three lines each; page 4 always fails to render.
struct FakeBackend {
    name: &'static str,
    pages: usize,
}

impl FakeBackend {
    fn lines(page_index: usize) -> Vec<String> {
        vec![
            format!("Chapter {} opens here", page_index + 1),
            "The quick brown fox".to_owned(),
            "jumps over the lazy dog".to_owned(),
        ]
    }
}

impl DocumentHandle for FakeBackend {
    fn fingerprint(&self) -> DocumentIdentity {
        DocumentIdentity::from_bytes(self.name.as_bytes())
    }

    fn page_count(&self) -> usize {
        self.pages
    }
}

impl DocumentBackend for FakeBackend {
    fn render_page(&self, request: RenderRequest) -> Result<RenderedPage> {
        if request.page_index == 4 {
            bail!("corrupt content stream on page 5");
        }
        let runs = Self::lines(request.page_index)
            .into_iter()
            .enumerate()
            .map(|(run_index, text)| TextRun {
                page_index: request.page_index,
                text,
                transform: Transform::new(
                    12.0,
                    0.0,
                    0.0,
                    12.0,
                    72.0,
                    720.0 - 14.0 * run_index as f64,
                ),
                run_index,
            })
            .collect();
        Ok(RenderedPage {
            page_index: request.page_index,
            image: RenderImage {
                width: 1,
                height: 1,
                pixels: vec![255; 4],
            },
            size: PageSize {
                width: 612.0,
                height: 792.0,
            },
            runs,
        })
    }
}

#[derive(Default)]
struct RecordingSurface {
    instructions: Vec<ScrollInstruction>,
}

impl ScrollSurface for RecordingSurface {
    fn scroll_to(&mut self, instruction: ScrollInstruction) {
        self.instructions.push(instruction);
    }
}

fn config() -> ViewerConfig {
    ViewerConfig {
        pre_scroll_pause_ms: 0,
        ..ViewerConfig::default()
    }
}

fn endpoint(node_id: u64, page_index: usize, text: &str, offset: usize) -> SelectionEndpoint {
    SelectionEndpoint {
        node_id,
        ancestors: vec![
            NodeRole::TextSpan,
            NodeRole::MarkedContent,
            NodeRole::TextLayer { page_index },
        ],
        container_text: text.to_owned(),
        offset,
        offset_top: 60.0,
    }
}

/// "brown fox" through "jumps" on page 2, spanning two runs.
fn cross_run_selection() -> HostSelection {
    HostSelection {
        anchor: Some(endpoint(11, 1, "The quick brown fox", 10)),
        focus: Some(endpoint(12, 1, "jumps over the lazy dog", 5)),
        text: "brown fox\njumps".to_owned(),
        backward: false,
    }
}

#[test]
fn bookmarks_survive_a_reload() {
    let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
    let backend = FakeBackend {
        name: "manual.pdf",
        pages: 12,
    };

    let mut viewer = Viewer::new(config(), storage.clone());
    viewer.on_document_loaded(&backend);
    viewer.set_viewport_height(900.0);
    let rendered = viewer.materialize(&backend).unwrap();
    assert!(rendered.contains(&1));

    viewer.on_selection_changed(Some(cross_run_selection()));
    let bookmark = viewer.bookmark_current_selection().unwrap();
    assert_eq!(bookmark.anchors.len(), 2);
    let events = viewer.drain_events();
    assert!(events.contains(&ViewerEvent::SelectionCleared));
    assert!(events.contains(&ViewerEvent::SidebarRequested));

    let mut reloaded = Viewer::new(config(), storage);
    reloaded.on_document_loaded(&backend);
    assert_eq!(reloaded.list_bookmarks(), &[bookmark.clone()][..]);
    assert!(reloaded.highlights_for_page(1).is_empty());

    reloaded.set_viewport_height(900.0);
    reloaded.materialize(&backend).unwrap();
    let highlights = reloaded.highlights_for_page(1);
    assert_eq!(highlights.len(), 1);
    assert_eq!(highlights[0].bookmark_id, bookmark.id);
    let texts: Vec<_> = highlights[0].spans.iter().map(|span| span.text.as_str()).collect();
    assert_eq!(texts, ["brown fox", "jumps"]);
}

#[test]
fn failing_page_does_not_block_the_rest() {
    let backend = FakeBackend {
        name: "broken.pdf",
        pages: 12,
    };
    let mut viewer = Viewer::new(config(), Arc::new(MemoryStorage::new()));
    viewer.on_document_loaded(&backend);
    viewer.set_viewport_height(900.0);
    let offset = viewer.offset_for_page(4, Alignment::Start);
    viewer.on_scroll(offset);

    assert!(viewer.materialize(&backend).is_err());
    assert!(viewer.rendered_page(3).is_some());
    assert!(viewer.rendered_page(4).is_none());
    assert!(viewer.rendered_page(5).is_some());
}

#[test]
fn measured_sizes_replace_the_estimate() {
    let backend = FakeBackend {
        name: "letter.pdf",
        pages: 6,
    };
    let mut viewer = Viewer::new(config(), Arc::new(MemoryStorage::new()));
    viewer.on_document_loaded(&backend);
    viewer.set_viewport_height(900.0);
    viewer.materialize(&backend).unwrap();

    let layout = viewer.viewport().page_layout(0).unwrap();
    assert_eq!(layout.size, 792.0);
    assert_eq!(viewer.viewport().page_start(1), 32.0 + 792.0 + 16.0);
}

#[test]
fn viewer_state_persists_to_files() {
    let dir = tempdir().unwrap();
    let backend = FakeBackend {
        name: "report.pdf",
        pages: 40,
    };

    {
        let storage = Arc::new(FileStorage::new(dir.path().to_path_buf()).unwrap());
        let mut viewer = Viewer::new(config(), storage);
        viewer.on_document_loaded(&backend);
        viewer.set_scale(1.3);
        let offset = viewer.offset_for_page(20, Alignment::Start);
        assert_eq!(viewer.on_scroll(offset), Some(21));
    }

    let storage = Arc::new(FileStorage::new(dir.path().to_path_buf()).unwrap());
    let mut viewer = Viewer::new(config(), storage);
    viewer.on_document_loaded(&backend);
    assert_eq!(viewer.current_page(), 21);
    assert_eq!(viewer.state().scale, 1.3);
    assert_eq!(viewer.page_count(), 40);
}

#[tokio::test]
async fn navigation_suppresses_scroll_events_until_done() {
    let backend = FakeBackend {
        name: "long.pdf",
        pages: 300,
    };
    let mut viewer = Viewer::new(config(), Arc::new(MemoryStorage::new()));
    viewer.on_document_loaded(&backend);
    let controller = NavigationController::new(viewer);

    let plan = controller
        .viewer()
        .begin_navigation(NavigationRequest::page(250).smooth());
    assert_eq!(controller.viewer().on_scroll(5000.0), None);
    let state = controller.viewer().finish_navigation(&plan);
    assert_eq!(state.current_page, 250);
    assert!(controller.viewer().on_scroll(0.0).is_some());

    let mut surface = RecordingSurface::default();
    let state = controller.go_to_page(&mut surface, 7).await;
    assert_eq!(state.current_page, 7);
    assert_eq!(surface.instructions.len(), 1);
    assert_eq!(surface.instructions[0].behavior, ScrollBehavior::Snap);
}

#[tokio::test]
async fn jumping_to_a_bookmark_restores_its_page() {
    let backend = FakeBackend {
        name: "notes.pdf",
        pages: 20,
    };
    let mut viewer = Viewer::new(config(), Arc::new(MemoryStorage::new()));
    viewer.on_document_loaded(&backend);
    viewer.set_viewport_height(900.0);
    viewer.materialize(&backend).unwrap();
    viewer.on_selection_changed(Some(cross_run_selection()));
    let bookmark = viewer.bookmark_current_selection().unwrap();

    let controller = NavigationController::new(viewer);
    let mut surface = RecordingSurface::default();
    controller.go_to_page(&mut surface, 15).await;

    let state = controller
        .jump_to_bookmark(&mut surface, bookmark.id)
        .await
        .unwrap();
    assert_eq!(state.current_page, 2);
    assert_eq!(state.scroll_offset, bookmark.scroll_offset);
}

#[test]
fn hub_subscription_feeds_the_viewer_until_dropped() {
    let backend = FakeBackend {
        name: "hub.pdf",
        pages: 3,
    };
    let mut viewer = Viewer::new(config(), Arc::new(MemoryStorage::new()));
    viewer.on_document_loaded(&backend);
    let controller = NavigationController::new(viewer);
    let hub = SelectionHub::new();

    let subscription = controller.attach_selection(&hub);
    let selection = cross_run_selection();
    hub.publish(Some(&selection));
    assert!(controller.viewer().can_bookmark_selection());

    drop(subscription);
    hub.publish(None);
    assert!(controller.viewer().can_bookmark_selection());
    assert_eq!(hub.subscriber_count(), 0);
}
