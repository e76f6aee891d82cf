mod anchor;
mod bookmarks;
mod command;
mod config;
mod engine;
mod error;
mod identity;
mod navigation;
mod render_cache;
mod selection;
mod storage;
mod viewer;
mod viewport;

pub use anchor::{
    compute_anchor_hash, decode_anchors, encode_selection, highlighted_text, Anchor, AnchorHash,
    HighlightSpan, SelectionRange, TextRun, TextRunCache, Transform,
};
pub use bookmarks::{highlights_for_page, Bookmark, BookmarkHighlight, BookmarkSet, BookmarkStore};
pub use command::{Command, CommandOutcome, Direction};
pub use config::ViewerConfig;
pub use engine::{
    DocumentBackend, DocumentProvider, DocumentSource, PageSize, RenderImage, RenderOptions,
    RenderRequest, RenderedPage,
};
pub use error::{ConfigError, StorageError};
pub use identity::{DocumentHandle, DocumentIdentity, IdentityResolver, LoadedDocument};
pub use navigation::{
    plan_navigation, NavigateTo, NavigationController, NavigationRequest, ScrollBehavior,
    ScrollInstruction, ScrollPlan, ScrollSurface, SharedViewer,
};
pub use render_cache::RenderCache;
pub use selection::{
    classify, is_editable_target, HostSelection, NodeRole, SelectionEndpoint, SelectionHub,
    SelectionSource, SelectionTracker, Subscription,
};
pub use storage::{
    load_json, save_json, viewer_state_key, FileStorage, KeyValueStorage, MemoryStorage,
    Persistence, PersistentStore, BOOKMARKS_KEY, LAYOUT_KEY,
};
pub use viewer::{Viewer, ViewerEvent, ViewerState};
pub use viewport::{Alignment, PageLayout, ViewportModel, ViewportState};
