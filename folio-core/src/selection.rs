use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::anchor::SelectionRange;

/// Role of a host node on the path from a selection endpoint up to the document root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Rendered text layer of one page.
    TextLayer { page_index: usize },
    /// Wrapper the renderer inserts between a text layer and its runs.
    MarkedContent,
    /// Element holding the text of a single run.
    TextSpan,
    /// Toolbar, menu or sidebar chrome.
    Control,
    /// Input, text area or any content-editable element.
    Editable,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEndpoint {
    /// Host identity of the container node; equal ids mean the same container.
    pub node_id: u64,
    /// Ancestors from the nearest outward.
    pub ancestors: Vec<NodeRole>,
    pub container_text: String,
    /// Character offset inside `container_text`.
    pub offset: usize,
    /// Distance of the container from the top of its page.
    pub offset_top: f64,
}

impl SelectionEndpoint {
    /// Page of the text layer this endpoint sits in, looking through run wrappers only.
    pub fn text_layer_page(&self) -> Option<usize> {
        self.ancestors
            .iter()
            .find(|role| !matches!(role, NodeRole::TextSpan | NodeRole::MarkedContent))
            .and_then(|role| match role {
                NodeRole::TextLayer { page_index } => Some(*page_index),
                _ => None,
            })
    }
}

/// Snapshot of the host's live selection.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSelection {
    pub anchor: Option<SelectionEndpoint>,
    pub focus: Option<SelectionEndpoint>,
    /// Stringified selection as the host reports it.
    pub text: String,
    /// The focus precedes the anchor in document order.
    pub backward: bool,
}

impl HostSelection {
    /// Endpoints in document order.
    pub fn ordered(&self) -> Option<(&SelectionEndpoint, &SelectionEndpoint)> {
        let anchor = self.anchor.as_ref()?;
        let focus = self.focus.as_ref()?;
        Some(if self.backward {
            (focus, anchor)
        } else {
            (anchor, focus)
        })
    }
}

/// A selection is bookmarkable when both ends sit in a rendered text layer and it contains
/// more than whitespace.
pub fn classify(selection: &HostSelection) -> bool {
    let (Some(anchor), Some(focus)) = (&selection.anchor, &selection.focus) else {
        return false;
    };
    anchor.text_layer_page().is_some()
        && focus.text_layer_page().is_some()
        && !selection.text.trim().is_empty()
}

/// Whether keyboard shortcuts should be left to a focused input instead of the viewer.
pub fn is_editable_target(ancestors: &[NodeRole]) -> bool {
    ancestors.first() == Some(&NodeRole::Editable)
}

/// Host side of the selection: lets the tracker re-read the live selection on demand.
pub trait SelectionSource {
    fn current_selection(&self) -> Option<HostSelection>;
}

#[derive(Debug, Default)]
pub struct SelectionTracker {
    live: Option<HostSelection>,
    bookmarkable: bool,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reclassifies on every change notification. Returns the new classification.
    pub fn on_selection_changed(&mut self, selection: Option<HostSelection>) -> bool {
        self.bookmarkable = selection.as_ref().map(classify).unwrap_or(false);
        trace!(bookmarkable = self.bookmarkable, "selection changed");
        self.live = selection;
        self.bookmarkable
    }

    pub fn refresh(&mut self, source: &dyn SelectionSource) -> bool {
        self.on_selection_changed(source.current_selection())
    }

    pub fn is_bookmarkable(&self) -> bool {
        self.bookmarkable
    }

    pub fn live_selection(&self) -> Option<&HostSelection> {
        self.live.as_ref()
    }

    /// Page-local range of a bookmarkable selection, keyed to the page its start lies on.
    pub fn range(&self) -> Option<SelectionRange> {
        if !self.bookmarkable {
            return None;
        }
        let selection = self.live.as_ref()?;
        let (start, end) = selection.ordered()?;
        Some(SelectionRange {
            page_index: start.text_layer_page()?,
            start_text: start.container_text.clone(),
            start_offset: start.offset,
            end_text: end.container_text.clone(),
            end_offset: end.offset,
            single_container: start.node_id == end.node_id,
            text: selection.text.clone(),
            start_offset_top: start.offset_top,
        })
    }

    pub fn clear(&mut self) {
        self.live = None;
        self.bookmarkable = false;
    }
}

type Handler = Box<dyn FnMut(Option<&HostSelection>) + Send>;
type HandlerList = Mutex<Vec<(u64, Handler)>>;

/// Fan-out of host selection-change notifications.
#[derive(Default)]
pub struct SelectionHub {
    handlers: Arc<HandlerList>,
    next_id: AtomicU64,
}

impl SelectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` until the returned [`Subscription`] is dropped.
    pub fn on_selection_changed<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(Option<&HostSelection>) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, Box::new(handler)));
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Delivers a change to every handler. Handlers must not subscribe or unsubscribe from
    /// inside the callback.
    pub fn publish(&self, selection: Option<&HostSelection>) {
        for (_, handler) in self.handlers.lock().iter_mut() {
            handler(selection);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

/// Detaches its handler from the [`SelectionHub`] when dropped.
#[must_use = "dropping a subscription detaches the handler immediately"]
pub struct Subscription {
    id: u64,
    handlers: Weak<HandlerList>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
