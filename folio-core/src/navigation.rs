use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::bookmarks::Bookmark;
use crate::command::{Command, CommandOutcome, Direction};
use crate::config::ViewerConfig;
use crate::selection::{SelectionHub, Subscription};
use crate::viewer::{Viewer, ViewerState};
use crate::viewport::{Alignment, ViewportModel};

/// Where to scroll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavigateTo {
    /// 1-indexed page number.
    Page(usize),
    Offset(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollBehavior {
    #[default]
    Snap,
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationRequest {
    pub target: NavigateTo,
    pub behavior: ScrollBehavior,
}

impl NavigationRequest {
    pub fn page(page_number: usize) -> Self {
        Self {
            target: NavigateTo::Page(page_number),
            behavior: ScrollBehavior::Snap,
        }
    }

    pub fn offset(offset: f64) -> Self {
        Self {
            target: NavigateTo::Offset(offset),
            behavior: ScrollBehavior::Snap,
        }
    }

    pub fn smooth(mut self) -> Self {
        self.behavior = ScrollBehavior::Smooth;
        self
    }
}

/// One instruction for the host's scroll primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollInstruction {
    pub offset: f64,
    pub behavior: ScrollBehavior,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollPlan {
    /// Snap issued before the final scroll when the jump is long and smooth.
    pub pre_scroll: Option<ScrollInstruction>,
    pub target: ScrollInstruction,
    /// Clamped page number for page targets.
    pub page_number: Option<usize>,
}

/// Host scroll primitive. The latest instruction always wins, so overlapping navigations need
/// no cancellation.
pub trait ScrollSurface: Send {
    fn scroll_to(&mut self, instruction: ScrollInstruction);
}

/// Resolves `request` into scroll instructions from the current position. Long smooth jumps
/// snap to a point a few pages short of the target before the final smooth scroll.
pub fn plan_navigation(
    request: NavigationRequest,
    viewport: &ViewportModel,
    current_page: usize,
    config: &ViewerConfig,
) -> ScrollPlan {
    let smooth = request.behavior == ScrollBehavior::Smooth;
    let lead = config.pre_scroll_lead;

    match request.target {
        NavigateTo::Page(page_number) => {
            let page_number = page_number.clamp(1, viewport.page_count().max(1));
            let target_index = page_number - 1;
            let distance = current_page.abs_diff(page_number);

            let pre_scroll = (smooth && distance > config.pre_scroll_threshold).then(|| {
                let lead_index = if current_page > page_number {
                    target_index + lead
                } else {
                    target_index.saturating_sub(lead)
                };
                ScrollInstruction {
                    offset: viewport.offset_for_page(lead_index, Alignment::Start),
                    behavior: ScrollBehavior::Snap,
                }
            });

            ScrollPlan {
                pre_scroll,
                target: ScrollInstruction {
                    offset: viewport.offset_for_page(target_index, Alignment::Start),
                    behavior: request.behavior,
                },
                page_number: Some(page_number),
            }
        }
        NavigateTo::Offset(offset) => {
            let offset = if offset.is_finite() { offset.max(0.0) } else { 0.0 };
            let stride = config.page_stride(viewport.scale());
            let distance = viewport.scroll_offset() - offset;
            let threshold = stride * config.pre_scroll_threshold as f64;

            let pre_scroll = (smooth && distance.abs() > threshold).then(|| ScrollInstruction {
                offset: (offset + stride * lead as f64 * distance.signum()).max(0.0),
                behavior: ScrollBehavior::Snap,
            });

            ScrollPlan {
                pre_scroll,
                target: ScrollInstruction {
                    offset,
                    behavior: request.behavior,
                },
                page_number: None,
            }
        }
    }
}

pub type SharedViewer = Arc<Mutex<Viewer>>;

/// Drives a shared [`Viewer`] from host input.
///
/// The viewer lock is never held across a suspension point, so host scroll and selection
/// callbacks can interleave with an in-flight navigation.
#[derive(Clone)]
pub struct NavigationController {
    viewer: SharedViewer,
}

impl NavigationController {
    pub fn new(viewer: Viewer) -> Self {
        Self {
            viewer: Arc::new(Mutex::new(viewer)),
        }
    }

    pub fn from_shared(viewer: SharedViewer) -> Self {
        Self { viewer }
    }

    pub fn shared(&self) -> SharedViewer {
        Arc::clone(&self.viewer)
    }

    pub fn viewer(&self) -> MutexGuard<'_, Viewer> {
        self.viewer.lock()
    }

    #[instrument(skip(self, surface))]
    pub async fn scroll_to<S>(&self, surface: &mut S, request: NavigationRequest) -> ViewerState
    where
        S: ScrollSurface + ?Sized,
    {
        let (plan, pause) = {
            let mut viewer = self.viewer.lock();
            let plan = viewer.begin_navigation(request);
            (plan, viewer.config().pre_scroll_pause())
        };

        if let Some(pre_scroll) = plan.pre_scroll {
            debug!(offset = pre_scroll.offset, "pre-scrolling");
            surface.scroll_to(pre_scroll);
            tokio::time::sleep(pause).await;
        }

        surface.scroll_to(plan.target);
        let mut viewer = self.viewer.lock();
        viewer.finish_navigation(&plan)
    }

    pub async fn go_to_page<S>(&self, surface: &mut S, page_number: usize) -> ViewerState
    where
        S: ScrollSurface + ?Sized,
    {
        self.scroll_to(surface, NavigationRequest::page(page_number))
            .await
    }

    pub async fn page_forward<S>(&self, surface: &mut S) -> ViewerState
    where
        S: ScrollSurface + ?Sized,
    {
        let next = {
            let viewer = self.viewer.lock();
            (viewer.current_page() + 1).min(viewer.page_count().max(1))
        };
        self.go_to_page(surface, next).await
    }

    pub async fn page_backward<S>(&self, surface: &mut S) -> ViewerState
    where
        S: ScrollSurface + ?Sized,
    {
        let previous = self.viewer.lock().current_page().saturating_sub(1).max(1);
        self.go_to_page(surface, previous).await
    }

    /// Scrolls a fixed distance up or down.
    pub async fn nudge<S>(&self, surface: &mut S, direction: Direction) -> ViewerState
    where
        S: ScrollSurface + ?Sized,
    {
        let offset = {
            let viewer = self.viewer.lock();
            let config = viewer.config();
            viewer.state().scroll_offset
                + config.scroll_padding * config.nudge_factor * direction.sign()
        };
        self.scroll_to(surface, NavigationRequest::offset(offset))
            .await
    }

    /// Scrolls to the stored position of a bookmark. `None` when the id is unknown.
    pub async fn jump_to_bookmark<S>(&self, surface: &mut S, id: Uuid) -> Option<ViewerState>
    where
        S: ScrollSurface + ?Sized,
    {
        let request = self.viewer.lock().bookmark_navigation(id)?;
        Some(self.scroll_to(surface, request).await)
    }

    /// Smoothly scrolls to the page of a sidebar bookmark group.
    pub async fn jump_to_page_group<S>(&self, surface: &mut S, page_index: usize) -> ViewerState
    where
        S: ScrollSurface + ?Sized,
    {
        self.scroll_to(surface, NavigationRequest::page(page_index + 1).smooth())
            .await
    }

    /// Handles a page becoming visible, following an internal link target when one was clicked.
    pub async fn on_page_visible<S>(
        &self,
        surface: &mut S,
        page_index: usize,
        clicked_page_number: Option<usize>,
    ) -> Option<ViewerState>
    where
        S: ScrollSurface + ?Sized,
    {
        let request = self
            .viewer
            .lock()
            .on_page_visible(page_index, clicked_page_number)?;
        Some(self.scroll_to(surface, request).await)
    }

    pub fn set_scale<S>(&self, surface: &mut S, scale: f64) -> Option<f64>
    where
        S: ScrollSurface + ?Sized,
    {
        let offset = self.viewer.lock().set_scale(scale)?;
        surface.scroll_to(ScrollInstruction {
            offset,
            behavior: ScrollBehavior::Snap,
        });
        Some(offset)
    }

    pub fn zoom_in<S>(&self, surface: &mut S) -> Option<f64>
    where
        S: ScrollSurface + ?Sized,
    {
        let scale = {
            let viewer = self.viewer.lock();
            viewer.state().scale + viewer.config().scale_step
        };
        self.set_scale(surface, scale)
    }

    pub fn zoom_out<S>(&self, surface: &mut S) -> Option<f64>
    where
        S: ScrollSurface + ?Sized,
    {
        let scale = {
            let viewer = self.viewer.lock();
            viewer.state().scale - viewer.config().scale_step
        };
        self.set_scale(surface, scale)
    }

    pub fn bookmark_current_selection(&self) -> Option<Bookmark> {
        self.viewer.lock().bookmark_current_selection()
    }

    /// Feeds host selection changes into the viewer until the subscription is dropped.
    pub fn attach_selection(&self, hub: &SelectionHub) -> Subscription {
        let viewer = Arc::clone(&self.viewer);
        hub.on_selection_changed(move |selection| {
            viewer.lock().on_selection_changed(selection.cloned());
        })
    }

    /// Executes a shortcut command dispatched by the host shell.
    pub async fn apply<S>(&self, surface: &mut S, command: Command) -> CommandOutcome
    where
        S: ScrollSurface + ?Sized,
    {
        match command {
            Command::NextPage => CommandOutcome::Navigated(self.page_forward(surface).await),
            Command::PrevPage => CommandOutcome::Navigated(self.page_backward(surface).await),
            Command::GotoPage { page } => {
                CommandOutcome::Navigated(self.go_to_page(surface, page).await)
            }
            Command::Nudge { direction } => {
                CommandOutcome::Navigated(self.nudge(surface, direction).await)
            }
            Command::ZoomIn => self
                .zoom_in(surface)
                .map(CommandOutcome::Rescaled)
                .unwrap_or(CommandOutcome::Ignored),
            Command::ZoomOut => self
                .zoom_out(surface)
                .map(CommandOutcome::Rescaled)
                .unwrap_or(CommandOutcome::Ignored),
            Command::BookmarkSelection => self
                .bookmark_current_selection()
                .map(CommandOutcome::BookmarkAdded)
                .unwrap_or(CommandOutcome::Ignored),
            Command::RemoveBookmark { id } => {
                if self.viewer.lock().remove_bookmark(id) {
                    CommandOutcome::BookmarkRemoved(id)
                } else {
                    CommandOutcome::Ignored
                }
            }
            Command::JumpToBookmark { id } => self
                .jump_to_bookmark(surface, id)
                .await
                .map(CommandOutcome::Navigated)
                .unwrap_or(CommandOutcome::Ignored),
        }
    }
}
