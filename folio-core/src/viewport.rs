use std::collections::HashMap;

use tracing::{debug, trace};

use crate::config::ViewerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Start,
    Center,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportState {
    Uninitialized,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub index: usize,
    pub start: f64,
    pub size: f64,
}

impl PageLayout {
    pub fn end(&self) -> f64 {
        self.start + self.size
    }
}

/// Virtual windowing over vertically stacked pages laid out as
/// `padding, page 0, gap, page 1, ..., page n-1, padding`.
#[derive(Debug)]
pub struct ViewportModel {
    state: ViewportState,
    page_count: usize,
    scale: f64,
    estimated_height: f64,
    gap: f64,
    padding: f64,
    overscan: usize,
    measured: HashMap<usize, f64>,
    /// Start offset of every page at the current scale.
    starts: Vec<f64>,
    sizes: Vec<f64>,
    total_size: f64,
    scroll_offset: f64,
    viewport_height: f64,
    suppressed: u32,
}

impl ViewportModel {
    pub fn new(config: &ViewerConfig) -> Self {
        Self {
            state: ViewportState::Uninitialized,
            page_count: 0,
            scale: 1.0,
            estimated_height: config.page_height,
            gap: config.page_gap,
            padding: config.scroll_padding,
            overscan: config.overscan,
            measured: HashMap::new(),
            starts: Vec::new(),
            sizes: Vec::new(),
            total_size: 0.0,
            scroll_offset: 0.0,
            viewport_height: 0.0,
            suppressed: 0,
        }
    }

    /// Moves to `Ready` once the page count is known.
    pub fn initialize(&mut self, page_count: usize, scale: f64, scroll_offset: f64) {
        self.page_count = page_count;
        self.scale = scale;
        self.measured.clear();
        self.state = if page_count == 0 {
            ViewportState::Uninitialized
        } else {
            ViewportState::Ready
        };
        self.measure();
        self.scroll_offset = sanitize_offset(scroll_offset);
        debug!(page_count, scale, offset = self.scroll_offset, "viewport initialized");
    }

    pub fn unload(&mut self) {
        self.state = ViewportState::Uninitialized;
        self.page_count = 0;
        self.measured.clear();
        self.scroll_offset = 0.0;
        self.suppressed = 0;
        self.measure();
    }

    pub fn state(&self) -> ViewportState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ViewportState::Ready
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    pub fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    pub fn total_size(&self) -> f64 {
        self.total_size
    }

    pub fn set_viewport_height(&mut self, height: f64) {
        self.viewport_height = if height.is_finite() { height.max(0.0) } else { 0.0 };
    }

    /// Records the scroll position without deriving a page, e.g. after a programmatic scroll.
    pub fn set_scroll_offset(&mut self, offset: f64) {
        self.scroll_offset = sanitize_offset(offset);
    }

    /// Records the real unscaled height of a page. Returns `true` when the layout changed.
    pub fn set_page_size(&mut self, page_index: usize, unscaled_height: f64) -> bool {
        if page_index >= self.page_count || !(unscaled_height.is_finite() && unscaled_height > 0.0)
        {
            return false;
        }
        let previous = self.measured.insert(page_index, unscaled_height);
        if previous == Some(unscaled_height) {
            return false;
        }
        self.measure();
        true
    }

    /// Recomputes every page position from measured or estimated sizes at the current scale.
    pub fn measure(&mut self) {
        self.starts.clear();
        self.sizes.clear();
        let mut cursor = self.padding;
        for index in 0..self.page_count {
            let unscaled = self
                .measured
                .get(&index)
                .copied()
                .unwrap_or(self.estimated_height);
            let size = unscaled * self.scale;
            self.starts.push(cursor);
            self.sizes.push(size);
            cursor += size;
            if index + 1 < self.page_count {
                cursor += self.gap;
            }
        }
        self.total_size = if self.page_count == 0 {
            0.0
        } else {
            cursor + self.padding
        };
    }

    pub fn clamp_index(&self, page_index: usize) -> usize {
        page_index.min(self.page_count.saturating_sub(1))
    }

    pub fn page_layout(&self, page_index: usize) -> Option<PageLayout> {
        Some(PageLayout {
            index: page_index,
            start: *self.starts.get(page_index)?,
            size: *self.sizes.get(page_index)?,
        })
    }

    pub fn page_start(&self, page_index: usize) -> f64 {
        self.page_layout(self.clamp_index(page_index))
            .map(|layout| layout.start)
            .unwrap_or(0.0)
    }

    /// Scroll offset that brings `page_index` into view with the given alignment.
    pub fn offset_for_page(&self, page_index: usize, alignment: Alignment) -> f64 {
        let Some(layout) = self.page_layout(self.clamp_index(page_index)) else {
            return 0.0;
        };
        let offset = match alignment {
            Alignment::Start => layout.start - self.padding,
            Alignment::Center => layout.start + layout.size / 2.0 - self.viewport_height / 2.0,
            Alignment::End => layout.end() - self.viewport_height,
        };
        offset.max(0.0)
    }

    /// Page considered current at `offset`: the page before the first one whose start lies past
    /// `offset + padding` plus half the height of the page under that point.
    pub fn page_at_offset(&self, offset: f64) -> usize {
        if self.page_count == 0 {
            return 0;
        }
        let anchor = offset + self.padding;
        let under = self
            .starts
            .partition_point(|start| *start <= anchor)
            .saturating_sub(1);
        let half = self.sizes.get(under).copied().unwrap_or(0.0) / 2.0;
        let past = self.starts.partition_point(|start| *start <= anchor + half);
        past.saturating_sub(1)
    }

    /// Handles a scroll event from the host. Returns the current page index, or `None` while
    /// uninitialized or while a programmatic navigation suppresses scroll events.
    pub fn on_scroll(&mut self, raw_offset: f64) -> Option<usize> {
        if !self.is_ready() || self.is_suppressed() {
            trace!(raw_offset, "scroll event ignored");
            return None;
        }
        self.scroll_offset = sanitize_offset(raw_offset);
        Some(self.page_at_offset(self.scroll_offset))
    }

    pub fn scroll_percent(&self) -> f64 {
        if self.total_size > 0.0 {
            self.scroll_offset / self.total_size
        } else {
            0.0
        }
    }

    /// Re-measures at `new_scale` and moves the offset so the same relative position stays in
    /// view. Returns the new offset.
    pub fn on_scale_change(&mut self, new_scale: f64) -> f64 {
        let percent = self.scroll_percent();
        self.scale = new_scale;
        self.measure();
        self.scroll_offset = sanitize_offset(self.total_size * percent);
        debug!(scale = new_scale, offset = self.scroll_offset, "viewport rescaled");
        self.scroll_offset
    }

    /// Pages intersecting `[offset, offset + viewport_height]`, widened by the overscan margin.
    pub fn visible_pages(&self, scroll_offset: f64, viewport_height: f64) -> Vec<usize> {
        if self.page_count == 0 || self.starts.is_empty() {
            return Vec::new();
        }
        let top = sanitize_offset(scroll_offset);
        let bottom = top + viewport_height.max(0.0);

        let first = self
            .starts
            .iter()
            .zip(&self.sizes)
            .position(|(start, size)| start + size > top)
            .unwrap_or(self.page_count - 1);
        let last = self
            .starts
            .partition_point(|start| *start < bottom)
            .saturating_sub(1)
            .max(first);

        let first = first.saturating_sub(self.overscan);
        let last = (last + self.overscan).min(self.page_count - 1);
        (first..=last).collect()
    }

    /// [`Self::visible_pages`] for the recorded offset and viewport height.
    pub fn visible_window(&self) -> Vec<usize> {
        self.visible_pages(self.scroll_offset, self.viewport_height)
    }

    pub fn begin_suppression(&mut self) {
        self.suppressed += 1;
    }

    pub fn end_suppression(&mut self) {
        self.suppressed = self.suppressed.saturating_sub(1);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed > 0
    }
}

fn sanitize_offset(offset: f64) -> f64 {
    if offset.is_finite() {
        offset.max(0.0)
    } else {
        0.0
    }
}
