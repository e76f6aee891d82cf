use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::RenderedPage;

/// Rendered pages kept around while they stay near the current page.
#[derive(Debug)]
pub struct RenderCache {
    entries: HashMap<CacheKey, Arc<RenderedPage>>,
    capacity: usize,
}

impl RenderCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, page_index: usize, scale: f64) -> Option<Arc<RenderedPage>> {
        self.entries
            .get(&CacheKey::new(page_index, scale))
            .cloned()
    }

    /// Inserts `page`, then evicts over capacity: entries rendered at another scale go first,
    /// then those farthest from `reference_page`.
    pub fn insert(&mut self, page: RenderedPage, scale: f64, reference_page: usize) -> Arc<RenderedPage> {
        let key = CacheKey::new(page.page_index, scale);
        let page = Arc::new(page);
        self.entries.insert(key, Arc::clone(&page));

        if self.entries.len() > self.capacity {
            let mut keys: Vec<_> = self.entries.keys().copied().collect();
            keys.sort_by_key(|k| (k.scale_milli != key.scale_milli, k.distance(reference_page)));
            for stale in keys.into_iter().skip(self.capacity) {
                self.entries.remove(&stale);
            }
        }
        page
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
struct CacheKey {
    page_index: usize,
    scale_milli: u32,
}

impl CacheKey {
    fn new(page_index: usize, scale: f64) -> Self {
        Self {
            page_index,
            scale_milli: quantize_scale(scale),
        }
    }

    fn distance(&self, reference_page: usize) -> usize {
        self.page_index.abs_diff(reference_page)
    }
}

fn quantize_scale(scale: f64) -> u32 {
    let scaled = (scale * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f64 {
        u32::MAX
    } else {
        scaled as u32
    }
}
