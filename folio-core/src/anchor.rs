use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

static ANCHOR_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("a8c4e2b1-0f6d-5d3e-8b71-2c9e4f5a6b0d").expect("valid namespace UUID")
});

/// Fractional digits kept when serializing transform components for hashing.
const HASH_PRECISION: i32 = 4;

/// Affine placement of a text run on its page: `[a, b, c, d, e, f]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform(pub [f64; 6]);

impl Transform {
    pub const IDENTITY: Transform = Transform([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self([a, b, c, d, e, f])
    }

    pub fn translate_y(&self) -> f64 {
        self.0[5]
    }
}

/// One positioned piece of extracted page text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub page_index: usize,
    pub text: String,
    pub transform: Transform,
    pub run_index: usize,
}

impl TextRun {
    pub fn anchor_hash(&self) -> AnchorHash {
        compute_anchor_hash(self.page_index, &self.transform)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorHash(String);

impl AnchorHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnchorHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash of a run's page index and bounding transform. Stable across rescales of the same page.
pub fn compute_anchor_hash(page_index: usize, transform: &Transform) -> AnchorHash {
    let mut canonical = page_index.to_string();
    for component in transform.0 {
        canonical.push('|');
        canonical.push_str(&format_component(component));
    }
    AnchorHash(
        Uuid::new_v5(&ANCHOR_NAMESPACE, canonical.as_bytes())
            .simple()
            .to_string(),
    )
}

fn format_component(value: f64) -> String {
    if !value.is_finite() {
        return "nan".to_owned();
    }
    let factor = 10f64.powi(HASH_PRECISION);
    let rounded = (value * factor).round() / factor;
    // -0.0 and 0.0 must hash alike
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.*}", HASH_PRECISION as usize, rounded)
}

/// Reference from a bookmark to one text run, optionally bounded to a character range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub hash: AnchorHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<usize>,
}

/// A live selection resolved to page-local text containers.
///
/// Offsets count characters within the start and end containers' text.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionRange {
    pub page_index: usize,
    pub start_text: String,
    pub start_offset: usize,
    pub end_text: String,
    pub end_offset: usize,
    /// Both ends lie in the same text container.
    pub single_container: bool,
    pub text: String,
    /// Distance of the start container from the top of its page.
    pub start_offset_top: f64,
}

impl SelectionRange {
    pub fn is_collapsed(&self) -> bool {
        self.text.is_empty() || (self.single_container && self.start_offset >= self.end_offset)
    }
}

/// Part of a rendered run to draw as highlighted.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightSpan {
    pub page_index: usize,
    pub run_index: usize,
    /// Character range within the run's text.
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Encodes `range` against the cached runs of its page.
///
/// Returns an empty list when either container cannot be matched to a cached run; the caller
/// treats that as "this selection cannot be bookmarked".
pub fn encode_selection(range: &SelectionRange, runs: &[TextRun]) -> Vec<Anchor> {
    if range.is_collapsed() {
        return Vec::new();
    }

    let page_runs: Vec<&TextRun> = runs
        .iter()
        .filter(|run| run.page_index == range.page_index)
        .collect();

    let Some(start) = page_runs
        .iter()
        .position(|run| run.text == range.start_text)
    else {
        debug!(page = range.page_index, "selection start not found in cached runs");
        return Vec::new();
    };

    let end = if range.single_container {
        Some(start)
    } else {
        page_runs[start + 1..]
            .iter()
            .position(|run| run.text == range.end_text)
            .map(|offset| start + 1 + offset)
    };
    let Some(end) = end else {
        debug!(page = range.page_index, "selection end not found in cached runs");
        return Vec::new();
    };

    let touched = &page_runs[start..=end];
    let last = touched.len() - 1;
    touched
        .iter()
        .enumerate()
        .map(|(position, run)| Anchor {
            hash: run.anchor_hash(),
            start_offset: (position == 0).then_some(range.start_offset),
            end_offset: (position == last).then_some(range.end_offset),
        })
        .collect()
}

/// Resolves anchors against the runs of a rendered page. Anchors without a matching run are
/// skipped.
pub fn decode_anchors(anchors: &[Anchor], runs: &[TextRun]) -> Vec<HighlightSpan> {
    if anchors.is_empty() || runs.is_empty() {
        return Vec::new();
    }

    let by_hash: HashMap<AnchorHash, &TextRun> =
        runs.iter().map(|run| (run.anchor_hash(), run)).collect();

    anchors
        .iter()
        .filter_map(|anchor| {
            let run = by_hash.get(&anchor.hash)?;
            let len = run.text.chars().count();
            let start = anchor.start_offset.unwrap_or(0).min(len);
            let end = anchor.end_offset.unwrap_or(len).min(len);
            if start >= end {
                return None;
            }
            Some(HighlightSpan {
                page_index: run.page_index,
                run_index: run.run_index,
                start,
                end,
                text: run.text.chars().skip(start).take(end - start).collect(),
            })
        })
        .collect()
}

/// Text covered by `spans`, in order.
pub fn highlighted_text(spans: &[HighlightSpan]) -> String {
    spans.iter().map(|span| span.text.as_str()).collect()
}

/// Text runs extracted per page, refreshed every time a page is rendered.
#[derive(Debug, Default)]
pub struct TextRunCache {
    pages: HashMap<usize, Vec<TextRun>>,
}

impl TextRunCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the runs of `page_index`, ordered by run index. Returns `true` when they differ
    /// from what was cached.
    pub fn insert(&mut self, page_index: usize, mut runs: Vec<TextRun>) -> bool {
        runs.sort_by_key(|run| run.run_index);
        if self.pages.get(&page_index) == Some(&runs) {
            return false;
        }
        self.pages.insert(page_index, runs);
        true
    }

    pub fn runs(&self, page_index: usize) -> Option<&[TextRun]> {
        self.pages.get(&page_index).map(Vec::as_slice)
    }

    pub fn contains(&self, page_index: usize) -> bool {
        self.pages.contains_key(&page_index)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}
