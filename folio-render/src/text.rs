use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use folio_core::{
    DocumentBackend, DocumentHandle, DocumentIdentity, DocumentProvider, DocumentSource,
    PageSize, RenderImage, RenderOptions, RenderRequest, RenderedPage, TextRun, Transform,
};
use tracing::{debug, instrument};

const PAGE_WIDTH: f64 = 612.0;
const PAGE_HEIGHT: f64 = 792.0;
const MARGIN: f64 = 72.0;
const LINE_HEIGHT: f64 = 14.0;
const PAGE_BREAK: char = '\x0c';

#[derive(Debug, Default)]
pub struct TextDocumentProvider;

impl TextDocumentProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentProvider for TextDocumentProvider {
    async fn open(
        &self,
        source: DocumentSource,
        _options: RenderOptions,
    ) -> Result<Arc<dyn DocumentBackend>> {
        let bytes = match source {
            DocumentSource::Path(path) => {
                fs::read(&path).with_context(|| format!("failed to read {:?}", path))?
            }
            DocumentSource::Bytes(bytes) => bytes,
        };
        Ok(Arc::new(TextDocument::from_bytes(&bytes)?))
    }
}

/// Plain text split into pages on form feeds; every non-blank line is one run.
pub struct TextDocument {
    identity: DocumentIdentity,
    pages: Vec<Vec<String>>,
}

impl TextDocument {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).context("document is not valid UTF-8")?;
        let pages: Vec<Vec<String>> = text
            .split(PAGE_BREAK)
            .map(|page| page.lines().map(str::to_owned).collect())
            .collect();
        debug!(pages = pages.len(), "parsed text document");
        Ok(Self {
            identity: DocumentIdentity::from_bytes(bytes),
            pages,
        })
    }

    fn runs(&self, page_index: usize) -> Vec<TextRun> {
        let Some(lines) = self.pages.get(page_index) else {
            return Vec::new();
        };
        lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .enumerate()
            .map(|(run_index, (line_index, line))| TextRun {
                page_index,
                text: line.clone(),
                transform: Transform::new(
                    1.0,
                    0.0,
                    0.0,
                    1.0,
                    MARGIN,
                    PAGE_HEIGHT - MARGIN - LINE_HEIGHT * line_index as f64,
                ),
                run_index,
            })
            .collect()
    }
}

impl DocumentHandle for TextDocument {
    fn fingerprint(&self) -> DocumentIdentity {
        self.identity.clone()
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl DocumentBackend for TextDocument {
    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderedPage> {
        anyhow::ensure!(
            request.page_index < self.pages.len(),
            "page {} out of range",
            request.page_index
        );
        let scale = request.scale.max(0.1);
        let width = (PAGE_WIDTH * scale).ceil() as u32;
        let height = (PAGE_HEIGHT * scale).ceil() as u32;

        Ok(RenderedPage {
            page_index: request.page_index,
            image: RenderImage {
                width,
                height,
                pixels: vec![255; width as usize * height as usize * 4],
            },
            size: PageSize {
                width: PAGE_WIDTH,
                height: PAGE_HEIGHT,
            },
            runs: self.runs(request.page_index),
        })
    }
}
