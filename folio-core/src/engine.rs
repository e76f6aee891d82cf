use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::anchor::TextRun;
use crate::identity::DocumentHandle;

/// Where a document's bytes come from.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Options handed through to the engine untouched.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Location of glyph/character-map resources, when the engine needs them.
    pub cmap_location: Option<String>,
    pub cmap_packed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: usize,
    pub scale: f64,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page_index: 0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Unscaled page dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page_index: usize,
    pub image: RenderImage,
    pub size: PageSize,
    pub runs: Vec<TextRun>,
}

pub trait DocumentBackend: DocumentHandle + Send + Sync {
    fn render_page(&self, request: RenderRequest) -> Result<RenderedPage>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(
        &self,
        source: DocumentSource,
        options: RenderOptions,
    ) -> Result<Arc<dyn DocumentBackend>>;
}
