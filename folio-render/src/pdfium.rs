use std::convert::TryFrom;
use std::fs;
use std::mem;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use folio_core::{
    DocumentBackend, DocumentHandle, DocumentIdentity, DocumentProvider, DocumentSource,
    PageSize, RenderImage, RenderOptions, RenderRequest, RenderedPage, TextRun, Transform,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

/// Environment variable naming a pdfium shared library to bind before the defaults.
pub const PDFIUM_LIBRARY_ENV: &str = "FOLIO_PDFIUM_LIBRARY_PATH";

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(
        &self,
        source: DocumentSource,
        options: RenderOptions,
    ) -> Result<Arc<dyn DocumentBackend>> {
        if options.cmap_location.is_some() {
            debug!("pdfium ships its own character maps, ignoring cmap location");
        }
        let bytes = match source {
            DocumentSource::Path(path) => {
                fs::read(&path).with_context(|| format!("failed to read {:?}", path))?
            }
            DocumentSource::Bytes(bytes) => bytes,
        };
        Ok(Arc::new(PdfiumDocument::open(
            Arc::clone(&self.pdfium),
            bytes,
        )?))
    }
}

struct PdfiumDocument {
    identity: DocumentIdentity,
    page_count: usize,
    bytes: Vec<u8>,
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn open(pdfium: Arc<Pdfium>, bytes: Vec<u8>) -> Result<Self> {
        let identity = DocumentIdentity::from_bytes(&bytes);
        let page_count = {
            let document = pdfium
                .load_pdf_from_byte_slice(&bytes, None)
                .context("failed to open document")?;
            usize::try_from(document.pages().len()).unwrap_or_default()
        };
        debug!(%identity, pages = page_count, "opened document");
        Ok(Self {
            identity,
            page_count,
            bytes,
            document: Mutex::new(None),
            pdfium,
        })
    }

    fn load_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(self.bytes.clone(), None)
            .context("failed to load document")?;
        // SAFETY: the PdfDocument borrows the bindings owned by self.pdfium. It is only stored in
        // self.document, which is declared before pdfium and therefore dropped first, so the
        // borrow never outlives the bindings.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        let document = match &mut *guard {
            Some(document) => document,
            slot @ None => slot.insert(self.load_document()?),
        };
        f(document)
    }

    fn render_internal(
        &self,
        document: &PdfDocument<'_>,
        request: &RenderRequest,
    ) -> Result<RenderedPage> {
        let page_index: PdfPageIndex = request
            .page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", request.page_index))?;
        let page = document
            .pages()
            .get(page_index)
            .with_context(|| format!("page {} out of range", request.page_index))?;

        let size = PageSize {
            width: f64::from(page.width().value),
            height: f64::from(page.height().value),
        };
        let runs = match page.text() {
            Ok(text) => text_runs(&text, request.page_index),
            Err(err) => {
                warn!(?err, page = request.page_index, "failed to extract text");
                Vec::new()
            }
        };

        let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(0.1) as f32);
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page_index))?;
        let image: image::RgbaImage = bitmap.as_image().to_rgba8();
        let pixels = image.into_raw();

        Ok(RenderedPage {
            page_index: request.page_index,
            image: RenderImage {
                width: u32::try_from(bitmap.width()).unwrap_or_default(),
                height: u32::try_from(bitmap.height()).unwrap_or_default(),
                pixels,
            },
            size,
            runs,
        })
    }
}

impl DocumentHandle for PdfiumDocument {
    fn fingerprint(&self) -> DocumentIdentity {
        self.identity.clone()
    }

    fn page_count(&self) -> usize {
        self.page_count
    }
}

impl DocumentBackend for PdfiumDocument {
    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderedPage> {
        self.with_document(|document| self.render_internal(document, &request))
    }
}

/// One run per text segment, positioned by its bounding box in page space.
fn text_runs(text: &PdfPageText<'_>, page_index: usize) -> Vec<TextRun> {
    text.segments()
        .iter()
        .map(|segment| (segment.text(), segment.bounds()))
        .filter(|(text, _)| !text.trim().is_empty())
        .enumerate()
        .map(|(run_index, (text, bounds))| {
            let left = f64::from(bounds.left().value);
            let bottom = f64::from(bounds.bottom().value);
            TextRun {
                page_index,
                text,
                transform: Transform::new(
                    f64::from(bounds.right().value) - left,
                    0.0,
                    0.0,
                    f64::from(bounds.top().value) - bottom,
                    left,
                    bottom,
                ),
                run_index,
            }
        })
        .collect()
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match std::env::var(PDFIUM_LIBRARY_ENV) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load Pdfium from {}: {}", path, err);
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}
