use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use folio_core::DocumentProvider;

#[cfg(feature = "pdf")]
mod pdfium;
mod text;

#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumProvider, PDFIUM_LIBRARY_ENV};
pub use text::{TextDocument, TextDocumentProvider};

/// Picks a provider from the file extension. Anything that is not plain text goes to pdfium.
pub fn provider_for_path(path: &Path) -> Result<Arc<dyn DocumentProvider>> {
    let is_text = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);
    if is_text {
        return Ok(Arc::new(TextDocumentProvider::new()));
    }
    pdf_provider()
}

#[cfg(feature = "pdf")]
fn pdf_provider() -> Result<Arc<dyn DocumentProvider>> {
    Ok(Arc::new(PdfiumProvider::new()?))
}

#[cfg(not(feature = "pdf"))]
fn pdf_provider() -> Result<Arc<dyn DocumentProvider>> {
    anyhow::bail!("PDF support is disabled; rebuild folio-render with the `pdf` feature")
}
