//! PDF access for the text extractor.
//!
//! [`PdfDocument`] wraps a parsed lopdf document and exposes the pieces the
//! extraction chain needs: per-page embedded text, a whole-document text pass
//! through `pdf-extract`, and the raster images embedded in each page.

mod document;
mod images;

pub use document::PdfDocument;

#[cfg(test)]
pub(crate) use document::tests::{font_pdf, text_pdf};

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, crate::error::PdfError>;
