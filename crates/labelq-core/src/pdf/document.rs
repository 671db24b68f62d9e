//! Loaded PDF document.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use image::DynamicImage;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace};

use super::Result;
use super::images::decode_image_xobject;
use crate::error::PdfError;

/// A parsed, decrypted PDF.
pub struct PdfDocument {
    document: Document,
    /// Decrypted bytes, fed to `pdf-extract`.
    raw_data: Vec<u8>,
}

impl PdfDocument {
    /// Read and parse a PDF from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Parse a PDF held in memory.
    ///
    /// Documents encrypted with an empty user password are decrypted; any
    /// other encryption yields [`PdfError::Encrypted`].
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let mut document = Document::load_mem(&data).map_err(|e| PdfError::Parse(e.to_string()))?;

        let raw_data = if document.is_encrypted() {
            document.decrypt("").map_err(|_| PdfError::Encrypted)?;
            debug!("Decrypted PDF with empty password");

            let mut decrypted = Vec::new();
            document
                .save_to(&mut decrypted)
                .map_err(|e| PdfError::Parse(format!("failed to re-serialize decrypted PDF: {}", e)))?;
            decrypted
        } else {
            data
        };

        if document.get_pages().is_empty() {
            return Err(PdfError::NoPages);
        }

        Ok(Self { document, raw_data })
    }

    /// Number of pages.
    pub fn page_count(&self) -> u32 {
        self.document.get_pages().len() as u32
    }

    /// Page numbers (1-indexed) in document order.
    pub fn page_numbers(&self) -> Vec<u32> {
        self.document.get_pages().keys().copied().collect()
    }

    /// Embedded text of one page.
    pub fn page_text(&self, page: u32) -> Result<String> {
        if !self.document.get_pages().contains_key(&page) {
            return Err(PdfError::InvalidPage(page));
        }
        self.document
            .extract_text(&[page])
            .map_err(|e| PdfError::TextExtraction(e.to_string()))
    }

    /// Whole-document text through `pdf-extract`.
    ///
    /// Handles some font encodings the per-page pass does not. `pdf-extract`
    /// panics on font dictionaries it does not support (Type3, Type0 without
    /// descendants); those panics come back as [`PdfError::TextExtraction`].
    pub fn full_text(&self) -> Result<String> {
        let data = &self.raw_data;
        match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(data))) {
            Ok(result) => result.map_err(|e| PdfError::TextExtraction(e.to_string())),
            Err(payload) => Err(PdfError::TextExtraction(format!(
                "pdf-extract panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    /// Raster images drawn on one page, in resource order.
    pub fn page_images(&self, page: u32) -> Result<Vec<DynamicImage>> {
        let pages = self.document.get_pages();
        let page_id = pages.get(&page).ok_or(PdfError::InvalidPage(page))?;

        let Some(resources) = self.page_resources(*page_id) else {
            trace!("Page {} has no resources", page);
            return Ok(Vec::new());
        };

        let mut images = Vec::new();
        if let Ok(xobjects) = resources.get(b"XObject") {
            if let Ok((_, Object::Dictionary(xobjects))) = self.document.dereference(xobjects) {
                for (name, reference) in xobjects.iter() {
                    let Ok((_, object)) = self.document.dereference(reference) else {
                        continue;
                    };
                    match decode_image_xobject(&self.document, object) {
                        Some(image) => images.push(image),
                        None => trace!(
                            "Skipping XObject {} on page {}",
                            String::from_utf8_lossy(name),
                            page
                        ),
                    }
                }
            }
        }

        debug!("Page {}: {} embedded images", page, images.len());
        Ok(images)
    }

    /// Resources dictionary of a page, following inheritance up the page tree.
    fn page_resources(&self, page_id: ObjectId) -> Option<Dictionary> {
        let mut node_id = page_id;
        loop {
            let Ok(Object::Dictionary(node)) = self.document.get_object(node_id) else {
                return None;
            };
            if let Ok(resources) = node.get(b"Resources") {
                if let Ok((_, Object::Dictionary(resources))) = self.document.dereference(resources) {
                    return Some(resources.clone());
                }
            }
            match node.get(b"Parent") {
                Ok(Object::Reference(parent)) => node_id = *parent,
                _ => return None,
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
