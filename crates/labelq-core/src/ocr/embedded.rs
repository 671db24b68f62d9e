//! Rendering from embedded page images.
//!
//! Scanned labels usually carry one full-page image per page. This renderer
//! picks the largest image drawn on each page instead of rasterizing, so it
//! needs no external tool.

use std::path::Path;

use image::DynamicImage;
use tracing::{debug, warn};

use super::{PageRenderer, RenderedPage};
use crate::error::OcrError;
use crate::pdf::PdfDocument;

#[derive(Debug, Clone, Default)]
pub struct EmbeddedImageRenderer {
    max_pages: usize,
}

impl EmbeddedImageRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect at most `max_pages` pages (0 = all).
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }
}

impl PageRenderer for EmbeddedImageRenderer {
    fn render(&self, path: &Path) -> Result<Vec<RenderedPage>, OcrError> {
        let pdf = PdfDocument::open(path).map_err(|e| OcrError::Render(e.to_string()))?;

        let limit = if self.max_pages == 0 {
            usize::MAX
        } else {
            self.max_pages
        };

        let mut rendered = Vec::new();
        for page in pdf.page_numbers().into_iter().take(limit) {
            let images = match pdf.page_images(page) {
                Ok(images) => images,
                Err(e) => {
                    warn!("Page {}: image extraction failed: {}", page, e);
                    rendered.push(Err(OcrError::Render(format!("page {}: {}", page, e))));
                    continue;
                }
            };
            match images.into_iter().max_by_key(pixel_count) {
                Some(image) => rendered.push(Ok(image)),
                None => debug!("Page {} has no embedded image", page),
            }
        }
        Ok(rendered)
    }
}

fn pixel_count(image: &DynamicImage) -> u64 {
    u64::from(image.width()) * u64::from(image.height())
}
