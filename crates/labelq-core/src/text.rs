//! Best-effort plain text from a label document.
//!
//! Embedded text is tried first. When that yields nothing but whitespace the
//! document is rasterized page by page and run through OCR. Failures never
//! propagate: each one is logged and recorded as a diagnostic, and the caller
//! decides what an empty result means.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::OcrError;
use crate::models::config::OcrConfig;
use crate::ocr::{self, PageRenderer, Recognizer};
use crate::pdf::PdfDocument;

/// Separator placed between page texts.
const PAGE_SEPARATOR: &str = "\n";

/// Which stage produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSource {
    /// Text embedded in the document.
    Native,
    /// Optical recognition of rendered pages.
    Ocr,
    /// No stage produced any text.
    None,
}

impl fmt::Display for TextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TextSource::Native => "native",
            TextSource::Ocr => "ocr",
            TextSource::None => "none",
        })
    }
}

/// Outcome of text extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextExtraction {
    pub text: String,
    pub source: TextSource,
    /// One entry per internal failure, in the order they happened.
    pub diagnostics: Vec<String>,
}

impl TextExtraction {
    /// True when the text is empty or whitespace only.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Anything that can turn a document path into text.
pub trait DocumentReader: Send + Sync {
    fn read_text(&self, path: &Path) -> TextExtraction;
}

/// The OCR fallback: one renderer, one recognizer.
struct OcrStage {
    renderer: Box<dyn PageRenderer>,
    recognizer: Box<dyn Recognizer>,
}

/// Native text extraction with an optional OCR fallback.
pub struct TextExtractor {
    ocr: Option<OcrStage>,
}

impl TextExtractor {
    /// Embedded text only.
    pub fn native_only() -> Self {
        Self { ocr: None }
    }

    /// Embedded text, then OCR with the given stages.
    pub fn with_ocr(renderer: Box<dyn PageRenderer>, recognizer: Box<dyn Recognizer>) -> Self {
        Self {
            ocr: Some(OcrStage {
                renderer,
                recognizer,
            }),
        }
    }

    /// Build the extractor described by `config`.
    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        if !config.enabled {
            return Ok(Self::native_only());
        }
        Ok(Self::with_ocr(
            ocr::renderer_from_config(config),
            ocr::recognizer_from_config(config)?,
        ))
    }

    /// Extract text from the document at `path`.
    pub fn extract(&self, path: &Path) -> TextExtraction {
        let mut diagnostics = Vec::new();

        let native = native_text(path, &mut diagnostics);
        if !native.trim().is_empty() {
            return TextExtraction {
                text: native,
                source: TextSource::Native,
                diagnostics,
            };
        }

        if let Some(stage) = &self.ocr {
            debug!("No embedded text in {}, falling back to OCR", path.display());
            let text = stage.run(path, &mut diagnostics);
            if !text.trim().is_empty() {
                return TextExtraction {
                    text,
                    source: TextSource::Ocr,
                    diagnostics,
                };
            }
        }

        TextExtraction {
            text: String::new(),
            source: TextSource::None,
            diagnostics,
        }
    }
}

impl DocumentReader for TextExtractor {
    fn read_text(&self, path: &Path) -> TextExtraction {
        self.extract(path)
    }
}

impl OcrStage {
    fn run(&self, path: &Path, diagnostics: &mut Vec<String>) -> String {
        let pages = match self.renderer.render(path) {
            Ok(pages) => pages,
            Err(e) => {
                note(diagnostics, path, format!("page rendering failed: {}", e));
                return String::new();
            }
        };

        pages
            .iter()
            .enumerate()
            .map(|(index, page)| {
                let recognized = page
                    .as_ref()
                    .map_err(|e| format!("page {} could not be rendered: {}", index + 1, e))
                    .and_then(|image| {
                        self.recognizer
                            .recognize(image)
                            .map_err(|e| format!("OCR of page {} failed: {}", index + 1, e))
                    });
                recognized.unwrap_or_else(|message| {
                    note(diagnostics, path, message);
                    String::new()
                })
            })
            .collect::<Vec<_>>()
            .join(PAGE_SEPARATOR)
    }
}

/// Per-page embedded text, then a whole-document pass if that was blank.
fn native_text(path: &Path, diagnostics: &mut Vec<String>) -> String {
    let pdf = match PdfDocument::open(path) {
        Ok(pdf) => pdf,
        Err(e) => {
            note(diagnostics, path, format!("cannot open document: {}", e));
            return String::new();
        }
    };

    let text = pdf
        .page_numbers()
        .into_iter()
        .map(|page| match pdf.page_text(page) {
            Ok(text) => text,
            Err(e) => {
                note(diagnostics, path, format!("page {}: {}", page, e));
                String::new()
            }
        })
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR);

    if !text.trim().is_empty() {
        return text;
    }

    match pdf.full_text() {
        Ok(text) => text,
        Err(e) => {
            note(diagnostics, path, format!("whole-document pass: {}", e));
            String::new()
        }
    }
}

fn note(diagnostics: &mut Vec<String>, path: &Path, message: String) {
    warn!("{}: {}", path.display(), message);
    diagnostics.push(message);
}
