//! OCR fallback stages.
//!
//! OCR is split in two pluggable steps: a [`PageRenderer`] rasterizes a
//! document into one image per page, and a [`Recognizer`] turns one image
//! into plain text. The text extractor runs them in page order.

mod embedded;
#[cfg(feature = "native")]
mod onnx;
mod poppler;
mod tesseract;

pub use embedded::EmbeddedImageRenderer;
#[cfg(feature = "native")]
pub use onnx::OnnxRecognizer;
pub use poppler::PopplerRenderer;
pub use tesseract::TesseractRecognizer;

use std::path::Path;

use image::DynamicImage;

use crate::error::OcrError;
use crate::models::config::{OcrConfig, RecognizerKind, RendererKind};

/// One rendered page, or why that page alone could not be rendered.
pub type RenderedPage = Result<DynamicImage, OcrError>;

/// Rasterizes a document, one entry per page, in page order.
///
/// The outer error means nothing could be rendered at all.
pub trait PageRenderer: Send + Sync {
    fn render(&self, path: &Path) -> Result<Vec<RenderedPage>, OcrError>;
}

/// Recognizes the text on one page image.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

/// Build the renderer selected in `config`.
pub fn renderer_from_config(config: &OcrConfig) -> Box<dyn PageRenderer> {
    match config.renderer {
        RendererKind::Poppler => Box::new(
            PopplerRenderer::new(&config.pdftoppm_cmd)
                .with_dpi(config.render_dpi)
                .with_max_pages(config.max_pages),
        ),
        RendererKind::Embedded => Box::new(EmbeddedImageRenderer::new().with_max_pages(config.max_pages)),
    }
}

/// Build the recognizer selected in `config`.
///
/// The ONNX recognizer loads its models eagerly, so this can fail.
pub fn recognizer_from_config(config: &OcrConfig) -> Result<Box<dyn Recognizer>, OcrError> {
    match config.recognizer {
        RecognizerKind::Tesseract => Ok(Box::new(
            TesseractRecognizer::new(&config.tesseract_cmd).with_lang(&config.tesseract_lang),
        )),
        #[cfg(feature = "native")]
        RecognizerKind::Onnx => Ok(Box::new(OnnxRecognizer::from_dir(
            &config.model_dir,
            config.keep_unk,
        )?)),
        #[cfg(not(feature = "native"))]
        RecognizerKind::Onnx => Err(OcrError::ModelLoad(
            "ONNX recognizer requires the `native` feature".to_string(),
        )),
    }
}

/// Run `cmd` and return its stdout, mapping spawn failures and non-zero exits.
pub(crate) fn run_tool(cmd: &mut std::process::Command) -> Result<Vec<u8>, OcrError> {
    let tool = cmd.get_program().to_string_lossy().into_owned();
    let output = cmd.output().map_err(|e| OcrError::Tool {
        tool: tool.clone(),
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(OcrError::Tool {
            tool,
            reason: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output.stdout)
}
