//! Recognition with the `tesseract` command line tool.

use std::path::PathBuf;
use std::process::Command;

use image::{DynamicImage, ImageFormat};

use super::{Recognizer, run_tool};
use crate::error::OcrError;

/// Runs `tesseract <image> stdout -l <lang>` on each page.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    cmd: PathBuf,
    lang: String,
}

impl TesseractRecognizer {
    pub fn new(cmd: impl Into<PathBuf>) -> Self {
        Self {
            cmd: cmd.into(),
            lang: "eng".to_string(),
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let input = tempfile::Builder::new()
            .prefix("labelq-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::Recognition(e.to_string()))?;
        image
            .save_with_format(input.path(), ImageFormat::Png)
            .map_err(|e| OcrError::InvalidImage(e.to_string()))?;

        let stdout = run_tool(
            Command::new(&self.cmd)
                .arg(input.path())
                .arg("stdout")
                .arg("-l")
                .arg(&self.lang),
        )?;

        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_tool_error() {
        let recognizer = TesseractRecognizer::new("/nonexistent/bin/tesseract");
        let image = DynamicImage::new_luma8(4, 4);
        match recognizer.recognize(&image) {
            Err(OcrError::Tool { tool, .. }) => assert!(tool.ends_with("tesseract")),
            other => panic!("expected tool error, got {:?}", other),
        }
    }
}
