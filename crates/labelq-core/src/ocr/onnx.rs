//! Recognition with `pure-onnx-ocr` (pure Rust, no external runtime).

use std::cmp::Ordering;
use std::path::Path;
use std::time::Instant;

use image::DynamicImage;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::Recognizer;
use crate::error::OcrError;

/// Vertical band height (pixels) that counts as one text line.
const LINE_BAND: f64 = 20.0;

/// Detection + recognition models loaded from a model directory.
pub struct OnnxRecognizer {
    engine: Mutex<pure_onnx_ocr::engine::OcrEngine>,
    keep_unk: bool,
}

impl OnnxRecognizer {
    /// Load `det.onnx`, `latin_rec.onnx` and `latin_dict.txt` from `model_dir`.
    pub fn from_dir(model_dir: &Path, keep_unk: bool) -> Result<Self, OcrError> {
        let det_path = model_dir.join("det.onnx");
        let rec_path = model_dir.join("latin_rec.onnx");
        let dict_path = model_dir.join("latin_dict.txt");

        let engine = pure_onnx_ocr::engine::OcrEngineBuilder::new()
            .det_model_path(&det_path)
            .rec_model_path(&rec_path)
            .dictionary_path(&dict_path)
            .build()
            .map_err(|e| OcrError::ModelLoad(format!("{}: {}", model_dir.display(), e)))?;

        info!("Loaded ONNX OCR models from {}", model_dir.display());
        Ok(Self {
            engine: Mutex::new(engine),
            keep_unk,
        })
    }
}

impl Recognizer for OnnxRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let start = Instant::now();
        let results = self
            .engine
            .lock()
            .run_from_image(image)
            .map_err(|e| OcrError::Recognition(e.to_string()))?;

        let mut lines: Vec<((f64, f64), String)> = results
            .iter()
            .map(|r| {
                let text = if self.keep_unk {
                    r.text.clone()
                } else {
                    r.text.replace("[UNK]", " ")
                };
                (top_left(&r.bounding_box), text)
            })
            .collect();
        lines.sort_by(|(a, _), (b, _)| reading_order(*a, *b));

        debug!(
            "ONNX OCR: {} regions in {}ms",
            lines.len(),
            start.elapsed().as_millis()
        );

        Ok(lines
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Smallest x and y of a detected region.
fn top_left(polygon: &pure_onnx_ocr::Polygon<f64>) -> (f64, f64) {
    polygon
        .exterior()
        .coords()
        .fold((f64::INFINITY, f64::INFINITY), |(x, y), c| (x.min(c.x), y.min(c.y)))
}

/// Top-to-bottom by line band, then left-to-right.
fn reading_order((ax, ay): (f64, f64), (bx, by): (f64, f64)) -> Ordering {
    let band_a = (ay / LINE_BAND) as i64;
    let band_b = (by / LINE_BAND) as i64;
    band_a
        .cmp(&band_b)
        .then_with(|| ax.partial_cmp(&bx).unwrap_or(Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_order_groups_lines() {
        let mut boxes = vec![(105.0, 42.0), (10.0, 45.0), (300.0, 5.0)];
        boxes.sort_by(|a, b| reading_order(*a, *b));
        assert_eq!(boxes, vec![(300.0, 5.0), (10.0, 45.0), (105.0, 42.0)]);
    }

    #[test]
    fn test_missing_models_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            OnnxRecognizer::from_dir(dir.path(), false),
            Err(OcrError::ModelLoad(_))
        ));
    }
}
