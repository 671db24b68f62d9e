//! Page rendering with poppler's `pdftoppm`.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use super::{PageRenderer, RenderedPage, run_tool};
use crate::error::OcrError;

/// Renders every page to PNG with `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PopplerRenderer {
    cmd: PathBuf,
    dpi: u32,
    max_pages: usize,
}

impl PopplerRenderer {
    pub fn new(cmd: impl Into<PathBuf>) -> Self {
        Self {
            cmd: cmd.into(),
            dpi: 300,
            max_pages: 0,
        }
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    /// Render at most `max_pages` pages (0 = all).
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }
}

impl PageRenderer for PopplerRenderer {
    fn render(&self, path: &Path) -> Result<Vec<RenderedPage>, OcrError> {
        let out_dir = tempfile::tempdir().map_err(|e| OcrError::Render(e.to_string()))?;
        let prefix = out_dir.path().join("page");

        let mut cmd = Command::new(&self.cmd);
        cmd.arg("-r").arg(self.dpi.to_string()).arg("-png");
        if self.max_pages > 0 {
            cmd.arg("-l").arg(self.max_pages.to_string());
        }
        cmd.arg(path).arg(&prefix);
        run_tool(&mut cmd)?;

        let pages = load_pages(out_dir.path())?;
        debug!("pdftoppm rendered {} pages from {}", pages.len(), path.display());
        Ok(pages)
    }
}

/// Decode the `page-<n>.png` files in `dir`, in page order.
///
/// A page that fails to decode is an error entry; the rest still load.
fn load_pages(dir: &Path) -> Result<Vec<RenderedPage>, OcrError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| OcrError::Render(e.to_string()))? {
        let entry = entry.map_err(|e| OcrError::Render(e.to_string()))?;
        if let Some(number) = page_number(&entry.path()) {
            files.push((number, entry.path()));
        }
    }
    // pdftoppm zero-pads page numbers by page count, so sort numerically.
    files.sort_by_key(|(number, _)| *number);

    Ok(files
        .into_iter()
        .map(|(number, file)| {
            image::open(&file).map_err(|e| {
                warn!("Rendered page {} is unreadable: {}", number, e);
                OcrError::InvalidImage(format!("page {}: {}", number, e))
            })
        })
        .collect())
}

/// Page number from a `page-<n>.png` file name.
fn page_number(file: &Path) -> Option<u32> {
    if file.extension()? != "png" {
        return None;
    }
    file.file_stem()?
        .to_str()?
        .rsplit_once('-')?
        .1
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    #[test]
    fn test_page_number_parsing() {
        assert_eq!(page_number(Path::new("/tmp/x/page-1.png")), Some(1));
        assert_eq!(page_number(Path::new("/tmp/x/page-012.png")), Some(12));
        assert_eq!(page_number(Path::new("/tmp/x/page-1.ppm")), None);
        assert_eq!(page_number(Path::new("/tmp/x/notes.png")), None);
    }

    #[test]
    fn test_undecodable_page_keeps_the_others() {
        let dir = tempfile::tempdir().unwrap();
        for n in [1, 3] {
            DynamicImage::new_luma8(n, 1)
                .save(dir.path().join(format!("page-{n}.png")))
                .unwrap();
        }
        std::fs::write(dir.path().join("page-2.png"), b"truncated").unwrap();

        let pages = load_pages(dir.path()).unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].as_ref().unwrap().width(), 1);
        assert!(matches!(pages[1], Err(OcrError::InvalidImage(_))));
        assert_eq!(pages[2].as_ref().unwrap().width(), 3);
    }

    #[test]
    fn test_missing_binary_is_tool_error() {
        let renderer = PopplerRenderer::new("/nonexistent/bin/pdftoppm");
        let err = renderer.render(Path::new("whatever.pdf")).unwrap_err();
        assert!(matches!(err, OcrError::Tool { .. }));
    }
}
