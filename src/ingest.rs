//! Document ingest: validation, content hashing, and page rasterization.
//!
//! PDFs are rasterized with `pdftoppm` (poppler-utils); standalone raster
//! images become a single page re-encoded as PNG. The stage emits one
//! Input artifact (protected from eviction) plus one Page artifact per
//! rasterized page.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::IngestConfig;
use crate::error::{PipelineError, Result};
use crate::models::{Artifact, ArtifactKind};
use crate::store::ArtifactStore;

/// MIME types the pipeline accepts.
const ACCEPTED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/tiff",
];

/// Result of ingesting one document.
#[derive(Debug)]
pub struct IngestResult {
    pub input: Artifact,
    pub pages: Vec<Artifact>,
}

pub struct IngestService {
    config: IngestConfig,
    store: Arc<ArtifactStore>,
}

impl IngestService {
    pub fn new(config: IngestConfig, store: Arc<ArtifactStore>) -> Self {
        Self { config, store }
    }

    /// Compute SHA-256 hash of file content.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Validate, hash, and rasterize a document into page artifacts.
    pub fn ingest(&self, path: &Path) -> Result<IngestResult> {
        let content = std::fs::read(path)
            .map_err(|e| PipelineError::InvalidInput(format!("{}: {}", path.display(), e)))?;

        if content.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "{} is empty",
                path.display()
            )));
        }
        if content.len() as u64 > self.config.max_file_size_bytes {
            return Err(PipelineError::InvalidInput(format!(
                "{} is {} bytes, limit is {}",
                path.display(),
                content.len(),
                self.config.max_file_size_bytes
            )));
        }

        let mime_type = detect_mime(&content, path)?;
        let content_hash = Self::compute_hash(&content);

        let input = Artifact::new_input(ArtifactKind::Input {
            file_path: path.to_path_buf(),
            content_hash: content_hash.clone(),
            mime_type: mime_type.to_string(),
            size_bytes: content.len() as u64,
        });
        self.store.store(&input)?;

        let image_dir = self.store.image_dir(&content_hash)?;
        let page_paths = if mime_type == "application/pdf" {
            self.rasterize_pdf(path, &image_dir)?
        } else {
            vec![self.normalize_image(path, &image_dir)?]
        };

        let mut pages = Vec::with_capacity(page_paths.len());
        for (idx, image_path) in page_paths.into_iter().enumerate() {
            let (width, height) = image::image_dimensions(&image_path).map_err(|e| {
                PipelineError::ProcessingFailed(format!(
                    "cannot read rasterized page {}: {}",
                    image_path.display(),
                    e
                ))
            })?;
            let page = Artifact::new_child(
                &input.id,
                ArtifactKind::Page {
                    page_number: idx as u32 + 1,
                    image_path,
                    width,
                    height,
                    dpi: self.config.dpi,
                    rotation_applied: 0,
                    skew_applied: 0.0,
                },
            );
            self.store.store(&page)?;
            pages.push(page);
        }

        tracing::info!(
            input = %input.id,
            pages = pages.len(),
            mime = mime_type,
            "ingested document"
        );
        Ok(IngestResult { input, pages })
    }

    /// Convert all PDF pages to PNG images via pdftoppm.
    fn rasterize_pdf(&self, pdf_path: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let output_prefix = output_dir.join("page");
        let dpi = self.config.dpi.to_string();

        let status = Command::new("pdftoppm")
            .args(["-png", "-r", &dpi])
            .arg(pdf_path)
            .arg(&output_prefix)
            .status();

        match status {
            Ok(s) if s.success() => {
                let pages = collect_page_images(output_dir)?;
                if pages.is_empty() {
                    return Err(PipelineError::ProcessingFailed(format!(
                        "pdftoppm produced no pages for {}",
                        pdf_path.display()
                    )));
                }
                Ok(pages)
            }
            Ok(_) => Err(PipelineError::ProcessingFailed(
                "pdftoppm failed to convert PDF".to_string(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PipelineError::NotAvailable(
                "pdftoppm not found (install poppler-utils)".to_string(),
            )),
            Err(e) => Err(PipelineError::Io(e)),
        }
    }

    /// Re-encode a standalone image as the single page-1 PNG.
    fn normalize_image(&self, path: &Path, output_dir: &Path) -> Result<PathBuf> {
        let img = image::open(path).map_err(|e| {
            PipelineError::InvalidInput(format!("cannot decode {}: {}", path.display(), e))
        })?;
        let out = output_dir.join("page-1.png");
        img.save(&out)
            .map_err(|e| PipelineError::ProcessingFailed(format!("saving page image: {}", e)))?;
        Ok(out)
    }
}

/// Detect MIME type from content, with extension fallback, rejecting
/// anything the pipeline cannot process.
fn detect_mime(content: &[u8], path: &Path) -> Result<&'static str> {
    let detected = infer::get(content).map(|k| k.mime_type());
    let mime = detected.or_else(|| {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("pdf") => Some("application/pdf"),
            Some("png") => Some("image/png"),
            Some("jpg") | Some("jpeg") => Some("image/jpeg"),
            Some("tif") | Some("tiff") => Some("image/tiff"),
            _ => None,
        }
    });

    match mime {
        Some(m) => ACCEPTED_MIME_TYPES
            .iter()
            .find(|a| **a == m)
            .copied()
            .ok_or_else(|| {
                PipelineError::InvalidInput(format!("unsupported file type: {}", m))
            }),
        None => Err(PipelineError::InvalidInput(format!(
            "cannot determine file type of {}",
            path.display()
        ))),
    }
}

/// Gather pdftoppm output files in page order.
///
/// pdftoppm pads page numbers to a width that depends on the page count
/// (page-1.png, page-01.png, ...), so sort on the parsed number.
fn collect_page_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pages: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(num) = name
            .strip_prefix("page-")
            .and_then(|s| s.strip_suffix(".png"))
            .and_then(|s| s.parse::<u32>().ok())
        {
            pages.push((num, entry.path()));
        }
    }
    pages.sort_by_key(|(num, _)| *num);
    Ok(pages.into_iter().map(|(_, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn service(root: &Path) -> IngestService {
        let store = Arc::new(ArtifactStore::open(root, StoreConfig::default()).unwrap());
        IngestService::new(IngestConfig::default(), store)
    }

    fn write_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let img = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_ingest_png_single_page() {
        let dir = tempdir().unwrap();
        let svc = service(&dir.path().join("store"));
        let path = write_png(dir.path(), "invoice.png");

        let result = svc.ingest(&path).unwrap();
        assert!(result.input.is_input());
        assert_eq!(result.pages.len(), 1);
        let ArtifactKind::Page { width, height, .. } = &result.pages[0].kind else {
            panic!("expected page artifact");
        };
        assert_eq!((*width, *height), (200, 100));
    }

    #[test]
    fn test_ingest_empty_file_rejected() {
        let dir = tempdir().unwrap();
        let svc = service(&dir.path().join("store"));
        let path = dir.path().join("empty.png");
        std::fs::write(&path, b"").unwrap();
        let err = svc.ingest(&path).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_ingest_unknown_type_rejected() {
        let dir = tempdir().unwrap();
        let svc = service(&dir.path().join("store"));
        let path = dir.path().join("notes.xyz");
        std::fs::write(&path, b"plain text, not a document").unwrap();
        let err = svc.ingest(&path).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_ingest_oversized_rejected() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            ArtifactStore::open(&dir.path().join("store"), StoreConfig::default()).unwrap(),
        );
        let config = IngestConfig {
            max_file_size_bytes: 16,
            dpi: 300,
        };
        let svc = IngestService::new(config, store);
        let path = write_png(dir.path(), "big.png");
        let err = svc.ingest(&path).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_identical_content_same_input_id() {
        let dir = tempdir().unwrap();
        let svc = service(&dir.path().join("store"));
        let a = write_png(dir.path(), "a.png");
        let b = write_png(dir.path(), "b.png");
        let ra = svc.ingest(&a).unwrap();
        let rb = svc.ingest(&b).unwrap();
        // Identical bytes hash to the same content hash.
        let (ArtifactKind::Input { content_hash: ha, .. }, ArtifactKind::Input { content_hash: hb, .. }) =
            (&ra.input.kind, &rb.input.kind)
        else {
            panic!("expected input artifacts");
        };
        assert_eq!(ha, hb);
    }

    #[test]
    fn test_collect_page_images_orders_numerically() {
        let dir = tempdir().unwrap();
        for name in ["page-10.png", "page-2.png", "page-1.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pages = collect_page_images(dir.path()).unwrap();
        let names: Vec<String> = pages
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page-1.png", "page-2.png", "page-10.png"]);
    }
}
