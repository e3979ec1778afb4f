#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use lookalike::{Embedder, Embedding, FaceEmbedding};
use tempfile::TempDir;

/// Reads "images" that are plain text of the form `x,y,z@confidence`.
/// Anything else fails like an undecodable image would.
#[derive(Default)]
pub struct TextEmbedder {
    calls: AtomicUsize,
}

impl TextEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for TextEmbedder {
    fn represent(&self, image: &Path) -> Result<FaceEmbedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = std::fs::read_to_string(image)
            .with_context(|| format!("opening image {}", image.display()))?;
        let (vector, confidence) = text.trim().split_once('@').context("not an image")?;
        let vector = vector
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FaceEmbedding {
            embedding: Embedding::new(vector),
            confidence: confidence.parse()?,
        })
    }
}

/// Directory of fake reference images.
pub fn reference_dir(images: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for (name, content) in images {
        std::fs::write(dir.path().join(name), content).expect("write reference");
    }
    dir
}

pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).expect("read_dir").count()
}

pub fn missing_dir() -> PathBuf {
    PathBuf::from("/nonexistent/lookalike/images")
}
