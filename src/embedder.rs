use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use lookalike_vision::{Embedding, Pipeline};

use crate::config::Config;

/// What the face model reports for one image.
#[derive(Debug, Clone)]
pub struct FaceEmbedding {
    pub embedding: Embedding,
    pub confidence: f32,
}

/// Image file → embedding + confidence. The only seam to the model.
pub trait Embedder: Send + Sync {
    fn represent(&self, image: &Path) -> Result<FaceEmbedding>;
}

/// ONNX-backed embedder. Sessions need exclusive access, so inference is
/// serialized.
pub struct OnnxEmbedder {
    pipeline: Mutex<Pipeline>,
}

impl OnnxEmbedder {
    pub fn new(cfg: &Config) -> Result<Self> {
        let pipeline = Pipeline::new(&cfg.model_paths())
            .context("Failed to initialize face recognition pipeline")?
            .with_thresholds(cfg.detection_score_threshold, cfg.nms_threshold);
        Ok(Self {
            pipeline: Mutex::new(pipeline),
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn represent(&self, image: &Path) -> Result<FaceEmbedding> {
        let mut pipeline = self
            .pipeline
            .lock()
            .map_err(|_| anyhow::anyhow!("face pipeline lock poisoned"))?;
        let rep = pipeline.represent_path(image)?;
        Ok(FaceEmbedding {
            embedding: rep.embedding,
            confidence: rep.confidence,
        })
    }
}
