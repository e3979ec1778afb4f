//! Face comparison service with an explicit ready / not-ready lifecycle.

use std::path::Path;
use std::sync::Arc;

use log::{error, info};

use crate::config::Config;
use crate::embedder::Embedder;
use crate::error::CompareError;
use crate::matcher::{self, ScoreCurve};
use crate::reference::{self, ReferenceError, ReferenceSet};
use crate::Embedding;

#[derive(Debug, Clone)]
pub enum ServiceState {
    NotReady,
    Ready(ReferenceSet),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Likeness to the average face, 0-100.
    pub similarity: f64,
    pub distance: f64,
    pub best_match_filename: String,
    pub best_match_distance: f32,
}

pub struct FaceService {
    embedder: Arc<dyn Embedder>,
    curve: ScoreCurve,
    confidence_threshold: f32,
    state: ServiceState,
}

impl FaceService {
    pub fn new(embedder: Arc<dyn Embedder>, curve: ScoreCurve, confidence_threshold: f32) -> Self {
        Self {
            embedder,
            curve,
            confidence_threshold,
            state: ServiceState::NotReady,
        }
    }

    pub fn from_config(embedder: Arc<dyn Embedder>, cfg: &Config) -> Self {
        Self::new(
            embedder,
            ScoreCurve::new(cfg.similarity_k, cfg.similarity_inflection_point),
            cfg.face_confidence_threshold,
        )
    }

    /// Build the reference set from `dir`. On failure the service stays (or
    /// becomes) not ready.
    pub fn try_initialize<S: AsRef<str>>(
        &mut self,
        dir: &Path,
        formats: &[S],
    ) -> Result<usize, ReferenceError> {
        info!("Initializing reference faces...");
        match reference::build_reference_set(
            self.embedder.as_ref(),
            dir,
            formats,
            self.confidence_threshold,
        ) {
            Ok(set) => {
                let count = set.len();
                self.install(set);
                Ok(count)
            }
            Err(e) => {
                self.state = ServiceState::NotReady;
                Err(e)
            }
        }
    }

    /// Same as [`try_initialize`](Self::try_initialize), reporting only
    /// whether the service is now ready.
    pub fn initialize<S: AsRef<str>>(&mut self, dir: &Path, formats: &[S]) -> bool {
        match self.try_initialize(dir, formats) {
            Ok(_) => true,
            Err(e) => {
                error!("Reference initialization failed: {}", e);
                false
            }
        }
    }

    /// Use an already built reference set, e.g. one loaded from cache.
    pub fn install(&mut self, set: ReferenceSet) {
        info!("Service ready with {} reference face(s)", set.len());
        self.state = ServiceState::Ready(set);
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ServiceState::Ready(_))
    }

    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    pub fn reference_set(&self) -> Result<&ReferenceSet, CompareError> {
        match &self.state {
            ServiceState::Ready(set) => Ok(set),
            ServiceState::NotReady => Err(CompareError::NotReady),
        }
    }

    pub fn curve(&self) -> ScoreCurve {
        self.curve
    }

    /// Confident face embedding of the image at `path`, or `None` when the
    /// model is not sure there is a face.
    pub fn extract_face(&self, path: &Path) -> Result<Option<Embedding>, CompareError> {
        let rep = self
            .embedder
            .represent(path)
            .map_err(|e| CompareError::InvalidUpload(format!("{:#}", e)))?;
        if rep.confidence > self.confidence_threshold {
            Ok(Some(rep.embedding))
        } else {
            Ok(None)
        }
    }

    /// Score against the average face. Returns `(score, distance)`.
    pub fn calculate_similarity(&self, user: &Embedding) -> Result<(f64, f64), CompareError> {
        let set = self.reference_set()?;
        check_dim(set, user)?;
        let distance = user.cosine_distance(set.average()) as f64;
        info!("Distance to the average face: {:.4}", distance);
        Ok((self.curve.score(distance), distance))
    }

    pub fn find_best_match(&self, user: &Embedding) -> Result<(String, f32), CompareError> {
        let set = self.reference_set()?;
        check_dim(set, user)?;
        matcher::best_match(set.faces(), user)
            .map(|(name, d)| (name.to_string(), d))
            .ok_or_else(|| CompareError::Analysis("no reference faces".to_string()))
    }

    /// Full comparison of the image stored at `path`.
    pub fn compare_path(&self, path: &Path) -> Result<Comparison, CompareError> {
        self.reference_set()?;
        let user = self.extract_face(path)?.ok_or(CompareError::NoFace)?;
        let (similarity, distance) = self.calculate_similarity(&user)?;
        let (best_match_filename, best_match_distance) = self.find_best_match(&user)?;
        Ok(Comparison {
            similarity,
            distance,
            best_match_filename,
            best_match_distance,
        })
    }
}

fn check_dim(set: &ReferenceSet, user: &Embedding) -> Result<(), CompareError> {
    if user.dim() != set.dim() {
        return Err(CompareError::Analysis(format!(
            "embedding dimension {} does not match reference dimension {}",
            user.dim(),
            set.dim()
        )));
    }
    Ok(())
}
