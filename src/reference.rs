//! The reference face set: one embedding per reference image plus their
//! element-wise mean, the "average face" every upload is scored against.

use std::path::{Path, PathBuf};

use lookalike_vision::{face, Embedding};
use log::{info, warn};
use thiserror::Error;

use crate::embedder::Embedder;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("reference image directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),
    #[error("failed to list {}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no confident reference faces; nothing to compare against")]
    NoConfidentFaces,
    #[error("reference {filename} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        filename: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceFace {
    pub filename: String,
    pub embedding: Embedding,
}

/// Immutable once built.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    faces: Vec<ReferenceFace>,
    average: Embedding,
}

impl ReferenceSet {
    pub fn from_faces(faces: Vec<ReferenceFace>) -> Result<Self, ReferenceError> {
        let Some(first) = faces.first() else {
            return Err(ReferenceError::NoConfidentFaces);
        };
        let expected = first.embedding.dim();
        if let Some(bad) = faces.iter().find(|f| f.embedding.dim() != expected) {
            return Err(ReferenceError::DimensionMismatch {
                filename: bad.filename.clone(),
                expected,
                found: bad.embedding.dim(),
            });
        }
        let average = face::mean_embedding(faces.iter().map(|f| &f.embedding))
            .map_err(|_| ReferenceError::NoConfidentFaces)?;
        Ok(Self { faces, average })
    }

    pub fn faces(&self) -> &[ReferenceFace] {
        &self.faces
    }

    pub fn average(&self) -> &Embedding {
        &self.average
    }

    pub fn dim(&self) -> usize {
        self.average.dim()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

/// Case-insensitive suffix match, e.g. `Face.JPG` against `.jpg`.
pub fn is_supported_format<S: AsRef<str>>(filename: &str, formats: &[S]) -> bool {
    let lower = filename.to_lowercase();
    formats
        .iter()
        .any(|ext| lower.ends_with(&ext.as_ref().to_lowercase()))
}

/// Supported image files directly under `dir`, sorted by name so the set
/// (and best-match tie breaking) does not depend on directory listing order.
pub fn list_reference_images<S: AsRef<str>>(
    dir: &Path,
    formats: &[S],
) -> Result<Vec<String>, ReferenceError> {
    if !dir.is_dir() {
        return Err(ReferenceError::MissingDirectory(dir.to_path_buf()));
    }
    let read_dir_err = |source| ReferenceError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_dir_err)? {
        let entry = entry.map_err(read_dir_err)?;
        // follows symlinks, like the static file route does
        if !entry.path().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!("  - skipping non UTF-8 file name {:?}", entry.file_name());
            continue;
        };
        if is_supported_format(&name, formats) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Embed every supported image in `dir`, keep those whose confidence is
/// strictly above `confidence_threshold`, and average them.
pub fn build_reference_set<S: AsRef<str>>(
    embedder: &dyn Embedder,
    dir: &Path,
    formats: &[S],
    confidence_threshold: f32,
) -> Result<ReferenceSet, ReferenceError> {
    info!("Reference image directory: {}", dir.display());
    let names = list_reference_images(dir, formats)?;

    let mut faces: Vec<ReferenceFace> = Vec::with_capacity(names.len());
    for name in names {
        match embedder.represent(&dir.join(&name)) {
            Ok(rep) if rep.confidence > confidence_threshold => {
                if let Some(first) = faces.first() {
                    if first.embedding.dim() != rep.embedding.dim() {
                        warn!(
                            "  - {}: embedding dimension {} differs from {}, skipped",
                            name,
                            rep.embedding.dim(),
                            first.embedding.dim()
                        );
                        continue;
                    }
                }
                info!("  - extracted {} (confidence {:.3})", name, rep.confidence);
                faces.push(ReferenceFace {
                    filename: name,
                    embedding: rep.embedding,
                });
            }
            Ok(rep) => {
                warn!("  - no face detected in {} (confidence {:.3})", name, rep.confidence);
            }
            Err(e) => {
                warn!("  - error processing {}: {:#}", name, e);
            }
        }
    }

    let set = ReferenceSet::from_faces(faces)?;
    info!(
        "Built average face from {} reference vector(s)",
        set.len()
    );
    Ok(set)
}
