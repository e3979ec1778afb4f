use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::reference::{ReferenceFace, ReferenceSet};
use crate::Embedding;

#[derive(Debug, Serialize, Deserialize)]
pub struct FaceRecord {
    pub filename: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReferenceCache {
    model_name: String,
    /// Directory the faces were read from; the filenames are relative to it.
    source_dir: PathBuf,
    records: Vec<FaceRecord>,
}

fn normalize_dir(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

pub fn save_reference_set(
    path: &Path,
    model_name: &str,
    source_dir: &Path,
    set: &ReferenceSet,
) -> Result<()> {
    let cache = ReferenceCache {
        model_name: model_name.to_string(),
        source_dir: normalize_dir(source_dir),
        records: set
            .faces()
            .iter()
            .map(|f| FaceRecord {
                filename: f.filename.clone(),
                embedding: f.embedding.to_vec(),
            })
            .collect(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = postcard::to_allocvec(&cache)?;
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Load a cached reference set, refusing one written for another model or
/// for another reference directory.
pub fn load_reference_set(
    path: &Path,
    model_name: &str,
    source_dir: &Path,
) -> Result<ReferenceSet> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let cache: ReferenceCache =
        postcard::from_bytes(&data).with_context(|| format!("decoding {}", path.display()))?;
    if cache.model_name != model_name {
        anyhow::bail!(
            "reference cache {} was built with model {}, expected {}",
            path.display(),
            cache.model_name,
            model_name
        );
    }
    let expected_dir = normalize_dir(source_dir);
    if cache.source_dir != expected_dir {
        anyhow::bail!(
            "reference cache {} was built from {}, expected {}",
            path.display(),
            cache.source_dir.display(),
            expected_dir.display()
        );
    }
    let faces = cache
        .records
        .into_iter()
        .map(|r| ReferenceFace {
            filename: r.filename,
            embedding: Embedding::new(r.embedding),
        })
        .collect();
    Ok(ReferenceSet::from_faces(faces)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ReferenceSet {
        ReferenceSet::from_faces(vec![
            ReferenceFace {
                filename: "a.jpg".into(),
                embedding: Embedding::new(vec![1.0, 0.0, 0.5]),
            },
            ReferenceFace {
                filename: "b.png".into(),
                embedding: Embedding::new(vec![0.0, 1.0, 0.5]),
            },
        ])
        .unwrap()
    }

    #[test]
    fn cache_preserves_order_and_average() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("refs.bin");
        let set = sample();
        save_reference_set(&path, "sface", dir.path(), &set).unwrap();

        let loaded = load_reference_set(&path, "sface", dir.path()).unwrap();
        assert_eq!(loaded.faces(), set.faces());
        assert_eq!(loaded.average(), set.average());
    }

    #[test]
    fn cache_from_other_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.bin");
        save_reference_set(&path, "sface", dir.path(), &sample()).unwrap();
        let err = load_reference_set(&path, "arcface", dir.path()).unwrap_err();
        assert!(err.to_string().contains("built with model sface"));
    }

    #[test]
    fn cache_from_other_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let other = dir.path().join("other");
        std::fs::create_dir(&images).unwrap();
        std::fs::create_dir(&other).unwrap();
        let path = dir.path().join("refs.bin");
        save_reference_set(&path, "sface", &images, &sample()).unwrap();

        let err = load_reference_set(&path, "sface", &other).unwrap_err();
        assert!(err.to_string().contains("was built from"));
        // same directory through a different spelling still matches
        let dotted = images.join("..").join("images");
        assert!(load_reference_set(&path, "sface", &dotted).is_ok());
    }

    #[test]
    fn empty_cache_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.bin");
        let data = postcard::to_allocvec(&ReferenceCache {
            model_name: "sface".into(),
            source_dir: normalize_dir(dir.path()),
            records: vec![],
        })
        .unwrap();
        std::fs::write(&path, data).unwrap();
        assert!(load_reference_set(&path, "sface", dir.path()).is_err());
    }
}
