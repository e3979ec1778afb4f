use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

pub const DEFAULT_DETECTOR_MODEL: &str = "models/face_detection_yunet_2023mar.onnx";
pub const DEFAULT_RECOGNITION_MODEL: &str = "models/face_recognition_sface_2021dec.onnx";

/// Locations of the YuNet detector and SFace recognizer ONNX files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    pub fn new(detector: impl Into<PathBuf>, recognizer: impl Into<PathBuf>) -> Self {
        Self {
            detector: detector.into(),
            recognizer: recognizer.into(),
        }
    }

    /// Both model files under `dir`, using the default file names.
    pub fn in_dir(dir: &Path) -> Self {
        let file_name = |p: &str| {
            Path::new(p)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(p))
        };
        Self {
            detector: dir.join(file_name(DEFAULT_DETECTOR_MODEL)),
            recognizer: dir.join(file_name(DEFAULT_RECOGNITION_MODEL)),
        }
    }

    pub fn exist(&self) -> bool {
        self.detector.is_file() && self.recognizer.is_file()
    }
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self::new(DEFAULT_DETECTOR_MODEL, DEFAULT_RECOGNITION_MODEL)
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load_session(path: &Path, what: &str) -> Result<Session> {
    if !path.is_file() {
        anyhow::bail!("{} model not found at {}", what, path.display());
    }
    log::debug!("loading {} model from {}", what, path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))
}

pub fn recog_session(paths: &ModelPaths) -> Result<Session> {
    load_session(&paths.recognizer, "recognition")
}

pub fn detector_session(paths: &ModelPaths) -> Result<Session> {
    load_session(&paths.detector, "detector")
}
