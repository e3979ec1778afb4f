use anyhow::{Context, Result};
use lookalike_vision::{model, ModelPaths};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("LOOKALIKE_CONFIG_PATH").unwrap_or("/usr/local/etc/lookalike/config.toml"),
    )
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub debug: bool,

    /// Recorded in the reference cache so embeddings from another model are
    /// never mixed in.
    pub model_name: String,
    pub detector_model: PathBuf,
    pub recognition_model: PathBuf,
    pub detection_score_threshold: f32,
    pub nms_threshold: f32,

    pub similarity_k: f64,
    pub similarity_inflection_point: f64,
    /// A face counts only when its confidence is strictly above this.
    pub face_confidence_threshold: f32,

    pub reference_images_dir: PathBuf,
    pub supported_image_formats: Vec<String>,
    pub reference_cache: Option<PathBuf>,

    pub temp_image_name: String,
    pub temp_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            debug: false,
            model_name: "sface".to_string(),
            detector_model: PathBuf::from(model::DEFAULT_DETECTOR_MODEL),
            recognition_model: PathBuf::from(model::DEFAULT_RECOGNITION_MODEL),
            detection_score_threshold: 0.6,
            nms_threshold: 0.3,
            similarity_k: 22.0,
            similarity_inflection_point: 0.4,
            face_confidence_threshold: 0.0,
            reference_images_dir: PathBuf::from("images"),
            supported_image_formats: vec![".jpg".into(), ".png".into(), ".jpeg".into()],
            reference_cache: None,
            temp_image_name: "user_temp_image".to_string(),
            temp_dir: None,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::new(&self.detector_model, &self.recognition_model)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
