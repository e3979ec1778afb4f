use std::io;
use std::path::{Path, PathBuf};

use crate::reference::is_supported_format;

/// Uploaded image parked on disk for the model to read. Every instance gets
/// its own file name, and the file is removed when the guard drops.
#[derive(Debug)]
pub struct TempImage {
    path: PathBuf,
}

impl TempImage {
    /// Write `bytes` to `<dir>/<name>-<uuid><extension>`.
    pub fn write(dir: &Path, name: &str, extension: &str, bytes: &[u8]) -> io::Result<Self> {
        let file_name = format!("{}-{}{}", name, uuid::Uuid::new_v4(), extension);
        let path = dir.join(file_name);
        let guard = Self { path };
        std::fs::write(&guard.path, bytes)?;
        log::debug!("stored upload at {}", guard.path.display());
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove temp image {}: {}", self.path.display(), e),
        }
    }
}

/// Extension for the temp file: the upload's own when it is a supported
/// format, `.jpg` otherwise.
pub fn temp_extension<S: AsRef<str>>(original: Option<&str>, formats: &[S]) -> String {
    original
        .filter(|name| is_supported_format(name, formats))
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_else(|| ".jpg".to_string())
}
