use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageReader};
use ort::session::Session;

use crate::face::{self, Detection, Embedding, FACE_SIZE};
use crate::model::{self, ModelPaths};

/// Embedding of one image plus how sure the detector was that it is a face.
#[derive(Debug, Clone)]
pub struct Representation {
    pub embedding: Embedding,
    /// Detector score of the chosen face, `0.0` when no face was found.
    pub confidence: f32,
    pub detection: Option<Detection>,
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(paths)?,
            encoder: model::recog_session(paths)?,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        })
    }

    pub fn with_thresholds(mut self, score_threshold: f32, nms_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self.nms_threshold = nms_threshold;
        self
    }

    /// Embed the highest-scoring face. When nothing is detected the whole
    /// frame is encoded instead and reported with zero confidence, so the
    /// caller decides what an unconfident embedding is worth.
    pub fn represent(&mut self, img: &DynamicImage) -> Result<Representation> {
        let detections = face::detect_faces(
            &mut self.detector,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;

        let best = detections
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score));

        match best {
            Some(detection) => {
                let face_img =
                    face::align_face(img, &detection, FACE_SIZE).context("aligning face")?;
                let embedding =
                    face::encode_face(&mut self.encoder, &face_img).context("encoding face")?;
                Ok(Representation {
                    embedding,
                    confidence: detection.score,
                    detection: Some(detection),
                })
            }
            None => {
                log::debug!("no face detected, encoding full frame");
                let embedding =
                    face::encode_face(&mut self.encoder, img).context("encoding frame")?;
                Ok(Representation {
                    embedding,
                    confidence: 0.0,
                    detection: None,
                })
            }
        }
    }

    pub fn represent_path(&mut self, path: &Path) -> Result<Representation> {
        let img = load_image(path)?;
        self.represent(&img)
    }
}

/// Decode the image at `path`, picking the format from its content. Uploads
/// are stored under whatever name the client sent, so the extension can lie.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .with_context(|| format!("opening image {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("reading image {}", path.display()))?
        .decode()
        .with_context(|| format!("decoding image {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn png_content_under_jpg_name_decodes() {
        let img = RgbImage::from_pixel(32, 32, Rgb([200, 40, 10]));
        let mut png = Cursor::new(Vec::new());
        img.write_to(&mut png, ImageFormat::Png).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_temp_image-x.jpg");
        std::fs::write(&path, png.into_inner()).unwrap();

        let decoded = load_image(&path).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 32));
        assert_eq!(decoded.get_pixel(5, 5), &Rgb([200, 40, 10]));
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.jpg");
        std::fs::write(&path, b"\xff\xd8 not a picture").unwrap();
        assert!(load_image(&path).is_err());
    }
}
