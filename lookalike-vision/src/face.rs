use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4, ArrayView1, Axis};
use ort::{session::Session, value::Value};

/// Square canvas YuNet is exported for.
pub const DETECTOR_INPUT_SIZE: u32 = 640;
/// SFace input side.
pub const FACE_SIZE: u32 = 112;

/// Detection result from YuNet, in original image pixels
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// Face embedding (SFace output, L2-normalized)
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector: Array1::from(vector),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }

    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        cosine_distance(self.vector.view(), other.vector.view())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(vector: Vec<f32>) -> Self {
        Self::new(vector)
    }
}

/// Cosine similarity in [-1, 1]. A zero-norm operand yields 0.
pub fn cosine_similarity(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// `1 - cosine_similarity`, in [0, 2].
pub fn cosine_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Element-wise mean over a batch of embeddings of equal dimension.
pub fn mean_embedding<'a, I>(embeddings: I) -> Result<Embedding>
where
    I: IntoIterator<Item = &'a Embedding>,
{
    let views: Vec<ArrayView1<f32>> = embeddings.into_iter().map(|e| e.vector.view()).collect();
    if views.is_empty() {
        anyhow::bail!("cannot average an empty set of embeddings");
    }
    let stacked = ndarray::stack(Axis(0), &views)?;
    let vector = stacked
        .mean_axis(Axis(0))
        .ok_or_else(|| anyhow::anyhow!("cannot average an empty set of embeddings"))?;
    Ok(Embedding { vector })
}

/// Planar BGR tensor `[1, 3, H, W]` with values in [0, 255], the layout both
/// YuNet and SFace take.
fn bgr_planar_tensor(img: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    let pixel_count = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * pixel_count];
    let (b_plane, rest) = data.split_at_mut(pixel_count);
    let (g_plane, r_plane) = rest.split_at_mut(pixel_count);
    for (i, px) in img.as_raw().chunks_exact(3).enumerate() {
        r_plane[i] = px[0] as f32;
        g_plane[i] = px[1] as f32;
        b_plane[i] = px[2] as f32;
    }
    Ok(Array4::from_shape_vec(
        (1, 3, h as usize, w as usize),
        data,
    )?)
}

/// Letterbox `img` onto a centered square canvas. Returns the canvas, the
/// scale applied, and the (x, y) padding offsets.
fn letterbox(img: &DynamicImage, target: u32) -> (RgbImage, f32, (u32, u32)) {
    let (orig_w, orig_h) = img.dimensions();
    let scale = target as f32 / orig_w.max(orig_h).max(1) as f32;
    let new_w = ((orig_w as f32 * scale) as u32).clamp(1, target);
    let new_h = ((orig_h as f32 * scale) as u32).clamp(1, target);

    let resized = img
        .resize_exact(new_w, new_h, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let mut canvas = RgbImage::new(target, target);
    let offset = ((target - new_w) / 2, (target - new_h) / 2);
    image::imageops::overlay(&mut canvas, &resized, offset.0 as i64, offset.1 as i64);
    (canvas, scale, offset)
}

/// Detect faces in an image using YuNet detector
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let target = DETECTOR_INPUT_SIZE;
    let (canvas, scale, (off_x, off_y)) = letterbox(img, target);
    let input_tensor = Value::from_array(bgr_planar_tensor(&canvas)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let parsed = yunet::parse_yunet_outputs(&output_refs, target as usize)?;
    let raw = yunet::decode_detections(&parsed, score_threshold, target as usize)?;

    // normalized canvas coords -> canvas px -> strip padding -> original px
    let t = target as f32;
    let to_x = |v: f32| (v * t - off_x as f32) / scale;
    let to_y = |v: f32| (v * t - off_y as f32) / scale;
    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for i in 0..5 {
                landmarks[i * 2] = to_x(d.landmarks[i * 2]);
                landmarks[i * 2 + 1] = to_y(d.landmarks[i * 2 + 1]);
            }
            Detection {
                bbox: [
                    to_x(d.bbox[0]),
                    to_y(d.bbox[1]),
                    d.bbox[2] * t / scale,
                    d.bbox[3] * t / scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    log::debug!("detector kept {} candidate face(s)", detections.len());

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Align and crop a face to `size`x`size` using a similarity transform that
/// puts the eyes on the ArcFace reference positions.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
    const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

    let left_eye = (detection.landmarks[0], detection.landmarks[1]);
    let right_eye = (detection.landmarks[2], detection.landmarks[3]);

    let eye_dx = right_eye.0 - left_eye.0;
    let eye_dy = right_eye.1 - left_eye.1;
    let actual_eye_dist = eye_dx.hypot(eye_dy);
    if actual_eye_dist <= f32::EPSILON {
        anyhow::bail!("degenerate landmarks: eyes coincide");
    }
    let eye_angle = eye_dy.atan2(eye_dx);

    let ref_eye_dist = (REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).hypot(REF_RIGHT_EYE.1 - REF_LEFT_EYE.1);
    let unit = size as f32 / FACE_SIZE as f32;
    let scale = unit * (ref_eye_dist / actual_eye_dist);

    let eye_center = (
        (left_eye.0 + right_eye.0) / 2.0,
        (left_eye.1 + right_eye.1) / 2.0,
    );
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
    );

    // output = [a b; c d] * input + [tx ty]
    let (sin, cos) = eye_angle.sin_cos();
    let a = scale * cos;
    let b = scale * sin;
    let c = -scale * sin;
    let d = scale * cos;
    let tx = ref_center.0 - (a * eye_center.0 + b * eye_center.1);
    let ty = ref_center.1 - (c * eye_center.0 + d * eye_center.1);
    let det = a * d - b * c;

    let src = img.to_rgb8();
    let (img_w, img_h) = src.dimensions();
    let mut output = RgbImage::new(size, size);

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        let px = out_x as f32 - tx;
        let py = out_y as f32 - ty;
        let in_x = (d * px - b * py) / det;
        let in_y = (-c * px + a * py) / det;

        if in_x < 0.0 || in_y < 0.0 || in_x >= img_w as f32 || in_y >= img_h as f32 {
            continue;
        }

        // bilinear
        let x0 = in_x.floor() as u32;
        let y0 = in_y.floor() as u32;
        let x1 = (x0 + 1).min(img_w - 1);
        let y1 = (y0 + 1).min(img_h - 1);
        let fx = in_x - x0 as f32;
        let fy = in_y - y0 as f32;

        let p00 = src.get_pixel(x0, y0);
        let p10 = src.get_pixel(x1, y0);
        let p01 = src.get_pixel(x0, y1);
        let p11 = src.get_pixel(x1, y1);

        for ch in 0..3 {
            let v = p00[ch] as f32 * (1.0 - fx) * (1.0 - fy)
                + p10[ch] as f32 * fx * (1.0 - fy)
                + p01[ch] as f32 * (1.0 - fx) * fy
                + p11[ch] as f32 * fx * fy;
            pixel[ch] = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode face image to embedding using SFace
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let face = face_img
        .resize_exact(FACE_SIZE, FACE_SIZE, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let input_tensor = Value::from_array(bgr_planar_tensor(&face)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let embedding_size = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if embedding_size == 0 || embedding_size > data.len() {
        anyhow::bail!("unexpected recognizer output shape {:?}", &shape[..]);
    }

    let mut vector = Array1::from(data[..embedding_size].to_vec());
    let norm = vector.dot(&vector).sqrt();
    if norm > 0.0 {
        vector /= norm;
    }

    Ok(Embedding { vector })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms() {
        let detections = vec![
            det([10.0, 10.0, 20.0, 20.0], 0.9),
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn cosine_distance_basics() {
        let a = array![1.0f32, 0.0, 0.0];
        let b = array![0.0f32, 1.0, 0.0];
        let c = array![2.0f32, 0.0, 0.0];
        assert!(cosine_distance(a.view(), c.view()).abs() < 1e-6);
        assert!((cosine_distance(a.view(), b.view()) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(a.view(), (-&a).view()) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_with_zero_vector_is_one() {
        let a = array![1.0f32, 2.0, 3.0];
        let zero = array![0.0f32, 0.0, 0.0];
        assert_eq!(cosine_distance(a.view(), zero.view()), 1.0);
    }

    #[test]
    fn mean_embedding_averages_per_component() {
        let batch = [
            Embedding::new(vec![1.0, 0.0, 4.0]),
            Embedding::new(vec![3.0, 2.0, 0.0]),
        ];
        let mean = mean_embedding(&batch).unwrap();
        assert_eq!(mean.to_vec(), vec![2.0, 1.0, 2.0]);
    }

    #[test]
    fn mean_embedding_rejects_empty_and_ragged() {
        let empty: [Embedding; 0] = [];
        assert!(mean_embedding(&empty).is_err());

        let ragged = [Embedding::new(vec![1.0, 0.0]), Embedding::new(vec![1.0])];
        assert!(mean_embedding(&ragged).is_err());
    }

    #[test]
    fn bgr_tensor_swaps_channels() {
        let img = RgbImage::from_raw(2, 1, vec![10, 20, 30, 40, 50, 60]).unwrap();
        let t = bgr_planar_tensor(&img).unwrap();
        assert_eq!(t.shape(), &[1, 3, 1, 2]);
        assert_eq!(t[[0, 0, 0, 0]], 30.0);
        assert_eq!(t[[0, 1, 0, 1]], 50.0);
        assert_eq!(t[[0, 2, 0, 1]], 40.0);
    }

    #[test]
    fn letterbox_centers_wide_image() {
        let img = DynamicImage::new_rgb8(200, 100);
        let (canvas, scale, offset) = letterbox(&img, 640);
        assert_eq!(canvas.dimensions(), (640, 640));
        assert!((scale - 3.2).abs() < 1e-6);
        assert_eq!(offset, (0, 160));
    }

    #[test]
    fn align_rejects_coincident_eyes() {
        let img = DynamicImage::new_rgb8(64, 64);
        let detection = det([0.0, 0.0, 64.0, 64.0], 0.9);
        assert!(align_face(&img, &detection, FACE_SIZE).is_err());
    }

    #[test]
    fn align_produces_requested_size() {
        let img = DynamicImage::new_rgb8(200, 200);
        let mut detection = det([50.0, 50.0, 100.0, 100.0], 0.9);
        detection.landmarks[..4].copy_from_slice(&[80.0, 90.0, 120.0, 90.0]);
        let aligned = align_face(&img, &detection, FACE_SIZE).unwrap();
        assert_eq!(aligned.dimensions(), (FACE_SIZE, FACE_SIZE));
    }
}
