//! YuNet detector post-processing.
//!
//! YuNet is anchor-free and predicts directly from grid locations. For each
//! stride (8, 16, 32) the 2023mar export emits four tensors:
//! - cls:  [1, H*W, 1]  classification score (already activated)
//! - obj:  [1, H*W, 1]  objectness score (already activated)
//! - bbox: [1, H*W, 4]  (dx, dy, log dw, log dh) in stride units
//! - kps:  [1, H*W, 10] landmark offsets in stride units
//!
//! Output order is grouped by kind: cls_8, cls_16, cls_32, obj_8, ..., kps_32.
//!
//! Decoding, with `(gx, gy)` the grid cell:
//! cx = (gx + dx) * stride, cy = (gy + dy) * stride
//! w  = exp(dw) * stride,   h  = exp(dh) * stride
//! score = sqrt(clamp(cls) * clamp(obj))

use anyhow::Result;
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,...,x5,y5 (normalized [0,1])
}

/// Per-stride tensors after parsing, indexed like [`STRIDES`].
#[derive(Debug, Clone)]
pub struct YunetOutputs {
    pub scores: Vec<Array2<f32>>,
    pub bboxes: Vec<Array2<f32>>,
    pub landmarks: Vec<Array2<f32>>,
}

fn grid_locations(input_size: usize, stride: usize) -> usize {
    let side = input_size / stride;
    side * side
}

/// Read one group of three per-stride tensors starting at `base`.
fn read_group(
    outputs: &[(&[i64], &[f32])],
    base: usize,
    width: usize,
    input_size: usize,
    kind: &str,
) -> Result<Vec<Array2<f32>>> {
    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            let idx = base + i;
            let expected = grid_locations(input_size, stride);
            let Some((shape, data)) = outputs.get(idx) else {
                anyhow::bail!("Missing {} output at index {}", kind, idx);
            };
            let shape_ok = shape.len() == 3
                && shape[0] == 1
                && shape[1] as usize == expected
                && shape[2] as usize == width;
            if !shape_ok {
                anyhow::bail!(
                    "Unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
                    kind,
                    idx,
                    shape,
                    expected,
                    width
                );
            }
            Ok(Array2::from_shape_vec((expected, width), data.to_vec())?)
        })
        .collect()
}

/// Parse the twelve raw YuNet outputs into per-stride arrays, folding
/// classification and objectness into a single score map.
pub fn parse_yunet_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<YunetOutputs> {
    let cls = read_group(outputs, 0, 1, input_size, "cls")?;
    let obj = read_group(outputs, 3, 1, input_size, "obj")?;
    let bboxes = read_group(outputs, 6, 4, input_size, "bbox")?;
    let landmarks = read_group(outputs, 9, 10, input_size, "kps")?;

    let scores = cls
        .iter()
        .zip(obj.iter())
        .map(|(c, o)| {
            let mut combined = c.clone();
            combined.zip_mut_with(o, |c, &o| *c = combine_scores(*c, o));
            combined
        })
        .collect();

    Ok(YunetOutputs {
        scores,
        bboxes,
        landmarks,
    })
}

pub fn combine_scores(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}

/// Decode grid predictions into detections above `score_threshold`.
/// Coordinates are normalized to the square input canvas.
pub fn decode_detections(
    outputs: &YunetOutputs,
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let mut detections = Vec::new();
    let size = input_size as f32;

    for (scale_idx, &stride) in STRIDES.iter().enumerate() {
        let scores = &outputs.scores[scale_idx];
        let bboxes = &outputs.bboxes[scale_idx];
        let landmarks = &outputs.landmarks[scale_idx];

        let side = input_size / stride;
        if scores.nrows() != side * side {
            anyhow::bail!(
                "Expected {} boxes for stride {} ({}x{} grid), got {}",
                side * side,
                stride,
                side,
                side,
                scores.nrows()
            );
        }

        let stride = stride as f32;
        for row in 0..side {
            for col in 0..side {
                let idx = row * side + col;
                let score = scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + bboxes[[idx, 0]]) * stride;
                let cy = (row as f32 + bboxes[[idx, 1]]) * stride;
                let w = bboxes[[idx, 2]].exp() * stride;
                let h = bboxes[[idx, 3]].exp() * stride;

                let mut lms = [0.0f32; 10];
                for k in 0..5 {
                    lms[k * 2] = (col as f32 + landmarks[[idx, k * 2]]) * stride / size;
                    lms[k * 2 + 1] = (row as f32 + landmarks[[idx, k * 2 + 1]]) * stride / size;
                }

                detections.push(RawDetection {
                    bbox: [
                        (cx - w / 2.0) / size,
                        (cy - h / 2.0) / size,
                        w / size,
                        h / size,
                    ],
                    score,
                    landmarks: lms,
                });
            }
        }
    }

    Ok(detections)
}
