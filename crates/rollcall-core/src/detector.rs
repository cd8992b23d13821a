//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the anchor-free SCRFD model on a letterboxed grayscale frame and
//! decodes score/bbox/landmark tensors for the three stride levels into
//! frame-space face boxes.

use crate::types::FaceBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_SIZE: usize = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_SCORE_THRESHOLD: f32 = 0.5;
const DET_NMS_IOU: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;
/// Standard SCRFD export layout: scores for all strides, then bboxes, then landmarks.
const DET_OUTPUTS: usize = 9;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found: {0} — download the SCRFD onnx export and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox geometry: uniform scale plus symmetric padding into the model input.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    scaled_w: usize,
    scaled_h: usize,
}

impl Letterbox {
    fn fit(frame_w: usize, frame_h: usize, input: usize) -> Self {
        let scale = (input as f32 / frame_w as f32).min(input as f32 / frame_h as f32);
        let scaled_w = (frame_w as f32 * scale).round() as usize;
        let scaled_h = (frame_h as f32 * scale).round() as usize;
        Self {
            scale,
            pad_x: (input - scaled_w) as f32 / 2.0,
            pad_y: (input - scaled_h) as f32 / 2.0,
            scaled_w,
            scaled_h,
        }
    }

    /// Map a model-input coordinate back into frame space.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// SCRFD-based face detector over grayscale frames.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        if num_outputs != DET_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD export must have {DET_OUTPUTS} outputs (score/bbox/kps × 3 strides), got {num_outputs}"
            )));
        }

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        Ok(Self { session })
    }

    /// Detect faces in a grayscale frame.
    ///
    /// Returns face boxes in frame coordinates, highest confidence first.
    /// The caller processes the first entry only; the rest are kept for
    /// display annotation.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let letterbox = Letterbox::fit(width as usize, height as usize, DET_INPUT_SIZE);
        let input = preprocess(frame, width as usize, height as usize, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in DET_STRIDES.iter().enumerate() {
            // Positional layout: [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[level + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[level + 6]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            decode_stride(scores, bboxes, kps, stride, &letterbox, &mut candidates);
        }

        Ok(suppress_overlaps(candidates, DET_NMS_IOU))
    }
}

/// Resize the frame into the letterboxed model input and normalize to NCHW.
///
/// Padding pixels carry the model mean so they normalize to zero.
fn preprocess(frame: &[u8], width: usize, height: usize, lb: &Letterbox) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, DET_INPUT_SIZE, DET_INPUT_SIZE));
    let x0 = lb.pad_x.floor() as usize;
    let y0 = lb.pad_y.floor() as usize;
    let inv = 1.0 / lb.scale;

    for y in 0..DET_INPUT_SIZE {
        for x in 0..DET_INPUT_SIZE {
            let inside = x >= x0 && x < x0 + lb.scaled_w && y >= y0 && y < y0 + lb.scaled_h;
            let pixel = if inside {
                bilinear(frame, width, height, (x - x0) as f32 * inv, (y - y0) as f32 * inv)
            } else {
                DET_MEAN
            };
            let v = (pixel - DET_MEAN) / DET_STD;
            // Grayscale replicated across the three input channels.
            tensor[[0, 0, y, x]] = v;
            tensor[[0, 1, y, x]] = v;
            tensor[[0, 2, y, x]] = v;
        }
    }
    tensor
}

fn bilinear(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = (x.floor() as usize).min(width - 1);
    let y0 = (y.floor() as usize).min(height - 1);
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (x - x0 as f32).clamp(0.0, 1.0);
    let fy = (y - y0 as f32).clamp(0.0, 1.0);

    let tl = frame[y0 * width + x0] as f32;
    let tr = frame[y0 * width + x1] as f32;
    let bl = frame[y1 * width + x0] as f32;
    let br = frame[y1 * width + x1] as f32;

    tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
}

/// Decode one stride level's tensors into frame-space candidates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    lb: &Letterbox,
    out: &mut Vec<FaceBox>,
) {
    let grid = DET_INPUT_SIZE / stride;
    let anchors = grid * grid * DET_ANCHORS_PER_CELL;

    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= DET_SCORE_THRESHOLD {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid * stride) as f32;
        let anchor_y = (cell / grid * stride) as f32;

        let b = idx * 4;
        if b + 3 >= bboxes.len() {
            continue;
        }
        // Distances from the anchor center to the four box edges, in strides.
        let (x1, y1) = lb.to_frame(
            anchor_x - bboxes[b] * stride as f32,
            anchor_y - bboxes[b + 1] * stride as f32,
        );
        let (x2, y2) = lb.to_frame(
            anchor_x + bboxes[b + 2] * stride as f32,
            anchor_y + bboxes[b + 3] * stride as f32,
        );

        let k = idx * 10;
        let landmarks = (k + 9 < kps.len()).then(|| {
            std::array::from_fn(|i| {
                lb.to_frame(
                    anchor_x + kps[k + i * 2] * stride as f32,
                    anchor_y + kps[k + i * 2 + 1] * stride as f32,
                )
            })
        });

        out.push(FaceBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
}

/// Greedy non-maximum suppression, highest confidence first.
fn suppress_overlaps(mut candidates: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<FaceBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let ix = (a.x + a.width).min(b.x + b.width) - a.x.max(b.x);
    let iy = (a.y + a.height).min(b.y + b.height) - a.y.max(b.y);
    let inter = ix.max(0.0) * iy.max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = face(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face(30.0, 30.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping_pair() {
        let result = suppress_overlaps(
            vec![
                face(5.0, 5.0, 100.0, 100.0, 0.8),
                face(0.0, 0.0, 100.0, 100.0, 0.9),
                face(300.0, 300.0, 50.0, 50.0, 0.7),
            ],
            DET_NMS_IOU,
        );
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_sorts_by_confidence() {
        let result = suppress_overlaps(
            vec![face(0.0, 0.0, 10.0, 10.0, 0.6), face(50.0, 50.0, 10.0, 10.0, 0.95)],
            DET_NMS_IOU,
        );
        assert_eq!(result.len(), 2);
        assert!(result[0].confidence > result[1].confidence);
    }

    #[test]
    fn test_nms_empty() {
        assert!(suppress_overlaps(vec![], DET_NMS_IOU).is_empty());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240, DET_INPUT_SIZE);
        let (fx, fy) = (100.0f32, 50.0f32);
        let mx = fx * lb.scale + lb.pad_x;
        let my = fy * lb.scale + lb.pad_y;
        let (rx, ry) = lb.to_frame(mx, my);
        assert!((rx - fx).abs() < 0.1);
        assert!((ry - fy).abs() < 0.1);
    }

    #[test]
    fn test_letterbox_wide_frame_pads_vertically() {
        let lb = Letterbox::fit(640, 360, DET_INPUT_SIZE);
        assert_eq!(lb.pad_x, 0.0);
        assert!(lb.pad_y > 0.0);
        assert_eq!(lb.scaled_w, DET_INPUT_SIZE);
    }

    #[test]
    fn test_preprocess_uniform_frame_zero_mean() {
        // A frame at the model mean should normalize to ~0 everywhere,
        // including the padding band.
        let (w, h) = (64usize, 32usize);
        let frame = vec![DET_MEAN as u8; w * h];
        let lb = Letterbox::fit(w, h, DET_INPUT_SIZE);
        let tensor = preprocess(&frame, w, h, &lb);
        let v = tensor[[0, 0, 0, 0]];
        assert!(v.abs() < 0.01, "padding value {v}");
        let center = tensor[[0, 0, DET_INPUT_SIZE / 2, DET_INPUT_SIZE / 2]];
        assert!(center.abs() < 0.01, "center value {center}");
    }

    #[test]
    fn test_decode_stride_skips_low_scores() {
        let grid = DET_INPUT_SIZE / 32;
        let anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let scores = vec![0.1f32; anchors];
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];
        let lb = Letterbox::fit(640, 480, DET_INPUT_SIZE);

        let mut out = Vec::new();
        decode_stride(&scores, &bboxes, &kps, 32, &lb, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_decode_stride_emits_confident_anchor() {
        let grid = DET_INPUT_SIZE / 32;
        let anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[0] = 0.92;
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.5f32; anchors * 10];
        let lb = Letterbox::fit(640, 640, DET_INPUT_SIZE);

        let mut out = Vec::new();
        decode_stride(&scores, &bboxes, &kps, 32, &lb, &mut out);
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.92).abs() < 1e-6);
        assert!(out[0].landmarks.is_some());
        // Anchor at the origin, offsets of one stride each way: 64px square.
        assert!((out[0].width - 64.0).abs() < 1e-3);
    }
}
