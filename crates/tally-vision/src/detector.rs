//! SCRFD face detector via ONNX Runtime.
//!
//! The frame is scaled to fit the 640x640 input, anchored at the top-left
//! corner, and the remaining area is left at the normalized mean. Boxes are
//! decoded per stride, scaled back to frame pixels and merged with NMS.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::cmp::Ordering;
use std::path::Path;
use tally_core::FaceRect;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected detector outputs: {0}")]
    BadOutputs(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A raw detection in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn to_rect(self, width: u32, height: u32) -> FaceRect {
        let px = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        FaceRect::new(
            px(self.y1, height),
            px(self.x2, width),
            px(self.y2, height),
            px(self.x1, width),
        )
    }
}

/// (score output, bbox output) for each stride.
type OutputSlots = [(usize, usize); 3];

pub struct FaceDetector {
    session: Session,
    slots: OutputSlots,
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::BadOutputs(format!(
                "need score and bbox tensors for 3 strides, model has {} outputs",
                names.len()
            )));
        }
        let slots = output_slots(&names);
        tracing::info!(path = %model_path.display(), outputs = ?names, ?slots, "loaded SCRFD model");

        Ok(Self { session, slots })
    }

    /// Detect faces in `frame`, highest score first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceRect>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, scale) = letterbox(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&(score_idx, bbox_idx), &stride) in self.slots.iter().zip(STRIDES.iter()) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::BadOutputs(format!("scores, stride {stride}: {e}")))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::BadOutputs(format!("boxes, stride {stride}: {e}")))?;
            candidates.extend(decode(scores, boxes, stride, scale));
        }

        let faces: Vec<FaceRect> = nms(candidates, NMS_THRESHOLD)
            .into_iter()
            .map(|c| c.to_rect(frame.width(), frame.height()))
            .filter(|r| !r.is_empty())
            .collect();
        tracing::trace!(count = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

/// Map output names to stride slots. Exports either name tensors
/// `score_8`, `bbox_8`, ... or use bare numbers, in which case the
/// conventional order is scores 8/16/32 followed by boxes 8/16/32.
fn output_slots(names: &[String]) -> OutputSlots {
    let find = |kind: &str, stride: u32| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named: Option<Vec<(usize, usize)>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();

    match named.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Resize into the top-left of a 640x640 NCHW tensor.
/// Returns the tensor and the frame-to-input scale.
fn letterbox(frame: &RgbImage) -> (Array4<f32>, f32) {
    let scale = (INPUT_SIZE as f32 / frame.width() as f32).min(INPUT_SIZE as f32 / frame.height() as f32);
    let w = ((frame.width() as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let h = ((frame.height() as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = image::imageops::resize(frame, w, h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    (tensor, scale)
}

/// Decode one stride's anchor grid into frame-space candidates.
fn decode(scores: &[f32], boxes: &[f32], stride: u32, scale: f32) -> Vec<Candidate> {
    let grid_w = (INPUT_SIZE / stride) as usize;
    let step = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|(_, s)| **s > SCORE_THRESHOLD)
        .filter_map(|(i, &score)| {
            let d = boxes.get(i * 4..i * 4 + 4)?;
            let cell = i / ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * step;
            let cy = (cell / grid_w) as f32 * step;
            Some(Candidate {
                x1: (cx - d[0] * step) / scale,
                y1: (cy - d[1] * step) / scale,
                x2: (cx + d[2] * step) / scale,
                y2: (cy + d[3] * step) / scale,
                score,
            })
        })
        .collect()
}

fn nms(mut candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Candidate> = Vec::new();
    for c in candidates {
        if kept.iter().all(|k| iou(k, &c) <= threshold) {
            kept.push(c);
        }
    }
    kept
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let overlap = Candidate {
        x1: a.x1.max(b.x1),
        y1: a.y1.max(b.y1),
        x2: a.x2.min(b.x2),
        y2: a.y2.min(b.y2),
        score: 0.0,
    };
    let inter = overlap.area();
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
