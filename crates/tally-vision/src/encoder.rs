//! ArcFace face encoder via ONNX Runtime.
//!
//! Each detected face is cropped with a small margin, resized to 112x112
//! and turned into an L2-normalized 512-dimensional embedding.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use tally_core::{Embedding, FaceRect};
use thiserror::Error;

const INPUT_SIZE: u32 = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
/// Extra context around the detector box, as a fraction of its size.
const CROP_MARGIN: f32 = 0.1;
pub const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder model not found: {0}")]
    ModelNotFound(String),
    #[error("face {0} is outside the frame")]
    EmptyCrop(FaceRect),
    #[error("expected {EMBEDDING_DIM}-dim embedding, got {0}")]
    BadEmbedding(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    pub fn load(model_path: &Path) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );
        Ok(Self { session })
    }

    /// Embed the face at `rect` in `frame`.
    pub fn encode(&mut self, frame: &RgbImage, rect: FaceRect) -> Result<Embedding, EncoderError> {
        let crop = face_crop(frame, rect).ok_or(EncoderError::EmptyCrop(rect))?;
        let input = to_tensor(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>()?;
        if raw.len() != EMBEDDING_DIM {
            return Err(EncoderError::BadEmbedding(raw.len()));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

/// Square crop around `rect`, widened by the margin and resized to the
/// network input. `None` when nothing of the face lies inside the frame.
fn face_crop(frame: &RgbImage, rect: FaceRect) -> Option<RgbImage> {
    let rect = rect.clamped(frame.width(), frame.height());
    if rect.is_empty() {
        return None;
    }

    let side = rect.width().max(rect.height()) as f32 * (1.0 + 2.0 * CROP_MARGIN);
    let cx = (rect.left + rect.right) as f32 / 2.0;
    let cy = (rect.top + rect.bottom) as f32 / 2.0;
    let half = side / 2.0;
    let square = FaceRect::new(
        (cy - half).max(0.0) as u32,
        (cx + half).max(0.0) as u32,
        (cy + half).max(0.0) as u32,
        (cx - half).max(0.0) as u32,
    )
    .clamped(frame.width(), frame.height());

    let crop = image::imageops::crop_imm(frame, square.left, square.top, square.width(), square.height())
        .to_image();
    Some(image::imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle))
}

fn to_tensor(face: &RgbImage) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
