use crate::detector::FaceDetector;
use crate::encoder::FaceEncoder;
use image::RgbImage;
use std::path::Path;
use tally_core::{Embedding, EngineError, FaceEngine, FaceRect};

/// SCRFD + ArcFace behind the [`FaceEngine`] trait.
///
/// Distance is cosine distance, `1 - similarity`, so 0 means identical and
/// unrelated faces sit near 1.
pub struct OnnxEngine {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxEngine {
    pub fn load(detector_model: &Path, encoder_model: &Path) -> Result<Self, EngineError> {
        Ok(Self {
            detector: FaceDetector::load(detector_model)?,
            encoder: FaceEncoder::load(encoder_model)?,
        })
    }

    /// Load both models using the paths from `config`.
    pub fn from_config(config: &tally_core::Config) -> Result<Self, EngineError> {
        Self::load(&config.scrfd_model_path(), &config.arcface_model_path())
    }
}

impl FaceEngine for OnnxEngine {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRect>, EngineError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(&mut self, image: &RgbImage, faces: &[FaceRect]) -> Result<Vec<Embedding>, EngineError> {
        faces
            .iter()
            .map(|&rect| self.encoder.encode(image, rect).map_err(EngineError::from))
            .collect()
    }

    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        1.0 - a.similarity(b)
    }
}
