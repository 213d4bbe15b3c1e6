//! Capability contract for the face detection/encoding collaborator.

use crate::types::{Embedding, FaceRect};
use image::RgbImage;

/// Error reported by a [`FaceEngine`] implementation.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// Face detection, encoding and comparison.
///
/// The ledger and matcher depend only on this trait, never on the
/// algorithm behind it.
pub trait FaceEngine {
    /// Find face rectangles in `image`, best detection first.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRect>, EngineError>;

    /// One embedding per rectangle, in the same order.
    fn encode(&mut self, image: &RgbImage, faces: &[FaceRect])
        -> Result<Vec<Embedding>, EngineError>;

    /// Distance between two embeddings. Smaller = more alike.
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32;
}

impl<E: FaceEngine + ?Sized> FaceEngine for Box<E> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRect>, EngineError> {
        (**self).detect(image)
    }

    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[FaceRect],
    ) -> Result<Vec<Embedding>, EngineError> {
        (**self).encode(image, faces)
    }

    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        (**self).distance(a, b)
    }
}
