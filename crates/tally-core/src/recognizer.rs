//! Frame → faces → names → ledger.

use crate::config::Config;
use crate::engine::FaceEngine;
use crate::known_faces::load_known_faces;
use crate::ledger::{Ledger, Sighting};
use crate::matcher::NearestMatcher;
use crate::types::{Embedding, FaceRect, IdentityKey, KnownFaceEntry, Subject};
use image::imageops::FilterType;
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("face engine failed: {0}")]
    Engine(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// What happened to one face in a processed frame.
#[derive(Debug, Serialize)]
pub struct FaceOutcome {
    pub name: String,
    pub known: bool,
    pub location: FaceRect,
    /// Distance to the closest known face, if any are enrolled.
    pub distance: Option<f32>,
    /// A new ledger record was written.
    pub logged: bool,
    /// Ledger failure for this face; other faces are unaffected.
    pub error: Option<String>,
}

/// Outcome of [`Recognizer::process_frame`].
#[derive(Debug, Default, Serialize)]
pub struct FrameReport {
    pub faces: Vec<FaceOutcome>,
}

impl FrameReport {
    pub fn logged(&self) -> usize {
        self.faces.iter().filter(|f| f.logged).count()
    }
}

/// Owns the face engine and the known-faces list; writes through a shared ledger.
pub struct Recognizer<E> {
    engine: E,
    known: Vec<KnownFaceEntry>,
    ledger: Arc<Ledger>,
    known_faces_dir: PathBuf,
    tolerance: f32,
    resize_factor: f32,
    key_dims: usize,
    key_decimals: u32,
}

impl<E: FaceEngine> Recognizer<E> {
    /// Build a recognizer with an empty known-faces list.
    /// Call [`reload_known_faces`](Self::reload_known_faces) to populate it.
    pub fn new(engine: E, ledger: Arc<Ledger>, config: &Config) -> Self {
        let resize_factor = if config.resize_factor > 0.0 && config.resize_factor <= 1.0 {
            config.resize_factor
        } else {
            tracing::warn!(value = config.resize_factor, "resize factor out of (0, 1]; using 1.0");
            1.0
        };
        Self {
            engine,
            known: Vec::new(),
            ledger,
            known_faces_dir: config.known_faces_dir.clone(),
            tolerance: config.tolerance,
            resize_factor,
            key_dims: config.identity_key_dims,
            key_decimals: config.identity_key_decimals,
        }
    }

    /// Replace the known-faces list with a fresh load from disk.
    pub fn reload_known_faces(&mut self) -> usize {
        self.known = load_known_faces(&self.known_faces_dir, &mut self.engine);
        self.known.len()
    }

    pub fn known_faces(&self) -> &[KnownFaceEntry] {
        &self.known
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Detect, identify and log every face in `frame`.
    ///
    /// Detection runs on a copy shrunk by the resize factor; rectangles are
    /// mapped back to `frame` before they reach the ledger. Engine failures
    /// abort the frame; ledger failures are reported per face.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<FrameReport, RecognizerError> {
        let small = self.downscale(frame);
        let detection_frame = small.as_ref().unwrap_or(frame);

        let faces = self
            .engine
            .detect(detection_frame)
            .map_err(|e| RecognizerError::Engine(e.to_string()))?;
        if faces.is_empty() {
            return Ok(FrameReport::default());
        }
        let embeddings = self
            .engine
            .encode(detection_frame, &faces)
            .map_err(|e| RecognizerError::Engine(e.to_string()))?;
        tracing::debug!(faces = faces.len(), "faces detected");

        let engine = &self.engine;
        let matcher = NearestMatcher::new(|a: &Embedding, b: &Embedding| engine.distance(a, b));
        let mut report = FrameReport::default();

        for (rect, embedding) in faces.iter().zip(embeddings.iter()) {
            let location = self.to_frame_space(*rect, frame);
            let result = matcher.compare(embedding, &self.known, self.tolerance);

            let subject = match &result.name {
                Some(name) => Subject::Known(name.clone()),
                None => Subject::Unknown(Some(IdentityKey::from_embedding(
                    embedding,
                    self.key_dims,
                    self.key_decimals,
                ))),
            };
            let name = result
                .name
                .clone()
                .unwrap_or_else(|| self.ledger.unknown_label().to_string());

            let sighting = Sighting {
                subject,
                frame,
                location,
            };
            let (logged, error) = match self.ledger.record_sighting(&sighting) {
                Ok(logged) => (logged, None),
                Err(err) => {
                    tracing::error!(name = %name, error = %err, "attendance not recorded");
                    (false, Some(err.to_string()))
                }
            };

            report.faces.push(FaceOutcome {
                name,
                known: result.matched,
                location,
                distance: result.distance.is_finite().then_some(result.distance),
                logged,
                error,
            });
        }

        Ok(report)
    }

    /// Decode an image file and process it as a single frame.
    pub fn process_image(&mut self, path: &Path) -> Result<FrameReport, RecognizerError> {
        let frame = image::open(path)?.to_rgb8();
        tracing::debug!(path = %path.display(), width = frame.width(), height = frame.height(), "processing image");
        self.process_frame(&frame)
    }

    fn downscale(&self, frame: &RgbImage) -> Option<RgbImage> {
        if self.resize_factor >= 1.0 {
            return None;
        }
        let w = ((frame.width() as f32 * self.resize_factor) as u32).max(1);
        let h = ((frame.height() as f32 * self.resize_factor) as u32).max(1);
        Some(image::imageops::resize(frame, w, h, FilterType::Triangle))
    }

    fn to_frame_space(&self, rect: FaceRect, frame: &RgbImage) -> FaceRect {
        let rect = if self.resize_factor < 1.0 {
            rect.upscaled(self.resize_factor)
        } else {
            rect
        };
        rect.clamped(frame.width(), frame.height())
    }
}
