//! tally-vision — ONNX face engine.
//!
//! SCRFD finds faces, ArcFace turns each crop into a 512-dimensional
//! embedding. [`OnnxEngine`] wires both into the `FaceEngine` trait used
//! by the attendance ledger.

pub mod detector;
pub mod encoder;
mod onnx_engine;

pub use detector::{DetectorError, FaceDetector};
pub use encoder::{EncoderError, FaceEncoder};
pub use onnx_engine::OnnxEngine;
