//! tally-core — Attendance ledger and face matching.
//!
//! Records who was seen and when: one "Present" entry per known person per
//! day, debounced entries for unknown faces, and a JPEG crop for each.
//! Face detection and encoding sit behind the [`FaceEngine`] trait.

pub mod clock;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod known_faces;
pub mod ledger;
pub mod matcher;
pub mod projection;
pub mod recognizer;
pub mod snapshot;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use config::{Config, ConfigError};
pub use engine::{EngineError, FaceEngine};
pub use known_faces::{load_known_faces, EnrollError, KnownFacesDir};
pub use ledger::{Ledger, LedgerError, Sighting};
pub use projection::{dashboard_rows, write_csv, DashboardRow};
pub use recognizer::{FaceOutcome, FrameReport, Recognizer, RecognizerError};
pub use types::{
    AttendanceRecord, Embedding, FaceRect, IdentityKey, KnownFaceEntry, MatchResult, Status,
    Subject,
};
