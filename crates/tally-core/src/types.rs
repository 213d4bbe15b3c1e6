use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Face rectangle in pixel coordinates, `(top, right, bottom, left)` order.
///
/// `bottom` and `right` are exclusive, matching array slicing of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRect {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// True when the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Map a rectangle found on a downscaled frame back to full resolution.
    ///
    /// `resize_factor` is the factor the frame was shrunk by before detection;
    /// each coordinate is divided by it and truncated.
    pub fn upscaled(&self, resize_factor: f32) -> Self {
        let up = |v: u32| (v as f32 / resize_factor) as u32;
        Self {
            top: up(self.top),
            right: up(self.right),
            bottom: up(self.bottom),
            left: up(self.left),
        }
    }

    /// Clamp the rectangle to a `width × height` frame.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        Self {
            top: self.top.min(height),
            right: self.right.min(width),
            bottom: self.bottom.min(height),
            left: self.left.min(width),
        }
    }
}

impl fmt::Display for FaceRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.top, self.right, self.bottom, self.left
        )
    }
}

/// Face embedding vector produced by a [`FaceEngine`](crate::FaceEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled reference face.
#[derive(Debug, Clone)]
pub struct KnownFaceEntry {
    pub name: String,
    pub embedding: Embedding,
}

/// Low-precision fingerprint of an embedding.
///
/// Only used to debounce repeat sightings of the same unidentified face
/// across consecutive frames. Two different people can share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(Vec<i64>);

impl IdentityKey {
    /// Take the first `dims` components, rounded to `decimals` places.
    pub fn from_embedding(embedding: &Embedding, dims: usize, decimals: u32) -> Self {
        let scale = 10f64.powi(decimals as i32);
        Self(
            embedding
                .values
                .iter()
                .take(dims)
                .map(|&v| (v as f64 * scale).round() as i64)
                .collect(),
        )
    }

    pub fn from_raw(components: Vec<i64>) -> Self {
        Self(components)
    }

    /// Shared key for unknown sightings that carry no fingerprint.
    pub fn anonymous() -> Self {
        Self(Vec::new())
    }
}

/// Who a sighting is of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Known(String),
    /// No enrolled face within tolerance. The key is `None` when the caller
    /// has no embedding to fingerprint. Keyless sightings still debounce:
    /// they share a single window instead of each logging a row.
    Unknown(Option<IdentityKey>),
}

/// Attendance status. Statuses written by other tools are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Present,
    UnknownLogged,
    Other(String),
}

impl Status {
    pub fn as_str(&self) -> &str {
        match self {
            Status::Present => "Present",
            Status::UnknownLogged => "Unknown - Logged",
            Status::Other(s) => s,
        }
    }

    /// Any status starting with "Present" counts toward the once-a-day rule.
    pub fn is_present(&self) -> bool {
        self.as_str().starts_with("Present")
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Present" => Status::Present,
            "Unknown - Logged" => Status::UnknownLogged,
            _ => Status::Other(s),
        }
    }
}

impl From<Status> for String {
    fn from(s: Status) -> Self {
        match s {
            Status::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the attendance ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub timestamp: NaiveDateTime,
    pub time_arrival: String,
    pub status: Status,
    pub snapshot_path: Option<String>,
}

impl AttendanceRecord {
    pub fn new(
        name: impl Into<String>,
        at: NaiveDateTime,
        status: Status,
        snapshot_path: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            timestamp: at,
            time_arrival: at.format("%H:%M:%S").to_string(),
            status,
            snapshot_path,
        }
    }
}

/// Result of matching a query embedding against the known faces.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the closest known face (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
    /// Display name of the matched face (if any).
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_rect_upscaled_truncates() {
        let small = FaceRect::new(10, 51, 61, 5);
        let full = small.upscaled(0.25);
        assert_eq!(full, FaceRect::new(40, 204, 244, 20));
    }

    #[test]
    fn test_rect_degenerate_is_empty() {
        assert!(FaceRect::new(0, 0, 0, 0).is_empty());
        assert!(FaceRect::new(10, 5, 20, 9).is_empty());
        assert!(!FaceRect::new(10, 50, 60, 5).is_empty());
    }

    #[test]
    fn test_rect_clamped() {
        let r = FaceRect::new(10, 900, 700, 5).clamped(640, 480);
        assert_eq!(r, FaceRect::new(10, 640, 480, 5));
    }

    #[test]
    fn test_identity_key_rounds_leading_dims() {
        let a = Embedding::new(vec![0.12341, -0.5, 0.9999, 0.1, 0.2]);
        let b = Embedding::new(vec![0.12349, -0.5, 0.9999, 0.1, 0.7]);
        let ka = IdentityKey::from_embedding(&a, 4, 3);
        let kb = IdentityKey::from_embedding(&b, 4, 3);
        assert_eq!(ka, kb);
        assert_eq!(ka, IdentityKey::from_raw(vec![123, -500, 1000, 100]));
    }

    #[test]
    fn test_status_roundtrips_foreign_values() {
        let s: Status = serde_json::from_str("\"Present - Late\"").unwrap();
        assert_eq!(s, Status::Other("Present - Late".into()));
        assert!(s.is_present());
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"Present - Late\"");
        assert!(!Status::UnknownLogged.is_present());
    }

    #[test]
    fn test_record_serializes_with_fixed_field_names() {
        let at = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_micro_opt(9, 5, 7, 123456)
            .unwrap();
        let record = AttendanceRecord::new("Ada Lovelace", at, Status::Present, None);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "Ada Lovelace");
        assert_eq!(json["timestamp"], "2026-10-19T09:05:07.123456");
        assert_eq!(json["time_arrival"], "09:05:07");
        assert_eq!(json["status"], "Present");
        assert!(json["snapshot_path"].is_null());
    }

    #[test]
    fn test_record_parses_timestamp_without_fraction() {
        let json = r#"{"name":"Grace","timestamp":"2026-10-19T08:00:00",
            "time_arrival":"08:00:00","status":"Present","snapshot_path":null}"#;
        let record: AttendanceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.timestamp.format("%H:%M").to_string(), "08:00");
    }
}
