//! JPEG face crops saved alongside attendance records.

use crate::types::FaceRect;
use image::{ImageFormat, RgbImage};
use std::path::Path;

/// Crop `rect` out of `frame` and write it as a JPEG at `path`.
///
/// Returns `Ok(false)` when the clamped rectangle is empty and nothing
/// was written.
pub fn save_face_crop(frame: &RgbImage, rect: FaceRect, path: &Path) -> image::ImageResult<bool> {
    let rect = rect.clamped(frame.width(), frame.height());
    if rect.is_empty() {
        return Ok(false);
    }

    let crop = image::imageops::crop_imm(frame, rect.left, rect.top, rect.width(), rect.height())
        .to_image();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(image::ImageError::IoError)?;
    }
    crop.save_with_format(path, ImageFormat::Jpeg)?;
    Ok(true)
}

/// Snapshot file name for a recognised person, second precision.
pub fn known_file_name(name: &str, at: chrono::NaiveDateTime) -> String {
    format!("{}_{}.jpg", name.replace(' ', "_"), at.format("%Y%m%d_%H%M%S"))
}

/// Snapshot file name for an unknown face, microsecond precision.
pub fn unknown_file_name(at: chrono::NaiveDateTime) -> String {
    format!("Unknown_{}.jpg", at.format("%Y%m%d_%H%M%S_%6f"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::Rgb;

    fn frame() -> RgbImage {
        RgbImage::from_pixel(80, 60, Rgb([200, 120, 40]))
    }

    #[test]
    fn test_crop_written_with_rect_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("face.jpg");
        let written = save_face_crop(&frame(), FaceRect::new(10, 50, 40, 5), &path).unwrap();
        assert!(written);

        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (45, 30));
    }

    #[test]
    fn test_rect_outside_frame_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.jpg");
        assert!(save_face_crop(&frame(), FaceRect::new(50, 200, 200, 70), &path).unwrap());
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (10, 10));
    }

    #[test]
    fn test_empty_crop_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.jpg");
        assert!(!save_face_crop(&frame(), FaceRect::new(0, 0, 0, 0), &path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_file_names() {
        let at = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_micro_opt(14, 3, 5, 42)
            .unwrap();
        assert_eq!(known_file_name("Ada Lovelace", at), "Ada_Lovelace_20261019_140305.jpg");
        assert_eq!(unknown_file_name(at), "Unknown_20261019_140305_000042.jpg");
    }
}
