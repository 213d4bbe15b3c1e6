//! Reference images on disk: loading them into embeddings and managing
//! enrollment (add, rename, remove).
//!
//! File naming: the display name is the file stem with `_` read as a space.
//! A trailing all-digit segment (`Ada_Lovelace_2.jpg`) is an enrollment index
//! so one person can have several reference images.

use crate::engine::FaceEngine;
use crate::types::KnownFaceEntry;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("unsupported image file: {0} (expected .jpg, .jpeg or .png)")]
    UnsupportedImage(PathBuf),
    #[error("no reference images enrolled for {0:?}")]
    NotEnrolled(String),
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Load every reference image in `dir` and encode its first face.
///
/// Files without a detectable face, or that fail to decode, are skipped.
/// A missing directory yields an empty list; recognition then classifies
/// every face as unknown.
pub fn load_known_faces<E: FaceEngine + ?Sized>(dir: &Path, engine: &mut E) -> Vec<KnownFaceEntry> {
    let files = match image_files(dir) {
        Ok(files) => files,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "known faces directory unavailable");
            return Vec::new();
        }
    };

    let started = std::time::Instant::now();
    let mut entries = Vec::with_capacity(files.len());

    for path in &files {
        let Some(name) = display_name(path) else {
            continue;
        };
        let image = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to decode reference image");
                continue;
            }
        };
        let embedding = engine
            .detect(&image)
            .and_then(|faces| match faces.first() {
                Some(face) => engine.encode(&image, std::slice::from_ref(face)),
                None => Ok(Vec::new()),
            });
        match embedding {
            Ok(mut embeddings) if !embeddings.is_empty() => {
                entries.push(KnownFaceEntry {
                    name,
                    embedding: embeddings.swap_remove(0),
                });
            }
            Ok(_) => tracing::warn!(path = %path.display(), "no face found in reference image; skipping"),
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to encode reference image")
            }
        }
    }

    if files.is_empty() {
        tracing::warn!(dir = %dir.display(), "no reference images found");
    } else {
        tracing::info!(
            loaded = entries.len(),
            files = files.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "known faces loaded"
        );
    }
    entries
}

/// Display name for a reference image path, or `None` if it is not an image.
pub fn display_name(path: &Path) -> Option<String> {
    if !is_image(path) {
        return None;
    }
    let (base, _) = split_stem(path.file_stem()?.to_str()?);
    Some(base.replace('_', " "))
}

/// Split a file stem into the person part and its enrollment index, if any.
fn split_stem(stem: &str) -> (&str, Option<&str>) {
    match stem.rsplit_once('_') {
        Some((head, index))
            if !head.is_empty() && !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (head, Some(index))
        }
        _ => (stem, None),
    }
}

/// File-name form of a display name.
fn clean_name(name: &str) -> String {
    name.trim().replace([' ', '/', '\\'], "_")
}

/// True when `clean` would be read back with its last segment taken as an index.
fn ends_in_index(clean: &str) -> bool {
    split_stem(clean).1.is_some()
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

fn image_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image(p))
        .collect();
    files.sort();
    Ok(files)
}

/// The known-faces directory as an enrollment store.
pub struct KnownFacesDir {
    dir: PathBuf,
}

impl KnownFacesDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Enrolled names with their reference files, sorted by name.
    pub fn list(&self) -> Result<BTreeMap<String, Vec<PathBuf>>, EnrollError> {
        let mut by_name: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for path in self.files()? {
            if let Some(name) = display_name(&path) {
                by_name.entry(name).or_default().push(path);
            }
        }
        Ok(by_name)
    }

    /// Copy `sources` in as reference images for `name`.
    ///
    /// One image is stored as `<Name>.<ext>`, several as `<Name>_<i>.<ext>`.
    /// A name ending in a number always gets an index, so `Louis 14` is not
    /// read back as `Louis`. Existing files are never overwritten; the index
    /// moves past them.
    pub fn enroll(&self, name: &str, sources: &[PathBuf]) -> Result<Vec<PathBuf>, EnrollError> {
        let clean = clean_name(name);
        if clean.is_empty() {
            return Err(EnrollError::EmptyName);
        }
        if let Some(bad) = sources.iter().find(|p| !is_image(p)) {
            return Err(EnrollError::UnsupportedImage(bad.clone()));
        }
        fs::create_dir_all(&self.dir).map_err(|source| self.io(&self.dir, source))?;

        let plain_allowed = sources.len() == 1 && !ends_in_index(&clean);
        let mut written = Vec::with_capacity(sources.len());
        let mut index = 0usize;
        for src in sources {
            let ext = extension(src);
            let plain = self.dir.join(format!("{clean}.{ext}"));
            let dest = if plain_allowed && !plain.exists() {
                plain
            } else {
                self.next_free(&clean, &ext, &mut index, &[])
            };
            fs::copy(src, &dest).map_err(|source| self.io(src, source))?;
            tracing::info!(name = %name, src = %src.display(), dest = %dest.display(), "reference image enrolled");
            written.push(dest);
        }
        Ok(written)
    }

    /// Rename every reference image of `old` to `new`, keeping indexes
    /// and extensions. Returns the number of files renamed.
    pub fn rename(&self, old: &str, new: &str) -> Result<usize, EnrollError> {
        let new_clean = clean_name(new);
        if new_clean.is_empty() {
            return Err(EnrollError::EmptyName);
        }
        let new_needs_index = ends_in_index(&new_clean);
        let files = self.files_of(old)?;

        let mut plan: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len());
        let mut next_index = 0usize;
        for path in files {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("jpg");
            let target = match split_stem(stem).1 {
                Some(index) => self.dir.join(format!("{new_clean}_{index}.{ext}")),
                None if !new_needs_index => self.dir.join(format!("{new_clean}.{ext}")),
                None => {
                    let taken: Vec<&PathBuf> = plan.iter().map(|(_, to)| to).collect();
                    self.next_free(&new_clean, ext, &mut next_index, &taken)
                }
            };
            let planned = plan.iter().any(|(_, to)| *to == target);
            if planned || (target != path && target.exists()) {
                return Err(EnrollError::AlreadyExists(target));
            }
            plan.push((path, target));
        }

        for (from, to) in &plan {
            fs::rename(from, to).map_err(|source| self.io(from, source))?;
            tracing::info!(from = %from.display(), to = %to.display(), "reference image renamed");
        }
        Ok(plan.len())
    }

    /// Delete every reference image of `name`. Returns the number removed.
    pub fn remove(&self, name: &str) -> Result<usize, EnrollError> {
        let files = self.files_of(name)?;
        for path in &files {
            fs::remove_file(path).map_err(|source| self.io(path, source))?;
            tracing::info!(path = %path.display(), "reference image removed");
        }
        Ok(files.len())
    }

    fn files(&self) -> Result<Vec<PathBuf>, EnrollError> {
        match image_files(&self.dir) {
            Ok(files) => Ok(files),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(self.io(&self.dir, source)),
        }
    }

    /// Files whose display name is exactly `name`.
    fn files_of(&self, name: &str) -> Result<Vec<PathBuf>, EnrollError> {
        let wanted = name.trim();
        let files: Vec<PathBuf> = self
            .files()?
            .into_iter()
            .filter(|p| display_name(p).as_deref() == Some(wanted))
            .collect();
        if files.is_empty() {
            return Err(EnrollError::NotEnrolled(wanted.to_string()));
        }
        Ok(files)
    }

    /// First `<clean>_<i>.<ext>` at or after `*index` that is neither on
    /// disk nor in `taken`; advances `*index` past it.
    fn next_free(&self, clean: &str, ext: &str, index: &mut usize, taken: &[&PathBuf]) -> PathBuf {
        loop {
            let candidate = self.dir.join(format!("{clean}_{index}.{ext}"));
            *index += 1;
            if !candidate.exists() && !taken.contains(&&candidate) {
                return candidate;
            }
        }
    }

    fn io(&self, path: &Path, source: std::io::Error) -> EnrollError {
        EnrollError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "jpg".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use crate::types::{Embedding, FaceRect};
    use image::{Rgb, RgbImage};

    /// Encodes the image's top-left pixel; all-black images have no face.
    struct PixelEngine;

    impl FaceEngine for PixelEngine {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRect>, EngineError> {
            if image.get_pixel(0, 0).0 == [0, 0, 0] {
                return Ok(Vec::new());
            }
            Ok(vec![FaceRect::new(0, image.width(), image.height(), 0)])
        }

        fn encode(&mut self, image: &RgbImage, faces: &[FaceRect]) -> Result<Vec<Embedding>, EngineError> {
            let p = image.get_pixel(0, 0).0;
            Ok(faces
                .iter()
                .map(|_| Embedding::new(p.iter().map(|&c| c as f32 / 255.0).collect()))
                .collect())
        }

        fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
            a.euclidean_distance(b)
        }
    }

    fn write_png(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(8, 8, Rgb(color)).save(path).unwrap();
    }

    #[test]
    fn test_display_name_rules() {
        let name = |s: &str| display_name(Path::new(s));
        assert_eq!(name("Ada_Lovelace.jpg").as_deref(), Some("Ada Lovelace"));
        assert_eq!(name("Ada_Lovelace_0.JPG").as_deref(), Some("Ada Lovelace"));
        assert_eq!(name("Ada_Lovelace_1712345678.png").as_deref(), Some("Ada Lovelace"));
        assert_eq!(name("Agent_7b.jpeg").as_deref(), Some("Agent 7b"));
        assert_eq!(name("Louis_14_0.png").as_deref(), Some("Louis 14"));
        assert_eq!(name("42.jpg").as_deref(), Some("42"));
        assert_eq!(name("notes.txt"), None);
    }

    #[test]
    fn test_load_known_faces_skips_faceless_and_non_images() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("Ada_Lovelace.png"), [255, 0, 0]);
        write_png(&dir.path().join("Ada_Lovelace_1.png"), [250, 5, 0]);
        write_png(&dir.path().join("Nobody.png"), [0, 0, 0]);
        fs::write(dir.path().join("readme.txt"), "x").unwrap();
        fs::write(dir.path().join("Broken.jpg"), "not a jpeg").unwrap();

        let entries = load_known_faces(dir.path(), &mut PixelEngine);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Ada Lovelace", "Ada Lovelace"]);
        assert!((entries[0].embedding.values[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_known_faces_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let entries = load_known_faces(&dir.path().join("absent"), &mut PixelEngine);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_enroll_single_and_multiple() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("a.PNG");
        let b = src.path().join("b.png");
        write_png(&a, [1, 2, 3]);
        write_png(&b, [4, 5, 6]);

        let dir = tempfile::tempdir().unwrap();
        let store = KnownFacesDir::new(dir.path());

        let one = store.enroll("Ada Lovelace", &[a.clone()]).unwrap();
        assert_eq!(one, [dir.path().join("Ada_Lovelace.png")]);

        let two = store.enroll("Ada Lovelace", &[a, b]).unwrap();
        assert_eq!(
            two,
            [dir.path().join("Ada_Lovelace_0.png"), dir.path().join("Ada_Lovelace_1.png")]
        );

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed["Ada Lovelace"].len(), 3);
    }

    #[test]
    fn test_enroll_never_overwrites() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("a.png");
        write_png(&a, [1, 2, 3]);

        let dir = tempfile::tempdir().unwrap();
        let store = KnownFacesDir::new(dir.path());
        store.enroll("Grace", &[a.clone()]).unwrap();
        let second = store.enroll("Grace", &[a]).unwrap();
        assert_eq!(second, [dir.path().join("Grace_0.png")]);
    }

    #[test]
    fn test_enroll_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnownFacesDir::new(dir.path());
        assert!(matches!(store.enroll("  ", &[]), Err(EnrollError::EmptyName)));
        assert!(matches!(
            store.enroll("Ada", &[PathBuf::from("face.gif")]),
            Err(EnrollError::UnsupportedImage(_))
        ));
    }

    #[test]
    fn test_rename_is_exact_and_keeps_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("Ada_0.png"), [1, 1, 1]);
        write_png(&dir.path().join("Ada_1.png"), [1, 1, 1]);
        write_png(&dir.path().join("Adam.png"), [1, 1, 1]);
        let store = KnownFacesDir::new(dir.path());

        assert_eq!(store.rename("Ada", "Ada Lovelace").unwrap(), 2);
        assert!(dir.path().join("Ada_Lovelace_0.png").exists());
        assert!(dir.path().join("Ada_Lovelace_1.png").exists());
        assert!(dir.path().join("Adam.png").exists());
    }

    #[test]
    fn test_rename_file_named_with_spaces() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("Ada Lovelace.png"), [1, 1, 1]);
        write_png(&dir.path().join("Ada Lovelace_2.jpg"), [1, 1, 1]);
        let store = KnownFacesDir::new(dir.path());

        assert_eq!(store.rename("Ada Lovelace", "Grace Hopper").unwrap(), 2);
        assert!(dir.path().join("Grace_Hopper.png").exists());
        assert!(dir.path().join("Grace_Hopper_2.jpg").exists());
        let names: Vec<_> = store.list().unwrap().into_keys().collect();
        assert_eq!(names, ["Grace Hopper"]);
    }

    #[test]
    fn test_name_ending_in_number_survives_enroll_and_rename() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("a.png");
        write_png(&a, [1, 2, 3]);

        let dir = tempfile::tempdir().unwrap();
        let store = KnownFacesDir::new(dir.path());
        let written = store.enroll("Louis 14", &[a]).unwrap();
        assert_eq!(written, [dir.path().join("Louis_14_0.png")]);
        assert_eq!(store.list().unwrap().into_keys().collect::<Vec<_>>(), ["Louis 14"]);

        write_png(&dir.path().join("Anne.png"), [1, 1, 1]);
        write_png(&dir.path().join("Anne.jpg"), [1, 1, 1]);
        assert_eq!(store.rename("Anne", "Mary 2").unwrap(), 2);
        let listed = store.list().unwrap();
        assert_eq!(listed.keys().collect::<Vec<_>>(), ["Louis 14", "Mary 2"]);
        assert_eq!(listed["Mary 2"].len(), 2);
    }

    #[test]
    fn test_rename_refuses_collision() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("Ada.png"), [1, 1, 1]);
        write_png(&dir.path().join("Grace.png"), [1, 1, 1]);
        let store = KnownFacesDir::new(dir.path());

        assert!(matches!(store.rename("Ada", "Grace"), Err(EnrollError::AlreadyExists(_))));
        assert!(dir.path().join("Ada.png").exists());
        assert!(matches!(store.rename("Nobody", "X"), Err(EnrollError::NotEnrolled(_))));
    }

    #[test]
    fn test_remove_only_exact_name() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("Ada.png"), [1, 1, 1]);
        write_png(&dir.path().join("Ada_3.jpg"), [1, 1, 1]);
        write_png(&dir.path().join("Adam.png"), [1, 1, 1]);
        let store = KnownFacesDir::new(dir.path());

        assert_eq!(store.remove("Ada").unwrap(), 2);
        let remaining: Vec<_> = store.list().unwrap().into_keys().collect();
        assert_eq!(remaining, ["Adam"]);
    }
}
