use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Shared configuration for the daemon and the CLI.
///
/// Resolution order: built-in defaults, then the TOML file named by
/// `TALLY_CONFIG` (if set), then individual `TALLY_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reference images, one or more per enrolled person.
    pub known_faces_dir: PathBuf,
    /// Snapshots of recognised people.
    pub snapshots_dir: PathBuf,
    /// Snapshots of unknown faces.
    pub unknown_faces_dir: PathBuf,
    /// JSON attendance ledger.
    pub ledger_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance for a positive match.
    pub tolerance: f32,
    /// Minimum seconds between two log writes for the same unknown face.
    pub debounce_secs: u64,
    /// Debounce entries older than this many windows are evicted.
    pub debounce_retain_windows: u32,
    /// Frames are shrunk by this factor before detection.
    pub resize_factor: f32,
    /// Leading embedding dimensions used for an unknown face's fingerprint.
    pub identity_key_dims: usize,
    /// Decimal places kept in the fingerprint.
    pub identity_key_decimals: u32,
    /// Name written to the ledger for unrecognised faces.
    pub unknown_label: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(Path::new("data"))
    }
}

impl Config {
    /// Default layout rooted at `data_dir`.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            known_faces_dir: data_dir.join("known_faces"),
            snapshots_dir: data_dir.join("snapshots"),
            unknown_faces_dir: data_dir.join("unknown_faces_detected"),
            ledger_path: data_dir.join("attendance_logs").join("attendance_log.json"),
            model_dir: data_dir.join("models"),
            tolerance: 0.55,
            debounce_secs: 5,
            debounce_retain_windows: 4,
            resize_factor: 0.25,
            identity_key_dims: 8,
            identity_key_decimals: 3,
            unknown_label: "Unknown".to_string(),
        }
    }

    /// Load configuration from `TALLY_CONFIG` and `TALLY_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var_os("TALLY_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let data_dir = std::env::var("TALLY_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("data"));
                Self::with_data_dir(&data_dir)
            }
        };
        Ok(base.apply_env(|key| std::env::var(key).ok()))
    }

    /// Parse a TOML config file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from an environment lookup.
    pub fn apply_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("TALLY_KNOWN_FACES_DIR") {
            self.known_faces_dir = v.into();
        }
        if let Some(v) = var("TALLY_SNAPSHOTS_DIR") {
            self.snapshots_dir = v.into();
        }
        if let Some(v) = var("TALLY_UNKNOWN_DIR") {
            self.unknown_faces_dir = v.into();
        }
        if let Some(v) = var("TALLY_LEDGER_PATH") {
            self.ledger_path = v.into();
        }
        if let Some(v) = var("TALLY_MODEL_DIR") {
            self.model_dir = v.into();
        }
        if let Some(v) = var("TALLY_UNKNOWN_LABEL") {
            self.unknown_label = v;
        }
        self.tolerance = parsed(&var, "TALLY_TOLERANCE", self.tolerance);
        self.debounce_secs = parsed(&var, "TALLY_DEBOUNCE_SECS", self.debounce_secs);
        self.resize_factor = parsed(&var, "TALLY_RESIZE_FACTOR", self.resize_factor);
        self
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }

    /// Create every directory the ledger writes into.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.known_faces_dir)?;
        std::fs::create_dir_all(&self.snapshots_dir)?;
        std::fs::create_dir_all(&self.unknown_faces_dir)?;
        if let Some(parent) = self.ledger_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable config value");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_data_layout() {
        let config = Config::default();
        assert_eq!(
            config.ledger_path,
            Path::new("data/attendance_logs/attendance_log.json")
        );
        assert_eq!(config.unknown_faces_dir, Path::new("data/unknown_faces_detected"));
        assert!((config.tolerance - 0.55).abs() < 1e-6);
        assert_eq!(config.debounce_window(), Duration::from_secs(5));
        assert!((config.resize_factor - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TALLY_TOLERANCE", "0.4"),
            ("TALLY_DEBOUNCE_SECS", "12"),
            ("TALLY_LEDGER_PATH", "/tmp/ledger.json"),
            ("TALLY_RESIZE_FACTOR", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert!((config.tolerance - 0.4).abs() < 1e-6);
        assert_eq!(config.debounce_secs, 12);
        assert_eq!(config.ledger_path, Path::new("/tmp/ledger.json"));
        // unparsable values fall back to the previous value
        assert!((config.resize_factor - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_toml_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(&path, "tolerance = 0.6\nunknown_label = \"Unknown Individual\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!((config.tolerance - 0.6).abs() < 1e-6);
        assert_eq!(config.unknown_label, "Unknown Individual");
        assert_eq!(config.debounce_secs, 5);
    }

    #[test]
    fn test_toml_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(&path, "tolerance = [").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }
}
