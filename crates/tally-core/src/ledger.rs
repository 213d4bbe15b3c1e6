//! Attendance ledger: the JSON log, its snapshots, and the decision of
//! whether a sighting produces a new record.
//!
//! Every [`Ledger::record_sighting`] call runs load → decide → append →
//! write as one critical section: a process-wide mutex (which also guards
//! the debounce map) plus an exclusive advisory lock on `<ledger>.lock` for
//! writers in other processes. The file is replaced atomically via rename,
//! so readers never observe a half-written ledger.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::debounce::DebounceCache;
use crate::snapshot;
use crate::types::{AttendanceRecord, FaceRect, IdentityKey, Status, Subject};
use chrono::NaiveDateTime;
use fs2::FileExt;
use image::RgbImage;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to write ledger {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to lock ledger {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One detected face handed to the ledger.
pub struct Sighting<'a> {
    pub subject: Subject,
    /// Full-resolution source frame. Never modified.
    pub frame: &'a RgbImage,
    /// Face rectangle in `frame` coordinates.
    pub location: FaceRect,
}

/// The attendance ledger.
pub struct Ledger {
    path: PathBuf,
    lock_path: PathBuf,
    snapshots_dir: PathBuf,
    unknown_dir: PathBuf,
    unknown_label: String,
    clock: Box<dyn Clock>,
    debounce: Mutex<DebounceCache>,
}

impl Ledger {
    pub fn new(config: &Config) -> Self {
        Self::with_clock(config, SystemClock)
    }

    pub fn with_clock(config: &Config, clock: impl Clock + 'static) -> Self {
        Self {
            path: config.ledger_path.clone(),
            lock_path: sibling(&config.ledger_path, "lock"),
            snapshots_dir: config.snapshots_dir.clone(),
            unknown_dir: config.unknown_faces_dir.clone(),
            unknown_label: config.unknown_label.clone(),
            clock: Box::new(clock),
            debounce: Mutex::new(DebounceCache::new(
                config.debounce_window(),
                config.debounce_retain_windows,
            )),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name written for unrecognised faces.
    pub fn unknown_label(&self) -> &str {
        &self.unknown_label
    }

    /// Decide whether `sighting` produces a new record and persist it.
    ///
    /// Returns `Ok(true)` iff a record was appended. A known person is logged
    /// at most once per local day; an unknown face at most once per debounce
    /// window per identity key.
    pub fn record_sighting(&self, sighting: &Sighting<'_>) -> Result<bool, LedgerError> {
        let mut debounce = self.debounce.lock();
        let _guard = self.lock_file()?;

        let (mut records, corrupt) = read_records(&self.path);
        if corrupt {
            self.preserve_corrupt();
        }

        let now = self.clock.now();
        let today = now.date();

        let (name, status, snapshot_file, rollback) = match &sighting.subject {
            Subject::Unknown(key) => {
                let key = key.clone().unwrap_or_else(IdentityKey::anonymous);
                if debounce.is_suppressed(&key, now) {
                    tracing::debug!(at = %now.format("%H:%M:%S"), "unknown face debounced");
                    return Ok(false);
                }
                let previous = debounce.mark(key.clone(), now);
                (
                    self.unknown_label.clone(),
                    Status::UnknownLogged,
                    self.unknown_dir.join(snapshot::unknown_file_name(now)),
                    Some((key, previous)),
                )
            }
            Subject::Known(name) => {
                let already_present = records.iter().any(|r| {
                    r.timestamp.date() == today && r.name == *name && r.status.is_present()
                });
                if already_present {
                    tracing::debug!(name = %name, "already marked present today");
                    return Ok(false);
                }
                (
                    name.clone(),
                    Status::Present,
                    self.snapshots_dir.join(snapshot::known_file_name(name, now)),
                    None,
                )
            }
        };

        let snapshot_path = self.save_snapshot(sighting, &snapshot_file);
        records.push(AttendanceRecord::new(name, now, status, snapshot_path.clone()));

        if let Err(err) = self.write_with_retry(&records) {
            if let Some((key, previous)) = rollback {
                debounce.restore(key, previous);
            }
            if snapshot_path.is_some() {
                let _ = fs::remove_file(&snapshot_file);
            }
            return Err(err);
        }

        let record = &records[records.len() - 1];
        tracing::info!(
            name = %record.name,
            status = %record.status,
            at = %record.time_arrival,
            snapshot = ?record.snapshot_path,
            "attendance logged"
        );
        Ok(true)
    }

    /// The whole ledger, in detection order. Unreadable files read as empty.
    pub fn records(&self) -> Vec<AttendanceRecord> {
        read_records(&self.path).0
    }

    /// Today's records in ascending timestamp order.
    pub fn todays_records(&self) -> Vec<AttendanceRecord> {
        records_on(self.records(), self.clock.now())
    }

    /// Current local time according to the ledger's clock.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    fn lock_file(&self) -> Result<FileLockGuard, LedgerError> {
        let lock_err = |source| LedgerError::Lock {
            path: self.lock_path.clone(),
            source,
        };
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(lock_err)?;
        file.lock_exclusive().map_err(lock_err)?;
        Ok(FileLockGuard(file))
    }

    fn save_snapshot(&self, sighting: &Sighting<'_>, path: &Path) -> Option<String> {
        match snapshot::save_face_crop(sighting.frame, sighting.location, path) {
            Ok(true) => Some(path.to_string_lossy().replace('\\', "/")),
            Ok(false) => {
                tracing::warn!(rect = %sighting.location, "face crop is empty; snapshot skipped");
                None
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to save snapshot");
                None
            }
        }
    }

    fn write_with_retry(&self, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        if let Err(first) = write_records(&self.path, records) {
            tracing::warn!(path = %self.path.display(), error = %first, "ledger write failed; retrying");
            return write_records(&self.path, records).map_err(|source| {
                tracing::error!(path = %self.path.display(), error = %source, "ledger write failed");
                LedgerError::WriteFailed {
                    path: self.path.clone(),
                    source,
                }
            });
        }
        Ok(())
    }

    /// Keep a copy of an unparsable ledger before it gets overwritten.
    fn preserve_corrupt(&self) {
        let stamp = self.clock.now().format("%Y%m%d_%H%M%S");
        let backup = sibling(&self.path, &format!("corrupt-{stamp}"));
        match fs::copy(&self.path, &backup) {
            Ok(_) => tracing::warn!(backup = %backup.display(), "kept a copy of the unreadable ledger"),
            Err(err) => tracing::warn!(error = %err, "could not back up the unreadable ledger"),
        }
    }
}

/// Releases the advisory lock when dropped.
struct FileLockGuard(File);

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

/// Records whose date matches `now`'s, sorted by timestamp (stable).
pub fn records_on(records: Vec<AttendanceRecord>, now: NaiveDateTime) -> Vec<AttendanceRecord> {
    let today = now.date();
    let mut todays: Vec<_> = records
        .into_iter()
        .filter(|r| r.timestamp.date() == today)
        .collect();
    todays.sort_by_key(|r| r.timestamp);
    todays
}

/// Read the ledger. Returns the records and whether the file was present
/// but unusable; both missing and unusable files yield no records.
fn read_records(path: &Path) -> (Vec<AttendanceRecord>, bool) {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return (Vec::new(), false),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot read ledger; starting empty");
            return (Vec::new(), true);
        }
    };
    if content.trim().is_empty() {
        return (Vec::new(), false);
    }
    match serde_json::from_str(&content) {
        Ok(records) => (records, false),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ledger is not valid JSON; starting empty");
            (Vec::new(), true)
        }
    }
}

/// Pretty-print (4-space indent, non-ASCII kept) to a temp file, then rename over `path`.
fn write_records(path: &Path, records: &[AttendanceRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    records.serialize(&mut ser).map_err(std::io::Error::other)?;

    let tmp = sibling(path, "tmp");
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// `attendance.json` + `lock` → `attendance.json.lock`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
