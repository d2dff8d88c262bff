//! Per-session snapshot directory.
//!
//! Layout inside the output directory:
//!
//! ```text
//! static_{session}.json                 host facts, written once
//! {session}-{timestamp:019}.json        one file per tick
//! {session}.{csv|tsv|jsonl|parquet}     table written at session end
//! ```
//!
//! Snapshots are removed once the export succeeds, unless cleanup is off.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::export::{
    ExportError, ExportFormat, FlattenMode, Table, export_samples_jsonl, export_table, flatten_sample,
};
use crate::model::{Sample, StaticInfo};

/// Error persisting or reading session files.
#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Json(serde_json::Error),
    Export(ExportError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Json(e) => write!(f, "JSON error: {}", e),
            StoreError::Export(e) => write!(f, "export failed: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Json(e) => Some(e),
            StoreError::Export(e) => Some(e),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

impl From<ExportError> for StoreError {
    fn from(e: ExportError) -> Self {
        StoreError::Export(e)
    }
}

pub struct SessionStore {
    dir: PathBuf,
    session_id: String,
}

impl SessionStore {
    /// Opens (creating if needed) the output directory for `session_id`.
    pub fn new(dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            session_id: session_id.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn static_path(&self) -> PathBuf {
        self.dir.join(format!("static_{}.json", self.session_id))
    }

    pub fn snapshot_path(&self, timestamp: i64) -> PathBuf {
        self.dir
            .join(format!("{}-{:019}.json", self.session_id, timestamp))
    }

    pub fn save_static(&self, info: &StaticInfo) -> Result<PathBuf, StoreError> {
        let path = self.static_path();
        write_atomic(&path, serde_json::to_vec_pretty(info)?.as_slice())?;
        Ok(path)
    }

    pub fn load_static(&self) -> Result<StaticInfo, StoreError> {
        let data = fs::read(self.static_path())?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Persists one sample durably; returns once it is on disk.
    pub fn save_snapshot(&self, sample: &Sample) -> Result<PathBuf, StoreError> {
        let path = self.snapshot_path(sample.timestamp);
        write_atomic(&path, serde_json::to_vec(sample)?.as_slice())?;
        Ok(path)
    }

    /// Paths of this session's snapshots in time order.
    pub fn snapshot_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let prefix = format!("{}-", self.session_id);
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(&prefix) && name.ends_with(".json") {
                files.push(path);
            }
        }
        // zero-padded timestamps sort lexically
        files.sort();
        Ok(files)
    }

    /// Loads all snapshots in time order, skipping unreadable files.
    pub fn load_snapshots(&self) -> Result<Vec<Sample>, StoreError> {
        let mut samples = Vec::new();
        for path in self.snapshot_files()? {
            let parsed = fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|data| serde_json::from_slice::<Sample>(&data).map_err(StoreError::from));
            match parsed {
                Ok(sample) => samples.push(sample),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt snapshot"),
            }
        }
        Ok(samples)
    }

    /// Builds the session table from all snapshots.
    pub fn build_table(&self, mode: FlattenMode) -> Result<Table, StoreError> {
        let samples = self.load_snapshots()?;
        Ok(Table::from_rows(
            samples.iter().map(|s| flatten_sample(s, mode)),
        ))
    }

    /// Writes `{session}.{ext}`. Returns `None` for a session without snapshots.
    ///
    /// JSON Lines keeps each sample nested and ignores `mode`. With `cleanup`
    /// the snapshot files are deleted after the export is written; static
    /// info is kept.
    pub fn export(
        &self,
        format: ExportFormat,
        mode: FlattenMode,
        cleanup: bool,
    ) -> Result<Option<PathBuf>, StoreError> {
        let samples = self.load_snapshots()?;
        if samples.is_empty() {
            warn!("session {} has no snapshots, nothing to export", self.session_id);
            return Ok(None);
        }

        let path = match format {
            ExportFormat::Jsonl => export_samples_jsonl(&samples, &self.dir, &self.session_id)?,
            _ => {
                let table = Table::from_rows(samples.iter().map(|s| flatten_sample(s, mode)));
                export_table(&table, &self.dir, &self.session_id, format)?
            }
        };

        if cleanup {
            let removed = self.remove_snapshots()?;
            info!("Removed {} snapshot files", removed);
        }
        Ok(Some(path))
    }

    /// Deletes this session's snapshot files. Returns how many were removed.
    pub fn remove_snapshots(&self) -> Result<usize, StoreError> {
        let files = self.snapshot_files()?;
        for path in &files {
            fs::remove_file(path)?;
        }
        Ok(files.len())
    }
}

/// Writes via `{path}.tmp`, fsync and rename so readers never see a torn file.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)?;
    debug!("wrote {}", path.display());
    Ok(())
}
