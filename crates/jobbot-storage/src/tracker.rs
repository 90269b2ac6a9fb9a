use std::path::{Path, PathBuf};

use chrono::Utc;
use jobbot_core::TrackerEntry;
use tokio::fs;
use tracing::{info, warn};

use crate::{write_atomic, StoreError};

/// Column order of the tracker file. The first seven are the spreadsheet schema.
pub const TRACKER_COLUMNS: [&str; 11] = [
    "Date",
    "Company",
    "Position",
    "Status",
    "Link",
    "Notes",
    "Cover_Letter_Path",
    "Source",
    "Location",
    "Listing_Id",
    "Applied_At",
];

/// CSV-backed tracker. Loaded once per run and written once at the end.
#[derive(Debug, Clone)]
pub struct TrackerStore {
    path: PathBuf,
}

impl TrackerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Strict load: a missing file is an empty tracker, anything unreadable is an error.
    pub async fn try_load(&self) -> Result<Vec<TrackerEntry>, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    reason: err.to_string(),
                })
            }
        };
        decode_entries(&bytes).map_err(|reason| StoreError::Read {
            path: self.path.clone(),
            reason,
        })
    }

    /// Lenient load used at run start. Unreadable trackers are copied aside so the
    /// end-of-run write cannot silently discard their rows, then treated as empty.
    pub async fn load(&self) -> Vec<TrackerEntry> {
        match self.try_load().await {
            Ok(entries) => {
                info!(path = %self.path.display(), entries = entries.len(), "tracker loaded");
                entries
            }
            Err(err) => {
                let backup = self.backup_path();
                match fs::copy(&self.path, &backup).await {
                    Ok(_) => warn!(
                        error = %err,
                        backup = %backup.display(),
                        "tracker unreadable; starting from an empty tracker"
                    ),
                    Err(copy_err) => warn!(
                        error = %err,
                        backup_error = %copy_err,
                        "tracker unreadable and could not be backed up; starting from an empty tracker"
                    ),
                }
                Vec::new()
            }
        }
    }

    pub async fn save(&self, entries: &[TrackerEntry]) -> Result<(), StoreError> {
        let bytes = encode_entries(entries)?;
        write_atomic(&self.path, &bytes).await?;
        info!(path = %self.path.display(), entries = entries.len(), "tracker written");
        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "tracker.csv".to_string());
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        self.path.with_file_name(format!("{name}.corrupt-{stamp}"))
    }
}

fn decode_entries(bytes: &[u8]) -> Result<Vec<TrackerEntry>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(bytes);
    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    for required in &TRACKER_COLUMNS[..5] {
        if !headers.iter().any(|h| h == *required) {
            return Err(format!("missing required column {required}"));
        }
    }
    reader
        .deserialize::<TrackerEntry>()
        .enumerate()
        .map(|(idx, row)| row.map_err(|e| format!("row {}: {e}", idx + 1)))
        .collect()
}

fn encode_entries(entries: &[TrackerEntry]) -> Result<Vec<u8>, StoreError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(TRACKER_COLUMNS)?;
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer
        .into_inner()
        .map_err(|e| StoreError::Encode(csv::Error::from(e.into_error())))
}
