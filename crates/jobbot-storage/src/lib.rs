//! Durable tracker + cover-letter storage and HTTP fetch utilities for JobBot.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

mod http;
mod letters;
mod tracker;

pub use http::{
    classify_reqwest_error, classify_status, retry_with_backoff, BackoffPolicy, FetchError,
    FetchedResponse, HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use letters::{cover_letter_file_name, LetterStore};
pub use tracker::{TrackerStore, TRACKER_COLUMNS};

pub const CRATE_NAME: &str = "jobbot-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode tracker rows")]
    Encode(#[from] csv::Error),
}

/// Replace `path` with `bytes` via a temp file in the same directory and a rename.
/// On any failure the previous file at `path` is left untouched.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let write_err = |source: std::io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await.map_err(write_err)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let result = async {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(err) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(write_err(err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn atomic_write_replaces_existing_file_and_leaves_no_temp() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("tracker.csv");

        write_atomic(&target, b"first").await.expect("first write");
        write_atomic(&target, b"second").await.expect("second write");

        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        let leftovers = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn failed_rename_keeps_previous_contents_and_removes_temp() {
        let dir = tempdir().expect("tempdir");
        // The target holds prior data as a non-empty directory, so the temp file
        // is written and the final rename over it fails.
        let target = dir.path().join("tracker.csv");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("rows"), b"previous").unwrap();

        let err = write_atomic(&target, b"new").await.unwrap_err();

        assert!(matches!(err, StoreError::Write { ref path, .. } if path == &target));
        assert_eq!(std::fs::read(target.join("rows")).unwrap(), b"previous");
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
