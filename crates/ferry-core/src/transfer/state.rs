//! Persisted state of the active upload.
//!
//! Two small JSON documents let a new process see what the last one was
//! doing: `upload-state.json` holds the chunk counters and pause flag, and
//! `current-file.json` holds the file being uploaded. Neither contains chunk
//! bytes, so they are enough to show progress but not to continue sending.
//! A missing document means there is no active transfer.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::bus::FileDescriptor;
use crate::error::{Error, Result};

const UPLOAD_STATE_FILE: &str = "upload-state.json";
const CURRENT_FILE_FILE: &str = "current-file.json";

/// Progress record of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferState {
    /// Name of the file being uploaded
    pub file_name: String,
    /// Chunks acknowledged by the server
    pub uploaded_chunks: u64,
    /// Chunks in the file
    pub total_chunks: u64,
    /// Size of the file in bytes
    pub file_size: u64,
    /// Whether the upload was paused
    #[serde(default)]
    pub paused: bool,
    /// When the record was written
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl TransferState {
    /// A fresh record with nothing uploaded.
    #[must_use]
    pub fn new(file_name: impl Into<String>, total_chunks: u64, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            uploaded_chunks: 0,
            total_chunks,
            file_size,
            paused: false,
            updated_at: Utc::now(),
        }
    }

    /// Upload progress as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn progress_percentage(&self) -> f64 {
        super::progress_percent(self.uploaded_chunks, self.total_chunks)
    }

    /// Whether every chunk has been acknowledged.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.uploaded_chunks >= self.total_chunks
    }
}

/// What a restarted process can reconstruct about the last upload.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Counters of the upload
    pub state: TransferState,
    /// The file being uploaded, if it was recorded
    pub file: Option<FileDescriptor>,
}

/// Reads and writes the persisted upload state.
///
/// Default locations:
/// - Linux: `~/.local/share/ferry/state/`
/// - macOS: `~/Library/Application Support/com.ferry.Ferry/state/`
/// - Windows: `%APPDATA%\ferry\Ferry\data\state\`
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open the store in the default platform directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn new() -> Result<Self> {
        Self::with_dir(crate::config::Config::default().state_dir()).await
    }

    /// Open the store in a custom directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn with_dir(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "Failed to create state directory: {e}"
            )))
        })?;

        Ok(Self { dir })
    }

    /// Directory holding the state documents.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save the upload counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn save_upload_state(&self, state: &TransferState) -> Result<()> {
        self.write_json(UPLOAD_STATE_FILE, state).await?;
        tracing::debug!(
            file = %state.file_name,
            uploaded = state.uploaded_chunks,
            total = state.total_chunks,
            paused = state.paused,
            "Saved upload state"
        );
        Ok(())
    }

    /// Load the upload counters, if an upload was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be read or parsed.
    pub async fn load_upload_state(&self) -> Result<Option<TransferState>> {
        self.read_json(UPLOAD_STATE_FILE).await
    }

    /// Save the file being uploaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn save_current_file(&self, file: &FileDescriptor) -> Result<()> {
        self.write_json(CURRENT_FILE_FILE, file).await
    }

    /// Load the file being uploaded, if one was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be read or parsed.
    pub async fn load_current_file(&self) -> Result<Option<FileDescriptor>> {
        self.read_json(CURRENT_FILE_FILE).await
    }

    /// Reconstruct the last upload.
    ///
    /// Returns `None` when no upload state was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if a document exists but cannot be read or parsed.
    pub async fn snapshot(&self) -> Result<Option<SessionSnapshot>> {
        let Some(state) = self.load_upload_state().await? else {
            return Ok(None);
        };
        let file = self.load_current_file().await?;
        Ok(Some(SessionSnapshot { state, file }))
    }

    /// Forget the active upload.
    ///
    /// # Errors
    ///
    /// Returns an error if a document exists but cannot be deleted.
    pub async fn clear(&self) -> Result<()> {
        for name in [UPLOAD_STATE_FILE, CURRENT_FILE_FILE] {
            let path = self.dir.join(name);
            if fs::try_exists(&path).await? {
                fs::remove_file(&path).await?;
            }
        }
        tracing::debug!(dir = %self.dir.display(), "Cleared upload state");
        Ok(())
    }

    async fn write_json<S: Serialize>(&self, name: &str, value: &S) -> Result<()> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value)?;

        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn read_json<D: DeserializeOwned>(&self, name: &str) -> Result<Option<D>> {
        let path = self.dir.join(name);

        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).await?;
        let value = serde_json::from_str(&contents).map_err(|e| {
            Error::Serialization(format!("Failed to parse {}: {e}", path.display()))
        })?;
        Ok(Some(value))
    }
}
