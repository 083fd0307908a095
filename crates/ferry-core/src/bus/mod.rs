//! Messages between the transfer engine and the surface that drives it.
//!
//! The surface sends [`Command`]s; the engine publishes [`Event`]s. Events
//! are fire-and-forget: an event with no subscriber, or one a lagging
//! subscriber misses, is simply lost. Both enums serialize as JSON objects
//! tagged by `type`:
//!
//! ```json
//! {"type":"updateProgress","progress":66.66666666666667}
//! {"type":"cancelCurrentUpload","fileName":"report.pdf"}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the event channel per subscriber.
pub const EVENT_CAPACITY: usize = 256;

/// A local file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Where the bytes are read from
    pub path: PathBuf,
    /// Name the server stores the file under
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// Control commands accepted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    /// Upload a file, or queue it behind the active upload
    StartUpload {
        /// Local path of the file
        #[serde(rename = "fileUrl")]
        path: PathBuf,
        /// Name to store the file under
        file_name: String,
        /// Size in bytes
        file_size: u64,
    },
    /// Toggle pause on the active upload
    PauseResumeUpload,
    /// Cancel the active upload if it is `file_name`
    CancelCurrentUpload {
        /// Name of the upload to cancel
        file_name: String,
    },
    /// Cancel the upload server-side and start it again from chunk 0
    RestartUpload {
        /// The file to upload again
        file: FileDescriptor,
    },
    /// Remove every uploaded file from the server
    DeleteAllFiles,
    /// Remove one uploaded file from the server
    DeleteFile {
        /// Name of the file to remove
        file_name: String,
    },
    /// Look up a file's chunk count and queue it for download
    EnqueueDownload {
        /// Name of the file on the server
        file_name: String,
    },
    /// Toggle pause on the download sequence
    PauseResumeDownload,
    /// Abort the current download and move to the next queued one
    CancelCurrentDownload,
    /// Abort the current download and drop the whole queue
    CancelAllDownloads,
    /// Abort the current download and start it again from chunk 0
    RestartCurrentDownload,
    /// Stop the engine
    Shutdown,
}

/// Notifications published by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    /// An upload has jobs to run
    ShowProgressBar,
    /// No upload is running any more
    HideProgressBar,
    /// Upload progress in percent
    UpdateProgress {
        /// 0.0 to 100.0
        progress: f64,
    },
    /// Upload progress went back to zero
    ResetProgress,
    /// Dispatching of the active upload was paused or resumed
    UploadPauseChanged {
        /// Whether the upload is now paused
        paused: bool,
    },
    /// The server's file list changed
    RefreshFileList,
    /// Every chunk of the upload was acknowledged
    UploadComplete {
        /// Name of the uploaded file
        file_name: String,
    },
    /// The upload was cancelled
    UploadCancelled {
        /// Name of the cancelled file
        file_name: String,
    },
    /// A download began fetching at chunk 0
    DownloadStarted {
        /// Name of the file
        file_name: String,
        /// Number of chunks to fetch
        chunk_count: u64,
    },
    /// Download progress in percent
    DownloadProgress {
        /// Name of the file
        file_name: String,
        /// 0.0 to 100.0
        progress: f64,
    },
    /// Download progress went back to zero and no file is being fetched
    DownloadProgressReset,
    /// Chunk fetching was paused or resumed
    DownloadPauseChanged {
        /// Whether downloads are now paused
        paused: bool,
    },
    /// The download queue grew or shrank
    DownloadQueueChanged {
        /// Jobs in the queue, the current download included
        queued: usize,
    },
    /// A requested download could not be looked up or saved
    DownloadFailed {
        /// Name of the file
        file_name: String,
        /// What went wrong
        reason: String,
    },
    /// An assembled download was written to disk
    DownloadSaved {
        /// Name of the file
        file_name: String,
        /// Where it was written
        path: PathBuf,
    },
}

/// Publishing half of the event channel.
///
/// Cloning is cheap; every clone publishes to the same subscribers.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<Event>,
}

impl EventSender {
    /// Create a new event channel.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Delivery is not confirmed.
    pub fn emit(&self, event: Event) {
        tracing::trace!(?event, "Emitting event");
        let _ = self.tx.send(event);
    }

    /// Receive every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new()
    }
}
