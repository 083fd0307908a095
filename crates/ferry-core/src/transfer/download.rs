//! Sequential download of queued files.
//!
//! Files are fetched one at a time in queue order, and within a file one
//! chunk at a time in index order. The fetch in flight runs in its own task
//! so cancel and restart can abort it. A completed file is assembled in
//! memory and written to the output directory.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{Event, EventSender};
use crate::client::{RemoteFileMetadata, Transport};
use crate::error::{Error, Result};

/// A file waiting to be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// Name of the file on the server
    pub file_name: String,
    /// Number of chunks the server serves it in
    pub chunk_count: u64,
}

/// Cursor and received bytes of the file being downloaded.
#[derive(Debug, Clone)]
pub struct DownloadState {
    /// Name of the file on the server
    pub file_name: String,
    /// Number of chunks to fetch
    pub chunk_count: u64,
    /// Index of the next chunk to fetch
    pub chunk_index: u64,
    chunks: Vec<Vec<u8>>,
}

impl DownloadState {
    fn new(job: &DownloadJob) -> Self {
        Self {
            file_name: job.file_name.clone(),
            chunk_count: job.chunk_count,
            chunk_index: 0,
            chunks: Vec::new(),
        }
    }

    /// Download progress as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn progress(&self) -> f64 {
        super::progress_percent(self.chunk_index, self.chunk_count)
    }

    /// Number of chunks received so far.
    #[must_use]
    pub fn chunks_received(&self) -> usize {
        self.chunks.len()
    }

    /// Bytes received so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    /// Whether every chunk has been received.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.chunk_index >= self.chunk_count
    }

    fn assemble(self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// Reply from a spawned download task.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// The chunk layout of a requested file arrived
    Metadata {
        /// File that was looked up
        file_name: String,
        /// Server reply
        result: Result<RemoteFileMetadata>,
    },
    /// A chunk fetch settled
    Chunk {
        /// Generation the fetch was issued in
        generation: u64,
        /// Index of the chunk
        chunk_index: u64,
        /// Chunk bytes
        result: Result<Vec<u8>>,
    },
}

/// Fetches queued downloads one chunk at a time.
pub struct DownloadSequencer<T: Transport> {
    transport: Arc<T>,
    events: EventSender,
    output_dir: PathBuf,
    outcome_tx: mpsc::UnboundedSender<DownloadOutcome>,
    queue: VecDeque<DownloadJob>,
    current: Option<DownloadState>,
    in_flight: Option<JoinHandle<()>>,
    paused: bool,
    aborted: bool,
    generation: u64,
}

impl<T: Transport> std::fmt::Debug for DownloadSequencer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadSequencer")
            .field("queue", &self.queue)
            .field("current", &self.current.as_ref().map(|s| &s.file_name))
            .field("fetching", &self.in_flight.is_some())
            .field("paused", &self.paused)
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> DownloadSequencer<T> {
    /// Create a sequencer writing finished files to `output_dir`, and the
    /// channel its fetch tasks report on.
    pub fn new(
        transport: Arc<T>,
        events: EventSender,
        output_dir: PathBuf,
    ) -> (Self, mpsc::UnboundedReceiver<DownloadOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let sequencer = Self {
            transport,
            events,
            output_dir,
            outcome_tx,
            queue: VecDeque::new(),
            current: None,
            in_flight: None,
            paused: false,
            aborted: false,
            generation: 0,
        };

        (sequencer, outcome_rx)
    }

    /// Jobs in the queue, the current download included.
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Names of the queued files in order.
    pub fn queued_files(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(|job| job.file_name.as_str())
    }

    /// The download being fetched.
    pub const fn current(&self) -> Option<&DownloadState> {
        self.current.as_ref()
    }

    /// Whether a chunk fetch is in flight.
    pub const fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether fetching is paused.
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Directory finished files are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Look up `file_name` on the server and queue it once its chunk count
    /// is known.
    pub fn request(&self, file_name: String) {
        tracing::debug!(file = %file_name, "Fetching download metadata");

        let transport = Arc::clone(&self.transport);
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result = transport.metadata(&file_name).await;
            let _ = outcome_tx.send(DownloadOutcome::Metadata { file_name, result });
        });
    }

    /// Append a job. If it is the only one, it starts right away.
    pub fn enqueue(&mut self, job: DownloadJob) {
        tracing::info!(file = %job.file_name, chunks = job.chunk_count, "Queued download");

        self.queue.push_back(job);
        self.emit_queue_size();

        if self.queue.len() == 1 {
            self.start_next();
        }
    }

    /// Begin the job at the head of the queue from chunk 0.
    ///
    /// With an empty queue the sequencer goes idle.
    pub fn start_next(&mut self) {
        self.abort_in_flight();

        let Some(job) = self.queue.front() else {
            self.current = None;
            self.reset_idle();
            return;
        };

        self.generation += 1;
        self.aborted = false;

        let state = DownloadState::new(job);
        tracing::info!(file = %state.file_name, chunks = state.chunk_count, "Starting download");

        self.events.emit(Event::DownloadStarted {
            file_name: state.file_name.clone(),
            chunk_count: state.chunk_count,
        });
        self.events.emit(Event::DownloadProgress {
            file_name: state.file_name.clone(),
            progress: 0.0,
        });
        self.current = Some(state);

        self.fetch_next();
    }

    /// Issue the fetch for the next chunk, or finish the file if every chunk
    /// is in.
    ///
    /// Does nothing when aborted, paused, idle or while a fetch is in flight.
    pub fn fetch_next(&mut self) {
        if self.aborted || self.in_flight.is_some() {
            return;
        }

        let Some(state) = &self.current else {
            return;
        };

        if state.is_complete() {
            self.finish();
            return;
        }

        if self.paused {
            tracing::debug!(file = %state.file_name, "Download paused, not fetching");
            return;
        }

        let file_name = state.file_name.clone();
        let chunk_index = state.chunk_index;
        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let outcome_tx = self.outcome_tx.clone();

        tracing::debug!(file = %file_name, chunk = chunk_index, "Fetching chunk");

        self.in_flight = Some(tokio::spawn(async move {
            let result = transport.download_chunk(&file_name, chunk_index).await;
            let _ = outcome_tx.send(DownloadOutcome::Chunk {
                generation,
                chunk_index,
                result,
            });
        }));
    }

    /// Apply the reply of a spawned task.
    pub fn on_outcome(&mut self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Metadata { file_name, result } => match result {
                Ok(meta) => self.enqueue(DownloadJob {
                    file_name,
                    chunk_count: meta.chunk_count,
                }),
                Err(e) => {
                    tracing::error!(file = %file_name, error = %e, "Cannot look up download");
                    self.events.emit(Event::DownloadFailed {
                        file_name,
                        reason: e.to_string(),
                    });
                }
            },
            DownloadOutcome::Chunk {
                generation,
                chunk_index,
                result,
            } => {
                if generation != self.generation {
                    tracing::debug!(chunk = chunk_index, "Ignoring reply for abandoned fetch");
                    return;
                }
                self.in_flight = None;
                self.on_chunk(chunk_index, result);
            }
        }
    }

    fn on_chunk(&mut self, chunk_index: u64, result: Result<Vec<u8>>) {
        let Some(state) = self.current.as_mut() else {
            return;
        };

        match result {
            Ok(bytes) => {
                tracing::debug!(
                    file = %state.file_name,
                    chunk = chunk_index,
                    bytes = bytes.len(),
                    "Chunk received"
                );
                state.chunks.push(bytes);
                state.chunk_index += 1;

                self.events.emit(Event::DownloadProgress {
                    file_name: state.file_name.clone(),
                    progress: state.progress(),
                });
                self.fetch_next();
            }
            Err(e) if e.is_abort() => {
                tracing::debug!(file = %state.file_name, chunk = chunk_index, "Chunk fetch aborted");
            }
            Err(e) => {
                tracing::error!(
                    file = %state.file_name,
                    chunk = chunk_index,
                    error = %e,
                    "Chunk fetch failed, download halted"
                );
            }
        }
    }

    fn finish(&mut self) {
        let Some(state) = self.current.take() else {
            return;
        };

        let file_name = state.file_name.clone();
        tracing::info!(
            file = %file_name,
            chunks = state.chunks_received(),
            bytes = state.bytes_received(),
            "Download complete"
        );

        let bytes = state.assemble();
        let dir = self.output_dir.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match save_download(&dir, &file_name, &bytes).await {
                Ok(path) => {
                    tracing::info!(file = %file_name, path = %path.display(), "Saved download");
                    events.emit(Event::DownloadSaved { file_name, path });
                }
                Err(e) => {
                    tracing::error!(file = %file_name, error = %e, "Cannot save download");
                    events.emit(Event::DownloadFailed {
                        file_name,
                        reason: e.to_string(),
                    });
                }
            }
        });

        self.queue.pop_front();
        self.emit_queue_size();
        self.events.emit(Event::DownloadProgressReset);

        if !self.queue.is_empty() {
            self.start_next();
        }
    }

    /// Toggle pause. The fetch in flight is allowed to finish; resuming
    /// continues from the next chunk.
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        self.events.emit(Event::DownloadPauseChanged {
            paused: self.paused,
        });

        if self.paused {
            tracing::info!("Download paused");
        } else {
            tracing::info!("Download resumed");
            self.fetch_next();
        }
    }

    /// Abort the current download, drop its job and start the next one.
    ///
    /// Returns whether a download was cancelled.
    pub fn cancel_current(&mut self) -> bool {
        let Some(state) = self.current.take() else {
            tracing::debug!("No download to cancel");
            return false;
        };

        tracing::info!(file = %state.file_name, "Cancelling download");

        self.abort_in_flight();
        self.aborted = true;
        self.generation += 1;

        self.queue.pop_front();
        self.emit_queue_size();
        self.start_next();
        true
    }

    /// Abort the current download and drop the whole queue.
    pub fn cancel_all(&mut self) {
        tracing::info!(queued = self.queue.len(), "Cancelling all downloads");

        self.abort_in_flight();
        self.aborted = true;
        self.generation += 1;
        self.current = None;
        self.queue.clear();
        self.reset_idle();
    }

    /// Abort the current download and fetch it again from chunk 0.
    ///
    /// Returns whether a download was restarted.
    pub fn restart_current(&mut self) -> bool {
        let Some(state) = self.current.take() else {
            tracing::debug!("No download to restart");
            return false;
        };

        tracing::info!(file = %state.file_name, "Restarting download");
        self.start_next();
        true
    }

    fn abort_in_flight(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
            tracing::debug!("Aborted chunk fetch in flight");
        }
    }

    fn reset_idle(&self) {
        self.events.emit(Event::DownloadProgressReset);
        self.emit_queue_size();
    }

    fn emit_queue_size(&self) {
        self.events.emit(Event::DownloadQueueChanged {
            queued: self.queue.len(),
        });
    }
}

impl<T: Transport> Drop for DownloadSequencer<T> {
    fn drop(&mut self) {
        self.abort_in_flight();
    }
}

/// Reduce a server file name to a single safe path component.
///
/// Directory parts are stripped, so `"../notes/a.txt"` becomes `"a.txt"`.
///
/// # Errors
///
/// Returns [`Error::InvalidFileName`] if nothing usable remains.
pub fn sanitize_file_name(file_name: &str) -> Result<String> {
    let normalized = file_name.replace('\\', "/");
    let candidate = Path::new(&normalized)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::trim)
        .unwrap_or_default();

    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return Err(Error::InvalidFileName(file_name.to_string()));
    }

    Ok(candidate.to_string())
}

/// Write an assembled download into `dir`, replacing any file of the same
/// name. Returns the path written.
///
/// # Errors
///
/// Returns an error if the name is unusable or the file cannot be written.
pub async fn save_download(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = dir.join(sanitize_file_name(file_name)?);

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, bytes).await?;

    Ok(path)
}
