//! Bounded-concurrency upload of one file's chunks.
//!
//! The scheduler keeps a FIFO of chunk jobs for the current file and keeps
//! up to `max_concurrent` of them in flight. Each job is sent once; a job
//! that fails is dropped, so the file then never completes and has to be
//! cancelled or restarted. Completion order of chunks is not index order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::bus::{Event, EventSender, FileDescriptor};
use crate::chunk::{ByteSource, Chunk, ChunkSplitter};
use crate::client::{ChunkTag, Transport, UploadAck};
use crate::config::UploadConfig;
use crate::error::Result;

use super::state::{StateStore, TransferState};

/// One chunk waiting for a free upload slot.
#[derive(Debug, Clone)]
pub struct UploadJob {
    /// The chunk to send
    pub chunk: Chunk,
    /// Size of the whole file
    pub file_size: u64,
    source: Arc<ByteSource>,
}

/// Reply from a spawned upload task.
#[derive(Debug)]
pub enum UploadOutcome {
    /// A chunk request settled
    Chunk {
        /// Generation the chunk was dispatched in
        generation: u64,
        /// Index of the chunk
        chunk_index: u64,
        /// Server reply
        result: Result<UploadAck>,
    },
    /// The server answered a cancel request
    ServerCancelled {
        /// Generation the cancel was issued in
        generation: u64,
        /// File that was cancelled
        file_name: String,
        /// Server reply
        result: Result<()>,
        /// File to upload again once the cancel is acknowledged
        restart: Option<FileDescriptor>,
    },
}

/// Dispatches upload jobs for the current file.
pub struct UploadScheduler<T: Transport> {
    transport: Arc<T>,
    events: EventSender,
    store: StateStore,
    splitter: ChunkSplitter,
    max_concurrent: usize,
    chunk_retries: u32,
    retry_backoff: Duration,
    outcome_tx: mpsc::UnboundedSender<UploadOutcome>,
    queue: VecDeque<UploadJob>,
    active: usize,
    canceled: bool,
    paused: bool,
    cancelling: bool,
    uploaded_chunks: u64,
    total_chunks: u64,
    current: Option<FileDescriptor>,
    generation: u64,
}

impl<T: Transport> std::fmt::Debug for UploadScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadScheduler")
            .field("current", &self.current)
            .field("queued", &self.queue.len())
            .field("active", &self.active)
            .field("paused", &self.paused)
            .field("canceled", &self.canceled)
            .field("uploaded_chunks", &self.uploaded_chunks)
            .field("total_chunks", &self.total_chunks)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> UploadScheduler<T> {
    /// Create a scheduler and the channel its upload tasks report on.
    ///
    /// Every [`UploadOutcome`] received must be handed back to
    /// [`on_outcome`](Self::on_outcome).
    pub fn new(
        transport: Arc<T>,
        events: EventSender,
        store: StateStore,
        config: &UploadConfig,
    ) -> (Self, mpsc::UnboundedReceiver<UploadOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            transport,
            events,
            store,
            splitter: ChunkSplitter::new(config.chunk_size),
            max_concurrent: config.max_concurrent.max(1),
            chunk_retries: config.chunk_retries,
            retry_backoff: config.retry_backoff,
            outcome_tx,
            queue: VecDeque::new(),
            active: 0,
            canceled: false,
            paused: false,
            cancelling: false,
            uploaded_chunks: 0,
            total_chunks: 0,
            current: None,
            generation: 0,
        };

        (scheduler, outcome_rx)
    }

    /// Number of chunk requests counted as in flight.
    pub const fn active_uploads(&self) -> usize {
        self.active
    }

    /// Number of jobs waiting for a slot.
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Chunks acknowledged for the current file.
    pub const fn uploaded_chunks(&self) -> u64 {
        self.uploaded_chunks
    }

    /// Chunks in the current file.
    pub const fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Whether the server has been asked to discard the current file and
    /// has not answered yet.
    pub const fn is_cancelling(&self) -> bool {
        self.cancelling
    }

    /// Whether dispatching is paused.
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Cancel flag sent with newly dispatched chunks.
    pub const fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// The file being uploaded, cancelled or restarted.
    pub const fn current_file(&self) -> Option<&FileDescriptor> {
        self.current.as_ref()
    }

    /// Whether no file is being uploaded or cancelled.
    pub const fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Counters of the current upload.
    pub fn transfer_state(&self) -> Option<TransferState> {
        self.current.as_ref().map(|file| TransferState {
            file_name: file.name.clone(),
            uploaded_chunks: self.uploaded_chunks,
            total_chunks: self.total_chunks,
            file_size: file.size,
            paused: self.paused,
            updated_at: chrono::Utc::now(),
        })
    }

    /// Open `file` from disk and start uploading it from chunk 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`](crate::Error::SourceUnavailable)
    /// if the file cannot be read; the scheduler is left unchanged.
    pub async fn enqueue_file(&mut self, file: FileDescriptor) -> Result<()> {
        let source = ByteSource::open(&file.path).await?;
        self.enqueue(file, source).await;
        Ok(())
    }

    /// Start uploading `source` as `file` from chunk 0.
    ///
    /// Replaces whatever the scheduler was doing: counters are reset to
    /// `0 / chunk count`, every chunk is queued and the initial state is
    /// persisted before the first dispatch.
    pub async fn enqueue(&mut self, mut file: FileDescriptor, source: ByteSource) {
        if source.len() != file.size {
            tracing::warn!(
                file = %file.name,
                declared = file.size,
                actual = source.len(),
                "File size changed since selection, using actual size"
            );
            file.size = source.len();
        }

        let plan = self.splitter.split_source(&file.name, &source);
        let source = Arc::new(source);

        self.generation += 1;
        self.queue.clear();
        self.active = 0;
        self.canceled = false;
        self.paused = false;
        self.cancelling = false;
        self.uploaded_chunks = 0;
        self.total_chunks = plan.total_chunks();
        self.queue.extend(plan.iter().map(|chunk| UploadJob {
            chunk,
            file_size: plan.file_size(),
            source: Arc::clone(&source),
        }));

        tracing::info!(
            file = %file.name,
            size = file.size,
            chunks = self.total_chunks,
            "Starting upload"
        );

        if let Err(e) = self.store.save_current_file(&file).await {
            tracing::warn!(error = %e, "Failed to persist current file");
        }
        self.current = Some(file);
        self.persist().await;

        if self.total_chunks == 0 {
            self.complete().await;
            return;
        }

        self.pump();
    }

    /// Dispatch queued jobs until the concurrency bound or the queue runs out.
    ///
    /// Does nothing while paused or when no job is queued.
    pub fn pump(&mut self) {
        if self.paused {
            tracing::debug!("Upload paused, not dispatching");
            return;
        }

        if self.queue.is_empty() {
            return;
        }

        self.events.emit(Event::ShowProgressBar);

        while self.active < self.max_concurrent {
            let Some(job) = self.queue.pop_front() else {
                break;
            };
            self.dispatch(job);
        }
    }

    fn dispatch(&mut self, job: UploadJob) {
        self.active += 1;

        let tag = ChunkTag::new(&job.chunk, job.file_size, self.canceled);
        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let outcome_tx = self.outcome_tx.clone();
        let retries = self.chunk_retries;
        let backoff = self.retry_backoff;

        tracing::debug!(
            file = %tag.file_name,
            chunk = tag.chunk_index,
            active = self.active,
            "Dispatching chunk"
        );

        tokio::spawn(async move {
            let result = send_chunk(transport.as_ref(), &job, &tag, retries, backoff).await;
            let _ = outcome_tx.send(UploadOutcome::Chunk {
                generation,
                chunk_index: tag.chunk_index,
                result,
            });
        });
    }

    /// Apply the reply of a spawned task.
    pub async fn on_outcome(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Chunk {
                generation,
                chunk_index,
                result,
            } => {
                if generation != self.generation || self.current.is_none() {
                    tracing::debug!(chunk = chunk_index, "Ignoring reply for abandoned chunk");
                    return;
                }
                self.on_chunk_settled(chunk_index, result).await;
            }
            UploadOutcome::ServerCancelled {
                generation,
                file_name,
                result,
                restart,
            } => {
                if generation != self.generation {
                    tracing::debug!(file = %file_name, "Ignoring superseded cancel reply");
                    return;
                }
                self.on_server_cancelled(file_name, result, restart).await;
            }
        }
    }

    async fn on_chunk_settled(&mut self, chunk_index: u64, result: Result<UploadAck>) {
        self.active = self.active.saturating_sub(1);

        match result {
            Ok(ack) => {
                self.uploaded_chunks += 1;
                tracing::debug!(
                    chunk = chunk_index,
                    uploaded = self.uploaded_chunks,
                    total = self.total_chunks,
                    "Chunk acknowledged"
                );

                if ack.file_assembled {
                    self.events.emit(Event::RefreshFileList);
                }
                self.events.emit(Event::UpdateProgress {
                    progress: super::progress_percent(self.uploaded_chunks, self.total_chunks),
                });
                self.persist().await;
                self.pump();

                if self.uploaded_chunks == self.total_chunks {
                    self.complete().await;
                }
            }
            Err(e) => {
                tracing::warn!(
                    chunk = chunk_index,
                    error = %e,
                    "Chunk upload failed, dropping chunk"
                );
                self.pump();
            }
        }
    }

    async fn complete(&mut self) {
        let Some(file) = self.current.take() else {
            return;
        };

        tracing::info!(file = %file.name, chunks = self.total_chunks, "Upload complete");

        self.events.emit(Event::HideProgressBar);
        self.events.emit(Event::RefreshFileList);
        self.events.emit(Event::UploadComplete {
            file_name: file.name,
        });
        self.clear_store().await;
        self.reset();
    }

    /// Toggle pause. Pausing persists the counters; resuming dispatches again.
    pub async fn toggle_pause(&mut self) {
        if self.current.is_none() || self.cancelling {
            tracing::debug!("No running upload to pause or resume");
            return;
        }

        self.paused = !self.paused;
        self.events.emit(Event::UploadPauseChanged {
            paused: self.paused,
        });

        if self.paused {
            tracing::info!(uploaded = self.uploaded_chunks, "Upload paused");
            self.persist().await;
        } else {
            tracing::info!("Upload resumed");
            self.pump();
        }
    }

    /// Cancel the current upload if it is `file_name`.
    ///
    /// Queued jobs are dropped and the active count goes to 0. Requests
    /// already in flight are left to finish; their replies are ignored. The
    /// server is asked to discard the partial file and `uploadCancelled`
    /// follows its reply. While that reply is pending, further cancels of
    /// the same file are ignored.
    ///
    /// Returns whether a cancellation was started.
    pub fn cancel_current(&mut self, file_name: &str) -> bool {
        match &self.current {
            Some(file) if file.name == file_name => {}
            _ => {
                tracing::debug!(file = %file_name, "Not the active upload, ignoring cancel");
                return false;
            }
        }

        if self.cancelling {
            tracing::debug!(file = %file_name, "Cancel already in progress");
            return false;
        }

        tracing::info!(file = %file_name, "Cancelling upload");

        self.abandon_in_flight();
        self.events.emit(Event::HideProgressBar);
        self.events.emit(Event::RefreshFileList);
        self.request_server_cancel(file_name.to_string(), None);
        true
    }

    /// Cancel `file` server-side, then upload it again from chunk 0.
    pub fn restart(&mut self, file: FileDescriptor) {
        tracing::info!(file = %file.name, "Restarting upload");

        self.abandon_in_flight();
        if self.paused {
            self.paused = false;
            self.events.emit(Event::UploadPauseChanged { paused: false });
        }
        self.events.emit(Event::HideProgressBar);
        self.events.emit(Event::ResetProgress);

        let file_name = file.name.clone();
        self.current = Some(file.clone());
        self.request_server_cancel(file_name, Some(file));
    }

    fn abandon_in_flight(&mut self) {
        self.canceled = true;
        self.cancelling = true;
        self.queue.clear();
        self.active = 0;
        self.generation += 1;
    }

    fn request_server_cancel(&self, file_name: String, restart: Option<FileDescriptor>) {
        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result = transport.cancel_upload(&file_name).await;
            let _ = outcome_tx.send(UploadOutcome::ServerCancelled {
                generation,
                file_name,
                result,
                restart,
            });
        });
    }

    async fn on_server_cancelled(
        &mut self,
        file_name: String,
        result: Result<()>,
        restart: Option<FileDescriptor>,
    ) {
        match (result, restart) {
            (Ok(()), Some(file)) => {
                tracing::info!(file = %file_name, "Server discarded partial upload, starting over");
                self.events.emit(Event::HideProgressBar);
                self.events.emit(Event::ResetProgress);
                if let Err(e) = self.enqueue_file(file).await {
                    tracing::error!(file = %file_name, error = %e, "Cannot restart upload");
                    self.finish_cancelled(file_name).await;
                }
            }
            (Ok(()), None) => {
                tracing::info!(file = %file_name, "Server discarded partial upload");
                self.finish_cancelled(file_name).await;
            }
            (Err(e), _) => {
                tracing::error!(file = %file_name, error = %e, "Server cancel failed");
                self.finish_cancelled(file_name).await;
            }
        }
    }

    async fn finish_cancelled(&mut self, file_name: String) {
        self.events.emit(Event::RefreshFileList);
        self.events.emit(Event::UploadCancelled { file_name });
        self.clear_store().await;
        self.reset();
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.queue.clear();
        self.active = 0;
        self.uploaded_chunks = 0;
        self.total_chunks = 0;
        self.paused = false;
        self.canceled = false;
        self.cancelling = false;
        self.current = None;
    }

    async fn persist(&self) {
        if let Some(state) = self.transfer_state() {
            if let Err(e) = self.store.save_upload_state(&state).await {
                tracing::warn!(error = %e, "Failed to persist upload state");
            }
        }
    }

    async fn clear_store(&self) {
        if let Err(e) = self.store.clear().await {
            tracing::warn!(error = %e, "Failed to clear upload state");
        }
    }
}

/// Read a job's bytes and send them, retrying transient failures.
async fn send_chunk<T: Transport>(
    transport: &T,
    job: &UploadJob,
    tag: &ChunkTag,
    retries: u32,
    backoff: Duration,
) -> Result<UploadAck> {
    let mut body = job.source.read_chunk(&job.chunk).await?;
    let mut attempt = 0;

    loop {
        let payload = if attempt < retries {
            body.clone()
        } else {
            std::mem::take(&mut body)
        };

        match transport.upload_chunk(tag, payload).await {
            Ok(ack) => return Ok(ack),
            Err(e) if e.is_recoverable() && attempt < retries => {
                attempt += 1;
                tracing::warn!(
                    chunk = tag.chunk_index,
                    attempt,
                    error = %e,
                    "Chunk upload failed, retrying"
                );
                tokio::time::sleep(backoff * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}
