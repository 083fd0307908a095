//! The engine task that owns all transfer state.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::bus::{Command, Event, EventSender, FileDescriptor};
use crate::client::Transport;
use crate::config::Config;
use crate::error::{Error, Result};

use super::download::{DownloadOutcome, DownloadSequencer};
use super::state::StateStore;
use super::upload::{UploadOutcome, UploadScheduler};

/// Commands buffered before `send` waits.
const COMMAND_CAPACITY: usize = 64;

/// Handle to a running [`TransferEngine`].
#[derive(Debug)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: EventSender,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Send a command to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineStopped`] if the engine task has exited.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::EngineStopped)
    }

    /// Receive every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The engine's event channel.
    #[must_use]
    pub const fn events(&self) -> &EventSender {
        &self.events
    }

    /// Whether the engine task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the engine and wait for its task to exit.
    ///
    /// Uploads in progress are abandoned without notifying the server; their
    /// persisted state is left in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine task panicked.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.commands.send(Command::Shutdown).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("engine task failed: {e}")))
    }
}

/// Runs the upload scheduler and download sequencer behind a command channel.
///
/// Every state change happens inside the engine task. Outcomes of network
/// requests come back over channels and are applied one at a time between
/// commands.
pub struct TransferEngine<T: Transport> {
    transport: Arc<T>,
    events: EventSender,
    commands: mpsc::Receiver<Command>,
    uploads: UploadScheduler<T>,
    upload_outcomes: mpsc::UnboundedReceiver<UploadOutcome>,
    downloads: DownloadSequencer<T>,
    download_outcomes: mpsc::UnboundedReceiver<DownloadOutcome>,
    pending_uploads: VecDeque<FileDescriptor>,
}

impl<T: Transport> TransferEngine<T> {
    /// Start the engine on the current tokio runtime.
    #[must_use]
    pub fn spawn(config: &Config, transport: T, store: StateStore) -> EngineHandle {
        let events = EventSender::new();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let transport = Arc::new(transport);

        let (uploads, upload_outcomes) = UploadScheduler::new(
            Arc::clone(&transport),
            events.clone(),
            store,
            &config.upload,
        );
        let (downloads, download_outcomes) =
            DownloadSequencer::new(Arc::clone(&transport), events.clone(), config.download_dir());

        let engine = Self {
            transport,
            events: events.clone(),
            commands: command_rx,
            uploads,
            upload_outcomes,
            downloads,
            download_outcomes,
            pending_uploads: VecDeque::new(),
        };

        let task = tokio::spawn(engine.run());

        EngineHandle {
            commands: command_tx,
            events,
            task,
        }
    }

    async fn run(mut self) {
        tracing::debug!("Transfer engine started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle(command).await,
                },
                Some(outcome) = self.upload_outcomes.recv() => {
                    self.uploads.on_outcome(outcome).await;
                    self.start_pending_uploads().await;
                }
                Some(outcome) = self.download_outcomes.recv() => {
                    self.downloads.on_outcome(outcome);
                }
            }
        }

        tracing::debug!(
            pending_uploads = self.pending_uploads.len(),
            queued_downloads = self.downloads.queued_jobs(),
            "Transfer engine stopped"
        );
    }

    async fn handle(&mut self, command: Command) {
        tracing::debug!(?command, "Handling command");

        match command {
            Command::StartUpload {
                path,
                file_name,
                file_size,
            } => {
                if !self.uploads.is_idle() {
                    tracing::info!(file = %file_name, "Upload queued behind the active one");
                }
                self.pending_uploads.push_back(FileDescriptor {
                    path,
                    name: file_name,
                    size: file_size,
                });
                self.start_pending_uploads().await;
            }
            Command::PauseResumeUpload => self.uploads.toggle_pause().await,
            Command::CancelCurrentUpload { file_name } => {
                if self.is_active_upload(&file_name) {
                    self.uploads.cancel_current(&file_name);
                } else {
                    self.drop_pending_upload(&file_name);
                }
            }
            Command::RestartUpload { file } => self.restart_upload(file),
            Command::DeleteAllFiles => self.delete(None),
            Command::DeleteFile { file_name } => self.delete(Some(file_name)),
            Command::EnqueueDownload { file_name } => self.downloads.request(file_name),
            Command::PauseResumeDownload => self.downloads.toggle_pause(),
            Command::CancelCurrentDownload => {
                self.downloads.cancel_current();
            }
            Command::CancelAllDownloads => self.downloads.cancel_all(),
            Command::RestartCurrentDownload => {
                self.downloads.restart_current();
            }
            Command::Shutdown => {}
        }
    }

    /// Start queued files while the scheduler has nothing to do.
    async fn start_pending_uploads(&mut self) {
        while self.uploads.is_idle() {
            let Some(file) = self.pending_uploads.pop_front() else {
                break;
            };

            let file_name = file.name.clone();
            if let Err(e) = self.uploads.enqueue_file(file).await {
                tracing::error!(file = %file_name, error = %e, "Cannot start upload");
                self.events.emit(Event::UploadCancelled { file_name });
            }
        }
    }

    fn is_active_upload(&self, file_name: &str) -> bool {
        self.uploads
            .current_file()
            .is_some_and(|file| file.name == file_name)
    }

    /// Restart the active upload, or start `file` afresh when nothing is
    /// uploading. A file still waiting in the queue has not sent anything
    /// yet, so it keeps its place.
    fn restart_upload(&mut self, file: FileDescriptor) {
        if self.uploads.is_idle() || self.is_active_upload(&file.name) {
            self.uploads.restart(file);
        } else if self.pending_uploads.iter().any(|f| f.name == file.name) {
            tracing::debug!(file = %file.name, "Upload not started yet, nothing to restart");
        } else {
            tracing::debug!(file = %file.name, "Not the active upload, ignoring restart");
        }
    }

    fn drop_pending_upload(&mut self, file_name: &str) {
        let Some(index) = self
            .pending_uploads
            .iter()
            .position(|file| file.name == file_name)
        else {
            tracing::debug!(file = %file_name, "No upload to cancel");
            return;
        };

        self.pending_uploads.remove(index);
        tracing::info!(file = %file_name, "Removed queued upload");
        self.events.emit(Event::UploadCancelled {
            file_name: file_name.to_string(),
        });
    }

    fn delete(&self, file_name: Option<String>) {
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = match &file_name {
                Some(name) => transport.delete_file(name).await,
                None => transport.delete_all().await,
            };

            let target = file_name.as_deref().unwrap_or("all files");
            match result {
                Ok(()) => {
                    tracing::info!(file = %target, "Deleted from server");
                    events.emit(Event::RefreshFileList);
                }
                Err(e) => {
                    tracing::error!(file = %target, error = %e, "Delete failed");
                }
            }
        });
    }
}
