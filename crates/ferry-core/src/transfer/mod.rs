//! Transfer engine for Ferry.
//!
//! - [`UploadScheduler`] pushes the chunks of one file with bounded concurrency
//! - [`DownloadSequencer`] pulls the chunks of queued files one at a time
//! - [`StateStore`] persists the active upload
//! - [`TransferEngine`] owns both and is driven by [`Command`](crate::bus::Command)s
//!
//! ## Execution model
//!
//! All scheduler and sequencer state lives inside the single engine task.
//! Network requests run in spawned tasks that report back over channels, so
//! state only changes between two awaited points of that one task. Every
//! dispatch is stamped with a generation number; cancel and restart bump the
//! generation so late replies from abandoned requests are recognised and
//! dropped.

pub mod download;
pub mod engine;
pub mod state;
pub mod upload;

pub use download::{DownloadJob, DownloadOutcome, DownloadSequencer, DownloadState};
pub use engine::{EngineHandle, TransferEngine};
pub use state::{SessionSnapshot, StateStore, TransferState};
pub use upload::{UploadJob, UploadOutcome, UploadScheduler};

/// `done / total` as a percentage; an empty transfer counts as finished.
#[must_use]
pub fn progress_percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        (done as f64 / total as f64) * 100.0
    }
}
