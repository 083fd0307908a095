//! Common test utilities for `Ferry` integration tests.
//!
//! [`FakeTransport`] stands in for the transfer server. Chunk requests can be
//! held at a gate so tests decide exactly when each one completes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};

use ferry_core::bus::{Event, FileDescriptor};
use ferry_core::client::{ChunkTag, RemoteFileMetadata, Transport, UploadAck};
use ferry_core::config::UploadConfig;
use ferry_core::{Error, Result};

pub const MIB: u64 = 1024 * 1024;

#[derive(Default)]
struct Inner {
    gate: Option<Semaphore>,
    uploads: Mutex<Vec<ChunkTag>>,
    acked: Mutex<HashMap<String, u64>>,
    upload_failures: Mutex<HashMap<u64, u32>>,
    cancels: Mutex<Vec<String>>,
    deletes: Mutex<Vec<Option<String>>>,
    files: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    downloads: Mutex<Vec<(String, u64)>>,
    download_failures: Mutex<HashSet<(String, u64)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// In-memory transfer server.
#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Inner>,
}

impl FakeTransport {
    /// A server that answers every request right away.
    pub fn new() -> Self {
        Self::default()
    }

    /// A server that holds chunk requests until [`release`](Self::release).
    pub fn gated() -> Self {
        Self {
            inner: Arc::new(Inner {
                gate: Some(Semaphore::new(0)),
                ..Inner::default()
            }),
        }
    }

    /// Let `n` held chunk requests complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.inner.gate {
            gate.add_permits(n);
        }
    }

    /// Store a file the server can serve, split into `chunks`.
    pub fn serve(&self, name: &str, chunks: &[&[u8]]) {
        self.inner
            .files
            .lock()
            .unwrap()
            .insert(name.to_string(), chunks.iter().map(|c| c.to_vec()).collect());
    }

    /// Fail the next `times` uploads of chunk `index` with a network error.
    pub fn fail_upload(&self, index: u64, times: u32) {
        self.inner.upload_failures.lock().unwrap().insert(index, times);
    }

    /// Fail the next fetch of chunk `index` of `name`.
    pub fn fail_download(&self, name: &str, index: u64) {
        self.inner
            .download_failures
            .lock()
            .unwrap()
            .insert((name.to_string(), index));
    }

    pub fn upload_calls(&self) -> Vec<ChunkTag> {
        self.inner.uploads.lock().unwrap().clone()
    }

    pub fn upload_indices(&self) -> Vec<u64> {
        self.upload_calls().iter().map(|t| t.chunk_index).collect()
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        self.inner.cancels.lock().unwrap().clone()
    }

    pub fn delete_calls(&self) -> Vec<Option<String>> {
        self.inner.deletes.lock().unwrap().clone()
    }

    pub fn download_calls(&self) -> Vec<(String, u64)> {
        self.inner.downloads.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.inner.in_flight);

        if let Some(gate) = &self.inner.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        guard
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for FakeTransport {
    async fn upload_chunk(&self, tag: &ChunkTag, body: Vec<u8>) -> Result<UploadAck> {
        self.inner.uploads.lock().unwrap().push(tag.clone());
        let _guard = self.enter().await;

        assert_eq!(body.len() as u64, tag.end - tag.start, "body matches range");

        {
            let mut failures = self.inner.upload_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&tag.chunk_index) {
                if *left > 0 {
                    *left -= 1;
                    return Err(Error::Network("connection reset".into()));
                }
            }
        }

        let mut acked = self.inner.acked.lock().unwrap();
        let count = acked.entry(tag.file_name.clone()).or_default();
        *count += 1;
        Ok(UploadAck {
            file_assembled: *count == tag.total_chunks,
        })
    }

    async fn cancel_upload(&self, file_name: &str) -> Result<()> {
        self.inner.cancels.lock().unwrap().push(file_name.to_string());
        self.inner.acked.lock().unwrap().remove(file_name);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        self.inner.deletes.lock().unwrap().push(None);
        Ok(())
    }

    async fn delete_file(&self, file_name: &str) -> Result<()> {
        self.inner
            .deletes
            .lock()
            .unwrap()
            .push(Some(file_name.to_string()));
        Ok(())
    }

    async fn list_uploaded(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn list_downloadable(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn metadata(&self, file_name: &str) -> Result<RemoteFileMetadata> {
        self.inner
            .files
            .lock()
            .unwrap()
            .get(file_name)
            .map(|chunks| RemoteFileMetadata {
                chunk_count: chunks.len() as u64,
            })
            .ok_or_else(|| Error::ServerRejected {
                status: 404,
                reason: "File not found".into(),
            })
    }

    async fn download_chunk(&self, file_name: &str, chunk_index: u64) -> Result<Vec<u8>> {
        self.inner
            .downloads
            .lock()
            .unwrap()
            .push((file_name.to_string(), chunk_index));
        let _guard = self.enter().await;

        if self
            .inner
            .download_failures
            .lock()
            .unwrap()
            .remove(&(file_name.to_string(), chunk_index))
        {
            return Err(Error::Network("connection reset".into()));
        }

        self.inner
            .files
            .lock()
            .unwrap()
            .get(file_name)
            .and_then(|chunks| chunks.get(chunk_index as usize).cloned())
            .ok_or_else(|| Error::ServerRejected {
                status: 404,
                reason: "Chunk not found".into(),
            })
    }
}

/// Upload settings with a custom chunk size and concurrency.
pub fn upload_config(chunk_size: u64, max_concurrent: usize) -> UploadConfig {
    UploadConfig {
        chunk_size,
        max_concurrent,
        chunk_retries: 0,
        retry_backoff: Duration::from_millis(1),
    }
}

/// A descriptor for an in-memory upload.
pub fn descriptor(name: &str, size: u64) -> FileDescriptor {
    FileDescriptor {
        path: PathBuf::from(format!("/virtual/{name}")),
        name: name.to_string(),
        size,
    }
}

/// Create a temporary directory for test files.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &std::path::Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Let spawned tasks run until `cond` holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Every event already published.
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait for the next event matching `pred`, skipping others.
pub async fn next_matching(
    rx: &mut broadcast::Receiver<Event>,
    mut pred: impl FnMut(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Upload progress values in order.
pub fn progress_values(events: &[Event]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::UpdateProgress { progress } => Some(progress.round()),
            _ => None,
        })
        .collect()
}
