//! Tests for the download sequencer.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

use common::{drain_events, next_matching, settle, wait_until, FakeTransport};
use ferry_core::bus::{Event, EventSender};
use ferry_core::transfer::{DownloadJob, DownloadOutcome, DownloadSequencer};

struct Harness {
    transport: FakeTransport,
    sequencer: DownloadSequencer<FakeTransport>,
    outcomes: mpsc::UnboundedReceiver<DownloadOutcome>,
    events: broadcast::Receiver<Event>,
    _dir: TempDir,
    out: PathBuf,
}

impl Harness {
    fn new(transport: FakeTransport) -> Self {
        let dir = common::create_temp_dir();
        let out = dir.path().join("downloads");
        let bus = EventSender::new();
        let events = bus.subscribe();
        let (sequencer, outcomes) =
            DownloadSequencer::new(Arc::new(transport.clone()), bus, out.clone());

        Self {
            transport,
            sequencer,
            outcomes,
            events,
            _dir: dir,
            out,
        }
    }

    fn enqueue(&mut self, name: &str, chunk_count: u64) {
        self.sequencer.enqueue(DownloadJob {
            file_name: name.to_string(),
            chunk_count,
        });
    }

    async fn step(&mut self) {
        let outcome = tokio::time::timeout(Duration::from_secs(5), self.outcomes.recv())
            .await
            .expect("timed out waiting for outcome")
            .expect("outcome channel closed");
        self.sequencer.on_outcome(outcome);
    }

    async fn saved(&mut self, name: &str) -> PathBuf {
        match next_matching(&mut self.events, |e| {
            matches!(e, Event::DownloadSaved { file_name, .. } if file_name == name)
        })
        .await
        {
            Event::DownloadSaved { path, .. } => path,
            _ => unreachable!(),
        }
    }

    fn calls_for(&self, name: &str) -> Vec<u64> {
        self.transport
            .download_calls()
            .into_iter()
            .filter(|(file, _)| file == name)
            .map(|(_, index)| index)
            .collect()
    }
}

fn download_progress(events: &[Event]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::DownloadProgress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect()
}

fn queue_sizes(events: &[Event]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::DownloadQueueChanged { queued } => Some(*queued),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_chunks_fetched_in_order_and_assembled() {
    let transport = FakeTransport::new();
    transport.serve("hello.txt", &[b"hel", b"lo ", b"wor", b"ld"]);
    let mut h = Harness::new(transport);

    h.enqueue("hello.txt", 4);
    for _ in 0..4 {
        h.step().await;
    }

    let path = h.saved("hello.txt").await;
    assert_eq!(path, h.out.join("hello.txt"));
    assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    assert_eq!(h.calls_for("hello.txt"), vec![0, 1, 2, 3]);

    assert!(h.sequencer.current().is_none());
    assert_eq!(h.sequencer.queued_jobs(), 0);
}

#[tokio::test]
async fn test_progress_and_queue_events() {
    let transport = FakeTransport::new();
    transport.serve("a.bin", &[b"1", b"2", b"3", b"4"]);
    let mut h = Harness::new(transport);

    h.enqueue("a.bin", 4);
    for _ in 0..4 {
        h.step().await;
    }

    let events = drain_events(&mut h.events);
    assert_eq!(
        events.first(),
        Some(&Event::DownloadQueueChanged { queued: 1 })
    );
    assert!(events.contains(&Event::DownloadStarted {
        file_name: "a.bin".into(),
        chunk_count: 4
    }));
    assert_eq!(
        download_progress(&events),
        vec![0.0, 25.0, 50.0, 75.0, 100.0]
    );
    assert_eq!(queue_sizes(&events), vec![1, 0]);
    assert_eq!(events.last(), Some(&Event::DownloadProgressReset));
}

#[tokio::test]
async fn test_pause_after_chunk_one_resumes_at_chunk_two() {
    let transport = FakeTransport::gated();
    transport.serve("a.bin", &[b"aa", b"bb", b"cc", b"dd"]);
    let mut h = Harness::new(transport.clone());

    h.enqueue("a.bin", 4);
    wait_until(|| transport.download_calls().len() == 1).await;

    transport.release(1);
    h.step().await;
    wait_until(|| transport.download_calls().len() == 2).await;

    // chunk 1 is in flight and allowed to finish
    h.sequencer.toggle_pause();
    assert!(h.sequencer.is_paused());
    assert!(drain_events(&mut h.events).contains(&Event::DownloadPauseChanged { paused: true }));
    transport.release(1);
    h.step().await;
    settle().await;

    assert_eq!(h.calls_for("a.bin"), vec![0, 1]);
    assert_eq!(h.sequencer.current().map(|s| s.chunk_index), Some(2));
    assert!(!h.sequencer.is_fetching());

    h.sequencer.toggle_pause();
    wait_until(|| transport.download_calls().len() == 3).await;
    assert_eq!(h.calls_for("a.bin"), vec![0, 1, 2]);

    transport.release(2);
    h.step().await;
    h.step().await;

    let path = h.saved("a.bin").await;
    assert_eq!(std::fs::read(path).unwrap(), b"aabbccdd");
}

#[tokio::test]
async fn test_restart_while_chunk_two_in_flight() {
    let transport = FakeTransport::gated();
    transport.serve("a.bin", &[b"1", b"2", b"3", b"4", b"5"]);
    let mut h = Harness::new(transport.clone());

    h.enqueue("a.bin", 5);
    for _ in 0..2 {
        wait_until(|| transport.in_flight() == 1).await;
        transport.release(1);
        h.step().await;
    }
    wait_until(|| transport.download_calls().len() == 3).await;
    assert!(h.sequencer.is_fetching());

    assert!(h.sequencer.restart_current());

    wait_until(|| transport.download_calls().len() == 4).await;
    // the held fetch of chunk 2 was aborted
    wait_until(|| transport.in_flight() == 1).await;
    assert_eq!(h.calls_for("a.bin"), vec![0, 1, 2, 0]);
    assert_eq!(h.sequencer.queued_jobs(), 1);
    assert_eq!(h.sequencer.current().map(|s| s.chunk_index), Some(0));

    transport.release(5);
    for _ in 0..5 {
        h.step().await;
    }

    let path = h.saved("a.bin").await;
    assert_eq!(std::fs::read(path).unwrap(), b"12345");
    assert_eq!(h.calls_for("a.bin"), vec![0, 1, 2, 0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_cancel_current_starts_next_job() {
    let transport = FakeTransport::gated();
    transport.serve("a.bin", &[b"a1", b"a2", b"a3"]);
    transport.serve("b.bin", &[b"b1", b"b2"]);
    let mut h = Harness::new(transport.clone());

    h.enqueue("a.bin", 3);
    h.enqueue("b.bin", 2);
    wait_until(|| transport.download_calls().len() == 1).await;
    assert_eq!(h.sequencer.queued_files().collect::<Vec<_>>(), ["a.bin", "b.bin"]);

    assert!(h.sequencer.cancel_current());
    assert_eq!(h.sequencer.queued_jobs(), 1);
    assert_eq!(
        h.sequencer.current().map(|s| s.file_name.as_str()),
        Some("b.bin")
    );

    wait_until(|| transport.download_calls().len() == 2).await;
    transport.release(2);
    h.step().await;
    h.step().await;

    let path = h.saved("b.bin").await;
    assert_eq!(std::fs::read(path).unwrap(), b"b1b2");
    assert!(!h.out.join("a.bin").exists());
    assert_eq!(h.calls_for("a.bin"), vec![0]);
    assert_eq!(h.sequencer.queued_jobs(), 0);

    // cancelling with nothing current does nothing
    assert!(!h.sequencer.cancel_current());
}

#[tokio::test]
async fn test_cancel_all_clears_queue() {
    let transport = FakeTransport::gated();
    transport.serve("a.bin", &[b"a1", b"a2"]);
    transport.serve("b.bin", &[b"b1"]);
    let mut h = Harness::new(transport.clone());

    h.enqueue("a.bin", 2);
    h.enqueue("b.bin", 1);
    wait_until(|| transport.download_calls().len() == 1).await;
    drain_events(&mut h.events);

    h.sequencer.cancel_all();

    assert_eq!(h.sequencer.queued_jobs(), 0);
    assert!(h.sequencer.current().is_none());
    assert!(!h.sequencer.is_fetching());
    assert_eq!(
        drain_events(&mut h.events),
        vec![
            Event::DownloadProgressReset,
            Event::DownloadQueueChanged { queued: 0 }
        ]
    );

    transport.release(3);
    settle().await;
    assert_eq!(transport.download_calls().len(), 1);
    assert!(h.outcomes.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_fetch_halts_until_resumed() {
    let transport = FakeTransport::new();
    transport.serve("a.bin", &[b"x", b"y", b"z"]);
    transport.fail_download("a.bin", 1);
    let mut h = Harness::new(transport);

    h.enqueue("a.bin", 3);
    h.step().await;
    h.step().await;
    settle().await;

    assert_eq!(h.calls_for("a.bin"), vec![0, 1]);
    assert_eq!(h.sequencer.current().map(|s| s.chunk_index), Some(1));
    assert!(!h.sequencer.is_fetching());

    // pause and resume fetches the failed chunk again
    h.sequencer.toggle_pause();
    h.sequencer.toggle_pause();
    h.step().await;
    h.step().await;

    let path = h.saved("a.bin").await;
    assert_eq!(std::fs::read(path).unwrap(), b"xyz");
    assert_eq!(h.calls_for("a.bin"), vec![0, 1, 1, 2]);
}

#[tokio::test]
async fn test_fetch_next_is_idempotent() {
    let transport = FakeTransport::gated();
    transport.serve("a.bin", &[b"1", b"2"]);
    let mut h = Harness::new(transport.clone());

    // idle: nothing happens
    h.sequencer.fetch_next();
    assert!(drain_events(&mut h.events).is_empty());

    h.enqueue("a.bin", 2);
    wait_until(|| transport.download_calls().len() == 1).await;

    h.sequencer.fetch_next();
    h.sequencer.fetch_next();
    settle().await;
    assert_eq!(transport.download_calls().len(), 1);

    transport.release(2);
    h.step().await;
    h.step().await;
    h.saved("a.bin").await;
}

#[tokio::test]
async fn test_request_uses_server_chunk_count() {
    let transport = FakeTransport::new();
    transport.serve("remote.txt", &[b"ab", b"cd"]);
    let mut h = Harness::new(transport);

    h.sequencer.request("missing.txt".into());
    h.step().await;
    assert_eq!(h.sequencer.queued_jobs(), 0);
    assert!(matches!(
        drain_events(&mut h.events).as_slice(),
        [Event::DownloadFailed { file_name, .. }] if file_name == "missing.txt"
    ));

    h.sequencer.request("remote.txt".into());
    h.step().await;
    assert_eq!(h.sequencer.current().map(|s| s.chunk_count), Some(2));

    h.step().await;
    h.step().await;
    let path = h.saved("remote.txt").await;
    assert_eq!(std::fs::read(path).unwrap(), b"abcd");
}

#[tokio::test]
async fn test_zero_chunk_file_saves_empty_file() {
    let mut h = Harness::new(FakeTransport::new());

    h.enqueue("empty.txt", 0);

    let path = h.saved("empty.txt").await;
    assert_eq!(std::fs::read(path).unwrap(), b"");
    assert!(h.transport.download_calls().is_empty());
    assert_eq!(h.sequencer.queued_jobs(), 0);
}
