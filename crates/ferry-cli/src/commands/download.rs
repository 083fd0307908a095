//! Download command implementation.

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;

use ferry_core::bus::{Command, Event};
use ferry_core::transfer::TransferEngine;

use super::{Control, DownloadArgs, GlobalArgs};
use crate::ui::{self, EventPrinter};

/// Names still waiting to be saved or given up on.
#[derive(Debug, Default)]
struct Outstanding {
    names: Vec<String>,
}

impl Outstanding {
    fn new(names: &[String]) -> Self {
        Self {
            names: names.to_vec(),
        }
    }

    /// Forget one occurrence of `name`.
    fn settle(&mut self, name: &str) {
        if let Some(pos) = self.names.iter().position(|n| n == name) {
            self.names.remove(pos);
        }
    }

    fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

/// Run the download command.
#[allow(clippy::too_many_lines)]
pub async fn run(args: DownloadArgs, global: &GlobalArgs) -> Result<()> {
    let mut config = super::load_config(global)?;
    if let Some(output) = args.output {
        config.download.output_dir = Some(output);
    }

    let transport = super::connect(&config)?;
    let store = super::open_store(&config).await?;

    if !global.json {
        ui::banner();
        println!(
            "  Downloading {} files from {} into {}",
            args.names.len(),
            config.server.base_url,
            config.download_dir().display()
        );
        println!();
        if !args.batch {
            ui::controls_hint(true);
        }
    }

    let engine = TransferEngine::spawn(&config, transport, store);
    let mut events = engine.subscribe();

    for name in &args.names {
        engine
            .send(Command::EnqueueDownload {
                file_name: name.clone(),
            })
            .await?;
    }

    let mut controls = if args.batch {
        None
    } else {
        Some(super::spawn_controls())
    };
    let mut printer = EventPrinter::new(global.json);

    let mut outstanding = Outstanding::new(&args.names);
    let mut current: Option<String> = None;
    let mut saved = 0usize;
    let mut failed = 0usize;
    let mut cancelled = 0usize;

    while !outstanding.is_empty() {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    match &event {
                        Event::DownloadStarted { file_name, .. } => {
                            current = Some(file_name.clone());
                        }
                        Event::DownloadProgressReset => current = None,
                        Event::DownloadSaved { file_name, .. } => {
                            saved += 1;
                            outstanding.settle(file_name);
                        }
                        Event::DownloadFailed { file_name, .. } => {
                            failed += 1;
                            outstanding.settle(file_name);
                        }
                        _ => {}
                    }
                    printer.print(&event, None);
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} engine events", missed);
                }
                Err(RecvError::Closed) => break,
            },
            control = super::next_control(&mut controls) => {
                let Some(control) = control else {
                    controls = None;
                    continue;
                };
                match control {
                    Control::PauseResume => {
                        engine.send(Command::PauseResumeDownload).await?;
                    }
                    Control::Cancel => {
                        if let Some(name) = current.take() {
                            engine.send(Command::CancelCurrentDownload).await?;
                            printer.note(&format!("Cancelled {name}"));
                            cancelled += 1;
                            outstanding.settle(&name);
                        }
                    }
                    Control::Restart => {
                        if let Some(name) = &current {
                            printer.note(&format!("Restarting {name}"));
                            engine.send(Command::RestartCurrentDownload).await?;
                        }
                    }
                    Control::CancelAll => {
                        engine.send(Command::CancelAllDownloads).await?;
                        printer.note("Cancelled all downloads");
                        cancelled += outstanding.len();
                        break;
                    }
                    Control::Quit => {
                        printer.note("Stopping");
                        break;
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                printer.note("Interrupted");
                break;
            }
        }
    }

    printer.finish();
    engine.shutdown().await?;

    if global.json {
        println!(
            "{}",
            serde_json::json!({
                "files": args.names.len(),
                "saved": saved,
                "failed": failed,
                "cancelled": cancelled,
            })
        );
    } else {
        println!();
        println!(
            "  Done: {} saved, {} failed, {} cancelled",
            saved, failed, cancelled
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} download(s) failed");
    }
    Ok(())
}
