//! Upload command implementation.
//!
//! Files are handed to the engine in order and uploaded one at a time. While
//! an upload runs, controls typed on stdin pause, cancel or restart it.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast::error::RecvError;

use ferry_core::bus::{Command, Event, FileDescriptor};
use ferry_core::transfer::TransferEngine;

use super::{Control, GlobalArgs, UploadArgs};
use crate::ui::{self, EventPrinter};

/// Run the upload command.
#[allow(clippy::too_many_lines)]
pub async fn run(args: UploadArgs, global: &GlobalArgs) -> Result<()> {
    let mut config = super::load_config(global)?;
    if let Some(chunk_size) = args.chunk_size {
        config.upload.chunk_size = chunk_size;
        config.validate().context("Invalid chunk size")?;
    }

    let mut files = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        files.push(describe(path).await?);
    }

    let transport = super::connect(&config)?;
    let store = super::open_store(&config).await?;

    if !global.json {
        ui::banner();
        let total_size: u64 = files.iter().map(|f| f.size).sum();
        println!(
            "  Uploading {} files ({}) to {}",
            files.len(),
            ui::format_size(total_size),
            config.server.base_url
        );
        println!();
        for file in &files {
            println!("  {} ({})", file.name, ui::format_size(file.size));
        }
        println!();
        if !args.batch {
            ui::controls_hint(true);
        }
    }

    let engine = TransferEngine::spawn(&config, transport, store);
    let mut events = engine.subscribe();

    for file in &files {
        engine
            .send(Command::StartUpload {
                path: file.path.clone(),
                file_name: file.name.clone(),
                file_size: file.size,
            })
            .await?;
    }

    let mut controls = if args.batch {
        None
    } else {
        Some(super::spawn_controls())
    };
    let mut printer = EventPrinter::new(global.json);

    let mut completed = 0usize;
    let mut cancelled = 0usize;

    loop {
        let finished = completed + cancelled;
        if finished == files.len() {
            break;
        }
        let current = &files[finished];

        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    match &event {
                        Event::UploadComplete { .. } => completed += 1,
                        Event::UploadCancelled { .. } => cancelled += 1,
                        _ => {}
                    }
                    printer.print(&event, Some(current.name.as_str()));
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
                        engine.send(Command::PauseResumeUpload).await?;
                    }
                    Control::Cancel => {
                        engine
                            .send(Command::CancelCurrentUpload {
                                file_name: current.name.clone(),
                            })
                            .await?;
                    }
                    Control::Restart => {
                        printer.note(&format!("Restarting {}", current.name));
                        engine
                            .send(Command::RestartUpload {
                                file: current.clone(),
                            })
                            .await?;
                    }
                    Control::CancelAll => {
                        for file in &files[finished..] {
                            engine
                                .send(Command::CancelCurrentUpload {
                                    file_name: file.name.clone(),
                                })
                                .await?;
                        }
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
                "files": files.len(),
                "completed": completed,
                "cancelled": cancelled,
            })
        );
    } else {
        println!();
        println!(
            "  Done: {} uploaded, {} cancelled, {} not finished",
            completed,
            cancelled,
            files.len() - completed - cancelled
        );
    }

    Ok(())
}

/// Describe a local file for upload.
async fn describe(path: &Path) -> Result<FileDescriptor> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))?;
    if !metadata.is_file() {
        bail!("{} is not a file", path.display());
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))?;

    Ok(FileDescriptor {
        path: path.to_path_buf(),
        name,
        size: metadata.len(),
    })
}
