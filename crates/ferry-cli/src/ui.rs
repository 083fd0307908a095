//! UI utilities for Ferry CLI.

use std::io::{self, Write};

use ferry_core::bus::Event;

const BAR_WIDTH: usize = 24;

/// Print the version banner.
pub fn banner() {
    println!();
    println!("Ferry v{}", ferry_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
}

/// Print the keyboard controls of a running transfer.
pub fn controls_hint(cancel_all: bool) {
    if cancel_all {
        println!("  Controls: p pause/resume, c cancel, r restart, x cancel all, q quit");
    } else {
        println!("  Controls: p pause/resume, c cancel, r restart, q quit");
    }
    println!();
}

/// Format a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// A fixed-width progress bar, e.g. `[######------]  50%`.
pub fn progress_bar(progress: f64) -> String {
    let progress = progress.clamp(0.0, 100.0);
    let filled = ((progress / 100.0) * BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        progress
    )
}

/// Extract file names from a server file-list fragment.
///
/// Names are taken from `data-filename` attributes when present, otherwise
/// from the text between tags.
pub fn file_names_from_html(html: &str) -> Vec<String> {
    const ATTR: &str = "data-filename=\"";

    let mut names: Vec<String> = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find(ATTR) {
        rest = &rest[start + ATTR.len()..];
        let Some(end) = rest.find('"') else {
            break;
        };
        let name = &rest[..end];
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &rest[end..];
    }

    if !names.is_empty() {
        return names;
    }

    let mut text = String::new();
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push('\n');
            }
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "Delete" && *line != "Download")
        .map(ToString::to_string)
        .collect()
}

/// The line printed for an event, if it gets one.
///
/// Progress events redraw the progress bar instead and return `None`.
pub fn message(event: &Event) -> Option<String> {
    let text = match event {
        Event::UploadComplete { file_name } => format!("  Uploaded {file_name}"),
        Event::UploadCancelled { file_name } => format!("  Cancelled {file_name}"),
        Event::UploadPauseChanged { paused } | Event::DownloadPauseChanged { paused } => {
            let text = if *paused { "  Paused" } else { "  Resumed" };
            text.to_string()
        }
        Event::DownloadStarted {
            file_name,
            chunk_count,
        } => format!("  Downloading {file_name} ({chunk_count} chunks)"),
        Event::DownloadSaved { file_name, path } => {
            format!("  Saved {file_name} -> {}", path.display())
        }
        Event::DownloadFailed { file_name, reason } => format!("  Failed {file_name}: {reason}"),
        Event::ShowProgressBar
        | Event::HideProgressBar
        | Event::UpdateProgress { .. }
        | Event::ResetProgress
        | Event::RefreshFileList
        | Event::DownloadProgress { .. }
        | Event::DownloadProgressReset
        | Event::DownloadQueueChanged { .. } => return None,
    };
    Some(text)
}

/// Renders engine events as progress lines or JSON lines.
#[derive(Debug)]
pub struct EventPrinter {
    json: bool,
    line_open: bool,
}

impl EventPrinter {
    /// Create a printer; `json` prints every event as one JSON object per line.
    pub const fn new(json: bool) -> Self {
        Self {
            json,
            line_open: false,
        }
    }

    /// Render one event. `label` names the upload in progress, if known.
    pub fn print(&mut self, event: &Event, label: Option<&str>) {
        if self.json {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
            return;
        }

        match event {
            Event::UpdateProgress { progress } => {
                self.progress(*progress, label.unwrap_or("upload"));
            }
            Event::ResetProgress => self.progress(0.0, label.unwrap_or("upload")),
            Event::DownloadProgress {
                file_name,
                progress,
            } => self.progress(*progress, file_name),
            other => {
                if let Some(text) = message(other) {
                    self.line(&text);
                }
            }
        }
    }

    /// Print a status message on its own line.
    pub fn note(&mut self, message: &str) {
        if !self.json {
            self.line(&format!("  {message}"));
        }
    }

    /// End an open progress line.
    pub fn finish(&mut self) {
        if self.line_open {
            println!();
            self.line_open = false;
        }
    }

    fn progress(&mut self, progress: f64, label: &str) {
        print!("\r  {} {label}    ", progress_bar(progress));
        let _ = io::stdout().flush();
        self.line_open = true;
    }

    fn line(&mut self, text: &str) {
        self.finish();
        println!("{text}");
    }
}
