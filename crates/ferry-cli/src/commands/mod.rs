//! CLI command definitions and handlers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use ferry_core::client::HttpTransport;
use ferry_core::config::Config;
use ferry_core::transfer::StateStore;

pub mod config;
pub mod delete;
pub mod download;
pub mod list;
pub mod status;
pub mod upload;

/// Load configuration and apply command-line overrides.
///
/// Without `--config` a missing or unreadable default file falls back to
/// defaults; an explicit `--config` file must load.
pub fn load_config(global: &GlobalArgs) -> Result<Config> {
    let mut config = match &global.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().unwrap_or_default(),
    };

    if let Some(server) = &global.server {
        config.server.base_url.clone_from(server);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Build the HTTP transport for the configured server.
pub fn connect(config: &Config) -> Result<HttpTransport> {
    HttpTransport::new(&config.server).context("Failed to set up the HTTP client")
}

/// Open the persisted upload state.
pub async fn open_store(config: &Config) -> Result<StateStore> {
    StateStore::with_dir(config.state_dir())
        .await
        .context("Failed to open state directory")
}

/// A keyboard control typed while a transfer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// `p`
    PauseResume,
    /// `c`
    Cancel,
    /// `r`
    Restart,
    /// `x`
    CancelAll,
    /// `q`
    Quit,
}

impl Control {
    /// Parse one input line.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "p" | "pause" | "resume" => Some(Self::PauseResume),
            "c" | "cancel" => Some(Self::Cancel),
            "r" | "restart" => Some(Self::Restart),
            "x" | "cancel-all" => Some(Self::CancelAll),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Read controls from stdin until it closes.
pub fn spawn_controls() -> mpsc::Receiver<Control> {
    let (tx, rx) = mpsc::channel(8);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match Control::parse(&line) {
                Some(control) => {
                    if tx.send(control).await.is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("  Unknown control '{}' (p, c, r, x, q)", line.trim()),
            }
        }
    });

    rx
}

/// Wait for the next control, forever if controls are off.
pub async fn next_control(controls: &mut Option<mpsc::Receiver<Control>>) -> Option<Control> {
    match controls {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Ferry - chunked uploads and downloads with pause, resume and cancel
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Options shared by every command
    #[command(flatten)]
    pub global: GlobalArgs,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Transfer server address (e.g., http://localhost:5000)
    #[arg(long, global = true, env = "FERRY_SERVER")]
    pub server: Option<String>,

    /// Configuration file to use instead of the default
    #[arg(long, global = true, env = "FERRY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Upload files to the server
    Upload(UploadArgs),

    /// Download files from the server
    Download(DownloadArgs),

    /// List files on the server
    List(ListArgs),

    /// Delete files from the server
    Delete(DeleteArgs),

    /// Show the last recorded upload
    Status,

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the upload command
#[derive(Parser)]
pub struct UploadArgs {
    /// Files to upload, in order
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Chunk size in bytes (overrides the config file)
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Non-interactive mode for scripting (no stdin controls)
    #[arg(long)]
    pub batch: bool,
}

/// Arguments for the download command
#[derive(Parser)]
pub struct DownloadArgs {
    /// Names of the files on the server, in order
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Output directory for downloaded files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Non-interactive mode for scripting (no stdin controls)
    #[arg(long)]
    pub batch: bool,
}

/// Arguments for the list command
#[derive(Parser)]
pub struct ListArgs {
    /// List files available for download instead of uploaded files
    #[arg(short, long)]
    pub downloadable: bool,

    /// Print the server's HTML fragment unchanged
    #[arg(long)]
    pub raw: bool,
}

/// Arguments for the delete command
#[derive(Parser)]
pub struct DeleteArgs {
    /// Name of the file to delete
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub name: Option<String>,

    /// Delete every file on the server
    #[arg(long)]
    pub all: bool,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand (defaults to `show`)
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
