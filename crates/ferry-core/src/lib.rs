//! # Ferry Core Library
//!
//! `ferry-core` provides the transfer engine behind Ferry: local files are
//! split into fixed-size chunks and pushed to a transfer server, and files
//! stored on that server are pulled back chunk by chunk and reassembled.
//!
//! ## Features
//!
//! - **Bounded-concurrency uploads**: up to 5 chunk requests in flight
//! - **Sequential downloads**: one chunk at a time, strictly in order
//! - **Transfer controls**: pause, resume, cancel and restart for both directions
//! - **Restorable state**: the active upload is persisted so a new process can
//!   show where it stopped
//!
//! ## Modules
//!
//! - [`bus`] - Commands accepted by the engine and events it publishes
//! - [`chunk`] - Splitting byte sources into ordered chunks
//! - [`client`] - HTTP transport for the transfer server
//! - [`config`] - Configuration management
//! - [`transfer`] - Upload scheduler, download sequencer and the engine task
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_core::bus::Command;
//! use ferry_core::client::HttpTransport;
//! use ferry_core::config::Config;
//! use ferry_core::transfer::{StateStore, TransferEngine};
//!
//! let config = Config::load()?;
//! let transport = HttpTransport::new(&config.server)?;
//! let store = StateStore::new().await?;
//! let engine = TransferEngine::spawn(&config, transport, store);
//!
//! let mut events = engine.subscribe();
//! engine.send(Command::StartUpload { path, file_name, file_size }).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

pub mod bus;
pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod transfer;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default transfer server address
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";

/// Default chunk size for uploads (3 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 3 * 1024 * 1024;

/// Maximum number of chunk uploads in flight at once
pub const MAX_CONCURRENT_UPLOADS: usize = 5;
