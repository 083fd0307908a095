//! Ferry CLI - chunked uploads and downloads against a Ferry transfer server
//!
//! ## Quick Start
//!
//! ```bash
//! # Upload files (p = pause/resume, c = cancel, r = restart, q = quit)
//! ferry upload ./video.mp4 ./notes.txt
//!
//! # See what the server holds, then fetch a file
//! ferry list --downloadable
//! ferry download video.mp4
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose);

    match cli.command {
        Command::Upload(args) => commands::upload::run(args, &cli.global).await,
        Command::Download(args) => commands::download::run(args, &cli.global).await,
        Command::List(args) => commands::list::run(args, &cli.global).await,
        Command::Delete(args) => commands::delete::run(args, &cli.global).await,
        Command::Status => commands::status::run(&cli.global).await,
        Command::Config(args) => commands::config::run(args, &cli.global).await,
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "warn,ferry=debug,ferry_core=debug"
    } else {
        "warn,ferry=info,ferry_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}
