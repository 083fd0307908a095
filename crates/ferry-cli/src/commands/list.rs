//! List command implementation.

use anyhow::{Context, Result};

use ferry_core::client::Transport;

use super::{GlobalArgs, ListArgs};
use crate::ui;

/// Run the list command.
pub async fn run(args: ListArgs, global: &GlobalArgs) -> Result<()> {
    let config = super::load_config(global)?;
    let transport = super::connect(&config)?;

    let html = if args.downloadable {
        transport.list_downloadable().await
    } else {
        transport.list_uploaded().await
    }
    .context("Failed to fetch the file list")?;

    if args.raw {
        println!("{html}");
        return Ok(());
    }

    let names = ui::file_names_from_html(&html);

    if global.json {
        println!("{}", serde_json::to_string_pretty(&names)?);
        return Ok(());
    }

    println!();
    if names.is_empty() {
        println!("  No files on {}.", config.server.base_url);
    } else {
        let kind = if args.downloadable {
            "Downloadable"
        } else {
            "Uploaded"
        };
        println!("  {} files on {}:", kind, config.server.base_url);
        println!();
        for name in &names {
            println!("    {name}");
        }
    }
    println!();

    Ok(())
}
