//! Delete command implementation.

use std::io::{self, Write};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use ferry_core::client::Transport;

use super::{DeleteArgs, GlobalArgs};

/// Run the delete command.
pub async fn run(args: DeleteArgs, global: &GlobalArgs) -> Result<()> {
    let config = super::load_config(global)?;
    let transport = super::connect(&config)?;

    if args.all {
        if !args.yes && !global.json && !confirm(&config.server.base_url).await? {
            println!("  Nothing deleted.");
            return Ok(());
        }

        transport
            .delete_all()
            .await
            .context("Failed to delete files")?;
        report(global.json, None);
        return Ok(());
    }

    let Some(name) = args.name else {
        anyhow::bail!("Specify a file name or --all");
    };

    transport
        .delete_file(&name)
        .await
        .with_context(|| format!("Failed to delete {name}"))?;
    report(global.json, Some(&name));

    Ok(())
}

async fn confirm(server: &str) -> Result<bool> {
    print!("  Delete every file on {server}? [y/N] ");
    let _ = io::stdout().flush();

    let mut input = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut input)
        .await?;
    let input = input.trim().to_lowercase();

    Ok(input == "y" || input == "yes")
}

fn report(json: bool, name: Option<&str>) {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "deleted": name.unwrap_or("*"),
            })
        );
        return;
    }

    match name {
        Some(name) => println!("  Deleted {name}"),
        None => println!("  Deleted all files"),
    }
}
