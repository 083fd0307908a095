//! Status command implementation.

use anyhow::{Context, Result};

use super::GlobalArgs;
use crate::ui;

/// Run the status command.
pub async fn run(global: &GlobalArgs) -> Result<()> {
    let config = super::load_config(global)?;
    let store = super::open_store(&config).await?;

    let snapshot = store
        .snapshot()
        .await
        .context("Failed to read upload state")?;

    if global.json {
        let value = match &snapshot {
            Some(snapshot) => serde_json::json!({
                "active": true,
                "fileName": snapshot.state.file_name,
                "path": snapshot.file.as_ref().map(|f| f.path.display().to_string()),
                "progress": snapshot.state.progress_percentage(),
                "uploadedChunks": snapshot.state.uploaded_chunks,
                "totalChunks": snapshot.state.total_chunks,
                "fileSize": snapshot.state.file_size,
                "paused": snapshot.state.paused,
                "updatedAt": snapshot.state.updated_at.to_rfc3339(),
            }),
            None => serde_json::json!({ "active": false }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    let Some(snapshot) = snapshot else {
        println!("  No active upload.");
        println!();
        return Ok(());
    };

    let state = &snapshot.state;
    println!("  Upload:    {}", state.file_name);
    if let Some(file) = &snapshot.file {
        println!("  Source:    {}", file.path.display());
    }
    println!(
        "  Progress:  {} ({}/{} chunks, {})",
        ui::progress_bar(state.progress_percentage()),
        state.uploaded_chunks,
        state.total_chunks,
        ui::format_size(state.file_size)
    );
    println!("  Paused:    {}", if state.paused { "yes" } else { "no" });
    println!(
        "  Updated:   {}",
        state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    Ok(())
}
