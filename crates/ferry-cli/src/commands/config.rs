//! Config command implementation.

use anyhow::{bail, Context, Result};

use ferry_core::config::Config;

use super::{ConfigAction, ConfigArgs, GlobalArgs};

/// Run the config command.
pub async fn run(args: ConfigArgs, global: &GlobalArgs) -> Result<()> {
    let path = global.config.clone().unwrap_or_else(Config::config_path);

    match args.action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let config = super::load_config(global)?;
            if global.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                let text =
                    toml::to_string_pretty(&config).context("Failed to serialize config")?;
                println!("# {}", path.display());
                println!();
                print!("{text}");
            }
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default()
                .save_to(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("  Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}
