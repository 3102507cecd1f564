//! Configuration view and scaffolding — `packflow config`.

use std::path::Path;

use anyhow::{Context, Result};
use packflow::config::PackflowToml;

use super::super::ConfigCommands;

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let from_file = config_path.exists();
            let settings = PackflowToml::load_or_default(config_path)?.with_env_overrides();

            println!();
            println!("Packflow Configuration");
            println!("======================");
            println!();
            if from_file {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No packflow.toml at {}; using defaults.", config_path.display());
            }
            println!();

            let mut shown = settings.clone();
            // Secrets stay off the terminal.
            if shown.store.auth.is_some() {
                shown.store.auth = Some("********".to_string());
            }
            if shown.auth.default_admin_password.is_some() {
                shown.auth.default_admin_password = Some("********".to_string());
            }
            let rendered =
                toml::to_string_pretty(&shown).context("Failed to render configuration")?;
            println!("{}", rendered);

            let warnings = settings.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                println!("packflow.toml already exists at {}", config_path.display());
                println!("Use --force to overwrite it.");
                return Ok(());
            }
            PackflowToml::default().save(config_path)?;
            println!("Created {}", config_path.display());
            println!();
            println!("Set store.base_url (or PACKFLOW_STORE_URL) and");
            println!("PACKFLOW_ADMIN_PASSWORD, then run 'packflow serve'.");
        }
    }
    Ok(())
}
