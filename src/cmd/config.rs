//! Configuration view and validation commands (`cadnlp config`).

use std::path::Path;

use anyhow::Result;

use cadnlp::config::{CONFIG_FILE, Settings};

use super::super::ConfigCommands;

fn describe_source(explicit: Option<&Path>) -> String {
    match explicit {
        Some(path) => path.display().to_string(),
        None if Path::new(CONFIG_FILE).exists() => CONFIG_FILE.to_string(),
        None => "(none, using defaults)".to_string(),
    }
}

pub fn cmd_config(
    settings: &Settings,
    config_path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!("# Config file: {}", describe_source(config_path));
            println!("# Effective values (with env/CLI overrides)");
            println!();
            print!("{}", settings.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = settings.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
