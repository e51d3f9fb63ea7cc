//! Configuration view and validation commands: `pipewright config`.

use anyhow::Result;

use super::super::ConfigCommands;
use pipewright::config::{Config, PipewrightToml};

fn print_sections(toml: &PipewrightToml) {
    println!("[store]");
    println!("  db_path = \"{}\"", toml.store.db_path);
    println!("  namespace = \"{}\"", toml.store.namespace);
    println!();
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  format = \"{}\"", toml.logging.format);
    if let Some(dir) = &toml.logging.dir {
        println!("  dir = \"{}\"", dir);
    }
    println!();
}

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Pipewright Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No pipewright.toml found at {}", config_path.display());
                println!("Using default configuration:");
            }
            println!();
            print_sections(&config.toml);

            println!("Effective values (with env/CLI overrides):");
            println!("  database = {}", config.db_path.display());
            println!("  namespace = \"{}\"", config.namespace);
            println!("  log_level = {}", config.log_level);
            println!(
                "  log_dir = {}",
                config
                    .log_dir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|| console::style("(stderr only)").dim().to_string())
            );
            println!();
            if !config_path.exists() {
                println!("Run 'pipewright config init' to create a pipewright.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No pipewright.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
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
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("pipewright.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.pipewright_dir)?;
            PipewrightToml::default().save(&config_path)?;

            println!("Created pipewright.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [store] db_path, namespace");
            println!("  - [logging] level, format, dir");
            println!();
        }
    }

    Ok(())
}
