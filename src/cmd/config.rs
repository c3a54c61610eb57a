//! Configuration view and validation commands.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use docket::docket_config::{CONFIG_FILE, DocketConfig, DocketToml};
    use docket::init::get_docket_dir;

    let docket_dir = get_docket_dir(project_dir);
    let config_path = docket_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No docket.toml at {}; showing defaults.", config_path.display());
            }
            println!();

            let config = DocketConfig::new(project_dir.to_path_buf())?;
            let rendered = toml::to_string_pretty(&config.toml)?;
            println!("{}", rendered.trim_end());
            println!();

            println!("Effective values (with env overrides):");
            println!("  database = {}", config.db_path().display());
            println!(
                "  {} = {}",
                config.toml.generation.api_key_env,
                if config.api_key().is_some() { "set" } else { "NOT SET" }
            );
            println!(
                "  {} = {}",
                config.toml.authority.token_env,
                if config.authority_token().is_some() { "set" } else { "not set" }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No docket.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = DocketConfig::new(project_dir.to_path_buf())?;
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
                println!("docket.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&docket_dir)?;
            DocketToml::default().save(&config_path)?;

            println!("Created docket.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [generation] api_key_env, temperature, timeout_secs");
            println!("  - [models] fast, standard, premium");
            println!("  - [checkpoints] reminder, escalation and auto-cancel hours");
            println!();
        }
    }

    Ok(())
}
