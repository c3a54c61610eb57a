//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module       | Commands handled                                                  |
//! |--------------|-------------------------------------------------------------------|
//! | `project`    | `Init`                                                            |
//! | `workflow`   | `Intake`, `List`, `Status`, `Step`, `Run`, `Cancel`, `Restart`,   |
//! |              | `Hold`, `Resume`, `Unblock`, `Audit`                              |
//! | `checkpoint` | `Respond`, `Sweep`                                                |
//! | `citations`  | `Citations`                                                       |
//! | `config`     | `Config`                                                          |

pub mod checkpoint;
pub mod citations;
pub mod config;
pub mod project;
pub mod workflow;

use anyhow::{Result, bail};
use serde::Serialize;

use docket::config::Config;
use docket::init::is_initialized;
use docket::orchestrator::Orchestrator;

pub use checkpoint::{build_response, cmd_respond, cmd_sweep};
pub use citations::cmd_citations;
pub use config::cmd_config;
pub use project::cmd_init;
pub use workflow::{
    cmd_audit, cmd_cancel, cmd_hold, cmd_intake, cmd_list, cmd_restart, cmd_resume, cmd_run, cmd_status,
    cmd_step, cmd_unblock,
};

/// Open the store and wire the orchestrator. The project must have been
/// initialized unless an explicit database path was given.
pub fn open_orchestrator(config: &Config) -> Result<Orchestrator> {
    if config.docket().cli_db_path.is_none() && !is_initialized(&config.project_dir) && !config.db_path.exists() {
        bail!(
            "No docket project at {}. Run `docket init` first.",
            config.project_dir.display()
        );
    }
    let store = config.open_store()?;
    config.orchestrator(store)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read a file, or stdin when no path is given.
pub(crate) fn read_input(path: Option<&std::path::Path>) -> Result<String> {
    use anyhow::Context;
    use std::io::Read;

    match path {
        Some(path) if path.as_os_str() != "-" => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}
