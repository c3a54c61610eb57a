//! Project initialization command.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use docket::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!("Initialized docket project at {}", result.docket_dir.display());
        println!();
        println!("Created directory structure:");
        println!("  .docket/");
        println!("  ├── docket.toml   # Configuration");
        println!("  ├── docket.db     # Workflow store");
        println!("  └── logs/         # Daily rolling logs");
        println!();
        println!("Next steps:");
        println!("  1. Export ANTHROPIC_API_KEY (or set [generation] api_key_env)");
        println!("  2. Run `docket intake order.json` to start a workflow");
        println!("  3. Run `docket run <workflow-id>` to advance it");
    } else {
        println!("Docket project already initialized at {}", result.docket_dir.display());
        if result.wrote_config {
            println!("Wrote missing docket.toml.");
        }
        println!("Directory structure verified.");
    }

    Ok(())
}
