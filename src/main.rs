use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use docket::checkpoint::CheckpointAction;
use docket::phase::PhaseCode;
use docket::workflow::WorkflowStatus;

mod cmd;

#[derive(Parser)]
#[command(name = "docket")]
#[command(version, about = "Phase orchestration for legal motion production")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true, env = "DOCKET_LOG_JSON")]
    pub json_logs: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Database path. Defaults to .docket/docket.db
    #[arg(long, global = true, env = "DOCKET_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .docket directory, default config and database
    Init,
    /// Start a workflow from an intake event (JSON file, or stdin when omitted)
    Intake { file: Option<PathBuf> },
    /// List workflows
    List {
        #[arg(long)]
        status: Option<WorkflowStatus>,
    },
    /// Show a workflow's progress
    Status { workflow_id: Uuid },
    /// Advance a workflow by at most one phase
    Step { workflow_id: Uuid },
    /// Step a workflow until it parks on a checkpoint, blocks or finishes
    Run { workflow_id: Uuid },
    /// Answer a pending checkpoint
    Respond {
        checkpoint_id: Uuid,
        /// approve, request_changes or cancel
        action: CheckpointAction,
        #[arg(short, long)]
        feedback: Option<String>,
        #[arg(long)]
        responder: Option<String>,
        /// Affirm every approval item (required to approve BLOCKING checkpoints)
        #[arg(long)]
        affirm_all: bool,
        /// Affirm one item: completeness, citation_accuracy, standards_compliance, no_conflicts
        #[arg(long = "affirm", value_name = "ITEM")]
        affirm: Vec<String>,
        /// Reject the response unless the checkpoint guards this phase
        #[arg(long)]
        expected_phase: Option<PhaseCode>,
    },
    /// Process due checkpoint reminders, escalations and timeouts
    Sweep,
    /// Cancel a workflow
    Cancel {
        workflow_id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Discard all progress and start again from phase I
    Restart {
        workflow_id: Uuid,
        #[arg(long)]
        confirm: bool,
    },
    /// Pause a workflow
    Hold {
        workflow_id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Resume a held workflow
    Resume { workflow_id: Uuid },
    /// Clear a block so the failed phase runs again
    Unblock {
        workflow_id: Uuid,
        #[arg(short, long)]
        feedback: Option<String>,
    },
    /// Show phase executions and gate checks for a workflow
    Audit { workflow_id: Uuid },
    /// Citation tools
    Citations {
        #[command(subcommand)]
        command: CitationsCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum CitationsCommands {
    /// Extract citations from a document (file, or stdin when omitted)
    Extract { file: Option<PathBuf> },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default docket.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Commands that do not touch the store run before logging and config load,
    // so they work in uninitialized or misconfigured directories.
    match &cli.command {
        Commands::Init => return cmd::cmd_init(&project_dir),
        Commands::Config { command } => return cmd::cmd_config(&project_dir, command.clone()),
        Commands::Citations { command } => return cmd::cmd_citations(command.clone(), cli.json),
        _ => {}
    }

    let config = docket::config::Config::new(project_dir, cli.verbose, cli.json_logs, cli.db.clone())?;
    let _logging = docket::logging::init(&docket::logging::LogSettings::from_config(config.docket()))?;
    let orchestrator = cmd::open_orchestrator(&config)?;
    let json = cli.json;

    match cli.command {
        Commands::Intake { file } => cmd::cmd_intake(&orchestrator, file.as_deref(), json).await?,
        Commands::List { status } => cmd::cmd_list(&orchestrator, status, json).await?,
        Commands::Status { workflow_id } => cmd::cmd_status(&orchestrator, workflow_id, json).await?,
        Commands::Step { workflow_id } => cmd::cmd_step(&orchestrator, workflow_id, json).await?,
        Commands::Run { workflow_id } => cmd::cmd_run(&orchestrator, workflow_id, json).await?,
        Commands::Respond {
            checkpoint_id,
            action,
            feedback,
            responder,
            affirm_all,
            affirm,
            expected_phase,
        } => {
            let response = cmd::build_response(action, feedback, responder, affirm_all, &affirm, expected_phase)?;
            cmd::cmd_respond(&orchestrator, checkpoint_id, response, json).await?
        }
        Commands::Sweep => cmd::cmd_sweep(&orchestrator, json).await?,
        Commands::Cancel { workflow_id, reason } => {
            cmd::cmd_cancel(&orchestrator, workflow_id, reason, json).await?
        }
        Commands::Restart { workflow_id, confirm } => {
            cmd::cmd_restart(&orchestrator, workflow_id, confirm, json).await?
        }
        Commands::Hold { workflow_id, reason } => cmd::cmd_hold(&orchestrator, workflow_id, reason, json).await?,
        Commands::Resume { workflow_id } => cmd::cmd_resume(&orchestrator, workflow_id, json).await?,
        Commands::Unblock { workflow_id, feedback } => {
            cmd::cmd_unblock(&orchestrator, workflow_id, feedback, json).await?
        }
        Commands::Audit { workflow_id } => cmd::cmd_audit(&orchestrator, workflow_id, json).await?,
        Commands::Init | Commands::Config { .. } | Commands::Citations { .. } => {}
    }

    Ok(())
}
