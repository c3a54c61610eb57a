//! `docket init`: create the `.docket/` directory for a project.
//!
//! ```text
//! .docket/
//! ├── docket.toml      # Configuration (all fields optional)
//! ├── docket.db        # Workflow store (SQLite)
//! └── logs/            # Daily rolling logs
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::docket_config::{CONFIG_FILE, DB_FILE, DOCKET_DIR, DocketToml};
use crate::store::DocketDb;

#[derive(Debug)]
pub struct InitResult {
    pub docket_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
    /// Whether a default docket.toml was written
    pub wrote_config: bool,
}

/// Initialize docket in `project_dir`. Safe to re-run: existing files are
/// left alone and missing pieces are filled in.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let docket_dir = project_dir.join(DOCKET_DIR);
    let created = !docket_dir.exists();

    std::fs::create_dir_all(&docket_dir)
        .with_context(|| format!("Failed to create directory: {}", docket_dir.display()))?;
    let logs_dir = docket_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create logs directory: {}", logs_dir.display()))?;

    let config_path = docket_dir.join(CONFIG_FILE);
    let wrote_config = if config_path.exists() {
        false
    } else {
        DocketToml::default().save(&config_path)?;
        true
    };

    // Opening runs the migrations.
    DocketDb::open(&docket_dir.join(DB_FILE)).context("Failed to initialize workflow store")?;

    Ok(InitResult {
        docket_dir,
        created,
        wrote_config,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(DOCKET_DIR).join(DB_FILE).exists()
}

pub fn get_docket_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(DOCKET_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_layout() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert!(result.wrote_config);
        assert_eq!(result.docket_dir, dir.path().join(".docket"));
        assert!(result.docket_dir.join("logs").is_dir());
        assert!(result.docket_dir.join("docket.toml").is_file());
        assert!(result.docket_dir.join("docket.db").is_file());
    }

    #[test]
    fn test_written_config_parses_to_defaults() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let toml = DocketToml::load(&dir.path().join(".docket/docket.toml")).unwrap();
        assert_eq!(toml, DocketToml::default());
    }

    #[test]
    fn test_init_is_idempotent_and_keeps_config() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let config_path = dir.path().join(".docket/docket.toml");
        std::fs::write(&config_path, "[orchestrator]\nslot_capacity = 2\n").unwrap();

        let again = init_project(dir.path()).unwrap();
        assert!(!again.created);
        assert!(!again.wrote_config);
        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("slot_capacity = 2"));
    }

    #[test]
    fn test_is_initialized() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
        init_project(dir.path()).unwrap();
        assert!(is_initialized(dir.path()));
        assert_eq!(get_docket_dir(dir.path()), dir.path().join(".docket"));
    }
}
