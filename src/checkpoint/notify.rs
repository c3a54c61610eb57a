//! Outbound seams for checkpoints: the external timer runtime and the
//! operator notification channel.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use super::Checkpoint;
use super::manager::DeadlineKind;

/// Registers point-in-time deadline callbacks with an external scheduler.
/// Delivery is best effort; the periodic sweep covers lost timers.
#[async_trait]
pub trait CheckpointScheduler: Send + Sync {
    async fn schedule(&self, checkpoint_id: Uuid, kind: DeadlineKind, at: DateTime<Utc>) -> Result<()>;
}

/// Tells operators that a checkpoint needs attention.
#[async_trait]
pub trait CheckpointNotifier: Send + Sync {
    async fn notify(&self, checkpoint: &Checkpoint, notice: &str) -> Result<()>;
}

/// Scheduler for single-process deployments: records the deadline in the
/// log and relies on `docket sweep`.
pub struct LogScheduler;

#[async_trait]
impl CheckpointScheduler for LogScheduler {
    async fn schedule(&self, checkpoint_id: Uuid, kind: DeadlineKind, at: DateTime<Utc>) -> Result<()> {
        info!(
            target: "docket::checkpoint",
            checkpoint_id = %checkpoint_id,
            deadline = kind.as_str(),
            at = %at,
            "deadline registered"
        );
        Ok(())
    }
}

pub struct LogNotifier;

#[async_trait]
impl CheckpointNotifier for LogNotifier {
    async fn notify(&self, checkpoint: &Checkpoint, notice: &str) -> Result<()> {
        info!(
            target: "docket::checkpoint",
            checkpoint_id = %checkpoint.id,
            workflow_id = %checkpoint.workflow_id,
            phase = %checkpoint.phase,
            checkpoint_type = checkpoint.checkpoint_type.as_str(),
            notice,
            "{}",
            checkpoint.reason
        );
        Ok(())
    }
}
