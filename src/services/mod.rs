//! External control-plane collaborators.
//!
//! Both calls may be slow and may fail. The kernel only ever awaits them from
//! spawned tasks, never from the frame thread.

pub mod kube;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::kernel::event::TargetRecord;

/// Enumerates hosts eligible to receive a workload.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<TargetRecord>>;
}

/// Creates one workload pinned to `target_id`.
/// `request_id` must end up in the created object's name.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_workload(&self, target_id: &str, request_id: &str) -> Result<()>;
}
