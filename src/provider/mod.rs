//! VM provider port.
//!
//! The control plane re-discovers a voyage purely from VM names, so the
//! naming convention (`<voyage-id>-storage`, `<voyage-id>-ship-<i>`) is
//! owned by the callers, never by a backend.

mod ssh_host;

pub use ssh_host::SshHostProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::{ArmadaError, Result};
use crate::remote::Remote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    Creating,
    Running,
    Stopped,
    Starting,
    Stopping,
    #[default]
    Unknown,
}

/// A provisioned virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: String,
    pub name: String,
    pub ssh_dest: String,
    pub status: VmStatus,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Create a VM and block until it is reachable.
    async fn create(&self, name: &str) -> Result<VmRecord>;

    /// Destroy a VM. Destroying an absent id is not an error.
    async fn destroy(&self, vm_id: &str) -> Result<()>;

    async fn get(&self, vm_id: &str) -> Result<Option<VmRecord>>;

    /// List VMs, optionally filtered by name prefix.
    async fn list(&self, name_prefix: Option<&str>) -> Result<Vec<VmRecord>>;

    /// Poll until a trivial command succeeds over the remote channel.
    async fn wait_ready(&self, vm: &VmRecord, timeout: Duration) -> Result<()>;
}

/// Resolve the configured backend by name.
pub fn select(config: &AppConfig, remote: Arc<dyn Remote>) -> Result<Arc<dyn Provider>> {
    match config.provider.as_str() {
        "ssh-host" => Ok(Arc::new(SshHostProvider::new(
            config.ssh_host.clone(),
            remote,
        ))),
        other => Err(ArmadaError::Config(format!(
            "unknown provider {other:?}; available: ssh-host"
        ))),
    }
}
