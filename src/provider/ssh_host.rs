//! Backend for hosted dev-VM services driven entirely over SSH.
//!
//! The service exposes `new`, `ls` and `rm` subcommands on its SSH
//! endpoint and answers in JSON. The host is configured via
//! `ARMADA_SSH_HOST` or the config file.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ArmadaError, Result};
use crate::remote::{Remote, with_backoff};

use super::{Provider, VmRecord, VmStatus};

const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct HostVm {
    vm_name: String,
    ssh_dest: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostVmList {
    #[serde(default)]
    vms: Option<Vec<HostVm>>,
}

pub struct SshHostProvider {
    host: Option<String>,
    remote: Arc<dyn Remote>,
}

impl SshHostProvider {
    pub fn new(host: Option<String>, remote: Arc<dyn Remote>) -> Self {
        Self { host, remote }
    }

    fn host(&self) -> Result<&str> {
        self.host.as_deref().ok_or_else(|| {
            ArmadaError::ProviderUnavailable(
                "ARMADA_SSH_HOST is not configured for the ssh-host backend".to_string(),
            )
        })
    }

    async fn host_command(&self, args: &str) -> Result<String> {
        let host = self.host()?;
        let output = self.remote.run(host, args).await?;

        if !output.success() {
            let detail = format!("{args}: {}", output.stderr.trim());
            if output.stderr.contains("quota") || output.stderr.contains("limit") {
                return Err(ArmadaError::QuotaExceeded(detail));
            }
            return Err(ArmadaError::ProviderUnavailable(detail));
        }

        Ok(output.stdout)
    }

    fn parse_status(raw: Option<&str>) -> VmStatus {
        match raw {
            Some("creating") => VmStatus::Creating,
            Some("running") => VmStatus::Running,
            Some("stopped") => VmStatus::Stopped,
            Some("starting") => VmStatus::Starting,
            Some("stopping") => VmStatus::Stopping,
            _ => VmStatus::Unknown,
        }
    }
}

#[async_trait]
impl Provider for SshHostProvider {
    async fn create(&self, name: &str) -> Result<VmRecord> {
        info!(name, "Creating VM");
        let stdout = self
            .host_command(&format!("new --name={name} --no-email --json"))
            .await?;
        let created: HostVm = serde_json::from_str(&stdout)?;

        Ok(VmRecord {
            id: created.vm_name.clone(),
            name: created.vm_name,
            ssh_dest: created.ssh_dest,
            status: VmStatus::Running,
        })
    }

    async fn destroy(&self, vm_id: &str) -> Result<()> {
        info!(vm_id, "Destroying VM");
        let vm_id = vm_id.to_string();
        with_backoff("destroy", || async {
            match self.host_command(&format!("rm {vm_id}")).await {
                Ok(_) => Ok(()),
                // Destroying an absent VM is success.
                Err(ArmadaError::ProviderUnavailable(detail))
                    if detail.contains("not found") || detail.contains("No such") =>
                {
                    debug!(vm_id, "VM already gone");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn get(&self, vm_id: &str) -> Result<Option<VmRecord>> {
        let vms = self.list(None).await?;
        Ok(vms.into_iter().find(|vm| vm.id == vm_id))
    }

    async fn list(&self, name_prefix: Option<&str>) -> Result<Vec<VmRecord>> {
        let stdout = with_backoff("list", || self.host_command("ls --json")).await?;

        if stdout.trim().is_empty() || stdout.contains("No VMs found") {
            return Ok(Vec::new());
        }

        let listing: HostVmList = serde_json::from_str(&stdout)?;
        let mut vms: Vec<VmRecord> = listing
            .vms
            .unwrap_or_default()
            .into_iter()
            .map(|vm| VmRecord {
                id: vm.vm_name.clone(),
                name: vm.vm_name,
                ssh_dest: vm.ssh_dest,
                status: Self::parse_status(vm.status.as_deref()),
            })
            .collect();

        if let Some(prefix) = name_prefix {
            vms.retain(|vm| vm.name.starts_with(prefix));
        }

        Ok(vms)
    }

    async fn wait_ready(&self, vm: &VmRecord, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.remote.run(&vm.ssh_dest, "echo ready").await {
                Ok(output) if output.success() => return Ok(()),
                Ok(_) | Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(READY_POLL_INTERVAL).await;
                }
                Ok(output) => {
                    return Err(ArmadaError::Timeout {
                        operation: format!("wait_ready {} ({})", vm.name, output.stderr.trim()),
                        seconds: timeout.as_secs(),
                    });
                }
                Err(_) => {
                    return Err(ArmadaError::Timeout {
                        operation: format!("wait_ready {}", vm.name),
                        seconds: timeout.as_secs(),
                    });
                }
            }
        }
    }
}
