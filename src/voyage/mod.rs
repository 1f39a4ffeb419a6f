//! Voyage descriptor and discovery.
//!
//! A voyage is immutable once minted: id, objective, repo, branch and fleet
//! size never change. The only persistent copy lives on the storage VM as
//! `voyage.json`; everything else about a voyage is derived at read time
//! from VM names and task files.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ArmadaError, Result};
use crate::provider::{Provider, VmRecord};
use crate::remote::{Remote, with_backoff};

/// Every VM the control plane owns carries this name prefix.
pub const VOYAGE_PREFIX: &str = "voyage-";

/// Shared voyage root on the storage VM.
pub const VOYAGE_ROOT: &str = "/voyage";

const ID_ENTROPY_CHARS: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voyage {
    pub id: String,
    pub objective: String,
    pub repo: String,
    pub branch: String,
    pub task_set_id: String,
    pub ship_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Voyage {
    pub fn create(objective: impl Into<String>, repo: impl Into<String>, ship_count: u32) -> Self {
        let entropy = Uuid::new_v4().simple().to_string();
        let id = format!("{VOYAGE_PREFIX}{}", &entropy[..ID_ENTROPY_CHARS]);

        Self {
            branch: id.clone(),
            task_set_id: format!("{id}-tasks"),
            id,
            objective: objective.into(),
            repo: repo.into(),
            ship_count,
            created_at: Utc::now(),
        }
    }

    pub fn storage_name(&self) -> String {
        format!("{}-storage", self.id)
    }

    pub fn ship_name(&self, index: u32) -> String {
        format!("{}-ship-{index}", self.id)
    }

    /// Task set directory on the storage VM, in the agent runtime's
    /// task-list convention.
    pub fn task_dir(&self) -> String {
        format!("~/.claude/tasks/{}", self.task_set_id)
    }

    pub fn descriptor_path() -> String {
        format!("{VOYAGE_ROOT}/voyage.json")
    }

    pub fn log_path(ship_id: &str) -> String {
        format!("{VOYAGE_ROOT}/logs/{ship_id}.log")
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

impl PartialEq for Voyage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Voyage {}

impl Hash for Voyage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

fn storage_suffix(name: &str) -> bool {
    name.ends_with("-storage")
}

/// Find the storage VM for `voyage_id`, or the unique active voyage when no
/// id is given. Zero candidates is `NotFound`, more than one is
/// `AmbiguousVoyage`.
pub async fn locate_storage(
    provider: &Arc<dyn Provider>,
    voyage_id: Option<&str>,
) -> Result<VmRecord> {
    match voyage_id {
        Some(id) => {
            let storage_name = format!("{id}-storage");
            let vms = provider.list(Some(id)).await?;
            vms.into_iter()
                .find(|vm| vm.name == storage_name)
                .ok_or_else(|| ArmadaError::NotFound(format!("voyage {id}")))
        }
        None => {
            let vms = provider.list(Some(VOYAGE_PREFIX)).await?;
            let mut storages: Vec<VmRecord> =
                vms.into_iter().filter(|vm| storage_suffix(&vm.name)).collect();

            match storages.len() {
                0 => Err(ArmadaError::NotFound("no active voyage".to_string())),
                1 => Ok(storages.remove(0)),
                _ => {
                    storages.sort_by(|a, b| a.name.cmp(&b.name));
                    let ids: Vec<&str> = storages
                        .iter()
                        .filter_map(|vm| vm.name.strip_suffix("-storage"))
                        .collect();
                    Err(ArmadaError::AmbiguousVoyage(ids.join(", ")))
                }
            }
        }
    }
}

/// Load a voyage descriptor from its storage VM.
pub async fn load(
    provider: &Arc<dyn Provider>,
    remote: &Arc<dyn Remote>,
    voyage_id: Option<&str>,
) -> Result<(Voyage, VmRecord)> {
    let storage = locate_storage(provider, voyage_id).await?;
    let descriptor_path = Voyage::descriptor_path();
    let bytes = with_backoff("read voyage.json", || {
        remote.get(&storage.ssh_dest, &descriptor_path)
    })
    .await?;
    let voyage = Voyage::from_json(&String::from_utf8_lossy(&bytes))?;
    Ok((voyage, storage))
}
