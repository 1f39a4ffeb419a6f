//! The launcher: build a voyage from a plan and put the fleet to sea.
//!
//! Sail is deliberately not transactional across VMs. Storage failures
//! abort before any ship exists; later failures leave the storage VM in
//! place so the operator can inspect, resume, or sink. A visible
//! half-launched voyage beats a failed rollback across a cloud provider.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::auth::{Credentials, ensure_keypair};
use crate::config::AppConfig;
use crate::error::{ArmadaError, Result};
use crate::plan::Plan;
use crate::provider::{Provider, VmRecord};
use crate::remote::Remote;
use crate::tasks::TaskStore;
use crate::voyage::{VOYAGE_ROOT, Voyage};

use super::ship::{BootstrapContext, LaunchOutcome, launch_many, render_ship_prompt};
use super::ship::STOP_HOOK;

#[derive(Debug)]
pub struct LaunchReport {
    pub voyage: Voyage,
    pub storage: VmRecord,
    pub outcome: LaunchOutcome,
}

impl LaunchReport {
    /// Partial success: the voyage is resumable but not every requested
    /// ship made it. Maps to exit code 4.
    pub fn has_ship_failures(&self) -> bool {
        !self.outcome.failures.is_empty()
    }
}

pub struct Launcher {
    provider: Arc<dyn Provider>,
    remote: Arc<dyn Remote>,
    config: AppConfig,
}

impl Launcher {
    pub fn new(provider: Arc<dyn Provider>, remote: Arc<dyn Remote>, config: AppConfig) -> Self {
        Self {
            provider,
            remote,
            config,
        }
    }

    pub async fn sail(
        &self,
        plan: &Plan,
        ships_override: Option<u32>,
        credentials: &Credentials,
    ) -> Result<LaunchReport> {
        let objective = plan.objective().ok_or_else(|| ArmadaError::InvalidPlan {
            path: plan.dir.clone(),
            problems: vec!["could not extract an objective from spec.md".to_string()],
        })?;

        let ship_count = ships_override
            .or(Some(plan.config.recommended_ships).filter(|&n| n > 0))
            .unwrap_or(self.config.default_ships);

        let voyage = Voyage::create(objective, plan.config.repo.clone(), ship_count);
        info!(voyage_id = %voyage.id, ships = ship_count, "Launching voyage");

        let config_dir = AppConfig::config_dir()
            .ok_or_else(|| ArmadaError::Config("HOME is not set".to_string()))?;
        let keypair = ensure_keypair(&config_dir).await?;

        // Storage first; nothing else has been touched if this fails.
        let storage = self
            .provider
            .create(&voyage.storage_name())
            .await
            .map_err(|e| ArmadaError::StorageProvisionFailed {
                voyage_id: voyage.id.clone(),
                detail: e.to_string(),
            })?;
        self.provider
            .wait_ready(&storage, self.config.wait_ready_timeout())
            .await
            .map_err(|e| ArmadaError::StorageProvisionFailed {
                voyage_id: voyage.id.clone(),
                detail: e.to_string(),
            })?;

        crate::auth::inject_keypair(&self.remote, &storage.ssh_dest, &keypair).await?;
        self.init_layout(&voyage, &storage).await?;
        self.seed_repository(&voyage, &storage, credentials).await?;
        self.publish_artifacts(plan, &voyage, &storage).await?;

        let indices: Vec<u32> = (0..ship_count).collect();
        let ctx = Arc::new(BootstrapContext {
            provider: Arc::clone(&self.provider),
            remote: Arc::clone(&self.remote),
            voyage: voyage.clone(),
            storage: storage.clone(),
            keypair,
            agent_token: credentials.agent_token.clone(),
            wait_ready: self.config.wait_ready_timeout(),
        });
        let outcome = launch_many(ctx, &indices).await;

        if !outcome.failures.is_empty() {
            warn!(
                voyage_id = %voyage.id,
                failed = outcome.failures.len(),
                "Some ships failed to bootstrap; the voyage is resumable"
            );
        }

        Ok(LaunchReport {
            voyage,
            storage,
            outcome,
        })
    }

    async fn storage_run(
        &self,
        voyage: &Voyage,
        storage: &VmRecord,
        command: &str,
    ) -> Result<()> {
        let output = self.remote.run(&storage.ssh_dest, command).await?;
        if output.success() {
            Ok(())
        } else {
            Err(ArmadaError::StorageProvisionFailed {
                voyage_id: voyage.id.clone(),
                detail: format!("{command}: {}", output.stderr.trim()),
            })
        }
    }

    async fn init_layout(&self, voyage: &Voyage, storage: &VmRecord) -> Result<()> {
        self.storage_run(
            voyage,
            storage,
            &format!("mkdir -p {VOYAGE_ROOT}/workspace {VOYAGE_ROOT}/artifacts {VOYAGE_ROOT}/logs"),
        )
        .await?;
        self.storage_run(voyage, storage, &format!("mkdir -p {}", voyage.task_dir()))
            .await
    }

    async fn seed_repository(
        &self,
        voyage: &Voyage,
        storage: &VmRecord,
        credentials: &Credentials,
    ) -> Result<()> {
        let clone_url = credentials.clone_url(&voyage.repo);
        let seed = async {
            let clone = self
                .remote
                .run(
                    &storage.ssh_dest,
                    &format!("git clone {clone_url} {VOYAGE_ROOT}/workspace"),
                )
                .await?;
            if !clone.success() {
                return Err(ArmadaError::RepoSeedFailed {
                    voyage_id: voyage.id.clone(),
                    detail: format!("clone of {}: {}", voyage.repo, clone.stderr.trim()),
                });
            }

            let branch = self
                .remote
                .run(
                    &storage.ssh_dest,
                    &format!("git -C {VOYAGE_ROOT}/workspace checkout -b {}", voyage.branch),
                )
                .await?;
            if !branch.success() {
                return Err(ArmadaError::RepoSeedFailed {
                    voyage_id: voyage.id.clone(),
                    detail: format!("branch {}: {}", voyage.branch, branch.stderr.trim()),
                });
            }
            Ok(())
        };

        // The storage VM is left in place on failure, for inspection.
        seed.await
    }

    async fn publish_artifacts(
        &self,
        plan: &Plan,
        voyage: &Voyage,
        storage: &VmRecord,
    ) -> Result<()> {
        let dest = &storage.ssh_dest;

        self.remote
            .put_atomic(
                dest,
                voyage.to_json()?.as_bytes(),
                &Voyage::descriptor_path(),
            )
            .await?;
        self.remote
            .put_atomic(
                dest,
                plan.spec.as_bytes(),
                &format!("{VOYAGE_ROOT}/artifacts/spec.md"),
            )
            .await?;
        self.remote
            .put_atomic(
                dest,
                plan.verify.as_bytes(),
                &format!("{VOYAGE_ROOT}/artifacts/verify.sh"),
            )
            .await?;
        self.storage_run(
            voyage,
            storage,
            &format!("chmod +x {VOYAGE_ROOT}/artifacts/verify.sh"),
        )
        .await?;

        let launch_line = format!(
            "{} {} launched: {} ships toward {}\n",
            Utc::now().to_rfc3339(),
            voyage.id,
            voyage.ship_count,
            voyage.repo
        );
        self.remote
            .put_atomic(
                dest,
                launch_line.as_bytes(),
                &format!("{VOYAGE_ROOT}/artifacts/progress.txt"),
            )
            .await?;

        self.remote
            .put_atomic(
                dest,
                render_ship_prompt(voyage).as_bytes(),
                &format!("{VOYAGE_ROOT}/prompt.md"),
            )
            .await?;
        self.remote
            .put_atomic(
                dest,
                STOP_HOOK.as_bytes(),
                &format!("{VOYAGE_ROOT}/on-stop.sh"),
            )
            .await?;
        self.storage_run(voyage, storage, &format!("chmod +x {VOYAGE_ROOT}/on-stop.sh"))
            .await?;

        // Seed the task set, stamping each task with the voyage it now
        // belongs to. Ids and everything else are preserved verbatim.
        let store = TaskStore::new(Arc::clone(&self.remote));
        for task in &plan.tasks {
            let mut task = task.clone();
            task.metadata.voyage = Some(voyage.id.clone());
            store.write_task(storage, voyage, task).await?;
        }

        info!(
            voyage_id = %voyage.id,
            tasks = plan.tasks.len(),
            "Artifacts published"
        );
        Ok(())
    }
}
