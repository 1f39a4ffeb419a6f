//! Operator-facing operations over a running fleet.
//!
//! Every operation starts from nothing but a voyage id (or the unique
//! active voyage): VM names locate storage, the task files supply state.
//! Destructive operations are idempotent; rerunning after a partial
//! failure is always safe.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::auth::{Credentials, ensure_keypair};
use crate::config::AppConfig;
use crate::error::{ArmadaError, Result};
use crate::provider::{Provider, VmRecord};
use crate::remote::{Remote, with_backoff};
use crate::tasks::{DataFault, Task, TaskStatus, TaskStore, VoyageStatus, derive, stale_tasks};
use crate::voyage::{self, VOYAGE_PREFIX, Voyage};

use super::ship::{BootstrapContext, LaunchOutcome, launch_many};

#[derive(Debug, Default, Clone)]
pub struct LogOptions {
    pub ship: Option<String>,
    pub follow: bool,
    pub grep: Option<String>,
    pub tail: Option<usize>,
}

#[derive(Debug)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn push(&mut self, name: &str, ok: bool, detail: impl Into<String>) {
        self.checks.push(DoctorCheck {
            name: name.to_string(),
            ok,
            detail: detail.into(),
        });
    }

    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }
}

/// Parse `ship-3` or `3` into a ship index.
pub fn parse_ship_index(ship_id: &str) -> Result<u32> {
    let digits = ship_id.strip_prefix("ship-").unwrap_or(ship_id);
    digits
        .parse()
        .map_err(|_| ArmadaError::NotFound(format!("ship id {ship_id:?} is not ship-<n>")))
}

fn index_from_ship_name(name: &str) -> Option<u32> {
    name.rsplit_once("-ship-")?.1.parse().ok()
}

fn index_from_ship_id(id: &str) -> Option<u32> {
    id.strip_prefix("ship-")?.parse().ok()
}

pub struct Fleet {
    provider: Arc<dyn Provider>,
    remote: Arc<dyn Remote>,
    store: TaskStore,
    config: AppConfig,
}

impl Fleet {
    pub fn new(provider: Arc<dyn Provider>, remote: Arc<dyn Remote>, config: AppConfig) -> Self {
        Self {
            store: TaskStore::new(Arc::clone(&remote)),
            provider,
            remote,
            config,
        }
    }

    async fn load_voyage(&self, voyage_id: Option<&str>) -> Result<(Voyage, VmRecord)> {
        voyage::load(&self.provider, &self.remote, voyage_id).await
    }

    /// Derive the live voyage status from the task files. Files that could
    /// not be parsed surface as data faults on the result. Ships whose VMs
    /// exist but which have not touched a task yet are merged in as
    /// `unknown`, so a freshly launched fleet is visible before first claim.
    pub async fn status(&self, voyage_id: Option<&str>) -> Result<(Voyage, VoyageStatus)> {
        let (voyage, storage) = self.load_voyage(voyage_id).await?;
        let listing = self.store.list_tasks(&storage, &voyage).await?;

        let mut status = derive(&listing.tasks, Utc::now(), self.config.stale_threshold());
        for path in listing.skipped {
            status.faults.push(DataFault {
                task_id: path,
                detail: "task file skipped: unreadable or unparseable".to_string(),
            });
        }

        // During planning there is nothing to report per ship yet; once
        // tasks exist, every live ship VM is listed even before its first
        // claim.
        if status.tasks_total > 0 {
            let vms = self.provider.list(Some(&voyage.id)).await?;
            for index in vms.iter().filter_map(|vm| index_from_ship_name(&vm.name)) {
                let ship_id = format!("ship-{index}");
                if !status.ships.iter().any(|s| s.id == ship_id) {
                    status.ships.push(crate::tasks::ShipStatus {
                        id: ship_id,
                        state: crate::tasks::ShipState::Unknown,
                        current_task: None,
                        claimed_at: None,
                        completed_count: 0,
                    });
                }
            }
            status.ships.sort_by(|a, b| a.id.cmp(&b.id));
        }

        Ok((voyage, status))
    }

    pub async fn tasks(
        &self,
        voyage_id: Option<&str>,
        filter: Option<TaskStatus>,
    ) -> Result<(Voyage, Vec<Task>)> {
        let (voyage, storage) = self.load_voyage(voyage_id).await?;
        let mut tasks = self.store.list_tasks(&storage, &voyage).await?.tasks;

        if let Some(status) = filter {
            tasks.retain(|t| t.status == status);
        }
        tasks.sort_by(|a, b| a.id.cmp(&b.id));

        Ok((voyage, tasks))
    }

    fn log_command(opts: &LogOptions) -> String {
        let pattern = match &opts.ship {
            Some(ship) => format!("{ship}.log"),
            None => "*.log".to_string(),
        };
        let path = format!("{}/logs/{pattern}", voyage::VOYAGE_ROOT);

        let mut command = if opts.follow {
            format!("tail -f {path}")
        } else if let Some(n) = opts.tail {
            format!("tail -n {n} {path}")
        } else {
            format!("cat {path}")
        };

        if let Some(grep) = &opts.grep {
            // Applied on the storage VM to keep traffic down.
            let escaped = grep.replace('\'', r"'\''");
            let buffered = if opts.follow { " --line-buffered" } else { "" };
            command = format!("{command} | grep --color=never{buffered} -E '{escaped}'");
        }

        command
    }

    /// Print logs from the storage VM. Follow mode streams until
    /// interrupted.
    pub async fn logs(&self, voyage_id: Option<&str>, opts: &LogOptions) -> Result<()> {
        let (_voyage, storage) = self.load_voyage(voyage_id).await?;
        let command = Self::log_command(opts);

        if opts.follow {
            let mut lines = self.remote.stream(&storage.ssh_dest, &command).await?;
            while let Some(line) = lines.next_line().await? {
                println!("{line}");
            }
            return Ok(());
        }

        let output = self.remote.run(&storage.ssh_dest, &command).await?;
        // grep exits 1 on no matches; that is an empty result, not a failure.
        if !output.success() && output.exit != 1 {
            return Err(ArmadaError::Exec {
                dest: storage.ssh_dest.clone(),
                detail: output.stderr.trim().to_string(),
            });
        }
        print!("{}", output.stdout);
        Ok(())
    }

    pub async fn reset_task(&self, voyage_id: Option<&str>, task_id: &str) -> Result<Task> {
        let (voyage, storage) = self.load_voyage(voyage_id).await?;
        let task = self.store.reset_task(&storage, &voyage, task_id).await?;
        info!(voyage_id = %voyage.id, task_id, "Task reset to pending");
        Ok(task)
    }

    /// Reset every stale task. Running this twice is a no-op the second
    /// time: freshly reset tasks are pending and pending is never stale.
    pub async fn reset_all_stale(&self, voyage_id: Option<&str>) -> Result<Vec<String>> {
        let (voyage, storage) = self.load_voyage(voyage_id).await?;
        let listing = self.store.list_tasks(&storage, &voyage).await?;

        let stale: Vec<String> = stale_tasks(&listing.tasks, Utc::now(), self.config.stale_threshold())
            .into_iter()
            .map(|t| t.id.clone())
            .collect();

        for task_id in &stale {
            self.store.reset_task(&storage, &voyage, task_id).await?;
        }

        info!(voyage_id = %voyage.id, count = stale.len(), "Stale tasks reset");
        Ok(stale)
    }

    /// Highest ship index ever assigned. Indices handed out at launch are
    /// consumed even when the bootstrap failed, and live VMs and task
    /// metadata extend the range, so indices stay monotonic across
    /// failures, resets, and destroyed ships.
    async fn next_ship_index(&self, voyage: &Voyage, storage: &VmRecord) -> Result<u32> {
        let vms = self.provider.list(Some(&voyage.id)).await?;
        let from_vms = vms.iter().filter_map(|vm| index_from_ship_name(&vm.name));

        let listing = self.store.list_tasks(storage, voyage).await?;
        let from_tasks = listing.tasks.iter().flat_map(|t| {
            t.metadata
                .assignee
                .as_deref()
                .and_then(index_from_ship_id)
                .into_iter()
                .chain(t.metadata.completed_by.as_deref().and_then(index_from_ship_id))
        });
        let from_launch = voyage.ship_count.checked_sub(1);

        Ok(from_vms
            .chain(from_tasks)
            .chain(from_launch)
            .max()
            .map(|max| max + 1)
            .unwrap_or(0))
    }

    /// Add ships to an existing voyage at fresh, monotonic indices.
    pub async fn resume(
        &self,
        voyage_id: Option<&str>,
        count: u32,
        credentials: &Credentials,
    ) -> Result<(Vec<u32>, LaunchOutcome)> {
        let (voyage, storage) = self.load_voyage(voyage_id).await?;
        let next = self.next_ship_index(&voyage, &storage).await?;
        let indices: Vec<u32> = (next..next + count).collect();

        info!(voyage_id = %voyage.id, ?indices, "Resuming with new ships");

        let config_dir = AppConfig::config_dir()
            .ok_or_else(|| ArmadaError::Config("HOME is not set".to_string()))?;
        let keypair = ensure_keypair(&config_dir).await?;

        let ctx = Arc::new(BootstrapContext {
            provider: Arc::clone(&self.provider),
            remote: Arc::clone(&self.remote),
            voyage,
            storage,
            keypair,
            agent_token: credentials.agent_token.clone(),
            wait_ready: self.config.wait_ready_timeout(),
        });
        let outcome = launch_many(ctx, &indices).await;
        Ok((indices, outcome))
    }

    /// Hand the terminal to a ship. Only returns on failure.
    pub async fn shell(&self, voyage_id: &str, ship_id: &str) -> Result<std::convert::Infallible> {
        let (voyage, _storage) = self.load_voyage(Some(voyage_id)).await?;
        let index = parse_ship_index(ship_id)?;
        let ship_name = voyage.ship_name(index);

        let vms = self.provider.list(Some(&voyage.id)).await?;
        let vm = vms
            .into_iter()
            .find(|vm| vm.name == ship_name)
            .ok_or_else(|| ArmadaError::NotFound(format!("ship {ship_name}")))?;

        self.remote.interactive(&vm.ssh_dest)
    }

    async fn destroy_all(&self, vms: Vec<VmRecord>) -> Result<usize> {
        let mut destroyed = 0;
        for vm in vms {
            match with_backoff("destroy", || self.provider.destroy(&vm.id)).await {
                Ok(()) => destroyed += 1,
                Err(e) => {
                    warn!(vm = %vm.name, error = %e, "Failed to destroy VM");
                    return Err(e);
                }
            }
        }
        Ok(destroyed)
    }

    /// Destroy every ship, keep storage.
    pub async fn abandon(&self, voyage_id: &str) -> Result<usize> {
        let vms = self.provider.list(Some(voyage_id)).await?;
        let ships: Vec<VmRecord> = vms
            .into_iter()
            .filter(|vm| vm.name.contains("-ship-"))
            .collect();
        self.destroy_all(ships).await
    }

    /// Destroy a voyage's ships, and its storage when asked. Finding
    /// nothing to destroy is success, which makes reruns safe.
    pub async fn sink(&self, voyage_id: &str, include_storage: bool) -> Result<usize> {
        let vms = self.provider.list(Some(voyage_id)).await?;
        let targets: Vec<VmRecord> = vms
            .into_iter()
            .filter(|vm| include_storage || vm.name.contains("-ship-"))
            .collect();
        self.destroy_all(targets).await
    }

    /// Destroy every VM the control plane has ever named.
    pub async fn sink_all(&self) -> Result<usize> {
        let vms = self.provider.list(Some(VOYAGE_PREFIX)).await?;
        self.destroy_all(vms).await
    }

    /// Prerequisite checks: local tooling, configuration, credentials, and
    /// provider reachability.
    pub async fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport::default();

        match std::process::Command::new("ssh").arg("-V").output() {
            Ok(_) => report.push("ssh", true, "found"),
            Err(e) => report.push("ssh", false, format!("not found: {e}")),
        }

        // Ship mounts depend on sshfs; a missing local binary is the
        // cheapest early warning that the images may lack it too.
        match std::process::Command::new("sshfs").arg("-V").output() {
            Ok(_) => report.push("sshfs", true, "found"),
            Err(e) => report.push("sshfs", false, format!("not found: {e}")),
        }

        match &self.config.ssh_host {
            Some(host) => report.push("ssh_host", true, host.clone()),
            None => report.push(
                "ssh_host",
                false,
                format!("set {} or ssh_host in config.toml", crate::config::ENV_SSH_HOST),
            ),
        }

        match Credentials::load() {
            Ok(creds) => {
                report.push(crate::auth::ENV_AGENT_TOKEN, true, mask(&creds.agent_token));
                match creds.git_token {
                    Some(token) => report.push(crate::auth::ENV_GIT_TOKEN, true, mask(&token)),
                    None => report.push(crate::auth::ENV_GIT_TOKEN, true, "optional, not set"),
                }
            }
            Err(e) => report.push(crate::auth::ENV_AGENT_TOKEN, false, e.to_string()),
        }

        match self.provider.list(Some(VOYAGE_PREFIX)).await {
            Ok(vms) => report.push(
                "provider",
                true,
                format!("reachable, {} voyage VM(s)", vms.len()),
            ),
            Err(e) => report.push("provider", false, e.to_string()),
        }

        report
    }
}

fn mask(secret: &str) -> String {
    if secret.len() > 15 {
        format!("{}...", &secret[..12])
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ship_index_parses_both_forms() {
        assert_eq!(parse_ship_index("ship-0").unwrap(), 0);
        assert_eq!(parse_ship_index("ship-12").unwrap(), 12);
        assert_eq!(parse_ship_index("3").unwrap(), 3);
        assert!(parse_ship_index("flagship").is_err());
    }

    #[test]
    fn ship_name_index_extraction() {
        assert_eq!(index_from_ship_name("voyage-ab12-ship-4"), Some(4));
        assert_eq!(index_from_ship_name("voyage-ab12-storage"), None);
    }

    #[test]
    fn log_command_shapes() {
        let base = LogOptions::default();
        assert_eq!(Fleet::log_command(&base), "cat /voyage/logs/*.log");

        let tail = LogOptions {
            tail: Some(100),
            ship: Some("ship-1".to_string()),
            ..LogOptions::default()
        };
        assert_eq!(Fleet::log_command(&tail), "tail -n 100 /voyage/logs/ship-1.log");

        let follow_grep = LogOptions {
            follow: true,
            grep: Some("error".to_string()),
            ..LogOptions::default()
        };
        assert_eq!(
            Fleet::log_command(&follow_grep),
            "tail -f /voyage/logs/*.log | grep --color=never --line-buffered -E 'error'"
        );
    }

    #[test]
    fn grep_pattern_single_quotes_escaped() {
        let opts = LogOptions {
            grep: Some("can't".to_string()),
            ..LogOptions::default()
        };
        assert_eq!(
            Fleet::log_command(&opts),
            r"cat /voyage/logs/*.log | grep --color=never -E 'can'\''t'"
        );
    }
}
