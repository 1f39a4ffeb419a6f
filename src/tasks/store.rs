use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{ArmadaError, Result};
use crate::provider::VmRecord;
use crate::remote::{Remote, with_backoff};
use crate::voyage::Voyage;

use super::{Task, TaskStatus};

/// Result of enumerating a task directory. Unparseable files never abort
/// the listing; they are skipped and reported here.
#[derive(Debug, Default)]
pub struct TaskListing {
    pub tasks: Vec<Task>,
    pub skipped: Vec<String>,
}

/// Adapter over the per-voyage task files on the storage VM. The control
/// plane is a single writer relative to itself, but ship agents mutate the
/// same files at any time, so every write is whole-file with an atomic
/// rename and no read-modify-write lock is ever taken across the network.
pub struct TaskStore {
    remote: Arc<dyn Remote>,
}

impl TaskStore {
    pub fn new(remote: Arc<dyn Remote>) -> Self {
        Self { remote }
    }

    fn task_path(voyage: &Voyage, task_id: &str) -> String {
        format!("{}/{task_id}.json", voyage.task_dir())
    }

    /// Enumerate and parse every task file. An empty or missing directory
    /// is the planning-phase signal and returns an empty listing.
    pub async fn list_tasks(&self, storage: &VmRecord, voyage: &Voyage) -> Result<TaskListing> {
        let dir = voyage.task_dir();
        let command = format!("ls {dir}/*.json 2>/dev/null || true");
        let output = with_backoff("list tasks", || self.remote.run(&storage.ssh_dest, &command))
            .await?;

        let mut listing = TaskListing::default();

        for path in output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let bytes = match with_backoff("read task", || self.remote.get(&storage.ssh_dest, path))
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path, error = %e, "Skipping unreadable task file");
                    listing.skipped.push(path.to_string());
                    continue;
                }
            };

            match serde_json::from_slice::<Task>(&bytes) {
                Ok(task) => listing.tasks.push(task),
                Err(e) => {
                    warn!(path, error = %e, "Skipping unparseable task file");
                    listing.skipped.push(path.to_string());
                }
            }
        }

        debug!(
            voyage_id = %voyage.id,
            count = listing.tasks.len(),
            skipped = listing.skipped.len(),
            "Listed tasks"
        );
        Ok(listing)
    }

    pub async fn read_task(
        &self,
        storage: &VmRecord,
        voyage: &Voyage,
        task_id: &str,
    ) -> Result<Task> {
        let path = Self::task_path(voyage, task_id);
        let bytes = with_backoff("read task", || self.remote.get(&storage.ssh_dest, &path))
            .await
            .map_err(|e| match e {
                ArmadaError::NotFound(_) => {
                    ArmadaError::NotFound(format!("task {task_id} in voyage {}", voyage.id))
                }
                other => other,
            })?;

        serde_json::from_slice(&bytes).map_err(|e| ArmadaError::TaskParseError {
            path,
            detail: e.to_string(),
        })
    }

    /// Whole-file replacement with a fresh `updated` stamp. Concurrent
    /// readers see either the old or the new content, never a partial file.
    pub async fn write_task(
        &self,
        storage: &VmRecord,
        voyage: &Voyage,
        mut task: Task,
    ) -> Result<Task> {
        task.updated = Utc::now();
        let path = Self::task_path(voyage, &task.id);
        let content = serde_json::to_vec_pretty(&task)?;
        self.remote
            .put_atomic(&storage.ssh_dest, &content, &path)
            .await?;
        Ok(task)
    }

    /// Send a task back to pending, unassigned. Overwrites unconditionally;
    /// correctness rests on the staleness policy, not on coordination with
    /// the (presumed dead) claimant.
    pub async fn reset_task(
        &self,
        storage: &VmRecord,
        voyage: &Voyage,
        task_id: &str,
    ) -> Result<Task> {
        let mut task = self.read_task(storage, voyage, task_id).await?;
        if task.status == TaskStatus::Pending
            && task.metadata.assignee.is_none()
            && task.metadata.claimed_at.is_none()
        {
            // Already reset; avoid a pointless write and `updated` churn.
            return Ok(task);
        }

        task.reset();
        self.write_task(storage, voyage, task).await
    }
}
