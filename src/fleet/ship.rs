//! Per-ship provisioning and bootstrap.
//!
//! A ship is one worker VM: it mounts the storage VM's voyage root and
//! task set, learns its own identity, installs the stop hook, and starts
//! the agent detached. Ships never talk to the control plane afterwards;
//! everything they report flows through the shared files.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::auth::SshKeypair;
use crate::error::{ArmadaError, Result};
use crate::provider::{Provider, VmRecord};
use crate::remote::Remote;
use crate::voyage::{VOYAGE_ROOT, Voyage};

const MOUNT_OPTS: &str = "reconnect,ServerAliveInterval=15,ServerAliveCountMax=3";

#[derive(Debug)]
pub struct ShipFailure {
    pub index: u32,
    pub error: ArmadaError,
}

#[derive(Debug, Default)]
pub struct LaunchOutcome {
    pub launched: Vec<u32>,
    pub failures: Vec<ShipFailure>,
}

pub struct BootstrapContext {
    pub provider: Arc<dyn Provider>,
    pub remote: Arc<dyn Remote>,
    pub voyage: Voyage,
    pub storage: VmRecord,
    pub keypair: SshKeypair,
    pub agent_token: String,
    pub wait_ready: std::time::Duration,
}

/// The ship prompt published to the voyage root; every agent starts from
/// this and coordinates through the task set alone.
pub fn render_ship_prompt(voyage: &Voyage) -> String {
    format!(
        r#"# Voyage {voyage_id}

You are one of {ship_count} autonomous agents working on `{repo}`.

## Objective

{objective}

## How to work

- The shared repository checkout is at `~/voyage/workspace`, branch `{branch}`.
- The shared task list `{task_set_id}` is mounted at `~/tasks`; your task
  tooling is already pointed at it.
- Claim one claimable task at a time (pending, all blockers complete), do
  the work, commit, mark it complete, then claim the next.
- `~/voyage/artifacts/spec.md` is the full specification.
- `~/voyage/artifacts/verify.sh` is the exit gate; a task is only complete
  when it passes.
- Append notable progress to `~/voyage/artifacts/progress.txt`.

Other agents are doing the same concurrently. Never take a task that is
already in progress; if all remaining tasks are blocked, wait and re-check.
"#,
        voyage_id = voyage.id,
        ship_count = voyage.ship_count,
        repo = voyage.repo,
        objective = voyage.objective,
        branch = voyage.branch,
        task_set_id = voyage.task_set_id,
    )
}

/// Stop hook installed on every ship. Idempotent: the commit is a no-op on
/// a clean tree and the exit line is skipped when nothing changed since the
/// last run. Task state is never touched here.
pub const STOP_HOOK: &str = r#"#!/usr/bin/env bash
set -u
cd ~/voyage/workspace 2>/dev/null || exit 0

if ! git diff --quiet || ! git diff --cached --quiet; then
  git add -A
  git commit -m "checkpoint: agent stopped with uncommitted work" >/dev/null 2>&1
fi

head=$(git rev-parse HEAD 2>/dev/null)
marker=~/.armada/last_exit_head
if [ -f "$marker" ] && [ "$(cat "$marker")" = "$head" ]; then
  exit 0
fi
echo "$head" > "$marker"

ship=$(cat ~/.armada/ship_id 2>/dev/null || echo unknown)
echo "$(date -u +%Y-%m-%dT%H:%M:%SZ) $ship agent exited" >> ~/voyage/artifacts/progress.txt
"#;

async fn checked<F>(
    remote: &Arc<dyn Remote>,
    dest: &str,
    command: &str,
    on_fail: F,
) -> Result<()>
where
    F: FnOnce(String) -> ArmadaError,
{
    let output = remote.run(dest, command).await?;
    if output.success() {
        Ok(())
    } else {
        Err(on_fail(output.stderr.trim().to_string()))
    }
}

/// Bootstrap one ship. Failures name the ship and the phase that failed so
/// the enclosing operation can report without aborting siblings.
pub async fn bootstrap_ship(ctx: &BootstrapContext, index: u32) -> Result<VmRecord> {
    let ship_id = format!("ship-{index}");
    let ship_name = ctx.voyage.ship_name(index);

    let vm = ctx
        .provider
        .create(&ship_name)
        .await
        .map_err(|e| ArmadaError::ProvisionFailed {
            ship: ship_name.clone(),
            detail: e.to_string(),
        })?;
    ctx.provider
        .wait_ready(&vm, ctx.wait_ready)
        .await
        .map_err(|e| ArmadaError::ProvisionFailed {
            ship: ship_name.clone(),
            detail: e.to_string(),
        })?;

    crate::auth::inject_keypair(&ctx.remote, &vm.ssh_dest, &ctx.keypair).await?;

    let dest = vm.ssh_dest.clone();
    let storage_dest = &ctx.storage.ssh_dest;
    let task_dir = ctx.voyage.task_dir();

    // Mount the shared voyage root and task set.
    let mount_fail = |detail: String| ArmadaError::MountFailed {
        ship: ship_name.clone(),
        detail,
    };
    checked(&ctx.remote, &dest, "mkdir -p ~/voyage ~/tasks", mount_fail).await?;
    checked(
        &ctx.remote,
        &dest,
        &format!("sshfs {storage_dest}:{VOYAGE_ROOT} ~/voyage -o {MOUNT_OPTS}"),
        |detail| ArmadaError::MountFailed {
            ship: ship_name.clone(),
            detail,
        },
    )
    .await?;
    checked(
        &ctx.remote,
        &dest,
        &format!("sshfs {storage_dest}:{task_dir} ~/tasks -o {MOUNT_OPTS}"),
        |detail| ArmadaError::MountFailed {
            ship: ship_name.clone(),
            detail,
        },
    )
    .await?;

    // Ship identity and hook directory.
    checked(&ctx.remote, &dest, "mkdir -p ~/.armada/hooks ~/.claude", |detail| {
        ArmadaError::AgentStartFailed {
            ship: ship_name.clone(),
            detail,
        }
    })
    .await?;
    ctx.remote.put(&dest, ship_id.as_bytes(), "~/.armada/ship_id").await?;
    ctx.remote
        .put(&dest, ctx.voyage.id.as_bytes(), "~/.armada/voyage_id")
        .await?;
    ctx.remote
        .put(&dest, storage_dest.as_bytes(), "~/.armada/storage_ssh")
        .await?;

    // Stop hook, copied from the artifact published by sail.
    checked(
        &ctx.remote,
        &dest,
        "cp ~/voyage/on-stop.sh ~/.armada/hooks/on-stop.sh && chmod +x ~/.armada/hooks/on-stop.sh",
        |detail| ArmadaError::AgentStartFailed {
            ship: ship_name.clone(),
            detail,
        },
    )
    .await?;

    // Point the agent runtime at the shared task set and wire the hook.
    let settings = serde_json::json!({
        "env": {
            "CLAUDE_CODE_TASK_LIST_ID": ctx.voyage.task_set_id,
            "CLAUDE_CODE_OAUTH_TOKEN": ctx.agent_token,
        },
        "hooks": {
            "Stop": [{
                "matcher": {},
                "hooks": [{"type": "command", "command": "~/.armada/hooks/on-stop.sh"}]
            }]
        }
    });
    ctx.remote
        .put(
            &dest,
            serde_json::to_string_pretty(&settings)?.as_bytes(),
            "~/.claude/settings.json",
        )
        .await?;

    // Start the agent detached; its output lands in the shared log dir.
    checked(
        &ctx.remote,
        &dest,
        &format!(
            "nohup claude --prompt-file ~/voyage/prompt.md >> ~/voyage/logs/{ship_id}.log 2>&1 & disown"
        ),
        |detail| ArmadaError::AgentStartFailed {
            ship: ship_name.clone(),
            detail,
        },
    )
    .await?;

    info!(ship = %ship_name, "Ship bootstrapped");
    Ok(vm)
}

/// Bootstrap a batch of ships in parallel, gated by a semaphore sized to
/// the batch, so the fan-out never exceeds the requested count. Per-ship
/// failures are collected, not fatal. An operator interrupt stops cleanly;
/// whatever VMs were already created stay visible to `sink`.
pub async fn launch_many(ctx: Arc<BootstrapContext>, indices: &[u32]) -> LaunchOutcome {
    let semaphore = Arc::new(Semaphore::new(indices.len().max(1)));
    let mut set = JoinSet::new();
    for &index in indices {
        let ctx = Arc::clone(&ctx);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return (
                        index,
                        Err(ArmadaError::ProvisionFailed {
                            ship: ctx.voyage.ship_name(index),
                            detail: "bootstrap pool closed".to_string(),
                        }),
                    );
                }
            };
            (index, bootstrap_ship(&ctx, index).await)
        });
    }

    let mut outcome = LaunchOutcome::default();
    loop {
        tokio::select! {
            joined = set.join_next() => match joined {
                None => break,
                Some(Ok((index, Ok(_vm)))) => outcome.launched.push(index),
                Some(Ok((index, Err(error)))) => {
                    warn!(index, error = %error, "Ship bootstrap failed");
                    outcome.failures.push(ShipFailure { index, error });
                }
                Some(Err(join_error)) => {
                    warn!(error = %join_error, "Ship bootstrap task aborted");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; abandoning in-flight ship bootstraps");
                set.shutdown().await;
                break;
            }
        }
    }

    outcome.launched.sort_unstable();
    outcome.failures.sort_by_key(|f| f.index);
    outcome
}
