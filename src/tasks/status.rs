//! Pure derivation of ship and voyage state from a task set.
//!
//! Nothing here touches the network or the clock; callers pass `now` and
//! the staleness threshold in. That keeps the whole fleet-state model a
//! deterministic function of its inputs.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipState {
    Working,
    Idle,
    Stale,
    Unknown,
}

impl std::fmt::Display for ShipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Working => "working",
            Self::Idle => "idle",
            Self::Stale => "stale",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoyageState {
    Planning,
    Running,
    Stalled,
    Complete,
}

impl std::fmt::Display for VoyageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Stalled => "stalled",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipStatus {
    pub id: String,
    pub state: ShipState,
    pub current_task: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_count: usize,
}

/// An invariant violation observed in a task file. Faults are surfaced for
/// debuggability; they never abort derivation.
#[derive(Debug, Clone, Serialize)]
pub struct DataFault {
    pub task_id: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoyageStatus {
    pub state: VoyageState,
    pub ships: Vec<ShipStatus>,
    pub tasks_complete: usize,
    pub tasks_in_progress: usize,
    pub tasks_pending: usize,
    pub tasks_stale: usize,
    pub tasks_total: usize,
    pub faults: Vec<DataFault>,
}

/// A task is claimable when it is pending and every blocker is complete.
/// Restated here for completeness; ship agents apply the same predicate.
pub fn claimable(task: &Task, tasks: &[Task]) -> bool {
    if task.status != TaskStatus::Pending {
        return false;
    }
    let complete: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Complete)
        .map(|t| t.id.as_str())
        .collect();
    task.blocked_by.iter().all(|id| complete.contains(id.as_str()))
}

/// Tasks whose claim has outlived the threshold.
pub fn stale_tasks<'a>(
    tasks: &'a [Task],
    now: DateTime<Utc>,
    threshold: chrono::Duration,
) -> Vec<&'a Task> {
    tasks.iter().filter(|t| t.is_stale(now, threshold)).collect()
}

#[derive(Default)]
struct ShipAccum {
    completed_count: usize,
    // (task id, claimed_at, is_stale) for each in_progress assignment.
    claims: Vec<(String, Option<DateTime<Utc>>, bool)>,
}

/// Derive the full voyage status from a task set. Deterministic and
/// side-effect free.
pub fn derive(tasks: &[Task], now: DateTime<Utc>, threshold: chrono::Duration) -> VoyageStatus {
    if tasks.is_empty() {
        return VoyageStatus {
            state: VoyageState::Planning,
            ships: Vec::new(),
            tasks_complete: 0,
            tasks_in_progress: 0,
            tasks_pending: 0,
            tasks_stale: 0,
            tasks_total: 0,
            faults: Vec::new(),
        };
    }

    let known_ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let complete_ids: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Complete)
        .map(|t| t.id.as_str())
        .collect();

    let mut faults = Vec::new();
    // BTreeMap keeps the ship table in stable id order.
    let mut ships: BTreeMap<String, ShipAccum> = BTreeMap::new();

    let mut tasks_complete = 0;
    let mut tasks_in_progress = 0;
    let mut tasks_pending = 0;
    let mut tasks_stale = 0;
    // In-progress tasks with valid claim metadata; the stall decision is
    // made over these, since a faulted claim has no measurable age.
    let mut claimed_in_progress = 0;

    for task in tasks {
        for blocker in &task.blocked_by {
            if !known_ids.contains(blocker.as_str()) {
                faults.push(DataFault {
                    task_id: task.id.clone(),
                    detail: format!("blocked_by references unknown task {blocker}"),
                });
            }
        }

        match task.status {
            TaskStatus::Pending => tasks_pending += 1,
            TaskStatus::InProgress => {
                tasks_in_progress += 1;

                let has_claim =
                    task.metadata.assignee.is_some() && task.metadata.claimed_at.is_some();
                if !has_claim {
                    faults.push(DataFault {
                        task_id: task.id.clone(),
                        detail: "in_progress without assignee/claimed_at".to_string(),
                    });
                }

                let blocked = task
                    .blocked_by
                    .iter()
                    .any(|id| known_ids.contains(id.as_str()) && !complete_ids.contains(id.as_str()));
                if blocked {
                    faults.push(DataFault {
                        task_id: task.id.clone(),
                        detail: "in_progress while blockers are incomplete".to_string(),
                    });
                }

                // Faulted claims have no measurable age; they count as
                // neither fresh nor stale.
                let stale = has_claim && task.is_stale(now, threshold);
                if stale {
                    tasks_stale += 1;
                }
                if has_claim {
                    claimed_in_progress += 1;
                }

                if let Some(assignee) = &task.metadata.assignee {
                    ships.entry(assignee.clone()).or_default().claims.push((
                        task.id.clone(),
                        task.metadata.claimed_at,
                        stale,
                    ));
                }
            }
            TaskStatus::Complete => {
                tasks_complete += 1;

                if task.metadata.completed_by.is_none() || task.metadata.completed_at.is_none() {
                    faults.push(DataFault {
                        task_id: task.id.clone(),
                        detail: "complete without completed_by/completed_at".to_string(),
                    });
                }
                // A lingering assignee on a complete task is valid history;
                // make sure the ship is still observed.
                if let Some(assignee) = &task.metadata.assignee {
                    ships.entry(assignee.clone()).or_default();
                }
            }
        }

        if let Some(by) = &task.metadata.completed_by {
            ships.entry(by.clone()).or_default().completed_count += 1;
        }
        if task.status == TaskStatus::Pending
            && let Some(assignee) = &task.metadata.assignee
        {
            // Residue of an interrupted claim; the ship is observed but
            // this tells us nothing about what it is doing now.
            ships.entry(assignee.clone()).or_default();
        }
    }

    let ships: Vec<ShipStatus> = ships
        .into_iter()
        .map(|(id, accum)| {
            let fresh = accum.claims.iter().find(|claim| !claim.2);
            let (state, current) = if let Some(claim) = fresh {
                (ShipState::Working, Some(claim.clone()))
            } else if let Some(claim) = accum.claims.first() {
                (ShipState::Stale, Some(claim.clone()))
            } else if accum.completed_count > 0 {
                (ShipState::Idle, None)
            } else {
                (ShipState::Unknown, None)
            };

            ShipStatus {
                id,
                state,
                current_task: current.as_ref().map(|(task_id, _, _)| task_id.clone()),
                claimed_at: current.as_ref().and_then(|(_, claimed_at, _)| *claimed_at),
                completed_count: accum.completed_count,
            }
        })
        .collect();

    let state = if tasks_complete == tasks.len() {
        VoyageState::Complete
    } else if tasks_pending > 0 && claimed_in_progress > 0 && tasks_stale == claimed_in_progress {
        VoyageState::Stalled
    } else {
        VoyageState::Running
    };

    VoyageStatus {
        state,
        ships,
        tasks_complete,
        tasks_in_progress,
        tasks_pending,
        tasks_stale,
        tasks_total: tasks.len(),
        faults,
    }
}
