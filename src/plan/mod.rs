//! Voyage plan directories.
//!
//! A plan is authored ahead of time: a spec document, a verify script, a
//! fleet recommendation, and one JSON file per pre-created task. Loading
//! collects every problem before failing so the operator fixes the plan in
//! one pass, with no remote side effects.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ArmadaError, Result};
use crate::tasks::{Task, TaskStatus};

pub const SPEC_FILE: &str = "spec.md";
pub const VERIFY_FILE: &str = "verify.sh";
pub const CONFIG_FILE: &str = "voyage.json";
pub const TASKS_DIR: &str = "tasks";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    pub repo: String,
    pub recommended_ships: u32,

    #[serde(default)]
    pub total_tasks: u32,

    #[serde(default)]
    pub max_parallel_width: u32,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug)]
pub struct Plan {
    pub dir: PathBuf,
    pub config: PlanConfig,
    pub spec: String,
    pub verify: String,
    pub tasks: Vec<Task>,
}

impl Plan {
    /// Load and validate a plan directory. Every problem found is reported
    /// in a single `InvalidPlan`.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(ArmadaError::InvalidPlan {
                path: dir.to_path_buf(),
                problems: vec!["not a directory".to_string()],
            });
        }

        let mut problems = Vec::new();

        let spec = read_required(dir, SPEC_FILE, &mut problems);
        let verify = read_required(dir, VERIFY_FILE, &mut problems);

        let config = match read_required(dir, CONFIG_FILE, &mut problems) {
            Some(content) => match serde_json::from_str::<PlanConfig>(&content) {
                Ok(config) => {
                    if config.repo.is_empty() {
                        problems.push(format!("{CONFIG_FILE}: repo must not be empty"));
                    }
                    if config.recommended_ships == 0 {
                        problems.push(format!("{CONFIG_FILE}: recommended_ships must be greater than 0"));
                    }
                    Some(config)
                }
                Err(e) => {
                    problems.push(format!("{CONFIG_FILE}: {e}"));
                    None
                }
            },
            None => None,
        };

        let tasks = load_tasks(dir, &mut problems);

        if !problems.is_empty() {
            return Err(ArmadaError::InvalidPlan {
                path: dir.to_path_buf(),
                problems,
            });
        }

        // All reads succeeded if problems is empty.
        let (Some(spec), Some(verify), Some(config)) = (spec, verify, config) else {
            return Err(ArmadaError::InvalidPlan {
                path: dir.to_path_buf(),
                problems: vec!["plan directory is incomplete".to_string()],
            });
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            spec,
            verify,
            tasks,
        })
    }

    /// Objective for the voyage descriptor: the `## Objective` section of
    /// the plan spec, or its first top-level heading.
    pub fn objective(&self) -> Option<String> {
        if let Some(start) = self.spec.find("## Objective") {
            let body = self.spec[start + "## Objective".len()..].trim_start();
            let section_end = body.find("\n## ").unwrap_or(body.len());
            let first_paragraph = body[..section_end]
                .split("\n\n")
                .next()
                .unwrap_or("")
                .trim();
            if !first_paragraph.is_empty() {
                let truncated: String = first_paragraph.chars().take(500).collect();
                return Some(truncated);
            }
        }

        self.spec
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map(|title| title.trim_end_matches(" Specification").trim().to_string())
    }
}

fn read_required(dir: &Path, name: &str, problems: &mut Vec<String>) -> Option<String> {
    let path = dir.join(name);
    if !path.exists() {
        problems.push(format!("missing required file: {name}"));
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => Some(content),
        Err(e) => {
            problems.push(format!("{name}: {e}"));
            None
        }
    }
}

fn load_tasks(dir: &Path, problems: &mut Vec<String>) -> Vec<Task> {
    let tasks_dir = dir.join(TASKS_DIR);
    if !tasks_dir.is_dir() {
        problems.push(format!("missing {TASKS_DIR}/ directory"));
        return Vec::new();
    }

    let mut entries: Vec<PathBuf> = match std::fs::read_dir(&tasks_dir) {
        Ok(read) => read
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(e) => {
            problems.push(format!("{TASKS_DIR}/: {e}"));
            return Vec::new();
        }
    };
    entries.sort();

    // An empty task directory is a valid plan: the voyage starts in its
    // planning phase and tasks get authored later.
    let mut tasks = Vec::new();
    for path in entries {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                problems.push(format!("{TASKS_DIR}/{name}: {e}"));
                continue;
            }
        };

        match serde_json::from_str::<Task>(&content) {
            Ok(task) => {
                if task.status != TaskStatus::Pending {
                    problems.push(format!(
                        "{TASKS_DIR}/{name}: status must be pending at publish time, got {}",
                        task.status
                    ));
                }
                tasks.push(task);
            }
            Err(e) => problems.push(format!("{TASKS_DIR}/{name}: {e}")),
        }
    }

    // Blockers must resolve within the plan itself.
    let ids: std::collections::HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for task in &tasks {
        for blocker in &task.blocked_by {
            if !ids.contains(blocker.as_str()) {
                problems.push(format!(
                    "task {} blocked_by unknown task {blocker}",
                    task.id
                ));
            }
        }
    }

    tasks
}
