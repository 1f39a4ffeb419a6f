use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// Claim and completion metadata. Ships write these fields; unknown keys
/// from newer agent versions are preserved on round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voyage: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskMetadata {
    pub fn is_empty(&self) -> bool {
        self.assignee.is_none()
            && self.claimed_at.is_none()
            && self.completed_by.is_none()
            && self.completed_at.is_none()
            && self.voyage.is_none()
            && self.extra.is_empty()
    }
}

/// One task file in the shared task set. Edge fields keep the agent
/// runtime's camelCase wire names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default, rename = "blockedBy")]
    pub blocked_by: Vec<String>,

    #[serde(default)]
    pub blocks: Vec<String>,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "TaskMetadata::is_empty")]
    pub metadata: TaskMetadata,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// Stale means claimed long enough ago that the worker is presumed
    /// gone. A claim stamped in the future (clock skew) is never stale.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        if self.status != TaskStatus::InProgress {
            return false;
        }
        match self.metadata.claimed_at {
            Some(claimed_at) => now - claimed_at > threshold,
            None => false,
        }
    }

    /// Send the task back to the pool: pending, unassigned. Completion
    /// history stays as a record of past work.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.metadata.assignee = None;
        self.metadata.claimed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn task_json(status: &str, metadata: &str) -> String {
        format!(
            r#"{{
                "id": "task-001",
                "title": "Wire up the codec",
                "status": "{status}",
                "blockedBy": [],
                "blocks": [],
                "created": "2026-01-24T10:00:00+00:00",
                "updated": "2026-01-24T10:00:00+00:00"{metadata}
            }}"#
        )
    }

    #[test]
    fn parses_minimal_task() {
        let task: Task = serde_json::from_str(&task_json("pending", "")).unwrap();

        assert_eq!(task.id, "task-001");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.blocked_by.is_empty());
        assert!(task.metadata.is_empty());
        assert!(task.description.is_empty());
    }

    #[test]
    fn parses_claim_metadata() {
        let json = task_json(
            "in_progress",
            r#", "metadata": {"assignee": "ship-0", "claimed_at": "2026-01-24T10:30:00+00:00"}"#,
        );
        let task: Task = serde_json::from_str(&json).unwrap();

        assert_eq!(task.metadata.assignee.as_deref(), Some("ship-0"));
        assert!(task.metadata.claimed_at.is_some());
    }

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let json = r#"{
            "id": "task-002",
            "title": "Ship it",
            "status": "pending",
            "blockedBy": ["task-001"],
            "blocks": [],
            "created": "2026-01-24T10:00:00+00:00",
            "updated": "2026-01-24T10:00:00+00:00",
            "priority": "high",
            "metadata": {"assignee": "ship-1", "agent_version": "2.4"}
        }"#;

        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.extra.get("priority"), Some(&Value::from("high")));
        assert_eq!(
            task.metadata.extra.get("agent_version"),
            Some(&Value::from("2.4"))
        );

        let reserialized = serde_json::to_string(&task).unwrap();
        let reparsed: Task = serde_json::from_str(&reserialized).unwrap();
        assert_eq!(reparsed, task);
    }

    #[test]
    fn staleness_depends_on_claim_age() {
        let now = Utc::now();
        let json = task_json(
            "in_progress",
            &format!(
                r#", "metadata": {{"assignee": "ship-0", "claimed_at": "{}"}}"#,
                (now - Duration::minutes(45)).to_rfc3339()
            ),
        );
        let task: Task = serde_json::from_str(&json).unwrap();

        assert!(task.is_stale(now, Duration::minutes(30)));
        assert!(!task.is_stale(now, Duration::minutes(60)));
    }

    #[test]
    fn pending_and_complete_never_stale() {
        let now = Utc::now();
        let old = (now - Duration::hours(2)).to_rfc3339();

        let pending: Task = serde_json::from_str(&task_json("pending", "")).unwrap();
        assert!(!pending.is_stale(now, Duration::minutes(30)));

        let json = task_json(
            "complete",
            &format!(
                r#", "metadata": {{"assignee": "ship-0", "claimed_at": "{old}", "completed_by": "ship-0", "completed_at": "{old}"}}"#
            ),
        );
        let complete: Task = serde_json::from_str(&json).unwrap();
        assert!(!complete.is_stale(now, Duration::minutes(30)));
    }

    #[test]
    fn future_claim_is_not_stale() {
        let now = Utc::now();
        let json = task_json(
            "in_progress",
            &format!(
                r#", "metadata": {{"assignee": "ship-0", "claimed_at": "{}"}}"#,
                (now + Duration::minutes(10)).to_rfc3339()
            ),
        );
        let task: Task = serde_json::from_str(&json).unwrap();

        assert!(!task.is_stale(now, Duration::minutes(30)));
    }

    #[test]
    fn reset_clears_claim_keeps_history() {
        let now = Utc::now();
        let stamp = now.to_rfc3339();
        let json = task_json(
            "in_progress",
            &format!(
                r#", "metadata": {{"assignee": "ship-2", "claimed_at": "{stamp}", "completed_by": "ship-1", "completed_at": "{stamp}"}}"#
            ),
        );
        let mut task: Task = serde_json::from_str(&json).unwrap();

        task.reset();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.metadata.assignee.is_none());
        assert!(task.metadata.claimed_at.is_none());
        assert_eq!(task.metadata.completed_by.as_deref(), Some("ship-1"));
        assert!(task.metadata.completed_at.is_some());

        // Resetting again changes nothing.
        let once = task.clone();
        task.reset();
        assert_eq!(task, once);
    }
}
