use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArmadaError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Connection to {dest} failed: {detail}")]
    Connect { dest: String, detail: String },

    #[error("Remote command failed on {dest}: {detail}")]
    Exec { dest: String, detail: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Storage provisioning failed for {voyage_id}: {detail}")]
    StorageProvisionFailed { voyage_id: String, detail: String },

    #[error("Repository seeding failed for {voyage_id}: {detail}")]
    RepoSeedFailed { voyage_id: String, detail: String },

    #[error("Provisioning failed for {ship}: {detail}")]
    ProvisionFailed { ship: String, detail: String },

    #[error("Mount failed on {ship}: {detail}")]
    MountFailed { ship: String, detail: String },

    #[error("Agent start failed on {ship}: {detail}")]
    AgentStartFailed { ship: String, detail: String },

    #[error("Multiple active voyages found, specify one of: {0}")]
    AmbiguousVoyage(String),

    #[error("Invalid plan directory {}:{}", .path.display(), format_problems(.problems))]
    InvalidPlan {
        path: PathBuf,
        problems: Vec<String>,
    },

    #[error("Task file {path} is not parseable: {detail}")]
    TaskParseError { path: String, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

fn format_problems(problems: &[String]) -> String {
    problems
        .iter()
        .map(|p| format!("\n  - {p}"))
        .collect::<String>()
}

impl ArmadaError {
    /// Exit code per the command surface: 1 invalid usage, 2 not-found or
    /// ambiguous, 3 remote failure. Partial success (4) is decided by the
    /// caller from a launch report, not from an error value.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidPlan { .. }
            | Self::TaskParseError { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_) => 1,
            Self::NotFound(_) | Self::AmbiguousVoyage(_) => 2,
            Self::ProviderUnavailable(_)
            | Self::QuotaExceeded(_)
            | Self::Connect { .. }
            | Self::Exec { .. }
            | Self::Timeout { .. }
            | Self::StorageProvisionFailed { .. }
            | Self::RepoSeedFailed { .. }
            | Self::ProvisionFailed { .. }
            | Self::MountFailed { .. }
            | Self::AgentStartFailed { .. } => 3,
        }
    }

    /// Transient transport failures, retried on idempotent operations.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }

    /// A concrete next action the operator can take, shown alongside the
    /// error message.
    pub fn next_action(&self) -> Option<&'static str> {
        match self {
            Self::StorageProvisionFailed { .. } => {
                Some("check provider credentials, then retry `armada sail`")
            }
            Self::RepoSeedFailed { .. } => Some(
                "the storage VM was kept for inspection; fix repo access, then `armada sink <voyage_id> --include-storage` and re-sail",
            ),
            Self::ProvisionFailed { .. }
            | Self::MountFailed { .. }
            | Self::AgentStartFailed { .. } => {
                Some("run `armada resume <voyage_id>` to fill the gap")
            }
            Self::AmbiguousVoyage(_) => Some("pass an explicit voyage id"),
            Self::Connect { .. } | Self::Timeout { .. } => {
                Some("check network reachability; `armada doctor` verifies prerequisites")
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArmadaError>;
