use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::tasks::TaskStatus;

#[derive(Parser)]
#[command(name = "armada")]
#[command(author, version, about = "Control plane for fleets of autonomous coding agents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a new voyage from a plan directory
    Sail {
        /// Path to the plan directory (spec.md, verify.sh, voyage.json, tasks/)
        plan_dir: PathBuf,

        /// Override the plan's recommended ship count
        #[arg(short = 'n', long)]
        ships: Option<u32>,
    },

    /// Show voyage status, derived from the task list
    Status {
        /// Voyage ID (optional when exactly one voyage is active)
        voyage_id: Option<String>,
    },

    /// Show the task list
    Tasks {
        /// Voyage ID
        voyage_id: String,

        /// Filter by status
        #[arg(short, long, value_enum)]
        status: Option<StatusFilterArg>,
    },

    /// View aggregated ship logs
    Logs {
        /// Voyage ID
        voyage_id: String,

        /// Only this ship's log
        #[arg(short, long)]
        ship: Option<String>,

        /// Follow log output
        #[arg(short, long)]
        follow: bool,

        /// Filter log lines (applied on the storage VM)
        #[arg(short, long)]
        grep: Option<String>,

        /// Show only the last N lines
        #[arg(short, long)]
        tail: Option<usize>,
    },

    /// Send a task back to pending so another ship can claim it
    ResetTask {
        /// Voyage ID
        voyage_id: String,

        /// Task ID to reset
        task_id: Option<String>,

        /// Reset every stale task instead
        #[arg(long, conflicts_with = "task_id")]
        all_stale: bool,
    },

    /// Add ships to an existing voyage
    Resume {
        /// Voyage ID
        voyage_id: String,

        /// Number of ships to add
        #[arg(short = 'n', long, default_value = "1")]
        ships: u32,
    },

    /// Open an interactive shell on a ship
    Shell {
        /// Voyage ID
        voyage_id: String,

        /// Ship ID (e.g. ship-0)
        #[arg(default_value = "ship-0")]
        ship_id: String,
    },

    /// Destroy every ship but keep the storage VM
    Abandon {
        /// Voyage ID
        voyage_id: String,
    },

    /// Destroy voyage VMs
    Sink {
        /// Voyage ID
        #[arg(required_unless_present = "all")]
        voyage_id: Option<String>,

        /// Also destroy the storage VM
        #[arg(long)]
        include_storage: bool,

        /// Destroy every armada VM across all voyages
        #[arg(long, conflicts_with_all = ["voyage_id", "include_storage"])]
        all: bool,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Check prerequisites and configuration
    Doctor,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFilterArg {
    Pending,
    InProgress,
    Complete,
}

impl From<StatusFilterArg> for TaskStatus {
    fn from(arg: StatusFilterArg) -> Self {
        match arg {
            StatusFilterArg::Pending => Self::Pending,
            StatusFilterArg::InProgress => Self::InProgress,
            StatusFilterArg::Complete => Self::Complete,
        }
    }
}
