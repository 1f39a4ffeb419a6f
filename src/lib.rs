pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod fleet;
pub mod plan;
pub mod provider;
pub mod remote;
pub mod tasks;
pub mod voyage;

pub use config::AppConfig;
pub use error::{ArmadaError, Result};
pub use fleet::{Fleet, LaunchReport, Launcher};
pub use plan::Plan;
pub use provider::{Provider, VmRecord, VmStatus};
pub use remote::{ExecOutput, LineSource, Remote};
pub use tasks::{ShipState, Task, TaskStatus, TaskStore, VoyageState, VoyageStatus, derive};
pub use voyage::Voyage;
