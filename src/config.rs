//! Configuration loading and validation.
//!
//! Settings come from `~/.config/armada/config.toml` when present, with
//! environment variables taking precedence. Staleness and fleet-size
//! defaults are policy knobs, never hardcoded at call sites.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ArmadaError, Result};

pub const ENV_PROVIDER: &str = "ARMADA_PROVIDER";
pub const ENV_DEFAULT_SHIPS: &str = "ARMADA_DEFAULT_SHIPS";
pub const ENV_STALE_THRESHOLD: &str = "ARMADA_STALE_THRESHOLD_MINUTES";
pub const ENV_SSH_HOST: &str = "ARMADA_SSH_HOST";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// VM backend name, resolved by `provider::select`.
    pub provider: String,

    /// Fleet size when neither the plan nor `--ships` specifies one.
    pub default_ships: u32,

    /// Minutes after which an unrefreshed claim counts as stale.
    pub stale_threshold_minutes: u32,

    /// SSH destination of the hosted VM service (ssh-host backend).
    pub ssh_host: Option<String>,

    /// Upper bound for a freshly created VM to become reachable.
    pub wait_ready_secs: u64,

    /// Upper bound for a single remote command.
    pub command_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: "ssh-host".to_string(),
            default_ships: 3,
            stale_threshold_minutes: 30,
            ssh_host: None,
            wait_ready_secs: 300,
            command_timeout_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };

        if let Ok(provider) = std::env::var(ENV_PROVIDER) {
            config.provider = provider;
        }
        if let Ok(ships) = std::env::var(ENV_DEFAULT_SHIPS) {
            config.default_ships = ships
                .parse()
                .map_err(|_| ArmadaError::Config(format!("{ENV_DEFAULT_SHIPS} must be an integer, got {ships:?}")))?;
        }
        if let Ok(minutes) = std::env::var(ENV_STALE_THRESHOLD) {
            config.stale_threshold_minutes = minutes
                .parse()
                .map_err(|_| ArmadaError::Config(format!("{ENV_STALE_THRESHOLD} must be an integer, got {minutes:?}")))?;
        }
        if let Ok(host) = std::env::var(ENV_SSH_HOST) {
            config.ssh_host = Some(host);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.provider.is_empty() {
            errors.push("provider must not be empty");
        }
        if self.default_ships == 0 {
            errors.push("default_ships must be greater than 0");
        }
        if self.stale_threshold_minutes == 0 {
            errors.push("stale_threshold_minutes must be greater than 0");
        }
        if self.wait_ready_secs == 0 {
            errors.push("wait_ready_secs must be greater than 0");
        }
        if self.command_timeout_secs == 0 {
            errors.push("command_timeout_secs must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ArmadaError::Config(errors.join("; ")))
        }
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.stale_threshold_minutes))
    }

    pub fn wait_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_ready_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// `~/.config/armada`, also home to the VM-to-VM SSH keypair.
    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("armada"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }
}
