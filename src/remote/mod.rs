//! Remote execution channel to named VMs.
//!
//! Everything the control plane does on a VM goes through [`Remote`]: run a
//! command, upload or download a file, stream output, or hand the terminal
//! over entirely. The production implementation shells out to `ssh`; fleet
//! logic only sees the trait, which is what makes it testable.

mod retry;
mod ssh;

pub use retry::with_backoff;
pub use ssh::SshRemote;

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of a remote command. A non-zero exit is returned cleanly here;
/// only a failure of the channel itself becomes an error.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit == 0
    }
}

/// Pull-based line stream, used by `logs --follow`. Returns `None` at EOF.
#[async_trait]
pub trait LineSource: Send {
    async fn next_line(&mut self) -> Result<Option<String>>;
}

#[async_trait]
pub trait Remote: Send + Sync {
    /// Run a command on `dest`. Errors with `Connect` when the channel
    /// fails, `Timeout` when the per-command bound expires.
    async fn run(&self, dest: &str, command: &str) -> Result<ExecOutput>;

    /// Write `content` to `remote_path` on `dest`.
    async fn put(&self, dest: &str, content: &[u8], remote_path: &str) -> Result<()>;

    /// Read `remote_path` from `dest`. A missing file is `NotFound`.
    async fn get(&self, dest: &str, remote_path: &str) -> Result<Vec<u8>>;

    /// Run a long-lived command and stream its output line by line. No
    /// timeout applies.
    async fn stream(&self, dest: &str, command: &str) -> Result<Box<dyn LineSource>>;

    /// Replace the current process with an interactive shell on `dest`.
    /// Only returns on failure to launch.
    fn interactive(&self, dest: &str) -> Result<std::convert::Infallible>;

    /// Whole-file replacement through a temp file and an atomic rename, so
    /// concurrent readers see either the old or the new content.
    async fn put_atomic(&self, dest: &str, content: &[u8], remote_path: &str) -> Result<()> {
        let tmp_path = format!("{remote_path}.tmp");
        self.put(dest, content, &tmp_path).await?;
        let output = self.run(dest, &format!("mv {tmp_path} {remote_path}")).await?;
        if output.success() {
            Ok(())
        } else {
            Err(crate::error::ArmadaError::Exec {
                dest: dest.to_string(),
                detail: format!("atomic rename to {remote_path} failed: {}", output.stderr.trim()),
            })
        }
    }
}
