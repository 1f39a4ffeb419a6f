//! `ssh`-backed implementation of the remote channel.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::error::{ArmadaError, Result};

use super::{ExecOutput, LineSource, Remote};

/// ssh exits 255 when the connection itself failed, as opposed to the
/// remote command failing.
const SSH_CHANNEL_FAILURE: i32 = 255;

const SSH_OPTS: &[&str] = &[
    "-o",
    "BatchMode=yes",
    "-o",
    "ConnectTimeout=10",
    "-o",
    "StrictHostKeyChecking=accept-new",
];

pub struct SshRemote {
    command_timeout: Duration,
}

impl SshRemote {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    fn base_command(dest: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(SSH_OPTS).arg(dest);
        cmd
    }

    async fn output_with_timeout(&self, dest: &str, mut cmd: Command, what: &str) -> Result<std::process::Output> {
        let fut = cmd.output();
        match tokio::time::timeout(self.command_timeout, fut).await {
            Err(_) => Err(ArmadaError::Timeout {
                operation: what.to_string(),
                seconds: self.command_timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(ArmadaError::Connect {
                dest: dest.to_string(),
                detail: e.to_string(),
            }),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

#[async_trait]
impl Remote for SshRemote {
    async fn run(&self, dest: &str, command: &str) -> Result<ExecOutput> {
        debug!(dest, command, "Running remote command");

        let mut cmd = Self::base_command(dest);
        cmd.arg(command);
        let output = self.output_with_timeout(dest, cmd, command).await?;

        let exit = output.status.code().unwrap_or(-1);
        if exit == SSH_CHANNEL_FAILURE {
            return Err(ArmadaError::Connect {
                dest: dest.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit,
        })
    }

    async fn put(&self, dest: &str, content: &[u8], remote_path: &str) -> Result<()> {
        debug!(dest, remote_path, bytes = content.len(), "Uploading file");

        let mut cmd = Self::base_command(dest);
        cmd.arg(format!("cat > {remote_path}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let upload = async {
            let mut child = cmd.spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(content).await?;
                drop(stdin);
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.command_timeout, upload).await {
            Err(_) => {
                return Err(ArmadaError::Timeout {
                    operation: format!("put {remote_path}"),
                    seconds: self.command_timeout.as_secs(),
                });
            }
            Ok(Err(e)) => {
                return Err(ArmadaError::Connect {
                    dest: dest.to_string(),
                    detail: e.to_string(),
                });
            }
            Ok(Ok(output)) => output,
        };

        let exit = output.status.code().unwrap_or(-1);
        if exit == SSH_CHANNEL_FAILURE {
            return Err(ArmadaError::Connect {
                dest: dest.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if exit != 0 {
            return Err(ArmadaError::Exec {
                dest: dest.to_string(),
                detail: format!(
                    "writing {remote_path} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(())
    }

    async fn get(&self, dest: &str, remote_path: &str) -> Result<Vec<u8>> {
        debug!(dest, remote_path, "Downloading file");

        let mut cmd = Self::base_command(dest);
        cmd.arg(format!("cat {remote_path}"));
        let output = self
            .output_with_timeout(dest, cmd, &format!("get {remote_path}"))
            .await?;

        let exit = output.status.code().unwrap_or(-1);
        if exit == SSH_CHANNEL_FAILURE {
            return Err(ArmadaError::Connect {
                dest: dest.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if exit != 0 {
            return Err(ArmadaError::NotFound(format!(
                "{remote_path} on {dest}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output.stdout)
    }

    async fn stream(&self, dest: &str, command: &str) -> Result<Box<dyn LineSource>> {
        debug!(dest, command, "Streaming remote command");

        let mut cmd = Self::base_command(dest);
        cmd.arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ArmadaError::Connect {
            dest: dest.to_string(),
            detail: e.to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ArmadaError::Connect {
            dest: dest.to_string(),
            detail: "no stdout pipe".to_string(),
        })?;

        Ok(Box::new(SshLineSource {
            lines: BufReader::new(stdout).lines(),
            _child: child,
        }))
    }

    fn interactive(&self, dest: &str) -> Result<std::convert::Infallible> {
        use std::os::unix::process::CommandExt;

        // exec never returns on success; the control plane becomes ssh.
        let err = std::process::Command::new("ssh").arg("-t").arg(dest).exec();
        Err(ArmadaError::Connect {
            dest: dest.to_string(),
            detail: err.to_string(),
        })
    }
}

struct SshLineSource {
    lines: Lines<BufReader<ChildStdout>>,
    // Kept so the ssh process is killed when the stream is dropped.
    _child: Child,
}

#[async_trait]
impl LineSource for SshLineSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}
