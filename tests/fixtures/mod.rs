//! In-memory Provider and Remote fakes for fleet tests.
//!
//! The fake remote keeps a per-destination file map and interprets the
//! handful of command shapes the control plane actually issues (ls, mv,
//! mkdir, git clone, chmod). Everything else succeeds silently, and every
//! command is recorded for assertions.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;

use armada::error::{ArmadaError, Result};
use armada::provider::{Provider, VmRecord, VmStatus};
use armada::remote::{ExecOutput, LineSource, Remote};

static TEST_HOME: Once = Once::new();

/// Point HOME at a throwaway directory holding a pre-made keypair, so no
/// test ever shells out to ssh-keygen or touches the real config dir.
pub fn init_test_home() {
    TEST_HOME.call_once(|| {
        let home = tempfile::tempdir().expect("create test home").keep();
        let key_dir = home.join(".config").join("armada");
        std::fs::create_dir_all(&key_dir).expect("create key dir");
        std::fs::write(key_dir.join("id_ed25519"), "test-private-key\n").expect("write key");
        std::fs::write(key_dir.join("id_ed25519.pub"), "ssh-ed25519 AAAA test\n")
            .expect("write pubkey");
        // Safe: called once, before any test reads HOME concurrently.
        unsafe { std::env::set_var("HOME", &home) };
    });
}

fn ok(stdout: impl Into<String>) -> ExecOutput {
    ExecOutput {
        stdout: stdout.into(),
        stderr: String::new(),
        exit: 0,
    }
}

fn failed(stderr: impl Into<String>) -> ExecOutput {
    ExecOutput {
        stdout: String::new(),
        stderr: stderr.into(),
        exit: 1,
    }
}

#[derive(Default)]
pub struct FakeRemote {
    // dest -> (path -> content)
    files: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    commands: Mutex<Vec<(String, String)>>,
    fail_when: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `needle` fail with exit 1 from now on.
    pub fn fail_commands_containing(&self, needle: &str) {
        self.fail_when.lock().unwrap().push(needle.to_string());
    }

    pub fn commands_for(&self, dest: &str) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == dest)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn file(&self, dest: &str, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(dest)
            .and_then(|fs| fs.get(path))
            .cloned()
    }

    pub fn file_names(&self, dest: &str) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .get(dest)
            .map(|fs| fs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn write_file(&self, dest: &str, path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .entry(dest.to_string())
            .or_default()
            .insert(path.to_string(), content.to_vec());
    }

    pub fn remove_file(&self, dest: &str, path: &str) {
        if let Some(fs) = self.files.lock().unwrap().get_mut(dest) {
            fs.remove(path);
        }
    }

    fn glob_json(&self, dest: &str, pattern: &str) -> String {
        let Some(dir) = pattern.strip_suffix("/*.json") else {
            return String::new();
        };
        let prefix = format!("{dir}/");
        self.files
            .lock()
            .unwrap()
            .get(dest)
            .map(|fs| {
                fs.keys()
                    .filter(|k| k.starts_with(&prefix) && k.ends_with(".json"))
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Remote for FakeRemote {
    async fn run(&self, dest: &str, command: &str) -> Result<ExecOutput> {
        self.commands
            .lock()
            .unwrap()
            .push((dest.to_string(), command.to_string()));

        for needle in self.fail_when.lock().unwrap().iter() {
            if command.contains(needle.as_str()) {
                return Ok(failed(format!("injected failure for {needle}")));
            }
        }

        if let Some(rest) = command.strip_prefix("ls ") {
            let pattern = rest.split_whitespace().next().unwrap_or("");
            return Ok(ok(self.glob_json(dest, pattern)));
        }

        if let Some(rest) = command.strip_prefix("mv ") {
            let mut parts = rest.split_whitespace();
            let (Some(from), Some(to)) = (parts.next(), parts.next()) else {
                return Ok(failed("mv: bad arguments"));
            };
            let mut files = self.files.lock().unwrap();
            let fs = files.entry(dest.to_string()).or_default();
            return match fs.remove(from) {
                Some(content) => {
                    fs.insert(to.to_string(), content);
                    Ok(ok(""))
                }
                None => Ok(failed(format!("mv: {from}: No such file"))),
            };
        }

        if command.contains("git clone") {
            // Leave a marker so tests can assert the workspace was seeded.
            self.write_file(dest, "/voyage/workspace/.git/HEAD", b"ref: refs/heads/main\n");
            return Ok(ok(""));
        }

        Ok(ok(""))
    }

    async fn put(&self, dest: &str, content: &[u8], remote_path: &str) -> Result<()> {
        self.write_file(dest, remote_path, content);
        Ok(())
    }

    async fn get(&self, dest: &str, remote_path: &str) -> Result<Vec<u8>> {
        self.file(dest, remote_path)
            .ok_or_else(|| ArmadaError::NotFound(format!("{remote_path} on {dest}")))
    }

    async fn stream(&self, dest: &str, command: &str) -> Result<Box<dyn LineSource>> {
        // Serve the target file's current content, then EOF.
        let path = command
            .split_whitespace()
            .find(|tok| tok.starts_with('/'))
            .unwrap_or("");
        let content = self.file(dest, path).unwrap_or_default();
        let lines: Vec<String> = String::from_utf8_lossy(&content)
            .lines()
            .map(String::from)
            .collect();
        Ok(Box::new(FakeLineSource { lines, next: 0 }))
    }

    fn interactive(&self, dest: &str) -> Result<std::convert::Infallible> {
        Err(ArmadaError::Exec {
            dest: dest.to_string(),
            detail: "interactive shells are not available in tests".to_string(),
        })
    }
}

struct FakeLineSource {
    lines: Vec<String>,
    next: usize,
}

#[async_trait]
impl LineSource for FakeLineSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        let line = self.lines.get(self.next).cloned();
        self.next += 1;
        Ok(line)
    }
}

#[derive(Default)]
pub struct FakeProvider {
    vms: Mutex<BTreeMap<String, VmRecord>>,
    fail_names: Mutex<HashSet<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// `create` fails for VM names containing `needle`. Voyage ids carry
    /// fresh entropy, so tests match on the stable suffix (`-storage`,
    /// `-ship-2`).
    pub fn fail_create(&self, needle: &str) {
        self.fail_names.lock().unwrap().insert(needle.to_string());
    }

    pub fn vm_names(&self) -> Vec<String> {
        self.vms.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn create(&self, name: &str) -> Result<VmRecord> {
        let blocked = self
            .fail_names
            .lock()
            .unwrap()
            .iter()
            .any(|needle| name.contains(needle.as_str()));
        if blocked {
            return Err(ArmadaError::ProviderUnavailable(format!(
                "injected create failure for {name}"
            )));
        }

        let vm = VmRecord {
            id: name.to_string(),
            name: name.to_string(),
            ssh_dest: format!("test@{name}"),
            status: VmStatus::Running,
        };
        self.vms.lock().unwrap().insert(name.to_string(), vm.clone());
        Ok(vm)
    }

    async fn destroy(&self, vm_id: &str) -> Result<()> {
        self.vms.lock().unwrap().remove(vm_id);
        Ok(())
    }

    async fn get(&self, vm_id: &str) -> Result<Option<VmRecord>> {
        Ok(self.vms.lock().unwrap().get(vm_id).cloned())
    }

    async fn list(&self, name_prefix: Option<&str>) -> Result<Vec<VmRecord>> {
        let vms = self.vms.lock().unwrap();
        Ok(vms
            .values()
            .filter(|vm| name_prefix.is_none_or(|p| vm.name.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn wait_ready(&self, _vm: &VmRecord, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// Write a minimal valid plan directory and return its path.
pub fn write_plan(dir: &std::path::Path, repo: &str, ships: u32, tasks: &[(&str, &str, &[&str])]) {
    std::fs::write(
        dir.join("spec.md"),
        "# Widget Gateway\n\n## Objective\n\nBuild the widget gateway end to end.\n",
    )
    .expect("write spec");
    std::fs::write(dir.join("verify.sh"), "#!/bin/sh\nexit 0\n").expect("write verify");
    std::fs::write(
        dir.join("voyage.json"),
        format!(
            r#"{{"repo": "{repo}", "recommended_ships": {ships}, "total_tasks": {}, "max_parallel_width": 2}}"#,
            tasks.len()
        ),
    )
    .expect("write voyage.json");

    let tasks_dir = dir.join("tasks");
    std::fs::create_dir_all(&tasks_dir).expect("create tasks dir");
    for (id, title, blocked_by) in tasks {
        let blockers: Vec<String> = blocked_by.iter().map(|b| format!("\"{b}\"")).collect();
        std::fs::write(
            tasks_dir.join(format!("{id}.json")),
            format!(
                r#"{{
  "id": "{id}",
  "title": "{title}",
  "description": "",
  "status": "pending",
  "blockedBy": [{}],
  "blocks": [],
  "created": "2026-01-24T10:00:00+00:00",
  "updated": "2026-01-24T10:00:00+00:00"
}}"#,
                blockers.join(", ")
            ),
        )
        .expect("write task");
    }
}

/// Path of a task file as the control plane addresses it on the storage VM.
pub fn task_path(task_set_id: &str, task_id: &str) -> String {
    format!("~/.claude/tasks/{task_set_id}/{task_id}.json")
}

pub fn plan_tempdir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create plan dir");
    let path = dir.path().to_path_buf();
    (dir, path)
}
