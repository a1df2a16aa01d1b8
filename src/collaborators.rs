// External collaborator contracts (§6, §10.4).
//
// The clone primitive, the remote-command runner, the downstream-job dispatcher, the
// artifact/stash primitives, and the messaging sinks are explicitly out of scope
// (§1) — the settings engine only needs to know their *shape*. Each contract is a
// small `async_trait`, matching the donor's `Runner`/`TaskRunner` trait-object style
// (`runners/mod.rs`) rather than a concrete implementation baked into the dispatcher.
//
// `ShellCollaborators` backs the subset that reduce to local subprocess execution
// (clone, remote-command invocation) using the same `tokio::process::Command` shape
// the donor's shell runner used. `NullCollaborators` is a no-op stub for tests and for
// dry-run, recording every call it receives instead of performing I/O.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone)]
pub struct DownstreamResult {
    pub result: String,
    pub number: u64,
    pub url: String,
}

#[async_trait]
pub trait GitClient: Send + Sync {
    async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        folder: &Path,
        credentials: Option<&str>,
    ) -> ServiceResult<()>;
}

#[async_trait]
pub trait RemoteRunner: Send + Sync {
    async fn run(
        &self,
        playbook_text: &str,
        inventory_text: &str,
        installation_name: &str,
    ) -> ServiceResult<()>;

    /// Evaluates an "as-part-of-pipeline" script and returns the map of values it
    /// produced (§3 "script actions' 'as-part-of-pipeline' return map"; §4.8's
    /// `script` Effect column). Distinct from `run` because this is the one
    /// collaborator call whose result the dispatcher must merge back into `env`
    /// and built-ins rather than just pass/fail.
    async fn run_as_part_of_pipeline(
        &self,
        script_text: &str,
        installation_name: &str,
    ) -> ServiceResult<HashMap<String, String>>;
}

#[async_trait]
pub trait DownstreamDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        name: &str,
        params: &HashMap<String, String>,
        dry_run: bool,
        propagate: bool,
        wait: bool,
    ) -> ServiceResult<DownstreamResult>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn stash(&self, name: &str, includes: &str, excludes: &str) -> ServiceResult<()>;
    async fn unstash(&self, name: &str) -> ServiceResult<()>;
    async fn publish(&self, artifacts: &str, excludes: &str) -> ServiceResult<()>;
    async fn copy_artifacts(
        &self,
        project: &str,
        build_number: &str,
        filter: &str,
    ) -> ServiceResult<()>;
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str, reply_to: Option<&str>) -> ServiceResult<()>;
    async fn send_mattermost(&self, url: &str, text: &str) -> ServiceResult<()>;
}

#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Ordered list of matching host identifiers; empty when nothing matches.
    async fn resolve(&self, name_or_label: &str, is_label: bool) -> ServiceResult<Vec<String>>;
}

/// Bundles all five collaborator roles so the dispatcher can take a single object.
pub struct Collaborators {
    pub git: Box<dyn GitClient>,
    pub remote_runner: Box<dyn RemoteRunner>,
    pub downstream: Box<dyn DownstreamDispatcher>,
    pub artifacts: Box<dyn ArtifactStore>,
    pub reports: Box<dyn ReportSink>,
    pub nodes: Box<dyn NodeRegistry>,
}

// ---------------------------------------------------------------------------
// Shell-backed implementation for the primitives that reduce to local I/O.
// ---------------------------------------------------------------------------

pub struct ShellGitClient;

#[async_trait]
impl GitClient for ShellGitClient {
    async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        folder: &Path,
        _credentials: Option<&str>,
    ) -> ServiceResult<()> {
        let status = Command::new("git")
            .args(["clone", "--branch", branch, url, &folder.to_string_lossy()])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .status()
            .await
            .map_err(|e| ServiceError::loader(format!("failed to spawn git: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(ServiceError::loader(format!(
                "git clone of {url}@{branch} exited with {status}"
            )))
        }
    }
}

pub struct ShellRemoteRunner;

#[async_trait]
impl RemoteRunner for ShellRemoteRunner {
    async fn run(
        &self,
        playbook_text: &str,
        _inventory_text: &str,
        _installation_name: &str,
    ) -> ServiceResult<()> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(playbook_text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .status()
            .await
            .map_err(|e| ServiceError::dispatch(format!("failed to spawn runner: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(ServiceError::dispatch(format!(
                "remote command exited with {status}"
            )))
        }
    }

    async fn run_as_part_of_pipeline(
        &self,
        script_text: &str,
        _installation_name: &str,
    ) -> ServiceResult<HashMap<String, String>> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(script_text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ServiceError::dispatch(format!("failed to spawn runner: {e}")))?;

        if !output.status.success() {
            return Err(ServiceError::dispatch(format!(
                "as-part-of-pipeline script exited with {}",
                output.status
            )));
        }

        Ok(parse_return_map(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parses `KEY=VALUE` lines from an as-part-of-pipeline script's stdout into the
/// return map §3/§4.8 describe. Blank lines and lines without `=` are ignored.
fn parse_return_map(stdout: &str) -> HashMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// No-op implementation, used for dry-run and for unit tests of the walker and
// dispatcher that must not touch the network or a real CI host.
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct NullCollaborators {
    pub calls: Mutex<Vec<String>>,
}

impl NullCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitClient for NullCollaborators {
    async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        _folder: &Path,
        _credentials: Option<&str>,
    ) -> ServiceResult<()> {
        self.record(format!("clone {url}@{branch}"));
        Ok(())
    }
}

#[async_trait]
impl RemoteRunner for NullCollaborators {
    async fn run(&self, playbook_text: &str, _inventory_text: &str, installation_name: &str) -> ServiceResult<()> {
        self.record(format!("run {installation_name}: {playbook_text}"));
        Ok(())
    }

    async fn run_as_part_of_pipeline(
        &self,
        script_text: &str,
        installation_name: &str,
    ) -> ServiceResult<HashMap<String, String>> {
        self.record(format!("run_as_part_of_pipeline {installation_name}: {script_text}"));
        Ok(parse_return_map(script_text))
    }
}

#[async_trait]
impl DownstreamDispatcher for NullCollaborators {
    async fn dispatch(
        &self,
        name: &str,
        _params: &HashMap<String, String>,
        _dry_run: bool,
        _propagate: bool,
        _wait: bool,
    ) -> ServiceResult<DownstreamResult> {
        self.record(format!("dispatch {name}"));
        Ok(DownstreamResult {
            result: "SUCCESS".to_string(),
            number: 1,
            url: format!("job://{name}/1"),
        })
    }
}

#[async_trait]
impl ArtifactStore for NullCollaborators {
    async fn stash(&self, name: &str, _includes: &str, _excludes: &str) -> ServiceResult<()> {
        self.record(format!("stash {name}"));
        Ok(())
    }

    async fn unstash(&self, name: &str) -> ServiceResult<()> {
        self.record(format!("unstash {name}"));
        Ok(())
    }

    async fn publish(&self, artifacts: &str, _excludes: &str) -> ServiceResult<()> {
        self.record(format!("publish {artifacts}"));
        Ok(())
    }

    async fn copy_artifacts(&self, project: &str, build_number: &str, filter: &str) -> ServiceResult<()> {
        self.record(format!("copy_artifacts {project}#{build_number} {filter}"));
        Ok(())
    }
}

#[async_trait]
impl ReportSink for NullCollaborators {
    async fn send_email(&self, to: &str, subject: &str, _body: &str, _reply_to: Option<&str>) -> ServiceResult<()> {
        self.record(format!("email {to}: {subject}"));
        Ok(())
    }

    async fn send_mattermost(&self, url: &str, text: &str) -> ServiceResult<()> {
        self.record(format!("mattermost {url}: {text}"));
        Ok(())
    }
}

#[async_trait]
impl NodeRegistry for NullCollaborators {
    async fn resolve(&self, name_or_label: &str, is_label: bool) -> ServiceResult<Vec<String>> {
        self.record(format!(
            "resolve {} ({})",
            name_or_label,
            if is_label { "label" } else { "name" }
        ));
        Ok(vec![name_or_label.to_string()])
    }
}
