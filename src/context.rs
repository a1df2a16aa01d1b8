// Run-scoped shared state threaded through the walker (§3, §9 "global mutable state").
//
// Mirrors the donor's `RuntimeContext` (`execution/context.rs`): one struct owns every
// piece of mutable state a run needs instead of passing loose maps and flags through
// every function. Unlike the donor, actions inside a `parallel: true` stage (§5) run
// concurrently, so `env` and the report tables are wrapped for shared mutation rather
// than living behind a plain `&mut self`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::model::PipelineSettings;
use crate::reporter::{Reporter, Severity};

/// The run's last overall build result (§3 BuiltIns, §4.7 step 4 gating).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildResult {
    Success,
    Failure,
}

impl BuildResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildResult::Success => "SUCCESS",
            BuildResult::Failure => "FAILURE",
        }
    }
}

/// The walker shares one code path for both modes (§4.6 entry signature).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    Check,
    Execute { dry_run: bool },
}

impl WalkMode {
    pub fn is_check(self) -> bool {
        matches!(self, WalkMode::Check)
    }

    pub fn is_dry_run(self) -> bool {
        matches!(self, WalkMode::Execute { dry_run: true })
    }
}

/// Everything an action closure needs: settings, collaborators, and the mutable
/// env/builtins/build-result the Resolver seeded and the Walker mutates in place.
/// Cheap to clone: every field is either `Arc`-wrapped shared state or a small
/// `Copy`/owned value, so a parallel stage can hand each spawned action its own
/// handle onto the same underlying env/reporter/build-result.
#[derive(Clone)]
pub struct RunContext {
    pub settings: Arc<PipelineSettings>,
    pub config: Arc<Config>,
    pub collaborators: Arc<Collaborators>,
    pub env: Arc<AsyncMutex<HashMap<String, String>>>,
    pub reporter: Arc<AsyncMutex<Reporter>>,
    pub build_result: Arc<AsyncMutex<BuildResult>>,
    /// Set by a `stop_on_fail` action; checked between stages and between sequential
    /// actions (§5 "Cancellation").
    pub aborted: Arc<AtomicBool>,
    pub abort_reason: Arc<AsyncMutex<Option<String>>>,
    /// Values merged in from a script action's as-part-of-pipeline return map (§3,
    /// §4.8 `script` Effect column), surfaced through `extras_snapshot` alongside the
    /// fixed built-in keys.
    pub extra_builtins: Arc<AsyncMutex<HashMap<String, String>>>,
    /// Name of the worker host the run is currently attached to (§6 "Node selection").
    pub current_node: String,
    /// Installation name configured for the remote-command runner (BuiltIns, §3).
    pub installation_name: String,
    pub mode: WalkMode,
}

impl RunContext {
    pub fn new(
        settings: Arc<PipelineSettings>,
        config: Arc<Config>,
        collaborators: Arc<Collaborators>,
        env: HashMap<String, String>,
        reporter: Reporter,
        current_node: String,
        installation_name: String,
        mode: WalkMode,
    ) -> Self {
        Self {
            settings,
            config,
            collaborators,
            env: Arc::new(AsyncMutex::new(env)),
            reporter: Arc::new(AsyncMutex::new(reporter)),
            build_result: Arc::new(AsyncMutex::new(BuildResult::Success)),
            aborted: Arc::new(AtomicBool::new(false)),
            abort_reason: Arc::new(AsyncMutex::new(None)),
            extra_builtins: Arc::new(AsyncMutex::new(HashMap::new())),
            current_node,
            installation_name,
            mode,
        }
    }

    pub async fn env_snapshot(&self) -> HashMap<String, String> {
        self.env.lock().await.clone()
    }

    pub async fn set_env(&self, key: impl Into<String>, value: impl Into<String>) {
        self.env.lock().await.insert(key.into(), value.into());
    }

    /// The templater's `extras` map: the string-valued subset of BuiltIns (§3, §4.5).
    /// Looked up before `env`, matching the donor's built-ins-first precedence.
    pub async fn extras_snapshot(&self) -> HashMap<String, String> {
        let reporter = self.reporter.lock().await;
        let mut extras = HashMap::new();
        extras.insert("NODE_NAME".to_string(), self.current_node.clone());
        extras.insert(
            "REMOTE_RUNNER_INSTALLATION".to_string(),
            self.installation_name.clone(),
        );
        extras.insert(
            "BUILD_RESULT".to_string(),
            self.build_result.lock().await.as_str().to_string(),
        );
        extras.insert("ACTION_REPORT".to_string(), reporter.render_action_table());
        extras.insert("STAGE_REPORT".to_string(), reporter.render_stage_table());
        extras.extend(self.extra_builtins.lock().await.clone());
        extras
    }

    /// Merges a script action's as-part-of-pipeline return map into built-ins (§3).
    /// Callers also merge the same map into `env` via `set_env` — the spec treats
    /// the return map as feeding both.
    pub async fn merge_builtins(&self, values: HashMap<String, String>) {
        self.extra_builtins.lock().await.extend(values);
    }

    pub async fn mark_failure(&self) {
        *self.build_result.lock().await = BuildResult::Failure;
    }

    pub async fn is_failure(&self) -> bool {
        *self.build_result.lock().await == BuildResult::Failure
    }

    pub async fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.aborted.store(true, Ordering::SeqCst);
        *self.abort_reason.lock().await = Some(reason.clone());
        self.reporter.lock().await.error(format!(
            "Terminating current pipeline run due to an error in {reason}"
        ));
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub async fn abort_reason(&self) -> Option<String> {
        self.abort_reason.lock().await.clone()
    }

    pub async fn log(&self, severity: Severity, message: impl Into<String>) {
        self.reporter.lock().await.log(severity, message);
    }
}
