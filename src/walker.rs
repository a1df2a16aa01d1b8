// Stage/Action Walker and Action Processor (§4.6, §4.7).
//
// Iterates `stages[*].actions[*]` sequentially or (per stage) concurrently, sharing
// one code path between the check pass and the execute pass (§4.6 entry signature).
// Mirrors the donor's `PipelineExecutor::execute_stage`/`execute_job`
// (`execution/executor.rs`): a sequential outer loop over stages, an inner loop (or
// task group) over the stage's actions, and one report row appended per unit of work.

use std::collections::HashMap;

use tokio::task::JoinSet;

use crate::coerce::{coerce_to_bool, coerce_to_string};
use crate::context::RunContext;
use crate::dispatcher::dispatch;
use crate::error::ServiceResult;
use crate::model::{Action, NodeSpec, Stage};
use crate::reporter::Severity;
use crate::templater::expand;
use crate::validator::Diagnostic;

/// `walk(settings, env, check, execute) -> (builtins, ok, env')` from §4.6. `env` and
/// `builtins` live inside `ctx` already (§9: model shared state as a context object,
/// not process globals); this returns only the aggregate pass/fail.
pub async fn walk(ctx: &RunContext) -> ServiceResult<bool> {
    let settings = ctx.settings.clone();

    if settings.stages.is_empty() {
        ctx.log(Severity::Debug, "No stages to execute in pipeline config.").await;
        return Ok(true);
    }

    let mut ok = true;

    for stage in &settings.stages {
        if ctx.is_aborted() {
            break;
        }

        let stage_ok = run_stage(stage, ctx).await;
        ok = ok && stage_ok;

        if ctx.is_aborted() {
            break;
        }
    }

    if let Some(reason) = ctx.abort_reason().await {
        return Err(crate::error::ServiceError::Aborted(reason));
    }

    Ok(ok)
}

async fn run_stage(stage: &Stage, ctx: &RunContext) -> bool {
    let env = ctx.env_snapshot().await;
    let extras = ctx.extras_snapshot().await;
    let name_expansion = expand(&stage.name, &env, &extras);
    let stage_name = name_expansion.expanded;

    if !name_expansion.ok {
        for d in &name_expansion.diagnostics {
            ctx.log(Severity::Error, format!("stage name: {d}")).await;
        }
    }

    if stage.actions.is_empty() {
        ctx.log(Severity::Error, format!("stage '{stage_name}' has no actions")).await;
        ctx.reporter
            .lock()
            .await
            .stage_row(stage_name.as_str(), false, "0 action(s)");
        return false;
    }

    let parallel = match stage.parallel.as_ref() {
        None => false,
        Some(v) => match coerce_to_bool(v) {
            Some(b) => b,
            None => {
                ctx.log(
                    Severity::Error,
                    format!("stage '{stage_name}': 'parallel' is not boolean-convertible"),
                )
                .await;
                false
            }
        },
    };

    let passes = if parallel {
        run_actions_parallel(&stage_name, stage, ctx).await
    } else {
        run_actions_sequential(&stage_name, stage, ctx).await
    };

    let stage_ok = passes.iter().all(|p| *p);
    let description = if parallel {
        format!("{} action(s) in parallel", stage.actions.len())
    } else {
        format!("{} action(s)", stage.actions.len())
    };
    ctx.reporter.lock().await.stage_row(stage_name.as_str(), stage_ok, description);

    stage_ok
}

async fn run_actions_sequential(stage_name: &str, stage: &Stage, ctx: &RunContext) -> Vec<bool> {
    let mut passes = Vec::with_capacity(stage.actions.len());
    for (index, action) in stage.actions.iter().enumerate() {
        if ctx.is_aborted() {
            break;
        }
        let passed = run_action(stage_name, index, action, ctx).await;
        passes.push(passed);
        if ctx.is_aborted() {
            break;
        }
    }
    passes
}

async fn run_actions_parallel(stage_name: &str, stage: &Stage, ctx: &RunContext) -> Vec<bool> {
    let mut set = JoinSet::new();
    for (index, action) in stage.actions.iter().cloned().enumerate() {
        let ctx = ctx.clone();
        let stage_name = stage_name.to_string();
        set.spawn(async move { run_action(&stage_name, index, &action, &ctx).await });
    }

    let mut passes = Vec::with_capacity(stage.actions.len());
    while let Some(result) = set.join_next().await {
        passes.push(result.unwrap_or(false));
    }
    passes
}

/// The Action Processor (§4.7), steps 1-9.
async fn run_action(stage_name: &str, index: usize, action: &Action, ctx: &RunContext) -> bool {
    let mut diagnostics = Vec::new();

    // Step 1: structural validation.
    let string_fields: [(&str, Option<&serde_yaml::Value>); 6] = [
        ("before_message", action.before_message.as_ref()),
        ("after_message", action.after_message.as_ref()),
        ("fail_message", action.fail_message.as_ref()),
        ("success_message", action.success_message.as_ref()),
        ("dir", action.dir.as_ref()),
        ("build_name", action.build_name.as_ref()),
    ];
    let mut raw_strings: HashMap<&str, String> = HashMap::new();
    for (key, value) in string_fields {
        if let Some(v) = value {
            match coerce_to_string(v) {
                Some(s) => {
                    raw_strings.insert(key, s);
                }
                None => diagnostics.push(Diagnostic::error(format!("'{key}' is not string-convertible"))),
            }
        }
    }

    let bool_fields: [(&str, Option<&serde_yaml::Value>); 4] = [
        ("ignore_fail", action.ignore_fail.as_ref()),
        ("stop_on_fail", action.stop_on_fail.as_ref()),
        ("success_only", action.success_only.as_ref()),
        ("fail_only", action.fail_only.as_ref()),
    ];
    let mut bools: HashMap<&str, bool> = HashMap::new();
    for (key, value) in bool_fields {
        if let Some(v) = value {
            match coerce_to_bool(v) {
                Some(b) => {
                    bools.insert(key, b);
                }
                None => diagnostics.push(Diagnostic::error(format!("'{key}' is not boolean-convertible"))),
            }
        }
    }

    if action.success_only.is_some() && action.fail_only.is_some() {
        diagnostics.push(Diagnostic::error(
            "'success_only' and 'fail_only' are mutually exclusive",
        ));
    }

    // Step 2: templating of the generic keys plus `action`.
    let env = ctx.env_snapshot().await;
    let extras = ctx.extras_snapshot().await;
    let mut templated: HashMap<&str, String> = HashMap::new();
    for (key, value) in &raw_strings {
        let result = expand(value, &env, &extras);
        if !result.ok {
            for d in result.diagnostics {
                diagnostics.push(Diagnostic::error(format!("'{key}': {d}")));
            }
        }
        templated.insert(*key, result.expanded);
    }
    let action_name_expansion = expand(&action.action, &env, &extras);
    if !action_name_expansion.ok {
        for d in &action_name_expansion.diagnostics {
            diagnostics.push(Diagnostic::error(format!("'action': {d}")));
        }
    }
    let action_name = action_name_expansion.expanded;

    // Step 3: node resolution.
    let node_outcome = resolve_node(action.node.as_ref(), ctx, &env, &extras).await;
    diagnostics.extend(node_outcome.diagnostics);

    let had_structural_error = diagnostics.iter().any(|d| d.severity == Severity::Error);

    if ctx.mode.is_check() {
        let link = ctx.settings.actions.get(&action_name).cloned();
        let dispatch_ok = match link {
            Some(link) => {
                let outcome = dispatch(&link, ctx).await;
                diagnostics.extend(outcome.diagnostics);
                outcome.ok
            }
            None => {
                diagnostics.push(Diagnostic::error(format!(
                    "action link '{action_name}' not found in settings.actions"
                )));
                false
            }
        };
        let passed = !had_structural_error && dispatch_ok;
        for d in &diagnostics {
            ctx.log(d.severity, d.message.clone()).await;
        }
        record(ctx, stage_name, index, &action_name, passed, &diagnostics).await;
        return passed;
    }

    if had_structural_error || node_outcome.skip {
        for d in &diagnostics {
            ctx.log(d.severity, d.message.clone()).await;
        }
        let passed = !had_structural_error && node_outcome.skip_is_pass;
        record(ctx, stage_name, index, &action_name, passed, &diagnostics).await;
        return passed;
    }

    // Step 4: conditional gating.
    let success_only = bools.get("success_only").copied().unwrap_or(false);
    let fail_only = bools.get("fail_only").copied().unwrap_or(false);
    let is_failure = ctx.is_failure().await;
    if (success_only && is_failure) || (fail_only && !is_failure) {
        ctx.log(
            Severity::Debug,
            format!("skipping action '{action_name}' in stage '{stage_name}' due to gating"),
        )
        .await;
        record(ctx, stage_name, index, &action_name, true, &diagnostics).await;
        return true;
    }

    // Step 5: execution scope (dir, build_name, node re-dispatch).
    let prior_dir = templated.get("dir").cloned();
    let _restore_dir_guard = prior_dir.as_ref().map(|dir| ScopedDir::enter(dir));

    if let Some(build_name) = templated.get("build_name") {
        ctx.log(Severity::Debug, format!("renaming build to '{build_name}'")).await;
    }
    if let Some(node_name) = &node_outcome.resolved_node {
        if node_name != &ctx.current_node {
            ctx.log(
                Severity::Debug,
                format!("re-dispatching action '{action_name}' onto node '{node_name}' (host allocation is out of scope)"),
            )
            .await;
        }
    }

    if let Some(before) = templated.get("before_message") {
        ctx.log(Severity::Debug, before.clone()).await;
    }

    // Step 6: dispatch.
    let link = ctx.settings.actions.get(&action_name).cloned();
    let (raw_pass, extra_diagnostics, description) = match link {
        Some(link) => {
            let outcome = dispatch(&link, ctx).await;
            (
                outcome.ok,
                outcome.diagnostics,
                format!("{action_name}: {}", outcome.discriminator),
            )
        }
        None => (
            false,
            vec![Diagnostic::error(format!(
                "action link '{action_name}' not found in settings.actions"
            ))],
            action_name.clone(),
        ),
    };
    diagnostics.extend(extra_diagnostics);

    // Step 7: post-messages.
    if let Some(after) = templated.get("after_message") {
        ctx.log(Severity::Debug, after.clone()).await;
    }
    if raw_pass {
        if let Some(msg) = templated.get("success_message") {
            ctx.log(Severity::Debug, msg.clone()).await;
        }
    } else {
        if let Some(msg) = templated.get("fail_message") {
            ctx.log(Severity::Warning, msg.clone()).await;
        }
        ctx.mark_failure().await;
    }

    // Step 8: failure handling.
    let stop_on_fail = bools.get("stop_on_fail").copied().unwrap_or(false);
    let ignore_fail = bools.get("ignore_fail").copied().unwrap_or(false);

    if !raw_pass && stop_on_fail {
        ctx.abort(format!("{stage_name}[{index}] ({action_name})")).await;
    }

    let reported_pass = if !raw_pass && ignore_fail { true } else { raw_pass };

    for d in &diagnostics {
        ctx.log(d.severity, d.message.clone()).await;
    }

    // Step 9: report.
    record(ctx, stage_name, index, &description, reported_pass, &[]).await;

    reported_pass
}

async fn record(ctx: &RunContext, stage_name: &str, index: usize, description: &str, passed: bool, _diagnostics: &[Diagnostic]) {
    ctx.reporter.lock().await.action_row(stage_name, index, passed, description);
}

struct NodeOutcome {
    resolved_node: Option<String>,
    skip: bool,
    skip_is_pass: bool,
    diagnostics: Vec<Diagnostic>,
}

/// Step 3: canonicalize and resolve a `node` spec (§3 NodeSpec, §4.7 step 3, §8
/// scenario 5: no match skips the action with an error row). `pattern:true` vs
/// `false` both go through the node registry; the registry decides whether the
/// request is matched literally or as a glob (§9 open question (a): first match wins
/// either way).
async fn resolve_node(
    node: Option<&NodeSpec>,
    ctx: &RunContext,
    env: &HashMap<String, String>,
    extras: &HashMap<String, String>,
) -> NodeOutcome {
    let mut diagnostics = Vec::new();

    let (name_or_label, is_label) = match node {
        None | Some(NodeSpec::Any(None)) => {
            return NodeOutcome {
                resolved_node: None,
                skip: false,
                skip_is_pass: true,
                diagnostics,
            }
        }
        Some(NodeSpec::Name(n)) => {
            let expanded = expand(n, env, extras);
            if !expanded.ok {
                for d in &expanded.diagnostics {
                    diagnostics.push(Diagnostic::error(format!("node: {d}")));
                }
            }
            (expanded.expanded, false)
        }
        Some(NodeSpec::Spec { name, label, pattern }) => {
            if name.is_some() && label.is_some() {
                diagnostics.push(Diagnostic::warning("node spec supplies both 'name' and 'label'"));
            }
            let _pattern_ok = match pattern {
                Some(v) => coerce_to_bool(v).is_some(),
                None => true,
            };
            if pattern.is_some() && !_pattern_ok {
                diagnostics.push(Diagnostic::error("node.pattern is not boolean-convertible"));
            }
            match name.as_ref().or(label.as_ref()) {
                Some(value) => {
                    let expanded = expand(value, env, extras);
                    if !expanded.ok {
                        for d in &expanded.diagnostics {
                            diagnostics.push(Diagnostic::error(format!("node: {d}")));
                        }
                    }
                    (expanded.expanded, label.is_some())
                }
                None => {
                    diagnostics.push(Diagnostic::error("node spec has neither 'name' nor 'label'"));
                    return NodeOutcome {
                        resolved_node: None,
                        skip: true,
                        skip_is_pass: false,
                        diagnostics,
                    };
                }
            }
        }
    };

    match ctx.collaborators.nodes.resolve(&name_or_label, is_label).await {
        Ok(hosts) if !hosts.is_empty() => NodeOutcome {
            resolved_node: Some(hosts[0].clone()),
            skip: false,
            skip_is_pass: true,
            diagnostics,
        },
        Ok(_) => {
            diagnostics.push(Diagnostic::error(format!(
                "no node matched '{name_or_label}'"
            )));
            NodeOutcome {
                resolved_node: None,
                skip: true,
                skip_is_pass: false,
                diagnostics,
            }
        }
        Err(e) => {
            diagnostics.push(Diagnostic::error(format!("node registry error: {e}")));
            NodeOutcome {
                resolved_node: None,
                skip: true,
                skip_is_pass: false,
                diagnostics,
            }
        }
    }
}

/// RAII working-directory switch for the duration of one action (§4.7 step 5, §5
/// "Shared resources": a process-global cwd change, safe only because colliding
/// parallel `dir` actions are a user responsibility, not a core invariant).
struct ScopedDir {
    previous: std::path::PathBuf,
}

impl ScopedDir {
    fn enter(dir: &str) -> Option<Self> {
        let previous = std::env::current_dir().ok()?;
        if std::env::set_current_dir(dir).is_err() {
            return None;
        }
        Some(Self { previous })
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Collaborators, NullCollaborators};
    use crate::config::Config;
    use crate::context::WalkMode;
    use crate::model::{ActionLink, PipelineSettings};
    use crate::reporter::{report_channel, Reporter};
    use serde_yaml::Value as YamlValue;
    use std::sync::Arc;

    fn ctx_with_settings(settings: PipelineSettings, mode: WalkMode) -> RunContext {
        let collaborators = Collaborators {
            git: Box::new(NullCollaborators::new()),
            remote_runner: Box::new(NullCollaborators::new()),
            downstream: Box::new(NullCollaborators::new()),
            artifacts: Box::new(NullCollaborators::new()),
            reports: Box::new(NullCollaborators::new()),
            nodes: Box::new(NullCollaborators::new()),
        };
        let (tx, _rx) = report_channel();
        RunContext::new(
            Arc::new(settings),
            Arc::new(Config::default()),
            Arc::new(collaborators),
            HashMap::new(),
            Reporter::new(tx, false),
            "any".to_string(),
            "ansible210".to_string(),
            mode,
        )
    }

    fn settings_with_two_sequential_actions() -> PipelineSettings {
        let mut actions: HashMap<String, ActionLink> = HashMap::new();
        actions.insert(
            "a1".to_string(),
            [("repo_url".to_string(), YamlValue::String("https://example/x".to_string()))].into(),
        );
        actions.insert(
            "a2".to_string(),
            [("artifacts".to_string(), YamlValue::String("*.log".to_string()))].into(),
        );

        let mut settings = PipelineSettings::default();
        settings.actions = actions;
        settings.stages = vec![Stage {
            name: "build".to_string(),
            parallel: None,
            actions: vec![
                Action {
                    action: "a1".to_string(),
                    node: None,
                    dir: None,
                    build_name: None,
                    before_message: None,
                    after_message: None,
                    success_message: None,
                    fail_message: None,
                    ignore_fail: None,
                    stop_on_fail: None,
                    success_only: None,
                    fail_only: None,
                },
                Action {
                    action: "a2".to_string(),
                    node: None,
                    dir: None,
                    build_name: None,
                    before_message: None,
                    after_message: None,
                    success_message: None,
                    fail_message: None,
                    ignore_fail: None,
                    stop_on_fail: None,
                    success_only: None,
                    fail_only: None,
                },
            ],
        }];
        settings
    }

    #[tokio::test]
    async fn scenario_two_sequential_actions_produce_two_passing_rows_in_order() {
        let settings = settings_with_two_sequential_actions();
        let ctx = ctx_with_settings(settings, WalkMode::Execute { dry_run: false });

        let ok = walk(&ctx).await.unwrap();
        assert!(ok);

        let reporter = ctx.reporter.lock().await;
        let rows = reporter.action_table();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].1, 0);
        assert_eq!(rows[1].1, 1);
        assert!(rows[0].2 && rows[1].2);
    }

    #[tokio::test]
    async fn parallel_stage_produces_the_same_row_set_as_sequential_modulo_order() {
        let mut settings = settings_with_two_sequential_actions();
        settings.stages[0].parallel = Some(YamlValue::Bool(true));
        let ctx = ctx_with_settings(settings, WalkMode::Execute { dry_run: false });

        let ok = walk(&ctx).await.unwrap();
        assert!(ok);

        let reporter = ctx.reporter.lock().await;
        let mut descriptions: Vec<_> = reporter.action_table().iter().map(|r| r.3.clone()).collect();
        descriptions.sort();
        assert_eq!(descriptions, vec!["a1: repo_url".to_string(), "a2: artifacts".to_string()]);
    }

    #[tokio::test]
    async fn empty_stages_with_debug_mode_succeeds_with_no_actions() {
        let ctx = ctx_with_settings(PipelineSettings::default(), WalkMode::Execute { dry_run: false });
        let ok = walk(&ctx).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn stop_on_fail_aborts_before_the_next_action_runs() {
        let mut actions: HashMap<String, ActionLink> = HashMap::new();
        actions.insert("missing".to_string(), HashMap::new());
        actions.insert(
            "a2".to_string(),
            [("artifacts".to_string(), YamlValue::String("*.log".to_string()))].into(),
        );

        let mut settings = PipelineSettings::default();
        settings.actions = actions;
        settings.stages = vec![Stage {
            name: "build".to_string(),
            parallel: None,
            actions: vec![
                Action {
                    action: "missing".to_string(),
                    node: None,
                    dir: None,
                    build_name: None,
                    before_message: None,
                    after_message: None,
                    success_message: None,
                    fail_message: None,
                    ignore_fail: None,
                    stop_on_fail: Some(YamlValue::Bool(true)),
                    success_only: None,
                    fail_only: None,
                },
                Action {
                    action: "a2".to_string(),
                    node: None,
                    dir: None,
                    build_name: None,
                    before_message: None,
                    after_message: None,
                    success_message: None,
                    fail_message: None,
                    ignore_fail: None,
                    stop_on_fail: None,
                    success_only: None,
                    fail_only: None,
                },
            ],
        }];

        let ctx = ctx_with_settings(settings, WalkMode::Execute { dry_run: false });
        let result = walk(&ctx).await;
        assert!(result.is_err());

        let reporter = ctx.reporter.lock().await;
        assert_eq!(reporter.action_table().len(), 1);
    }
}
