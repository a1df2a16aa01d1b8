// Crate root: module wiring plus the top-level run loop that threads the seven
// components together (§2 "Data flows downward"). Mirrors the donor's top-level
// `lib.rs` (`pub mod` list + a single `run`-style entry point) rather than exposing
// each module's internals as the crate's only surface.

pub mod coerce;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod injector;
pub mod loader;
pub mod model;
pub mod reporter;
pub mod resolver;
pub mod templater;
pub mod utils;
pub mod validator;
pub mod walker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_yaml::Value as YamlValue;

use crate::coerce::{coerce_to_bool, StringOrList};
use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::context::{RunContext, WalkMode};
use crate::error::{ServiceError, ServiceResult};
use crate::model::{OnEmpty, Param, ParamType, PipelineSettings};
use crate::reporter::{report_channel, ReportReceiver, Reporter};
use crate::validator::{apply_inferred_types, validate_schema};

/// The run's terminal state (§6 "Exit behavior").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    ParametersUpdated,
    DryRunCompleted,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: ExitState,
    pub message: Option<String>,
}

/// Everything `run_pipeline` needs beyond the ambient `Config`/`Collaborators` pair:
/// the already-loaded settings document (or enough to load one), the build's current
/// parameter values, and the host process environment.
pub struct RunRequest {
    pub job_name: String,
    pub settings: Option<PipelineSettings>,
    pub current_params: HashMap<String, String>,
    pub host_env: HashMap<String, String>,
    pub workspace_dir: Option<PathBuf>,
    pub verbose: bool,
}

/// The six parameters every run carries regardless of what the settings document
/// declares (§6 "Built-in parameters"). Modeled as ordinary `Param`s with `on_empty`
/// defaults so the same Validator/Resolver machinery the user-declared schema goes
/// through applies uniformly to these too.
fn builtin_params(config: &Config) -> Vec<Param> {
    vec![
        Param {
            name: Some(YamlValue::String("UPDATE_PARAMETERS".to_string())),
            param_type: Some(ParamType::Boolean),
            default: Some(YamlValue::Bool(false)),
            choices: None,
            description: Some("Force re-installation of the parameter declaration.".to_string()),
            trim: None,
            regex: None,
            regex_replace: None,
            on_empty: Some(OnEmpty {
                assign: Some(YamlValue::String("false".to_string())),
                fail: false,
                warn: false,
            }),
        },
        Param {
            name: Some(YamlValue::String("SETTINGS_GIT_BRANCH".to_string())),
            param_type: Some(ParamType::String),
            default: Some(YamlValue::String(config.settings_default_branch.clone())),
            choices: None,
            description: Some("Branch of the settings repository to load.".to_string()),
            trim: None,
            regex: Some(StringOrList::Single(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$".to_string())),
            regex_replace: None,
            on_empty: Some(OnEmpty {
                assign: Some(YamlValue::String(config.settings_default_branch.clone())),
                fail: false,
                warn: false,
            }),
        },
        Param {
            name: Some(YamlValue::String("NODE_NAME".to_string())),
            param_type: Some(ParamType::String),
            default: None,
            choices: None,
            description: Some("Exact host to run on, if any.".to_string()),
            trim: None,
            regex: None,
            regex_replace: None,
            on_empty: None,
        },
        Param {
            name: Some(YamlValue::String("NODE_TAG".to_string())),
            param_type: Some(ParamType::String),
            default: Some(YamlValue::String("ansible210".to_string())),
            choices: None,
            description: Some("Label of the host pool to run on.".to_string()),
            trim: None,
            regex: None,
            regex_replace: None,
            on_empty: Some(OnEmpty {
                assign: Some(YamlValue::String("ansible210".to_string())),
                fail: false,
                warn: false,
            }),
        },
        Param {
            name: Some(YamlValue::String("DRY_RUN".to_string())),
            param_type: Some(ParamType::Boolean),
            default: Some(YamlValue::Bool(false)),
            choices: None,
            description: Some("Validate and log the run without touching collaborators.".to_string()),
            trim: None,
            regex: None,
            regex_replace: None,
            on_empty: Some(OnEmpty {
                assign: Some(YamlValue::String("false".to_string())),
                fail: false,
                warn: false,
            }),
        },
        Param {
            name: Some(YamlValue::String("DEBUG_MODE".to_string())),
            param_type: Some(ParamType::Boolean),
            default: Some(YamlValue::Bool(false)),
            choices: None,
            description: Some("Surface debug-severity log lines.".to_string()),
            trim: None,
            regex: None,
            regex_replace: None,
            on_empty: Some(OnEmpty {
                assign: Some(YamlValue::String("false".to_string())),
                fail: false,
                warn: false,
            }),
        },
    ]
}

/// Node selection precedence from §6: `NODE_TAG` (always populated, default
/// `ansible210`) beats `NODE_NAME`, which beats "any available host".
async fn select_node(collaborators: &Collaborators, env: &HashMap<String, String>) -> ServiceResult<String> {
    if let Some(tag) = env.get("NODE_TAG").filter(|v| !v.is_empty()) {
        if let Some(host) = collaborators.nodes.resolve(tag, true).await?.into_iter().next() {
            return Ok(host);
        }
    }
    if let Some(name) = env.get("NODE_NAME").filter(|v| !v.is_empty()) {
        if let Some(host) = collaborators.nodes.resolve(name, false).await?.into_iter().next() {
            return Ok(host);
        }
    }
    collaborators
        .nodes
        .resolve("*", true)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::dispatch("no available host matched node selection"))
}

/// Drive the whole pipeline end to end: load (if needed), validate, inject, resolve,
/// then walk. Returns the terminal exit state from §6, not an error, for every
/// outcome the spec models as a *state* (parameters-updated, dry-run, success,
/// failure); `Err` is reserved for conditions the spec treats as fatal before a
/// state is even reachable (a malformed document, an unreachable collaborator).
pub async fn run_pipeline(
    request: RunRequest,
    config: Config,
    collaborators: Collaborators,
) -> ServiceResult<(RunOutcome, ReportReceiver)> {
    let (tx, rx) = report_channel();
    let debug_mode = request
        .current_params
        .get("DEBUG_MODE")
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);
    let reporter = Reporter::new(tx, debug_mode);

    let workspace_dir = request
        .workspace_dir
        .clone()
        .unwrap_or_else(crate::utils::resolve_working_dir);

    let settings = match request.settings {
        Some(settings) => settings,
        None => {
            let relative_path = config.relative_path_for_job(&request.job_name)?;
            let branch = request
                .current_params
                .get("SETTINGS_GIT_BRANCH")
                .cloned()
                .unwrap_or_else(|| config.settings_default_branch.clone());
            let loader = crate::loader::SettingsLoader::new(collaborators.git.as_ref(), workspace_dir);
            loader
                .load(&config.settings_repo_url, &branch, &relative_path, request.verbose, &reporter)
                .await?
        }
    };

    let mut required = settings.parameters.required.clone();
    let mut optional = settings.parameters.optional.clone();
    optional.extend(builtin_params(&config));

    let (required_ok, required_diagnostics, required_types) = validate_schema(&required);
    let (optional_ok, optional_diagnostics, optional_types) = validate_schema(&optional);
    apply_inferred_types(&mut required, &required_types);
    apply_inferred_types(&mut optional, &optional_types);

    for d in required_diagnostics.iter().chain(optional_diagnostics.iter()) {
        reporter.log(d.severity, d.message.clone());
    }
    if !required_ok || !optional_ok {
        return Ok((
            RunOutcome {
                state: ExitState::Failed,
                message: Some("schema validation failed; please fix then re-build.".to_string()),
            },
            rx,
        ));
    }

    let update_parameters = request
        .current_params
        .get("UPDATE_PARAMETERS")
        .and_then(|v| coerce_to_bool(&YamlValue::String(v.clone())))
        .unwrap_or(false);
    let dry_run_requested = request
        .current_params
        .get("DRY_RUN")
        .and_then(|v| coerce_to_bool(&YamlValue::String(v.clone())))
        .unwrap_or(false);

    let mut combined_schema = required.clone();
    combined_schema.extend(optional.clone());
    let injection = crate::injector::reconcile(&combined_schema, &request.current_params, update_parameters, dry_run_requested);
    if injection.terminate {
        return Ok((
            RunOutcome {
                state: ExitState::ParametersUpdated,
                message: injection.message,
            },
            rx,
        ));
    }

    let mut env = request.host_env.clone();
    env.extend(request.current_params.clone());
    seed_builtin_defaults(&mut env, &config);

    let resolve_outcome = crate::resolver::resolve(&required, &optional, &env);
    for d in &resolve_outcome.diagnostics {
        reporter.log(d.severity, d.message.clone());
    }
    if !resolve_outcome.ok {
        return Ok((
            RunOutcome {
                state: ExitState::Failed,
                message: Some("parameter resolution failed; please fix then re-build.".to_string()),
            },
            rx,
        ));
    }
    let env = resolve_outcome.env;

    let dry_run = env
        .get("DRY_RUN")
        .and_then(|v| coerce_to_bool(&YamlValue::String(v.clone())))
        .unwrap_or(false);

    let current_node = select_node(&collaborators, &env).await?;
    let installation_name = config.settings_relative_path_prefix.clone();

    let ctx = RunContext::new(
        Arc::new(settings),
        Arc::new(config),
        Arc::new(collaborators),
        env,
        reporter,
        current_node,
        installation_name,
        WalkMode::Execute { dry_run },
    );

    let walk_result = crate::walker::walk(&ctx).await;

    let outcome = match walk_result {
        Ok(true) if dry_run => RunOutcome {
            state: ExitState::DryRunCompleted,
            message: None,
        },
        Ok(true) => RunOutcome {
            state: ExitState::Succeeded,
            message: None,
        },
        Ok(false) => RunOutcome {
            state: ExitState::Failed,
            message: Some(format!(
                "{}\nPlease fix then re-build.",
                ctx.reporter.lock().await.render_action_table()
            )),
        },
        Err(ServiceError::Aborted(reason)) => RunOutcome {
            state: ExitState::Failed,
            message: Some(format!(
                "Terminating current pipeline run due to an error in {reason}\nPlease fix then re-build."
            )),
        },
        Err(e) => return Err(e),
    };

    Ok((outcome, rx))
}

/// Check-mode entry point: walks the same stage tree (§4.6 "sharing one code path")
/// but never touches a collaborator; returns whether the document is runnable.
pub async fn check_pipeline(
    settings: PipelineSettings,
    config: Config,
    collaborators: Collaborators,
    env: HashMap<String, String>,
) -> ServiceResult<bool> {
    let (tx, _rx) = report_channel();
    let reporter = Reporter::new(tx, true);
    let current_node = select_node(&collaborators, &env).await.unwrap_or_else(|_| "any".to_string());

    let ctx = RunContext::new(
        Arc::new(settings),
        Arc::new(config),
        Arc::new(collaborators),
        env,
        reporter,
        current_node,
        "ansible210".to_string(),
        WalkMode::Check,
    );

    crate::walker::walk(&ctx).await
}

fn seed_builtin_defaults(env: &mut HashMap<String, String>, config: &Config) {
    env.entry("UPDATE_PARAMETERS".to_string()).or_insert_with(|| "false".to_string());
    env.entry("SETTINGS_GIT_BRANCH".to_string())
        .or_insert_with(|| config.settings_default_branch.clone());
    env.entry("NODE_TAG".to_string()).or_insert_with(|| "ansible210".to_string());
    env.entry("DRY_RUN".to_string()).or_insert_with(|| "false".to_string());
    env.entry("DEBUG_MODE".to_string()).or_insert_with(|| "false".to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NullCollaborators;
    use crate::model::Stage;

    fn null_collaborators() -> Collaborators {
        Collaborators {
            git: Box::new(NullCollaborators::new()),
            remote_runner: Box::new(NullCollaborators::new()),
            downstream: Box::new(NullCollaborators::new()),
            artifacts: Box::new(NullCollaborators::new()),
            reports: Box::new(NullCollaborators::new()),
            nodes: Box::new(NullCollaborators::new()),
        }
    }

    #[tokio::test]
    async fn empty_pipeline_succeeds_without_any_collaborator_calls() {
        let settings = PipelineSettings::default();
        let request = RunRequest {
            job_name: "demo".to_string(),
            settings: Some(settings),
            current_params: HashMap::new(),
            host_env: HashMap::new(),
            workspace_dir: None,
            verbose: false,
        };
        let (outcome, _rx) = run_pipeline(request, Config::default(), null_collaborators()).await.unwrap();
        assert_eq!(outcome.state, ExitState::Succeeded);
    }

    #[tokio::test]
    async fn dry_run_built_in_parameter_yields_dry_run_completed() {
        let mut settings = PipelineSettings::default();
        let mut actions = HashMap::new();
        actions.insert(
            "a1".to_string(),
            [("artifacts".to_string(), YamlValue::String("*.log".to_string()))].into(),
        );
        settings.actions = actions;
        settings.stages = vec![Stage {
            name: "build".to_string(),
            parallel: None,
            actions: vec![crate::model::Action {
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
            }],
        }];

        let mut current_params = HashMap::new();
        current_params.insert("DRY_RUN".to_string(), "true".to_string());

        let request = RunRequest {
            job_name: "demo".to_string(),
            settings: Some(settings),
            current_params,
            host_env: HashMap::new(),
            workspace_dir: None,
            verbose: false,
        };
        let (outcome, _rx) = run_pipeline(request, Config::default(), null_collaborators()).await.unwrap();
        assert_eq!(outcome.state, ExitState::DryRunCompleted);
    }

    #[tokio::test]
    async fn missing_required_parameter_fails_the_run() {
        let mut settings = PipelineSettings::default();
        settings.parameters.required.push(Param {
            name: Some(YamlValue::String("FOO".to_string())),
            param_type: Some(ParamType::String),
            default: None,
            choices: None,
            description: None,
            trim: None,
            regex: None,
            regex_replace: None,
            on_empty: Some(OnEmpty {
                assign: None,
                fail: true,
                warn: false,
            }),
        });

        let request = RunRequest {
            job_name: "demo".to_string(),
            settings: Some(settings),
            current_params: HashMap::new(),
            host_env: HashMap::new(),
            workspace_dir: None,
            verbose: false,
        };
        let (outcome, _rx) = run_pipeline(request, Config::default(), null_collaborators()).await.unwrap();
        assert_eq!(outcome.state, ExitState::Failed);
    }

    #[tokio::test]
    async fn check_pipeline_validates_without_touching_collaborators() {
        let mut settings = PipelineSettings::default();
        let mut actions = HashMap::new();
        actions.insert(
            "a1".to_string(),
            [("artifacts".to_string(), YamlValue::String("*.log".to_string()))].into(),
        );
        settings.actions = actions;
        settings.stages = vec![Stage {
            name: "build".to_string(),
            parallel: None,
            actions: vec![crate::model::Action {
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
            }],
        }];

        let ok = check_pipeline(settings, Config::default(), null_collaborators(), HashMap::new())
            .await
            .unwrap();
        assert!(ok);
    }
}
