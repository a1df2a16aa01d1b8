// Action Dispatcher (§4.8).
//
// Resolves an action-link's single discriminator key into one of nine typed
// operations and invokes it through one uniform wrapper: check mode validates and
// templates the link's keys without touching a collaborator, dry-run logs the intent
// and reports a pass, and execute mode invokes the collaborator and folds any error
// into a pass/fail + diagnostic (§7). Mirrors the donor's `RunnerRegistry`
// (`runners/mod.rs`): a flat match over a tagged variant rather than a map of
// closures keyed by string.

use std::collections::HashMap;

use serde_yaml::Value as YamlValue;

use crate::coerce::{coerce_to_bool, coerce_to_string, is_list};
use crate::context::RunContext;
use crate::model::{ActionLink, PipelineSettings, DISCRIMINATORS};
use crate::templater::expand;
use crate::validator::Diagnostic;

#[derive(Debug, Clone)]
pub struct CopyArtifactsSpec {
    pub filter: String,
    pub excludes: Option<String>,
    pub target_directory: Option<String>,
    pub optional: bool,
    pub flatten: bool,
    pub fingerprint: bool,
}

#[derive(Debug, Clone)]
pub enum ResolvedAction {
    CloneRepo {
        repo_url: String,
        repo_branch: String,
        directory: Option<String>,
        credentials: Option<String>,
    },
    InstallCollections {
        names: Vec<String>,
    },
    RunPlaybook {
        playbook_text: String,
        inventory_text: String,
    },
    RunDownstream {
        pipeline: String,
        parameters: HashMap<String, String>,
        propagate: bool,
        wait: bool,
        copy_artifacts: Option<CopyArtifactsSpec>,
    },
    Stash {
        name: String,
        includes: String,
        excludes: String,
        default_excludes: bool,
        allow_empty: bool,
    },
    Unstash {
        name: String,
    },
    PublishArtifacts {
        artifacts: String,
        excludes: String,
        allow_empty: bool,
        fingerprint: bool,
    },
    RunScript {
        script: Option<String>,
        jenkins: Option<String>,
        as_part_of_pipeline: bool,
    },
    SendReportEmail {
        to: String,
        subject: String,
        body: String,
        reply_to: Option<String>,
    },
    SendReportMattermost {
        url: String,
        text: String,
    },
}

/// Result of resolving + (when not check-mode) running an action link.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub ok: bool,
    pub discriminator: &'static str,
    pub diagnostics: Vec<Diagnostic>,
}

struct Resolution {
    action: Option<ResolvedAction>,
    discriminator: &'static str,
    diagnostics: Vec<Diagnostic>,
}

/// Find the first discriminator (in §3's ordered set) present in the link, warning
/// when more than one is present (§3 ActionLink invariant).
fn find_discriminator(link: &ActionLink) -> (Option<&'static str>, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let present: Vec<&'static str> = DISCRIMINATORS
        .iter()
        .copied()
        .filter(|d| link.contains_key(*d))
        .collect();

    if present.len() > 1 {
        diagnostics.push(Diagnostic::warning(format!(
            "action link declares multiple discriminators {present:?}; only '{}' is executed",
            present[0]
        )));
    }

    (present.first().copied(), diagnostics)
}

fn templated_string(
    value: Option<&YamlValue>,
    env: &HashMap<String, String>,
    extras: &HashMap<String, String>,
    diagnostics: &mut Vec<Diagnostic>,
    field: &str,
) -> Option<String> {
    let raw = value.and_then(coerce_to_string)?;
    let result = expand(&raw, env, extras);
    if !result.ok {
        for d in result.diagnostics {
            diagnostics.push(Diagnostic::error(format!("{field}: {d}")));
        }
    }
    Some(result.expanded)
}

fn templated_bool(
    value: Option<&YamlValue>,
    default: bool,
    diagnostics: &mut Vec<Diagnostic>,
    field: &str,
) -> bool {
    match value {
        None => default,
        Some(v) => match coerce_to_bool(v) {
            Some(b) => b,
            None => {
                diagnostics.push(Diagnostic::error(format!(
                    "{field} is present but is not boolean-convertible"
                )));
                default
            }
        },
    }
}

/// Resolve an action link into its typed operation, running all templating the link
/// needs along the way (§4.8: "validate the action-link's keys ... + templating").
fn resolve(
    link: &ActionLink,
    settings: &PipelineSettings,
    env: &HashMap<String, String>,
    extras: &HashMap<String, String>,
) -> Resolution {
    let (discriminator, mut diagnostics) = find_discriminator(link);
    let Some(discriminator) = discriminator else {
        diagnostics.push(Diagnostic::error(
            "action link declares none of the recognized discriminator keys",
        ));
        return Resolution {
            action: None,
            discriminator: "unknown",
            diagnostics,
        };
    };

    let action = match discriminator {
        "repo_url" => {
            let repo_url = templated_string(link.get("repo_url"), env, extras, &mut diagnostics, "repo_url");
            let repo_branch = templated_string(link.get("repo_branch"), env, extras, &mut diagnostics, "repo_branch")
                .unwrap_or_else(|| "main".to_string());
            let directory = templated_string(link.get("directory"), env, extras, &mut diagnostics, "directory");
            let credentials =
                templated_string(link.get("credentials"), env, extras, &mut diagnostics, "credentials");
            repo_url.map(|repo_url| ResolvedAction::CloneRepo {
                repo_url,
                repo_branch,
                directory,
                credentials,
            })
        }
        "collections" => {
            let raw = link.get("collections");
            let names = match raw {
                Some(v) if is_list(v) => v
                    .as_sequence()
                    .map(|seq| seq.iter().filter_map(coerce_to_string).collect::<Vec<_>>())
                    .unwrap_or_default(),
                Some(v) => coerce_to_string(v).into_iter().collect(),
                None => Vec::new(),
            };
            if names.is_empty() {
                diagnostics.push(Diagnostic::error("'collections' is required and must be non-empty"));
                None
            } else {
                let templated = names
                    .into_iter()
                    .map(|n| expand(&n, env, extras))
                    .inspect(|r| {
                        if !r.ok {
                            for d in &r.diagnostics {
                                diagnostics.push(Diagnostic::error(format!("collections: {d}")));
                            }
                        }
                    })
                    .map(|r| r.expanded)
                    .collect();
                Some(ResolvedAction::InstallCollections { names: templated })
            }
        }
        "playbook" => {
            let playbook_name = templated_string(link.get("playbook"), env, extras, &mut diagnostics, "playbook");
            let inventory_name =
                templated_string(link.get("inventory"), env, extras, &mut diagnostics, "inventory")
                    .unwrap_or_else(|| "default".to_string());

            let playbook_text = playbook_name.as_ref().and_then(|name| settings.playbooks.get(name).cloned());
            if playbook_text.is_none() {
                diagnostics.push(Diagnostic::error(format!(
                    "playbook link {:?} not found in settings.playbooks",
                    playbook_name
                )));
            }
            let inventory_text = settings.inventories.get(&inventory_name).cloned().unwrap_or_default();
            if !settings.inventories.is_empty() && !settings.inventories.contains_key(&inventory_name) {
                diagnostics.push(Diagnostic::error(format!(
                    "inventory link {inventory_name:?} not found in settings.inventories"
                )));
            }

            playbook_text.map(|playbook_text| ResolvedAction::RunPlaybook {
                playbook_text,
                inventory_text,
            })
        }
        "pipeline" => {
            let pipeline = templated_string(link.get("pipeline"), env, extras, &mut diagnostics, "pipeline");
            let propagate = templated_bool(link.get("propagate"), true, &mut diagnostics, "propagate");
            let wait = templated_bool(link.get("wait"), true, &mut diagnostics, "wait");

            let parameters = link
                .get("parameters")
                .and_then(|v| v.as_sequence())
                .map(|seq| {
                    seq.iter()
                        .filter_map(|entry| {
                            let name = entry.get("name").and_then(coerce_to_string)?;
                            let value = entry
                                .get("value")
                                .and_then(coerce_to_string)
                                .unwrap_or_default();
                            let expanded = expand(&value, env, extras);
                            if !expanded.ok {
                                for d in &expanded.diagnostics {
                                    diagnostics.push(Diagnostic::error(format!("parameters.{name}: {d}")));
                                }
                            }
                            Some((name, expanded.expanded))
                        })
                        .collect::<HashMap<_, _>>()
                })
                .unwrap_or_default();

            let copy_artifacts = link.get("copy_artifacts").map(|spec| CopyArtifactsSpec {
                filter: spec
                    .get("filter")
                    .and_then(coerce_to_string)
                    .unwrap_or_default(),
                excludes: spec.get("excludes").and_then(coerce_to_string),
                target_directory: spec.get("target_directory").and_then(coerce_to_string),
                optional: spec
                    .get("optional")
                    .and_then(coerce_to_bool)
                    .unwrap_or(false),
                flatten: spec.get("flatten").and_then(coerce_to_bool).unwrap_or(false),
                fingerprint: spec
                    .get("fingerprint")
                    .and_then(coerce_to_bool)
                    .unwrap_or(false),
            });

            pipeline.map(|pipeline| ResolvedAction::RunDownstream {
                pipeline,
                parameters,
                propagate,
                wait,
                copy_artifacts,
            })
        }
        "stash" => {
            let name = templated_string(link.get("stash"), env, extras, &mut diagnostics, "stash");
            let includes = templated_string(link.get("includes"), env, extras, &mut diagnostics, "includes")
                .unwrap_or_default();
            let excludes = templated_string(link.get("excludes"), env, extras, &mut diagnostics, "excludes")
                .unwrap_or_default();
            let default_excludes =
                templated_bool(link.get("default_excludes"), true, &mut diagnostics, "default_excludes");
            let allow_empty = templated_bool(link.get("allow_empty"), false, &mut diagnostics, "allow_empty");

            name.map(|name| ResolvedAction::Stash {
                name,
                includes,
                excludes,
                default_excludes,
                allow_empty,
            })
        }
        "unstash" => {
            let name = templated_string(link.get("unstash"), env, extras, &mut diagnostics, "unstash");
            name.map(|name| ResolvedAction::Unstash { name })
        }
        "artifacts" => {
            let artifacts = templated_string(link.get("artifacts"), env, extras, &mut diagnostics, "artifacts");
            let excludes = templated_string(link.get("excludes"), env, extras, &mut diagnostics, "excludes")
                .unwrap_or_default();
            let allow_empty = templated_bool(link.get("allow_empty"), false, &mut diagnostics, "allow_empty");
            let fingerprint = templated_bool(link.get("fingerprint"), false, &mut diagnostics, "fingerprint");

            artifacts.map(|artifacts| ResolvedAction::PublishArtifacts {
                artifacts,
                excludes,
                allow_empty,
                fingerprint,
            })
        }
        "script" => {
            let body = link.get("script");
            let script = body
                .and_then(|b| b.get("script"))
                .and_then(|v| templated_string(Some(v), env, extras, &mut diagnostics, "script.script"));
            let jenkins = body
                .and_then(|b| b.get("jenkins"))
                .and_then(|v| templated_string(Some(v), env, extras, &mut diagnostics, "script.jenkins"));
            let as_part_of_pipeline = body
                .and_then(|b| b.get("pipeline"))
                .and_then(coerce_to_bool)
                .unwrap_or(false);

            if script.is_none() && jenkins.is_none() {
                diagnostics.push(Diagnostic::error(
                    "'script' action requires at least one of 'script' or 'jenkins'",
                ));
                None
            } else {
                Some(ResolvedAction::RunScript {
                    script,
                    jenkins,
                    as_part_of_pipeline,
                })
            }
        }
        "report" => {
            let sink = link.get("report").and_then(coerce_to_string);
            match sink.as_deref() {
                Some("email") => {
                    let to = templated_string(link.get("to"), env, extras, &mut diagnostics, "to");
                    let subject = templated_string(link.get("subject"), env, extras, &mut diagnostics, "subject")
                        .unwrap_or_default();
                    let body = templated_string(link.get("body"), env, extras, &mut diagnostics, "body")
                        .unwrap_or_default();
                    let reply_to = templated_string(link.get("reply_to"), env, extras, &mut diagnostics, "reply_to");
                    to.map(|to| ResolvedAction::SendReportEmail {
                        to,
                        subject,
                        body,
                        reply_to,
                    })
                }
                Some("mattermost") => {
                    let url = templated_string(link.get("url"), env, extras, &mut diagnostics, "url");
                    let text = templated_string(link.get("text"), env, extras, &mut diagnostics, "text")
                        .unwrap_or_default();
                    url.map(|url| ResolvedAction::SendReportMattermost { url, text })
                }
                _ => {
                    diagnostics.push(Diagnostic::error(
                        "'report' must be one of 'email' or 'mattermost'",
                    ));
                    None
                }
            }
        }
        other => {
            diagnostics.push(Diagnostic::error(format!("unhandled discriminator '{other}'")));
            None
        }
    };

    Resolution {
        action,
        discriminator,
        diagnostics,
    }
}

/// The uniform wrapper shared by every typed operation (§4.8).
pub async fn dispatch(link: &ActionLink, ctx: &RunContext) -> DispatchOutcome {
    let env = ctx.env_snapshot().await;
    let extras = ctx.extras_snapshot().await;
    let settings = ctx.settings.clone();

    let resolution = resolve(link, &settings, &env, &extras);
    let had_error = resolution
        .diagnostics
        .iter()
        .any(|d| d.severity == crate::reporter::Severity::Error);

    if ctx.mode.is_check() {
        return DispatchOutcome {
            ok: !had_error && resolution.action.is_some(),
            discriminator: resolution.discriminator,
            diagnostics: resolution.diagnostics,
        };
    }

    let Some(action) = resolution.action else {
        return DispatchOutcome {
            ok: false,
            discriminator: resolution.discriminator,
            diagnostics: resolution.diagnostics,
        };
    };
    if had_error {
        return DispatchOutcome {
            ok: false,
            discriminator: resolution.discriminator,
            diagnostics: resolution.diagnostics,
        };
    }

    if ctx.mode.is_dry_run() {
        ctx.log(
            crate::reporter::Severity::Debug,
            format!("[dry-run] would execute {}: {:?}", resolution.discriminator, action),
        )
        .await;
        return DispatchOutcome {
            ok: true,
            discriminator: resolution.discriminator,
            diagnostics: resolution.diagnostics,
        };
    }

    let mut diagnostics = resolution.diagnostics;
    let ok = match run(&action, ctx).await {
        Ok(()) => true,
        Err(e) => {
            diagnostics.push(Diagnostic::error(e.to_string()));
            false
        }
    };

    DispatchOutcome {
        ok,
        discriminator: resolution.discriminator,
        diagnostics,
    }
}

async fn run(action: &ResolvedAction, ctx: &RunContext) -> crate::error::ServiceResult<()> {
    use crate::collaborators::DownstreamResult;

    match action {
        ResolvedAction::CloneRepo {
            repo_url,
            repo_branch,
            directory,
            credentials,
        } => {
            let folder = directory
                .as_ref()
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            ctx.collaborators
                .git
                .clone_repo(repo_url, repo_branch, &folder, credentials.as_deref())
                .await
        }
        ResolvedAction::InstallCollections { names } => {
            for name in names {
                ctx.collaborators
                    .remote_runner
                    .run(&format!("ansible-galaxy collection install {name}"), "", &ctx.installation_name)
                    .await?;
            }
            Ok(())
        }
        ResolvedAction::RunPlaybook {
            playbook_text,
            inventory_text,
        } => {
            ctx.collaborators
                .remote_runner
                .run(playbook_text, inventory_text, &ctx.installation_name)
                .await
        }
        ResolvedAction::RunDownstream {
            pipeline,
            parameters,
            propagate,
            wait,
            copy_artifacts,
        } => {
            let DownstreamResult { result, number, .. } = ctx
                .collaborators
                .downstream
                .dispatch(pipeline, parameters, ctx.mode.is_dry_run(), *propagate, *wait)
                .await?;

            if result != "SUCCESS" {
                return Err(crate::error::ServiceError::dispatch(format!(
                    "downstream pipeline {pipeline} finished with {result}"
                )));
            }

            if let Some(spec) = copy_artifacts {
                ctx.collaborators
                    .artifacts
                    .copy_artifacts(pipeline, &number.to_string(), &spec.filter)
                    .await?;
            }
            Ok(())
        }
        ResolvedAction::Stash {
            name,
            includes,
            excludes,
            ..
        } => ctx.collaborators.artifacts.stash(name, includes, excludes).await,
        ResolvedAction::Unstash { name } => ctx.collaborators.artifacts.unstash(name).await,
        ResolvedAction::PublishArtifacts {
            artifacts, excludes, ..
        } => ctx.collaborators.artifacts.publish(artifacts, excludes).await,
        ResolvedAction::RunScript {
            script,
            jenkins,
            as_part_of_pipeline,
        } => {
            if let Some(script) = script {
                ctx.collaborators
                    .remote_runner
                    .run(script, "", &ctx.installation_name)
                    .await?;
            }
            if let Some(jenkins) = jenkins {
                if *as_part_of_pipeline {
                    let returned = ctx
                        .collaborators
                        .remote_runner
                        .run_as_part_of_pipeline(jenkins, &ctx.installation_name)
                        .await?;
                    for (key, value) in &returned {
                        ctx.set_env(key.clone(), value.clone()).await;
                    }
                    ctx.merge_builtins(returned).await;
                } else {
                    ctx.collaborators
                        .remote_runner
                        .run(jenkins, "", &ctx.installation_name)
                        .await?;
                }
            }
            Ok(())
        }
        ResolvedAction::SendReportEmail {
            to, subject, body, reply_to,
        } => {
            ctx.collaborators
                .reports
                .send_email(to, subject, body, reply_to.as_deref())
                .await
        }
        ResolvedAction::SendReportMattermost { url, text } => {
            ctx.collaborators.reports.send_mattermost(url, text).await
        }
    }
}
