// Parameter Resolver (§4.4).
//
// For the current build: verifies each required parameter is defined or assignable
// via `on_empty`, runs per-parameter regex match checks, and performs `regex_replace`
// rewrites, mutating the run's env map. Diagnostics aggregate across every parameter
// in one pass, the same "check-mode errors aggregate" rule the Validator follows
// (§7), rather than short-circuiting on the first failed parameter.

use std::collections::HashMap;

use regex::Regex;

use crate::coerce::coerce_to_string;
use crate::model::Param;
use crate::reporter::Severity;
use crate::validator::Diagnostic;

#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub ok: bool,
    pub env: HashMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// `resolve(schema, current_params, env) -> (ok, env')` from §4.4. `required` and
/// `optional` are passed separately because only `required` parameters run the
/// on_empty pass; both run the regex pass.
pub fn resolve(required: &[Param], optional: &[Param], env: &HashMap<String, String>) -> ResolveOutcome {
    let mut env = env.clone();
    let mut diagnostics = Vec::new();
    let mut ok = true;

    for param in required {
        let Some(name) = param.name.as_ref().and_then(coerce_to_string) else {
            continue;
        };
        if is_defined(&env, &name) {
            continue;
        }

        let assigned = param.on_empty.as_ref().and_then(|on_empty| {
            on_empty
                .assign
                .as_ref()
                .and_then(coerce_to_string)
                .and_then(|assign| {
                    if let Some(var_name) = assign.strip_prefix('$') {
                        env.get(var_name).filter(|v| !v.is_empty()).cloned()
                    } else {
                        Some(assign)
                    }
                })
        });

        let warn = param.on_empty.as_ref().map(|o| o.warn).unwrap_or(false);
        let fail = param.on_empty.as_ref().map(|o| o.fail).unwrap_or(true);

        match &assigned {
            Some(value) => {
                env.insert(name.clone(), value.clone());
                if warn {
                    diagnostics.push(Diagnostic::warning(format!(
                        "{name} parameter was unset and was assigned via on_empty"
                    )));
                }
            }
            None => {
                if warn {
                    diagnostics.push(Diagnostic::warning(format!(
                        "{name} parameter is unset and on_empty did not produce a value"
                    )));
                }
                if fail {
                    ok = false;
                    diagnostics.push(Diagnostic::error(format!(
                        "{name} parameter is required but was not defined and on_empty could not assign a value"
                    )));
                }
            }
        }
    }

    for param in required.iter().chain(optional.iter()) {
        let Some(name) = param.name.as_ref().and_then(coerce_to_string) else {
            continue;
        };
        let Some(value) = env.get(&name).cloned() else {
            continue;
        };

        if let Some(pattern) = &param.regex {
            let concatenated = pattern.concat();
            match Regex::new(&concatenated) {
                Ok(re) => {
                    if !fully_matches(&re, &value) {
                        ok = false;
                        diagnostics.push(Diagnostic::error(format!(
                            "{name} parameter is incorrect due to regex mismatch."
                        )));
                    }
                }
                Err(e) => {
                    ok = false;
                    diagnostics.push(Diagnostic::error(format!(
                        "{name} parameter's regex '{concatenated}' is invalid: {e}"
                    )));
                }
            }
        }

        if let Some(replace) = &param.regex_replace {
            let pattern = replace.regex.concat();
            match Regex::new(&pattern) {
                Ok(re) => {
                    let to = replace.to.as_deref().unwrap_or("");
                    let replaced = re.replace_all(&value, to).to_string();
                    env.insert(name.clone(), replaced);
                    diagnostics.push(Diagnostic::debug(format!(
                        "{name} parameter rewritten by regex_replace"
                    )));
                }
                Err(e) => {
                    ok = false;
                    diagnostics.push(Diagnostic::error(format!(
                        "{name} parameter's regex_replace pattern '{pattern}' is invalid: {e}"
                    )));
                }
            }
        }
    }

    ResolveOutcome { ok, env, diagnostics }
}

fn is_defined(env: &HashMap<String, String>, name: &str) -> bool {
    env.get(name).is_some_and(|v| !v.is_empty())
}

/// Whole-string match: the regex engine has no implicit anchoring, and wrapping the
/// caller's pattern in `^...$` could double-anchor an already-anchored pattern, so the
/// match span is checked against the string's full length instead.
fn fully_matches(re: &Regex, value: &str) -> bool {
    re.find(value)
        .is_some_and(|m| m.start() == 0 && m.end() == value.len())
}
