// Parameter Schema Validator (§4.2).
//
// Mirrors the donor's `PipelineValidator::validate()` aggregation style
// (`parser/azure.rs`): every parameter is checked independently and every failure is
// collected rather than raising on the first one, so `validate_schema` can report the
// complete list of problems in a single pass (§7, "check-mode errors aggregate").

use std::sync::OnceLock;

use regex::Regex;
use serde_yaml::Value as YamlValue;

use crate::coerce::{coerce_to_bool, coerce_to_string, is_list};
use crate::model::{Param, ParamType};
use crate::reporter::Severity;

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Debug,
            message: message.into(),
        }
    }
}

/// Validate one parameter, returning diagnostics plus the type it should be treated
/// as from here on (explicit or auto-inferred, §4.2 last row).
pub fn validate_param(param: &Param) -> (Vec<Diagnostic>, Option<ParamType>) {
    let mut diagnostics = Vec::new();

    let name = param.name.as_ref().and_then(coerce_to_string);
    let name_valid = name
        .as_deref()
        .is_some_and(|n| identifier_regex().is_match(n));
    if !name_valid {
        diagnostics.push(Diagnostic::error(format!(
            "parameter name {:?} is missing, not string-convertible, or violates the identifier pattern",
            param.name
        )));
    }

    let choices_present = param.choices.is_some();
    let choices_is_list = param.choices.as_ref().is_some_and(is_list);
    let default_present = param.default.is_some();
    let default_is_bool = matches!(param.default, Some(YamlValue::Bool(_)));

    if default_present && choices_present {
        diagnostics.push(Diagnostic::error(
            "'default' and 'choices' are mutually exclusive but both are present",
        ));
    }

    if choices_present && !choices_is_list {
        diagnostics.push(Diagnostic::error("'choices' is present but is not a list"));
    }

    let resolved_type = match param.param_type {
        Some(t) => Some(t),
        None if choices_is_list => {
            diagnostics.push(Diagnostic::warning(
                "the 'type' key is not defined, but was detected by 'choices' key: choice",
            ));
            Some(ParamType::Choice)
        }
        None if default_is_bool => {
            diagnostics.push(Diagnostic::warning(
                "the 'type' key is not defined, but was detected by 'default' key: boolean",
            ));
            Some(ParamType::Boolean)
        }
        None => {
            diagnostics.push(Diagnostic::error(
                "'type' is missing and could not be inferred from 'default' or 'choices'",
            ));
            None
        }
    };

    if resolved_type == Some(ParamType::Choice) && !choices_present {
        diagnostics.push(Diagnostic::error("type=choice requires 'choices' to be set"));
    }

    if resolved_type == Some(ParamType::Boolean) && default_present && !default_is_bool {
        diagnostics.push(Diagnostic::error(
            "type=boolean requires 'default' (if present) to be a boolean",
        ));
    }

    if let Some(on_empty) = &param.on_empty {
        if let Some(assign) = &on_empty.assign {
            if let Some(assign_str) = coerce_to_string(assign) {
                if let Some(var_name) = assign_str.strip_prefix('$') {
                    if !identifier_regex().is_match(var_name) {
                        diagnostics.push(Diagnostic::error(format!(
                            "on_empty.assign references '${var_name}', which violates the identifier pattern"
                        )));
                    }
                }
            }
        }
    }

    (diagnostics, resolved_type)
}

/// Validate an entire schema (`parameters.required` + `parameters.optional`),
/// returning `(ok, diagnostics, inferred types in parameter order)`. `ok` is true iff
/// no diagnostic carried `Severity::Error` (§4.2: "returns true iff no errors were
/// emitted").
pub fn validate_schema(params: &[Param]) -> (bool, Vec<Diagnostic>, Vec<Option<ParamType>>) {
    let mut all_diagnostics = Vec::new();
    let mut types = Vec::with_capacity(params.len());

    for param in params {
        let (diagnostics, resolved_type) = validate_param(param);
        all_diagnostics.extend(diagnostics);
        types.push(resolved_type);
    }

    let ok = !all_diagnostics
        .iter()
        .any(|d| d.severity == Severity::Error);

    (ok, all_diagnostics, types)
}

/// Auto-typing is idempotent: re-validating a schema whose types have already been
/// resolved must not change the outcome (§8 universal properties).
pub fn apply_inferred_types(params: &mut [Param], types: &[Option<ParamType>]) {
    for (param, inferred) in params.iter_mut().zip(types) {
        if param.param_type.is_none() {
            param.param_type = *inferred;
        }
    }
}
