// Parameter Injector (§4.3).
//
// Compares the validated schema against the build's currently declared parameters.
// Installing the new declaration into the host is the excluded CLI/entry-point
// collaborator (§1 Non-goals), so `reconcile` only decides *whether* an install and
// build interruption is warranted and renders the neutral termination message; the
// actual host call is left to whatever embeds this crate.

use std::collections::HashMap;

use crate::model::Param;

#[derive(Debug, Clone)]
pub struct InjectorOutcome {
    /// True when any schema parameter name is absent from the build's current
    /// parameters (§4.3: "`needs_update` is true when any schema name is absent").
    pub needs_update: bool,
    /// True when the build should be interrupted: either `needs_update` or the
    /// `UPDATE_PARAMETERS` built-in was set.
    pub terminate: bool,
    /// Present when `terminate` is true; the neutral "rebuild with the new form"
    /// message (§4.3, §6 PARAMETERS_UPDATED).
    pub message: Option<String>,
}

/// `reconcile(schema, current_params) -> (needs_update, ok)` from §4.3, generalized to
/// also fold in the `UPDATE_PARAMETERS` build flag and dry-run behavior.
pub fn reconcile(
    schema: &[Param],
    current_params: &HashMap<String, String>,
    update_parameters: bool,
    dry_run: bool,
) -> InjectorOutcome {
    let needs_update = schema.iter().any(|p| {
        let name = p
            .name
            .as_ref()
            .and_then(crate::coerce::coerce_to_string)
            .unwrap_or_default();
        !name.is_empty() && !current_params.contains_key(&name)
    });

    let terminate = needs_update || update_parameters;
    let message = if terminate {
        Some(if dry_run {
            "Parameters updated (dry run: host installation skipped); re-run to pick up the new parameter declaration.".to_string()
        } else {
            "Parameters updated; re-run the build to pick up the new parameter declaration.".to_string()
        })
    } else {
        None
    };

    InjectorOutcome {
        needs_update,
        terminate,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamType;
    use serde_yaml::Value as YamlValue;

    fn param(name: &str) -> Param {
        Param {
            name: Some(YamlValue::String(name.to_string())),
            param_type: Some(ParamType::String),
            default: None,
            choices: None,
            description: None,
            trim: None,
            regex: None,
            regex_replace: None,
            on_empty: None,
        }
    }

    #[test]
    fn needs_update_when_schema_name_is_missing_from_current_params() {
        let schema = vec![param("FOO"), param("BAR")];
        let current: HashMap<String, String> = [("FOO".to_string(), "x".to_string())].into();

        let outcome = reconcile(&schema, &current, false, false);
        assert!(outcome.needs_update);
        assert!(outcome.terminate);
        assert!(outcome.message.is_some());
    }

    #[test]
    fn no_update_when_schema_matches_current_params_exactly() {
        let schema = vec![param("FOO")];
        let current: HashMap<String, String> = [("FOO".to_string(), "x".to_string())].into();

        let outcome = reconcile(&schema, &current, false, false);
        assert!(!outcome.needs_update);
        assert!(!outcome.terminate);
        assert!(outcome.message.is_none());
    }

    #[test]
    fn update_parameters_flag_forces_termination_even_when_schema_matches() {
        let schema = vec![param("FOO")];
        let current: HashMap<String, String> = [("FOO".to_string(), "x".to_string())].into();

        let outcome = reconcile(&schema, &current, true, false);
        assert!(!outcome.needs_update);
        assert!(outcome.terminate);
    }

    #[test]
    fn dry_run_still_emits_termination_message() {
        let schema = vec![param("FOO")];
        let current = HashMap::new();

        let outcome = reconcile(&schema, &current, false, true);
        assert!(outcome.terminate);
        assert!(outcome.message.unwrap().contains("dry run"));
    }

    #[test]
    fn reinjecting_with_the_now_declared_schema_performs_no_further_injection() {
        let schema = vec![param("FOO"), param("BAR")];
        let current: HashMap<String, String> = schema
            .iter()
            .map(|p| {
                (
                    crate::coerce::coerce_to_string(p.name.as_ref().unwrap()).unwrap(),
                    String::new(),
                )
            })
            .collect();

        let first = reconcile(&schema, &current, false, false);
        assert!(!first.needs_update);
    }
}
