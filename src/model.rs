// Data model for a pipeline settings document (§3).
//
// Parsing here is deliberately permissive: almost every field is `Option` even where
// the spec calls it mandatory, because enforcing the mandatory-ness is the schema
// validator's job (§4.2), not serde's. A document that fails strict validation must
// still *parse*, so every error in the validator's table can be reported in one pass
// instead of aborting at the first missing field.

use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use std::collections::HashMap;

use crate::coerce::StringOrList;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PipelineSettings {
    #[serde(default)]
    pub parameters: ParameterGroups,

    #[serde(default)]
    pub stages: Vec<Stage>,

    /// Raw discriminated maps; resolved into a typed [`crate::dispatcher::ResolvedAction`]
    /// lazily, once templating has run, by the dispatcher.
    #[serde(default)]
    pub actions: HashMap<String, ActionLink>,

    #[serde(default)]
    pub playbooks: HashMap<String, String>,

    #[serde(default)]
    pub inventories: HashMap<String, String>,

    #[serde(default)]
    pub scripts: HashMap<String, YamlValue>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ParameterGroups {
    #[serde(default)]
    pub required: Vec<Param>,
    #[serde(default)]
    pub optional: Vec<Param>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Text,
    Password,
    Boolean,
    Choice,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Text => "text",
            ParamType::Password => "password",
            ParamType::Boolean => "boolean",
            ParamType::Choice => "choice",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Param {
    /// Present on a well-formed document; `None` is itself a validator error.
    #[serde(default)]
    pub name: Option<YamlValue>,

    #[serde(rename = "type", default)]
    pub param_type: Option<ParamType>,

    #[serde(default)]
    pub default: Option<YamlValue>,

    #[serde(default)]
    pub choices: Option<YamlValue>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub trim: Option<bool>,

    #[serde(default)]
    pub regex: Option<StringOrList>,

    #[serde(default)]
    pub regex_replace: Option<RegexReplace>,

    #[serde(default)]
    pub on_empty: Option<OnEmpty>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegexReplace {
    pub regex: StringOrList,
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OnEmpty {
    #[serde(default)]
    pub assign: Option<YamlValue>,
    #[serde(default = "default_true")]
    pub fail: bool,
    #[serde(default)]
    pub warn: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Stage {
    pub name: String,
    #[serde(default)]
    pub parallel: Option<YamlValue>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Action {
    pub action: String,
    #[serde(default)]
    pub node: Option<NodeSpec>,
    #[serde(default)]
    pub dir: Option<YamlValue>,
    #[serde(default)]
    pub build_name: Option<YamlValue>,
    #[serde(default)]
    pub before_message: Option<YamlValue>,
    #[serde(default)]
    pub after_message: Option<YamlValue>,
    #[serde(default)]
    pub success_message: Option<YamlValue>,
    #[serde(default)]
    pub fail_message: Option<YamlValue>,
    #[serde(default)]
    pub ignore_fail: Option<YamlValue>,
    #[serde(default)]
    pub stop_on_fail: Option<YamlValue>,
    #[serde(default)]
    pub success_only: Option<YamlValue>,
    #[serde(default)]
    pub fail_only: Option<YamlValue>,
}

/// Either a bare node name, `null` (any host), or an explicit `{name|label, pattern}`
/// spec. The untagged enum mirrors the donor's `BoolOrExpression`/`DependsOn` pattern
/// of letting serde pick the right shape instead of hand-rolling a visitor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Any(Option<NullNode>),
    Name(String),
    Spec {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        pattern: Option<YamlValue>,
    },
}

/// Placeholder so `NodeSpec::Any` can carry the `null` case through the untagged enum;
/// never constructed with `Some`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NullNode;

/// A raw discriminated action-link map, kept as written so the dispatcher can apply
/// the "first discriminator in the ordered set wins" rule itself (§3, §4.8).
pub type ActionLink = HashMap<String, YamlValue>;

/// The ordered set of discriminator keys. Earlier entries win when a document
/// erroneously supplies more than one.
pub const DISCRIMINATORS: &[&str] = &[
    "repo_url",
    "collections",
    "playbook",
    "pipeline",
    "stash",
    "unstash",
    "artifacts",
    "script",
    "report",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_settings_document() {
        let yaml = r#"
parameters:
  required:
    - name: FOO
      type: string
stages:
  - name: build
    actions:
      - action: a1
actions:
  a1:
    artifacts: "*.log"
"#;
        let settings: PipelineSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.parameters.required.len(), 1);
        assert_eq!(settings.stages.len(), 1);
        assert_eq!(settings.stages[0].actions[0].action, "a1");
        assert!(settings.actions["a1"].contains_key("artifacts"));
    }

    #[test]
    fn node_spec_accepts_bare_name_and_null() {
        let name: NodeSpec = serde_yaml::from_str("build-1").unwrap();
        assert!(matches!(name, NodeSpec::Name(n) if n == "build-1"));

        let any: NodeSpec = serde_yaml::from_str("null").unwrap();
        assert!(matches!(any, NodeSpec::Any(None)));

        let spec: NodeSpec = serde_yaml::from_str("label: builders\npattern: true").unwrap();
        assert!(matches!(spec, NodeSpec::Spec { label: Some(l), .. } if l == "builders"));
    }

    #[test]
    fn discriminators_are_in_spec_order() {
        assert_eq!(DISCRIMINATORS[0], "repo_url");
        assert_eq!(DISCRIMINATORS.last(), Some(&"report"));
    }
}
