// Coercion helpers for loosely-typed YAML scalars.
//
// The donor schema leaned on dynamic-language `instanceof` chains to accept a string,
// a number, or a boolean interchangeably wherever a "string-convertible" or
// "boolean-convertible" key was documented. This module is the single place those
// coercion rules live: numeric and boolean scalars coerce to string, and the strings
// "true"/"false" (any case) coerce to boolean, matching the source behavior called out
// in the design notes.

use serde_yaml::Value as YamlValue;

/// Coerce a YAML scalar to a string, the way the donor's `String.valueOf`-style
/// conversion did: numbers and booleans render as their literal text, sequences and
/// mappings are rejected (they are never "string-convertible").
pub fn coerce_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Null => None,
        YamlValue::Sequence(_) | YamlValue::Mapping(_) | YamlValue::Tagged(_) => None,
    }
}

/// Coerce a YAML scalar to a bool. Accepts a literal bool, or the case-insensitive
/// strings "true"/"false". Everything else is not boolean-convertible.
pub fn coerce_to_bool(value: &YamlValue) -> Option<bool> {
    match value {
        YamlValue::Bool(b) => Some(*b),
        YamlValue::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// True when the value is a YAML sequence.
pub fn is_list(value: &YamlValue) -> bool {
    matches!(value, YamlValue::Sequence(_))
}

/// A value that may be given as a single string or as an ordered list of strings.
/// Used for `Param.regex`, which the spec concatenates at use time rather than
/// matching element-by-element.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    Single(String),
    List(Vec<String>),
}

impl StringOrList {
    /// Concatenate into the single pattern the regex engine actually matches against.
    pub fn concat(&self) -> String {
        match self {
            StringOrList::Single(s) => s.clone(),
            StringOrList::List(items) => items.concat(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_numeric_and_bool_scalars_to_string() {
        assert_eq!(
            coerce_to_string(&YamlValue::Number(42.into())),
            Some("42".to_string())
        );
        assert_eq!(
            coerce_to_string(&YamlValue::Bool(true)),
            Some("true".to_string())
        );
        assert_eq!(
            coerce_to_string(&YamlValue::String("x".into())),
            Some("x".to_string())
        );
    }

    #[test]
    fn rejects_collections_for_string_coercion() {
        assert_eq!(coerce_to_string(&YamlValue::Sequence(vec![])), None);
    }

    #[test]
    fn coerces_case_insensitive_bool_strings() {
        assert_eq!(coerce_to_bool(&YamlValue::String("TRUE".into())), Some(true));
        assert_eq!(coerce_to_bool(&YamlValue::String("False".into())), Some(false));
        assert_eq!(coerce_to_bool(&YamlValue::String("maybe".into())), None);
    }

    #[test]
    fn string_or_list_concatenates_list_without_separator() {
        let v = StringOrList::List(vec!["[0-9]+".to_string(), "-[a-z]+".to_string()]);
        assert_eq!(v.concat(), "[0-9]+-[a-z]+");
    }
}
