// String Templater (§4.5).
//
// A small hand-written scanner stands in for the donor's `expression::lexer`
// (`extract_expressions`), trimmed down to the two token shapes the spec actually
// defines — `$name` and `${name}` — rather than the donor's four-syntax macro/
// compile-time/runtime grammar. Lookup order (`extras` before `env`) and the
// undefined-variable-is-always-an-error rule (§7) are preserved from the donor's
// `ExpressionEngine::resolve_variable_path`.

use std::collections::HashMap;

/// Result of expanding a single string.
pub struct Expansion {
    /// True if at least one `$name`/`${name}` token was found in the input.
    pub had_vars: bool,
    /// False if any token resolved to an undefined or malformed name.
    pub ok: bool,
    pub expanded: String,
    pub diagnostics: Vec<String>,
}

/// Expand `$name`/`${name}` references in `s`, consulting `extras` (built-ins) before
/// `env`. An identifier must match `[A-Za-z_][A-Za-z0-9_]*`; anything else (an empty
/// `${}`, a name starting with a digit) is malformed and substitutes the empty string
/// while flipping `ok` to false, same as an undefined name (§4.5, §7).
pub fn expand(s: &str, env: &HashMap<String, String>, extras: &HashMap<String, String>) -> Expansion {
    let mut had_vars = false;
    let mut ok = true;
    let mut diagnostics = Vec::new();
    let mut out = String::with_capacity(s.len());

    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        // Lookahead for ${name} or $name.
        if i + 1 < chars.len() && chars[i + 1] == '{' {
            if let Some(end) = find_closing_brace(&chars, i + 2) {
                let name: String = chars[i + 2..end].iter().collect();
                had_vars = true;
                match lookup(&name, env, extras) {
                    Some(value) => out.push_str(&value),
                    None => {
                        ok = false;
                        diagnostics.push(format!("undefined or malformed variable '${{{name}}}'"));
                    }
                }
                i = end + 1;
                continue;
            }
        }

        if let Some(end) = scan_identifier(&chars, i + 1) {
            if end > i + 1 {
                let name: String = chars[i + 1..end].iter().collect();
                had_vars = true;
                match lookup(&name, env, extras) {
                    Some(value) => out.push_str(&value),
                    None => {
                        ok = false;
                        diagnostics.push(format!("undefined or malformed variable '${name}'"));
                    }
                }
                i = end;
                continue;
            }
        }

        // A bare `$` not followed by a valid identifier: passed through literally.
        out.push('$');
        i += 1;
    }

    Expansion {
        had_vars,
        ok,
        expanded: out,
        diagnostics,
    }
}

/// Apply [`expand`] to a named subset of a map's string-valued keys, short-circuiting
/// `ok` across calls the way the donor's `expand_keys` threaded `prev_ok` through a
/// sequence of validations.
pub fn expand_keys(
    m: &HashMap<String, String>,
    keys: &[&str],
    env: &HashMap<String, String>,
    extras: &HashMap<String, String>,
    prev_ok: bool,
) -> (bool, HashMap<String, String>) {
    let mut ok = prev_ok;
    let mut out = m.clone();
    for key in keys {
        if let Some(value) = m.get(*key) {
            let result = expand(value, env, extras);
            ok = ok && result.ok;
            out.insert((*key).to_string(), result.expanded);
        }
    }
    (ok, out)
}

fn lookup(name: &str, env: &HashMap<String, String>, extras: &HashMap<String, String>) -> Option<String> {
    if !is_valid_identifier(name) {
        return None;
    }
    extras.get(name).or_else(|| env.get(name)).cloned()
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn find_closing_brace(chars: &[char], start: usize) -> Option<usize> {
    chars[start..].iter().position(|&c| c == '}').map(|p| start + p)
}

fn scan_identifier(chars: &[char], start: usize) -> Option<usize> {
    let mut end = start;
    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    Some(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps(env: &[(&str, &str)], extras: &[(&str, &str)]) -> (HashMap<String, String>, HashMap<String, String>) {
        (
            env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            extras.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        )
    }

    #[test]
    fn expands_bare_and_braced_forms() {
        let (env, extras) = maps(&[("FOO", "bar")], &[]);
        let result = expand("value=$FOO and ${FOO}!", &env, &extras);
        assert!(result.had_vars);
        assert!(result.ok);
        assert_eq!(result.expanded, "value=bar and bar!");
    }

    #[test]
    fn extras_take_priority_over_env() {
        let (env, extras) = maps(&[("FOO", "from-env")], &[("FOO", "from-extras")]);
        let result = expand("$FOO", &env, &extras);
        assert_eq!(result.expanded, "from-extras");
    }

    #[test]
    fn undefined_variable_is_an_error_with_empty_substitution() {
        let (env, extras) = maps(&[], &[]);
        let result = expand("hello $MISSING", &env, &extras);
        assert!(!result.ok);
        assert_eq!(result.expanded, "hello ");
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn string_without_tokens_is_unchanged_and_had_vars_false() {
        let (env, extras) = maps(&[], &[]);
        let result = expand("no variables here", &env, &extras);
        assert!(!result.had_vars);
        assert!(result.ok);
        assert_eq!(result.expanded, "no variables here");
    }

    #[test]
    fn expansion_is_idempotent() {
        let (env, extras) = maps(&[("FOO", "bar")], &[]);
        let once = expand("$FOO baz", &env, &extras).expanded;
        let twice = expand(&once, &env, &extras).expanded;
        assert_eq!(once, twice);
    }
}
