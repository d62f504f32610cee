//! Branch-expression evaluation for `condition` and `switch` nodes.

use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::path;
use crate::template;

/// Normalizes the `parameters.conditions` value into its ordered entries:
/// either a list of strings or one newline-delimited block. Blank lines and
/// comments are kept in place because branch indices (`output-i`) are
/// positional over the raw list.
pub fn entries(raw: &Value) -> Vec<String> {
    match raw {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect(),
        Value::String(text) => text.lines().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Blank lines and `//` / `#` comments never match but still occupy a
/// branch index.
pub fn is_skippable(entry: &str) -> bool {
    let trimmed = entry.trim();
    trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with('#')
}

/// Evaluates one boolean expression against the context.
///
/// Supported forms: `path == "literal"`, `path != "literal"` and any
/// number of them combined with `||`. The left side is a context path
/// (optionally prefixed with `context.`); comparison is an exact,
/// case-sensitive string compare, with missing values and nulls reading as
/// the empty string. The intent classifier stores lowercased intents, so
/// scenario authors compare against lowercase names.
pub fn evaluate(expr: &str, context: &Map<String, Value>) -> Result<bool, ConfigError> {
    let expr = expr.trim();

    if expr.contains("||") {
        for part in expr.split("||") {
            if evaluate(part, context)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    if let Some((left, right)) = expr.split_once("!=") {
        return Ok(lookup(left, context) != literal(right));
    }
    if let Some((left, right)) = expr.split_once("==") {
        return Ok(lookup(left, context) == literal(right));
    }

    Err(ConfigError(format!("unrecognized condition: {expr}")))
}

fn lookup(left: &str, context: &Map<String, Value>) -> String {
    match path::get_in(context, left.trim()) {
        Some(value) => template::render_value(&value),
        None => String::new(),
    }
}

fn literal(right: &str) -> String {
    right.trim().replace('"', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn equality_matches_exact_string() {
        let context = ctx(json!({"intent": "check_balance"}));
        assert!(evaluate(r#"intent == "check_balance""#, &context).unwrap());
        assert!(!evaluate(r#"intent == "Check_Balance""#, &context).unwrap());
        assert!(evaluate(r#"context.intent == "check_balance""#, &context).unwrap());
    }

    #[test]
    fn inequality_and_missing_values() {
        let context = ctx(json!({"intent": "greeting"}));
        assert!(evaluate(r#"intent != "check_balance""#, &context).unwrap());
        // missing key reads as empty string
        assert!(evaluate(r#"unknown == """#, &context).unwrap());
        assert!(!evaluate(r#"unknown == "anything""#, &context).unwrap());
    }

    #[test]
    fn or_combinator_takes_any_true_branch() {
        let context = ctx(json!({"a": "1", "b": "5"}));
        assert!(evaluate(r#"a == "1" || b == "2""#, &context).unwrap());
        assert!(evaluate(r#"a == "9" || b == "5""#, &context).unwrap());
        assert!(!evaluate(r#"a == "9" || b == "9""#, &context).unwrap());
    }

    #[test]
    fn dotted_paths_and_non_string_values() {
        let context = ctx(json!({"user": {"age": 30}, "flag": true}));
        assert!(evaluate(r#"user.age == "30""#, &context).unwrap());
        assert!(evaluate(r#"flag == "true""#, &context).unwrap());
    }

    #[test]
    fn unrecognized_expression_is_config_error() {
        let context = ctx(json!({}));
        assert!(evaluate("intent > 5", &context).is_err());
        assert!(evaluate("just words", &context).is_err());
    }

    #[test]
    fn entries_accepts_list_and_text_forms() {
        let list = json!([r#"a == "1""#, r#"b == "2""#]);
        assert_eq!(entries(&list).len(), 2);

        let text = json!("a == \"1\"\n// comment\n\nb == \"2\"");
        let parsed = entries(&text);
        assert_eq!(parsed.len(), 4);
        assert!(is_skippable(&parsed[1]));
        assert!(is_skippable(&parsed[2]));
        assert!(!is_skippable(&parsed[3]));
    }
}
