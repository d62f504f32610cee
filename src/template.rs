//! `{path}` placeholder substitution against the session context.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::path;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder regex"));

/// Renders a context value into placeholder output: strings appear bare,
/// null as the empty string, everything else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replaces every `{path}` placeholder that resolves against the context.
///
/// Paths support the full dotted/indexed syntax of [`crate::path`],
/// including an optional `context.` prefix. Placeholders whose path does
/// not resolve are left verbatim so broken scenarios stay debuggable.
pub fn resolve(template: &str, context: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match path::get_in(context, &caps[1]) {
                Some(value) => render_value(&value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Recursively substitutes placeholders in every string of a JSON value.
/// Used for api-request bodies and headers before they go on the wire.
pub fn resolve_value(value: &Value, context: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(resolve(s, context)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, context)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_value(v, context)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn substitutes_simple_keys() {
        let context = ctx(json!({"last_answer": "Alex"}));
        assert_eq!(
            resolve("Приятно познакомиться, {last_answer}!", &context),
            "Приятно познакомиться, Alex!"
        );
    }

    #[test]
    fn substitutes_nested_and_indexed_paths() {
        let context = ctx(json!({
            "api_response": {"items": [{"name": "card"}, {"name": "loan"}]}
        }));
        assert_eq!(
            resolve("Product: {api_response.items[1].name}", &context),
            "Product: loan"
        );
    }

    #[test]
    fn accepts_context_prefix() {
        let context = ctx(json!({"intent": "check_balance"}));
        assert_eq!(resolve("intent={context.intent}", &context), "intent=check_balance");
    }

    #[test]
    fn unresolved_placeholders_stay_verbatim() {
        let context = ctx(json!({"known": "yes"}));
        assert_eq!(
            resolve("{known} and {unknown.path}", &context),
            "yes and {unknown.path}"
        );
    }

    #[test]
    fn renders_numbers_and_objects() {
        let context = ctx(json!({"count": 3, "user": {"name": "Alex"}}));
        assert_eq!(resolve("count={count}", &context), "count=3");
        assert_eq!(resolve("user={user}", &context), r#"user={"name":"Alex"}"#);
    }

    #[test]
    fn resolve_value_walks_structures() {
        let context = ctx(json!({"card": "1234", "user_id": 7}));
        let body = json!({
            "card": "{card}",
            "nested": {"id": "{user_id}"},
            "list": ["{card}", 1],
            "untouched": 42
        });
        assert_eq!(
            resolve_value(&body, &context),
            json!({
                "card": "1234",
                "nested": {"id": "7"},
                "list": ["1234", 1],
                "untouched": 42
            })
        );
    }
}
