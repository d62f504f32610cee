//! Named extraction scripts for `parse` nodes.
//!
//! A parse script is matched by the context fields it mentions; each
//! recognized extraction reads the raw user input and writes structured
//! fields back into the context. A non-empty script that names no known
//! extraction counts as a parse failure and routes to the node's `error`
//! branch.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::context::SessionContext;

static CARD_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").expect("card regex"));

pub fn run_script(script: &str, input: &str, ctx: &mut SessionContext) -> bool {
    if script.trim().is_empty() {
        return true;
    }

    let mut recognized = false;

    if script.contains("context.operation") {
        recognized = true;
        let lowered = input.to_lowercase();
        let operation = if lowered.contains("баланс") || lowered == "1" {
            "balance"
        } else if lowered.contains("закрыть") || lowered == "2" {
            "close"
        } else if lowered.contains("блок") || lowered == "3" {
            "block"
        } else if lowered.contains("история") || lowered == "4" {
            "history"
        } else if lowered.contains("поддержк") || lowered == "5" {
            "support"
        } else {
            "unknown"
        };
        ctx.insert("operation", json!(operation));
        ctx.insert("validChoice", json!(operation != "unknown"));
    }

    if script.contains("context.wantsBalance") {
        recognized = true;
        let lowered = input.to_lowercase();
        let wants = lowered.contains("да") || lowered.contains("yes");
        ctx.insert("wantsBalance", json!(wants));
    }

    if script.contains("context.cardNumber") {
        recognized = true;
        ctx.insert("cardNumber", json!(input));
        ctx.insert("validCard", json!(CARD_NUMBER.is_match(input.trim())));
    }

    recognized
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_menu_accepts_digits_and_keywords() {
        let mut ctx = SessionContext::new();
        assert!(run_script("context.operation = ...", "1", &mut ctx));
        assert_eq!(ctx.get("operation"), Some(&json!("balance")));
        assert_eq!(ctx.get("validChoice"), Some(&json!(true)));

        assert!(run_script("context.operation = ...", "хочу узнать баланс", &mut ctx));
        assert_eq!(ctx.get("operation"), Some(&json!("balance")));

        assert!(run_script("context.operation = ...", "что-то другое", &mut ctx));
        assert_eq!(ctx.get("operation"), Some(&json!("unknown")));
        assert_eq!(ctx.get("validChoice"), Some(&json!(false)));
    }

    #[test]
    fn yes_no_extraction_sets_flag() {
        let mut ctx = SessionContext::new();
        assert!(run_script("context.wantsBalance", "да, давайте", &mut ctx));
        assert_eq!(ctx.get("wantsBalance"), Some(&json!(true)));

        assert!(run_script("context.wantsBalance", "нет", &mut ctx));
        assert_eq!(ctx.get("wantsBalance"), Some(&json!(false)));
    }

    #[test]
    fn card_number_requires_four_digits() {
        let mut ctx = SessionContext::new();
        assert!(run_script("context.cardNumber", "1234", &mut ctx));
        assert_eq!(ctx.get("validCard"), Some(&json!(true)));

        assert!(run_script("context.cardNumber", "12ab", &mut ctx));
        assert_eq!(ctx.get("validCard"), Some(&json!(false)));
    }

    #[test]
    fn unknown_script_fails_empty_script_passes() {
        let mut ctx = SessionContext::new();
        assert!(run_script("", "anything", &mut ctx));
        assert!(!run_script("context.somethingElse", "anything", &mut ctx));
    }
}
