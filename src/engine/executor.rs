//! Node executors: the transition function for every node kind.
//!
//! Each executor mutates the session context, optionally emits a
//! user-visible message, and returns a [`Next`] directive for the cascade
//! loop. Collaborator failures are caught here and routed through the
//! node's declared `error`/`timeout` branch so they never escape as
//! faults.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::{DIALOG_ENDED_MESSAGE, Next, StepOutcome};
use crate::collaborator::Collaborators;
use crate::collaborator::rest::ApiCall;
use crate::condition;
use crate::config::EngineConfig;
use crate::context::{CallFrame, SessionContext, keys};
use crate::engine::parse;
use crate::error::{EngineError, GraphError};
use crate::scenario::{NodeKind, Scenario, ScenarioNode};
use crate::template;

const TRANSFER_MESSAGE: &str = "Transferring you to an operator...";
const LLM_DEFAULT_PROMPT: &str = "Answer the user's question";
const LLM_FALLBACK: &str = "Sorry, the AI model could not be reached right now.";

pub(crate) async fn execute(
    node: &ScenarioNode,
    scenario: &Scenario,
    input: &str,
    ctx: &mut SessionContext,
    services: &Collaborators,
    config: &EngineConfig,
) -> Result<StepOutcome, EngineError> {
    debug!(node = %node.id, kind = %node.kind.name(), "executing node");

    match &node.kind {
        NodeKind::Announce => Ok(announce(node, ctx)),
        NodeKind::Ask => Ok(ask(node, ctx)),
        NodeKind::Parse => Ok(parse_input(node, input, ctx)),
        NodeKind::Condition | NodeKind::Switch => Ok(condition_switch(node, scenario, ctx)),
        NodeKind::ApiRequest => Ok(api_request(node, ctx, services, config).await),
        NodeKind::NluRequest => Ok(nlu_request(node, input, ctx, services).await),
        NodeKind::ScenarioJump => scenario_jump(node, ctx, services).await,
        NodeKind::SubFlow => sub_flow(node, ctx, services).await,
        NodeKind::End => end(node, ctx, services).await,
        NodeKind::EndDialog => Ok(end_dialog(node, ctx)),
        NodeKind::Transfer => Ok(transfer(node, ctx)),
        NodeKind::LlmCall => Ok(llm_call(node, ctx, services).await),
        NodeKind::Notification => Ok(notification(node, ctx)),
        NodeKind::Wait => Ok(wait(node).await),
        NodeKind::ContextEdit => Ok(context_edit(node, ctx)),
        NodeKind::Calculate => Ok(calculate(node, ctx)),
        NodeKind::Unknown(kind) => Ok(StepOutcome::diagnostic(
            kind,
            format!("Unknown node type: {kind}"),
        )),
    }
}

fn default_next(node: &ScenarioNode) -> Option<String> {
    node.first_next().map(str::to_string)
}

fn branch_or_default(node: &ScenarioNode, key: &str) -> Option<String> {
    node.branch(key).map(str::to_string).or_else(|| default_next(node))
}

fn advance(node: &ScenarioNode, message: Option<String>, next: Option<String>) -> StepOutcome {
    StepOutcome {
        kind: node.kind.name().to_string(),
        message,
        next: Next::Advance(next),
    }
}

fn announce(node: &ScenarioNode, ctx: &SessionContext) -> StepOutcome {
    let message = node.param_str("message").unwrap_or_default();
    let message = template::resolve(message, ctx.as_map());
    advance(node, Some(message), default_next(node))
}

fn ask(node: &ScenarioNode, ctx: &mut SessionContext) -> StepOutcome {
    let question = node.param_str("question").unwrap_or_default();
    let question = template::resolve(question, ctx.as_map());
    let input_type = node.param_str("inputType").unwrap_or("text");
    ctx.set_waiting(&node.id, input_type);

    StepOutcome {
        kind: "ask".to_string(),
        message: Some(question),
        next: Next::Suspend(default_next(node)),
    }
}

fn parse_input(node: &ScenarioNode, input: &str, ctx: &mut SessionContext) -> StepOutcome {
    let script = node.param_str("script").unwrap_or_default();
    let parsed = parse::run_script(script, input, ctx);
    ctx.set_flag(keys::WAITING_FOR_INPUT, false);

    let next = if parsed {
        default_next(node)
    } else {
        branch_or_default(node, "error")
    };
    advance(node, None, next)
}

fn condition_switch(node: &ScenarioNode, scenario: &Scenario, ctx: &SessionContext) -> StepOutcome {
    let kind = node.kind.name();

    if let Some(raw) = node.param("conditions") {
        let entries = condition::entries(raw);
        if entries.is_empty() {
            return StepOutcome::diagnostic(kind, format!("Node `{}` has empty conditions", node.id));
        }

        for (i, entry) in entries.iter().enumerate() {
            if condition::is_skippable(entry) {
                continue;
            }
            match condition::evaluate(entry, ctx.as_map()) {
                Ok(false) => {}
                Ok(true) => {
                    let target = scenario
                        .target_by_handle(&node.id, &format!("output-{i}"))
                        .map(str::to_string)
                        .or_else(|| node.next_nodes.get(i).filter(|t| !t.is_empty()).cloned());
                    if let Some(target) = target {
                        info!(node = %node.id, branch = i, "condition matched: {}", entry.trim());
                        return advance(node, None, Some(target));
                    }
                }
                Err(e) => {
                    return StepOutcome::diagnostic(
                        kind,
                        format!("Condition configuration error in `{}`: {e}", node.id),
                    );
                }
            }
        }

        // no match: the ELSE handle, or the last declared successor
        let else_target = scenario
            .target_by_handle(&node.id, &format!("output-{}", entries.len()))
            .map(str::to_string)
            .or_else(|| node.next_nodes.last().filter(|t| !t.is_empty()).cloned());
        info!(node = %node.id, "no condition matched, taking else branch");
        return advance(node, None, else_target);
    }

    // legacy single-expression form: `parameters.condition` routed through
    // the named true/false/default branches
    if let Some(expr) = node.param_str("condition") {
        return match condition::evaluate(expr, ctx.as_map()) {
            Ok(result) => {
                let key = if result { "true" } else { "false" };
                let target = node
                    .branch(key)
                    .or_else(|| node.branch("default"))
                    .map(str::to_string)
                    .or_else(|| default_next(node));
                advance(node, None, target)
            }
            Err(e) => StepOutcome::diagnostic(
                kind,
                format!("Condition configuration error in `{}`: {e}", node.id),
            ),
        };
    }

    StepOutcome::diagnostic(kind, format!("Node `{}` has no conditions or parameters", node.id))
}

async fn api_request(
    node: &ScenarioNode,
    ctx: &mut SessionContext,
    services: &Collaborators,
    config: &EngineConfig,
) -> StepOutcome {
    let kind = node.kind.name();

    let url = match node.param_str("url") {
        Some(url) => url.to_string(),
        None => {
            let endpoint = node.param_str("endpoint").unwrap_or_default();
            if let Some(base) = node.param_str("baseUrl") {
                format!("{base}{endpoint}")
            } else if let Some(service) = node.param_str("service") {
                match config.service_urls.get(service) {
                    Some(base) => format!("{}{endpoint}", base.trim_end_matches('/')),
                    None => {
                        return StepOutcome::diagnostic(
                            kind,
                            format!("No base URL configured for service `{service}`"),
                        );
                    }
                }
            } else {
                return StepOutcome::diagnostic(
                    kind,
                    format!("Node `{}` has no url, baseUrl or service", node.id),
                );
            }
        }
    };
    let url = template::resolve(&url, ctx.as_map());
    let method = node.param_str("method").unwrap_or("GET").to_string();

    let mut headers = HashMap::new();
    match node.param("headers") {
        Some(Value::Object(map)) => {
            for (name, value) in map {
                let raw = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                headers.insert(name.clone(), template::resolve(&raw, ctx.as_map()));
            }
        }
        Some(Value::String(s)) if !s.trim().is_empty() => {
            match serde_json::from_str::<HashMap<String, String>>(s) {
                Ok(map) => {
                    for (name, value) in map {
                        headers.insert(name, template::resolve(&value, ctx.as_map()));
                    }
                }
                Err(_) => warn!(node = %node.id, "failed to parse headers JSON: {s}"),
            }
        }
        _ => {}
    }

    let body = match node.param("body").or_else(|| node.param("data")) {
        Some(value @ (Value::Object(_) | Value::Array(_))) => {
            Some(template::resolve_value(value, ctx.as_map()))
        }
        Some(Value::String(s)) if !s.trim().is_empty() => {
            let substituted = template::resolve(s, ctx.as_map());
            match serde_json::from_str::<Value>(&substituted) {
                Ok(parsed) => Some(parsed),
                Err(_) => Some(json!({ "_raw_body": substituted })),
            }
        }
        _ => None,
    };

    let timeout_ms = node
        .param("timeout")
        .and_then(Value::as_u64)
        .unwrap_or(config.default_api_timeout_ms);

    info!(node = %node.id, method = %method, url = %url, "api request");
    let call = ApiCall {
        method,
        url,
        headers,
        body,
        timeout: Duration::from_millis(timeout_ms),
    };

    match services.rest.call(call).await {
        Ok(reply) => {
            ctx.insert("api_response", reply.body.clone());
            let keyed = format!("api_response_{}", node.id);
            ctx.insert(&keyed, reply.body.clone());
            ctx.insert("api_status_code", json!(reply.status));

            let branch = if reply.is_success() { "success" } else { "error" };
            advance(node, None, branch_or_default(node, branch))
        }
        Err(e) if e.is_timeout() => {
            warn!(node = %node.id, "api request timed out");
            ctx.insert("api_error", json!("timeout"));
            let next = node
                .branch("timeout")
                .or_else(|| node.branch("error"))
                .map(str::to_string)
                .or_else(|| default_next(node));
            advance(node, None, next)
        }
        Err(e) => {
            warn!(node = %node.id, "api request failed: {e}");
            ctx.insert("api_error", json!(e.to_string()));
            advance(node, None, branch_or_default(node, "error"))
        }
    }
}

async fn nlu_request(
    node: &ScenarioNode,
    input: &str,
    ctx: &mut SessionContext,
    services: &Collaborators,
) -> StepOutcome {
    match services.classifier.analyze(input, ctx).await {
        Ok(analysis) => {
            ctx.insert("nlu_response", serde_json::to_value(&analysis).unwrap_or(Value::Null));
            ctx.insert("intent", json!(analysis.intent));
            ctx.insert("entities", Value::Array(analysis.entities));
            ctx.insert("confidence", json!(analysis.confidence));
            ctx.insert(
                "suggested_scenario",
                json!(analysis.suggested_scenario.unwrap_or_default()),
            );
            advance(node, None, branch_or_default(node, "success"))
        }
        Err(e) => {
            warn!(node = %node.id, "nlu request failed: {e}");
            ctx.insert("nlu_error", json!(e.to_string()));
            advance(node, None, branch_or_default(node, "error"))
        }
    }
}

async fn scenario_jump(
    node: &ScenarioNode,
    ctx: &mut SessionContext,
    services: &Collaborators,
) -> Result<StepOutcome, EngineError> {
    let Some(target) = node.param_str("target_scenario").filter(|s| !s.is_empty()) else {
        return Ok(StepOutcome::diagnostic(
            node.kind.name(),
            format!("Scenario jump node `{}` has no target_scenario", node.id),
        ));
    };

    let scenario = services.scenarios.scenario(target).await?;
    let entry = scenario
        .entry_node()
        .ok_or_else(|| GraphError::NodeNotFound(format!("entry of `{target}`")))?
        .to_string();

    info!(node = %node.id, target, "one-way jump to scenario");
    ctx.clear_call_stack();
    ctx.set_scenario_id(target);
    ctx.advance_to(Some(&entry));

    Ok(StepOutcome {
        kind: "scenario_jump".to_string(),
        message: None,
        next: Next::Enter { scenario, node: entry },
    })
}

async fn sub_flow(
    node: &ScenarioNode,
    ctx: &mut SessionContext,
    services: &Collaborators,
) -> Result<StepOutcome, EngineError> {
    let Some(target) = node.param_str("target_scenario").filter(|s| !s.is_empty()) else {
        return Ok(StepOutcome::diagnostic(
            node.kind.name(),
            format!("Sub-flow node `{}` has no target_scenario", node.id),
        ));
    };

    let scenario = services.scenarios.scenario(target).await?;
    let entry = scenario
        .entry_node()
        .ok_or_else(|| GraphError::NodeNotFound(format!("entry of `{target}`")))?
        .to_string();

    info!(node = %node.id, target, "entering sub-flow");
    ctx.push_frame(CallFrame {
        scenario_id: ctx.scenario_id().map(str::to_string).unwrap_or_default(),
        node_id: node.id.clone(),
        next_node: default_next(node),
    });
    ctx.set_scenario_id(target);
    ctx.advance_to(Some(&entry));

    Ok(StepOutcome {
        kind: "sub-flow".to_string(),
        message: None,
        next: Next::Enter { scenario, node: entry },
    })
}

async fn end(
    node: &ScenarioNode,
    ctx: &mut SessionContext,
    services: &Collaborators,
) -> Result<StepOutcome, EngineError> {
    if !ctx.in_sub_flow() {
        return Ok(finish_dialog(node, ctx));
    }

    let Some(frame) = ctx.pop_frame() else {
        // sub-flow flag with an empty stack: degrade to ending the dialog
        warn!(node = %node.id, "call stack underflow, ending dialog");
        return Ok(finish_dialog(node, ctx));
    };

    info!(scenario = %frame.scenario_id, "returning from sub-flow");
    ctx.set_scenario_id(&frame.scenario_id);

    if let Some(next) = frame.next_node.filter(|n| !n.is_empty()) {
        match services.scenarios.scenario(&frame.scenario_id).await {
            Ok(scenario) => {
                ctx.advance_to(Some(&next));
                return Ok(StepOutcome {
                    kind: "end".to_string(),
                    message: None,
                    next: Next::Enter { scenario, node: next },
                });
            }
            Err(e) => error!("could not resume scenario `{}`: {e}", frame.scenario_id),
        }
    }

    ctx.advance_to(None);
    Ok(StepOutcome { kind: "end".to_string(), message: None, next: Next::Finished })
}

fn finish_dialog(node: &ScenarioNode, ctx: &mut SessionContext) -> StepOutcome {
    ctx.set_flag(keys::DIALOG_ENDED, true);
    ctx.advance_to(None);

    let message = node.param_str("message").unwrap_or(DIALOG_ENDED_MESSAGE);
    let message = template::resolve(message, ctx.as_map());
    StepOutcome { kind: "end".to_string(), message: Some(message), next: Next::Finished }
}

fn end_dialog(node: &ScenarioNode, ctx: &mut SessionContext) -> StepOutcome {
    info!(node = %node.id, "force ending dialog");
    ctx.clear_call_stack();
    ctx.clear_waiting();
    ctx.set_flag(keys::DIALOG_ENDED, true);
    ctx.advance_to(None);

    let message = node.param_str("message").unwrap_or(DIALOG_ENDED_MESSAGE);
    let message = template::resolve(message, ctx.as_map());
    StepOutcome { kind: "end_dialog".to_string(), message: Some(message), next: Next::Finished }
}

fn transfer(node: &ScenarioNode, ctx: &mut SessionContext) -> StepOutcome {
    info!(node = %node.id, "transferring to operator");
    ctx.set_flag(keys::TRANSFERRED_TO_OPERATOR, true);
    ctx.advance_to(None);

    let message = node.param_str("message").unwrap_or(TRANSFER_MESSAGE);
    let message = template::resolve(message, ctx.as_map());
    StepOutcome { kind: "transfer".to_string(), message: Some(message), next: Next::Finished }
}

async fn llm_call(
    node: &ScenarioNode,
    ctx: &mut SessionContext,
    services: &Collaborators,
) -> StepOutcome {
    let prompt = node.param_str("prompt").unwrap_or(LLM_DEFAULT_PROMPT);
    let prompt = template::resolve(prompt, ctx.as_map());

    let text = match services.generator.generate(&prompt).await {
        Ok(text) => text,
        Err(e) => {
            // generative failures become a fallback answer, never a fault
            warn!(node = %node.id, "llm call failed: {e}");
            LLM_FALLBACK.to_string()
        }
    };

    let keyed = format!("llm_response_{}", node.id);
    ctx.insert(&keyed, json!(text));
    ctx.insert("llm_response", json!(text));

    // system node: the result stays in context, nothing goes to the user
    advance(node, None, default_next(node))
}

fn notification(node: &ScenarioNode, ctx: &mut SessionContext) -> StepOutcome {
    let channel = node.param_str("type").unwrap_or("push").to_string();
    let template_name = node.param_str("template").unwrap_or_default();
    let recipient = node.param_str("recipient").unwrap_or_default();
    let recipient = template::resolve(recipient, ctx.as_map());

    // delivery stub: record the send so scenarios can branch on it
    info!(node = %node.id, channel = %channel, recipient = %recipient, template = %template_name, "sending notification");
    ctx.insert("notification_sent", json!(true));
    ctx.insert("notification_type", json!(channel));

    advance(node, None, default_next(node))
}

async fn wait(node: &ScenarioNode) -> StepOutcome {
    if let Some(ms) = node.param("duration").and_then(Value::as_u64).filter(|ms| *ms > 0) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
    advance(node, None, default_next(node))
}

fn read_operations(node: &ScenarioNode) -> Result<Vec<Value>, String> {
    match node.param("operations") {
        None => Err(format!("Node `{}` has no operations", node.id)),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::String(s)) => serde_json::from_str::<Vec<Value>>(s)
            .map_err(|e| format!("Failed to parse operations JSON in `{}`: {e}", node.id)),
        Some(_) => Err(format!("Node `{}` operations must be a list or JSON string", node.id)),
    }
}

fn context_edit(node: &ScenarioNode, ctx: &mut SessionContext) -> StepOutcome {
    let operations = match read_operations(node) {
        Ok(operations) => operations,
        Err(message) => return StepOutcome::diagnostic(node.kind.name(), message),
    };
    if operations.is_empty() {
        return advance(node, None, default_next(node));
    }

    let mut applied = 0usize;
    let mut failed = 0usize;

    for operation in &operations {
        let action = operation.get("action").and_then(Value::as_str);
        let target = operation.get("path").and_then(Value::as_str);
        let (Some(action), Some(target)) = (action, target) else {
            warn!(node = %node.id, "context operation missing action or path");
            failed += 1;
            continue;
        };

        let value = operation.get("value").cloned().unwrap_or(Value::Null);
        let value = template::resolve_value(&value, ctx.as_map());

        let ok = match action.to_lowercase().as_str() {
            "set" => crate::path::set_in(ctx.as_map_mut(), target, value),
            "delete" | "remove" => crate::path::delete_in(ctx.as_map_mut(), target),
            "add" => crate::path::push_in(ctx.as_map_mut(), target, value),
            "merge" => crate::path::merge_in(ctx.as_map_mut(), target, value),
            "clear" => crate::path::clear_in(ctx.as_map_mut(), target),
            other => {
                warn!(node = %node.id, "unknown context operation: {other}");
                false
            }
        };
        if ok { applied += 1 } else { failed += 1 }
    }

    info!(node = %node.id, applied, failed, "context edit finished");
    advance(node, None, default_next(node))
}

fn as_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn calculate(node: &ScenarioNode, ctx: &mut SessionContext) -> StepOutcome {
    let operations = match read_operations(node) {
        Ok(operations) => operations,
        Err(message) => return StepOutcome::diagnostic(node.kind.name(), message),
    };
    if operations.is_empty() {
        return advance(node, None, default_next(node));
    }

    let mut applied = 0usize;
    let mut failed = 0usize;

    for operation in &operations {
        let target = operation.get("target").and_then(Value::as_str);
        let op = operation.get("operation").and_then(Value::as_str);
        let (Some(target), Some(op)) = (target, op) else {
            warn!(node = %node.id, "calculate operation missing target or operation");
            failed += 1;
            continue;
        };

        let current = as_number(crate::path::get_in(ctx.as_map(), target).as_ref());
        let operand = as_number(operation.get("value"));

        let result = match op.to_lowercase().as_str() {
            "add" | "increment" | "+" => Some(current + operand),
            "subtract" | "decrement" | "-" => Some(current - operand),
            "multiply" | "*" => Some(current * operand),
            "divide" | "/" => (operand != 0.0).then(|| current / operand),
            "modulo" | "%" => (operand != 0.0).then(|| current % operand),
            "power" | "^" => Some(current.powf(operand)),
            "set" | "=" => Some(operand),
            "min" => Some(current.min(operand)),
            "max" => Some(current.max(operand)),
            "abs" => Some(current.abs()),
            "random" => Some(rand::random::<f64>() * operand),
            other => {
                warn!(node = %node.id, "unknown calculate operation: {other}");
                None
            }
        };

        match result {
            Some(result) => {
                // whole values are stored as integers
                let stored = if result.is_finite() && result.fract() == 0.0 {
                    json!(result as i64)
                } else {
                    json!(result)
                };
                if crate::path::set_in(ctx.as_map_mut(), target, stored) {
                    applied += 1;
                } else {
                    failed += 1;
                }
            }
            None => failed += 1,
        }
    }

    info!(node = %node.id, applied, failed, "calculations finished");
    advance(node, None, default_next(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn as_number_handles_all_shapes() {
        assert_eq!(as_number(Some(&json!(2.5))), 2.5);
        assert_eq!(as_number(Some(&json!("7"))), 7.0);
        assert_eq!(as_number(Some(&json!(" 3.5 "))), 3.5);
        assert_eq!(as_number(Some(&json!("abc"))), 0.0);
        assert_eq!(as_number(Some(&json!(null))), 0.0);
        assert_eq!(as_number(None), 0.0);
    }

    #[test]
    fn read_operations_accepts_list_and_json_string() {
        let mk = |parameters: Map<String, Value>| ScenarioNode {
            id: "calc".into(),
            kind: NodeKind::Calculate,
            parameters,
            next_nodes: vec![],
            conditions: Default::default(),
        };

        let node = mk(json!({"operations": [{"target": "n", "operation": "set", "value": 1}]})
            .as_object()
            .cloned()
            .unwrap());
        assert_eq!(read_operations(&node).unwrap().len(), 1);

        let node = mk(json!({"operations": "[{\"target\": \"n\"}]"}).as_object().cloned().unwrap());
        assert_eq!(read_operations(&node).unwrap().len(), 1);

        let node = mk(Map::new());
        assert!(read_operations(&node).is_err());

        let node = mk(json!({"operations": "not json"}).as_object().cloned().unwrap());
        assert!(read_operations(&node).is_err());
    }
}
