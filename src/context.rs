//! Mutable per-session key/value state threaded through node execution.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Reserved context keys written by the engine itself. Everything else in
/// the map belongs to scenario authors and node executors.
pub mod keys {
    pub const CURRENT_NODE: &str = "current_node";
    pub const SCENARIO_ID: &str = "scenario_id";
    pub const CALL_STACK: &str = "call_stack";
    pub const IN_SUB_FLOW: &str = "in_sub_flow";
    pub const WAITING_FOR_INPUT: &str = "waiting_for_input";
    pub const WAITING_FOR_ANSWER_TO_NODE: &str = "waiting_for_answer_to_node";
    pub const EXPECTED_INPUT_TYPE: &str = "expected_input_type";
    pub const DIALOG_ENDED: &str = "dialog_ended";
    pub const SCENARIO_COMPLETED: &str = "scenario_completed";
    pub const TRANSFERRED_TO_OPERATOR: &str = "transferred_to_operator";
    pub const LAST_ANSWER: &str = "last_answer";
    pub const USER_MESSAGE: &str = "user_message";
    pub const LAST_EXECUTION_TIME: &str = "last_execution_time";
}

/// Return frame recorded when a sub-flow is entered: where to resume once
/// the nested scenario reaches its `end` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallFrame {
    pub scenario_id: String,
    pub node_id: String,
    #[serde(default)]
    pub next_node: Option<String>,
}

/// The per-session context map. Owned by the host's session store and
/// passed to the engine by reference each turn; the engine itself keeps no
/// state between calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionContext {
    values: Map<String, Value>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.insert(key, Value::Bool(value));
    }

    /// The node the cascade resumes from; empty string means terminal.
    pub fn current_node(&self) -> Option<&str> {
        self.get_str(keys::CURRENT_NODE).filter(|id| !id.is_empty())
    }

    pub fn scenario_id(&self) -> Option<&str> {
        self.get_str(keys::SCENARIO_ID).filter(|id| !id.is_empty())
    }

    pub fn set_scenario_id(&mut self, id: &str) {
        self.insert(keys::SCENARIO_ID, json!(id));
    }

    /// Moves `current_node` forward. `None` marks the scenario completed,
    /// leaving an empty node id behind; either way the execution timestamp
    /// is refreshed so a partial cascade always leaves consistent state.
    pub fn advance_to(&mut self, next: Option<&str>) {
        match next {
            Some(node) => {
                self.insert(keys::CURRENT_NODE, json!(node));
                self.set_flag(keys::SCENARIO_COMPLETED, false);
            }
            None => {
                self.insert(keys::CURRENT_NODE, json!(""));
                self.set_flag(keys::SCENARIO_COMPLETED, true);
            }
        }
        self.insert(keys::LAST_EXECUTION_TIME, json!(Utc::now().timestamp_millis()));
    }

    pub fn waiting_for_input(&self) -> bool {
        self.flag(keys::WAITING_FOR_INPUT)
    }

    /// Marks the session as waiting for the user to answer `node_id`.
    pub fn set_waiting(&mut self, node_id: &str, input_type: &str) {
        self.set_flag(keys::WAITING_FOR_INPUT, true);
        self.insert(keys::WAITING_FOR_ANSWER_TO_NODE, json!(node_id));
        self.insert(keys::EXPECTED_INPUT_TYPE, json!(input_type));
    }

    pub fn waiting_for_answer_to_node(&self) -> Option<&str> {
        self.get_str(keys::WAITING_FOR_ANSWER_TO_NODE)
    }

    pub fn clear_waiting(&mut self) {
        self.set_flag(keys::WAITING_FOR_INPUT, false);
        self.remove(keys::WAITING_FOR_ANSWER_TO_NODE);
    }

    pub fn dialog_ended(&self) -> bool {
        self.flag(keys::DIALOG_ENDED)
    }

    pub fn scenario_completed(&self) -> bool {
        self.flag(keys::SCENARIO_COMPLETED)
    }

    pub fn in_sub_flow(&self) -> bool {
        self.flag(keys::IN_SUB_FLOW)
    }

    pub fn call_stack(&self) -> Vec<CallFrame> {
        self.get(keys::CALL_STACK)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn push_frame(&mut self, frame: CallFrame) {
        let mut stack = self.call_stack();
        stack.push(frame);
        self.insert(keys::CALL_STACK, json!(stack));
        self.set_flag(keys::IN_SUB_FLOW, true);
    }

    /// Pops the most recent return frame; clears the sub-flow flag when the
    /// stack empties.
    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        let mut stack = self.call_stack();
        let frame = stack.pop();
        if stack.is_empty() {
            self.set_flag(keys::IN_SUB_FLOW, false);
        }
        self.insert(keys::CALL_STACK, json!(stack));
        frame
    }

    pub fn clear_call_stack(&mut self) {
        self.remove(keys::CALL_STACK);
        self.set_flag(keys::IN_SUB_FLOW, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_node_treats_empty_as_terminal() {
        let mut ctx = SessionContext::new();
        assert_eq!(ctx.current_node(), None);

        ctx.advance_to(Some("greet"));
        assert_eq!(ctx.current_node(), Some("greet"));
        assert!(!ctx.scenario_completed());

        ctx.advance_to(None);
        assert_eq!(ctx.current_node(), None);
        assert!(ctx.scenario_completed());
        assert!(ctx.get(keys::LAST_EXECUTION_TIME).is_some());
    }

    #[test]
    fn waiting_flags_round_trip() {
        let mut ctx = SessionContext::new();
        ctx.set_waiting("ask_name", "text");
        assert!(ctx.waiting_for_input());
        assert_eq!(ctx.waiting_for_answer_to_node(), Some("ask_name"));

        ctx.clear_waiting();
        assert!(!ctx.waiting_for_input());
        assert_eq!(ctx.waiting_for_answer_to_node(), None);
    }

    #[test]
    fn call_stack_pushes_and_pops_in_order() {
        let mut ctx = SessionContext::new();
        ctx.push_frame(CallFrame {
            scenario_id: "main".into(),
            node_id: "sub1".into(),
            next_node: Some("after_sub".into()),
        });
        ctx.push_frame(CallFrame {
            scenario_id: "child".into(),
            node_id: "sub2".into(),
            next_node: None,
        });
        assert!(ctx.in_sub_flow());
        assert_eq!(ctx.call_stack().len(), 2);

        let top = ctx.pop_frame().unwrap();
        assert_eq!(top.scenario_id, "child");
        assert!(ctx.in_sub_flow());

        let bottom = ctx.pop_frame().unwrap();
        assert_eq!(bottom.next_node.as_deref(), Some("after_sub"));
        assert!(!ctx.in_sub_flow());
        assert!(ctx.pop_frame().is_none());
    }

    #[test]
    fn serializes_transparently_as_a_plain_map() {
        let mut ctx = SessionContext::new();
        ctx.insert("intent", json!("greeting"));
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value, json!({"intent": "greeting"}));

        let restored: SessionContext = serde_json::from_value(value).unwrap();
        assert_eq!(restored, ctx);
    }
}
