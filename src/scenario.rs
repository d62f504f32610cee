//! Immutable-per-load scenario graph model.
//!
//! Scenarios arrive from the scenario store as an envelope
//! `{id, name, scenario_data: {start_node, nodes[], edges[]}}` and are
//! decoded once into typed nodes; the engine never re-inspects raw JSON
//! during execution.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ConfigError;

/// Closed set of node kinds the engine knows how to execute. Anything else
/// decodes to `Unknown` and produces a diagnostic when reached, so one bad
/// node does not take the whole scenario down at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Announce,
    Ask,
    Parse,
    Condition,
    Switch,
    ApiRequest,
    NluRequest,
    ScenarioJump,
    SubFlow,
    End,
    EndDialog,
    Transfer,
    LlmCall,
    Notification,
    Wait,
    ContextEdit,
    Calculate,
    Unknown(String),
}

impl NodeKind {
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "announce" => NodeKind::Announce,
            "ask" => NodeKind::Ask,
            "parse" => NodeKind::Parse,
            "condition" => NodeKind::Condition,
            "switch" => NodeKind::Switch,
            "api-request" | "api_call" => NodeKind::ApiRequest,
            "nlu-request" => NodeKind::NluRequest,
            "scenario_jump" => NodeKind::ScenarioJump,
            "sub-flow" => NodeKind::SubFlow,
            "end" => NodeKind::End,
            "end_dialog" => NodeKind::EndDialog,
            "transfer" => NodeKind::Transfer,
            "llm_call" => NodeKind::LlmCall,
            "notification" => NodeKind::Notification,
            "wait" => NodeKind::Wait,
            "context-edit" => NodeKind::ContextEdit,
            "calculate" => NodeKind::Calculate,
            other => NodeKind::Unknown(other.to_string()),
        }
    }

    /// The wire name, used as the `type` tag of response envelopes.
    pub fn name(&self) -> &str {
        match self {
            NodeKind::Announce => "announce",
            NodeKind::Ask => "ask",
            NodeKind::Parse => "parse",
            NodeKind::Condition => "condition",
            NodeKind::Switch => "switch",
            NodeKind::ApiRequest => "api-request",
            NodeKind::NluRequest => "nlu-request",
            NodeKind::ScenarioJump => "scenario_jump",
            NodeKind::SubFlow => "sub-flow",
            NodeKind::End => "end",
            NodeKind::EndDialog => "end_dialog",
            NodeKind::Transfer => "transfer",
            NodeKind::LlmCall => "llm_call",
            NodeKind::Notification => "notification",
            NodeKind::Wait => "wait",
            NodeKind::ContextEdit => "context-edit",
            NodeKind::Calculate => "calculate",
            NodeKind::Unknown(raw) => raw,
        }
    }
}

/// One typed step of a scenario graph.
#[derive(Debug, Clone)]
pub struct ScenarioNode {
    pub id: String,
    pub kind: NodeKind,
    pub parameters: Map<String, Value>,
    pub next_nodes: Vec<String>,
    pub conditions: HashMap<String, String>,
}

impl ScenarioNode {
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Default successor: the first `next_nodes` entry.
    pub fn first_next(&self) -> Option<&str> {
        self.next_nodes.first().map(String::as_str)
    }

    /// Named branch target (`success`, `error`, `timeout`, ...), ignoring
    /// empty strings left behind by graph editors.
    pub fn branch(&self, key: &str) -> Option<&str> {
        self.conditions
            .get(key)
            .map(String::as_str)
            .filter(|target| !target.is_empty())
    }
}

/// Graph edge; `source_handle` carries the `output-i` handles that
/// condition and switch nodes branch over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    #[serde(
        rename = "sourceHandle",
        alias = "source_handle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<String>,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub start_node: String,
    pub nodes: Vec<ScenarioNode>,
    pub edges: Vec<Edge>,
}

#[derive(Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    next_nodes: Vec<String>,
    #[serde(default)]
    conditions: HashMap<String, String>,
}

#[derive(Deserialize)]
struct RawScenarioData {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    start_node: Option<String>,
    #[serde(default)]
    nodes: Vec<RawNode>,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    scenario_data: RawScenarioData,
}

impl Scenario {
    /// Decodes a scenario-store envelope into the typed graph, logging (but
    /// tolerating) dangling edge targets the way live scenario data has
    /// always contained them.
    pub fn from_envelope(value: Value) -> Result<Self, ConfigError> {
        let raw: RawEnvelope = serde_json::from_value(value)
            .map_err(|e| ConfigError(format!("malformed scenario envelope: {e}")))?;

        let data = raw.scenario_data;
        let scenario = Scenario {
            id: raw.id.or(data.id).unwrap_or_default(),
            name: raw.name.or(data.name).unwrap_or_default(),
            start_node: data.start_node.unwrap_or_default(),
            nodes: data
                .nodes
                .into_iter()
                .map(|n| ScenarioNode {
                    id: n.id,
                    kind: NodeKind::parse(&n.kind),
                    parameters: n.parameters,
                    next_nodes: n.next_nodes,
                    conditions: n.conditions,
                })
                .collect(),
            edges: data.edges,
        };

        for issue in scenario.dangling_targets() {
            warn!(scenario = %scenario.id, "{}", issue);
        }
        Ok(scenario)
    }

    pub fn node(&self, id: &str) -> Option<&ScenarioNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The graph root: the single node that is never the target of any
    /// edge. When there is no unambiguous root (zero or several), the
    /// declared `start_node` wins.
    pub fn entry_node(&self) -> Option<&str> {
        let targets: HashSet<&str> = self.edges.iter().map(|e| e.target.as_str()).collect();
        let mut roots = self.nodes.iter().filter(|n| !targets.contains(n.id.as_str()));

        match (roots.next(), roots.next()) {
            (Some(root), None) => Some(root.id.as_str()),
            _ if !self.start_node.is_empty() => Some(self.start_node.as_str()),
            _ => self.nodes.first().map(|n| n.id.as_str()),
        }
    }

    /// Edge lookup by source node and handle, e.g. `output-2`.
    pub fn target_by_handle(&self, source: &str, handle: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.source_handle.as_deref() == Some(handle))
            .map(|e| e.target.as_str())
    }

    /// Referential integrity report: every `next_nodes` entry, named branch
    /// and edge endpoint should name an existing node.
    pub fn dangling_targets(&self) -> Vec<String> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        let mut issues = Vec::new();

        for node in &self.nodes {
            for next in &node.next_nodes {
                if !next.is_empty() && !ids.contains(next.as_str()) {
                    issues.push(format!("node `{}` points at missing node `{}`", node.id, next));
                }
            }
            for (branch, target) in &node.conditions {
                if !target.is_empty() && !ids.contains(target.as_str()) {
                    issues.push(format!(
                        "node `{}` branch `{}` points at missing node `{}`",
                        node.id, branch, target
                    ));
                }
            }
        }
        for edge in &self.edges {
            if !ids.contains(edge.source.as_str()) || !ids.contains(edge.target.as_str()) {
                issues.push(format!(
                    "edge `{}` -> `{}` references a missing node",
                    edge.source, edge.target
                ));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_envelope() -> Value {
        json!({
            "id": "greeting-flow",
            "name": "Greeting",
            "scenario_data": {
                "start_node": "welcome",
                "nodes": [
                    {"id": "welcome", "type": "announce",
                     "parameters": {"message": "Привет!"}, "next_nodes": ["route"]},
                    {"id": "route", "type": "condition",
                     "parameters": {"conditions": ["intent == \"balance\""]},
                     "next_nodes": ["balance", "bye"]},
                    {"id": "balance", "type": "api-request",
                     "parameters": {"url": "http://bank/balance"},
                     "conditions": {"success": "bye", "error": "bye"}},
                    {"id": "bye", "type": "end", "parameters": {"message": "Пока"}}
                ],
                "edges": [
                    {"source": "welcome", "target": "route"},
                    {"source": "route", "sourceHandle": "output-0", "target": "balance"},
                    {"source": "route", "sourceHandle": "output-1", "target": "bye"},
                    {"source": "balance", "target": "bye"}
                ]
            }
        })
    }

    #[test]
    fn decodes_envelope_into_typed_nodes() {
        let scenario = Scenario::from_envelope(sample_envelope()).unwrap();
        assert_eq!(scenario.id, "greeting-flow");
        assert_eq!(scenario.nodes.len(), 4);
        assert_eq!(scenario.node("welcome").unwrap().kind, NodeKind::Announce);
        assert_eq!(scenario.node("balance").unwrap().kind, NodeKind::ApiRequest);
        assert_eq!(scenario.node("balance").unwrap().branch("success"), Some("bye"));
    }

    #[test]
    fn entry_node_prefers_the_unique_root() {
        let scenario = Scenario::from_envelope(sample_envelope()).unwrap();
        assert_eq!(scenario.entry_node(), Some("welcome"));
    }

    #[test]
    fn entry_node_falls_back_to_declared_start() {
        // two roots: no unambiguous entry
        let scenario = Scenario::from_envelope(json!({
            "id": "s", "scenario_data": {
                "start_node": "b",
                "nodes": [
                    {"id": "a", "type": "announce", "next_nodes": ["c"]},
                    {"id": "b", "type": "announce", "next_nodes": ["c"]},
                    {"id": "c", "type": "end"}
                ],
                "edges": [
                    {"source": "a", "target": "c"},
                    {"source": "b", "target": "c"}
                ]
            }
        }))
        .unwrap();
        assert_eq!(scenario.entry_node(), Some("b"));
    }

    #[test]
    fn target_by_handle_finds_condition_branches() {
        let scenario = Scenario::from_envelope(sample_envelope()).unwrap();
        assert_eq!(scenario.target_by_handle("route", "output-0"), Some("balance"));
        assert_eq!(scenario.target_by_handle("route", "output-1"), Some("bye"));
        assert_eq!(scenario.target_by_handle("route", "output-9"), None);
    }

    #[test]
    fn unknown_kind_is_preserved_for_diagnostics() {
        let scenario = Scenario::from_envelope(json!({
            "id": "s", "scenario_data": {
                "nodes": [{"id": "x", "type": "teleport"}]
            }
        }))
        .unwrap();
        assert_eq!(
            scenario.node("x").unwrap().kind,
            NodeKind::Unknown("teleport".into())
        );
        assert_eq!(scenario.node("x").unwrap().kind.name(), "teleport");
    }

    #[test]
    fn dangling_targets_are_reported() {
        let scenario = Scenario::from_envelope(json!({
            "id": "s", "scenario_data": {
                "nodes": [
                    {"id": "a", "type": "announce", "next_nodes": ["ghost"]},
                    {"id": "b", "type": "parse", "conditions": {"error": "phantom"}}
                ]
            }
        }))
        .unwrap();
        let issues = scenario.dangling_targets();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("ghost"));
        assert!(issues[1].contains("phantom"));
    }

    #[test]
    fn malformed_envelope_is_a_config_error() {
        assert!(Scenario::from_envelope(json!({"nope": true})).is_err());
        assert!(Scenario::from_envelope(json!("not an object")).is_err());
    }
}
