//! Thin gateways to the services the engine collaborates with: intent
//! classification, generative text, arbitrary REST targets and the
//! scenario store. The engine only sees the traits; HTTP implementations
//! live in the submodules and mocks live next to the tests.

pub mod llm;
pub mod nlu;
pub mod rest;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::SessionContext;
use crate::error::{CollaboratorError, EngineError};
use crate::scenario::Scenario;

/// What the intent classifier knows about one utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IntentAnalysis {
    pub intent: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub entities: Vec<Value>,
    #[serde(default)]
    pub suggested_scenario: Option<String>,
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn analyze(
        &self,
        text: &str,
        context: &SessionContext,
    ) -> Result<IntentAnalysis, CollaboratorError>;
}

/// Generative-text collaborator. Failures are routed back as errors; the
/// llm_call executor replaces them with a fallback string, they must never
/// reach the user as a fault.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Scenario retrieval. Graphs are immutable per load, so implementations
/// are free to cache aggressively.
#[async_trait]
pub trait ScenarioStore: Send + Sync {
    async fn scenario(&self, id: &str) -> Result<Arc<Scenario>, EngineError>;
    /// The scenario flagged as the designated entry point for new sessions.
    async fn entry_point(&self) -> Result<Arc<Scenario>, EngineError>;
}

/// Everything a node executor may need to talk to, bundled so the engine
/// can hand one reference down the cascade.
#[derive(Clone)]
pub struct Collaborators {
    pub scenarios: Arc<dyn ScenarioStore>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub generator: Arc<dyn TextGenerator>,
    pub rest: Arc<dyn rest::RestGateway>,
}
