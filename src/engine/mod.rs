//! The scenario execution engine: walks a session through its scenario
//! graph one inbound message at a time.
//!
//! The engine is stateless between calls. Each turn it receives the
//! session context by reference, cascades node executions in an explicit
//! loop until a pausing (`ask`) or terminal node, and hands the mutated
//! context back inside a response envelope. A hard step cap bounds the
//! cascade so cyclic graphs fail with [`GraphError::StepLimitExceeded`]
//! instead of spinning forever.

pub mod executor;
pub(crate) mod parse;


use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::collaborator::Collaborators;
use crate::config::EngineConfig;
use crate::context::{SessionContext, keys};
use crate::error::{EngineError, GraphError};
use crate::scenario::Scenario;

/// Shown whenever the engine hits a fault it cannot route through the
/// graph; the session stays usable at its current node.
pub const APOLOGY_MESSAGE: &str = "Sorry, something went wrong while processing your message.";
/// Answer for turns arriving after the dialog has ended.
pub const DIALOG_ENDED_MESSAGE: &str = "The dialog has ended.";
/// Opening line used when the entry-point scenario cannot be loaded.
pub const FALLBACK_GREETING: &str = "Hi! Welcome to the assistant.";

/// Envelope returned to the host for every processed turn.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Response {
    /// Node-kind tag of the last executed node (`ask`, `announce`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node: Option<String>,
    pub context: Value,
    pub timestamp: DateTime<Utc>,
}

impl Response {
    pub(crate) fn envelope(kind: &str, message: String, ctx: &SessionContext) -> Self {
        Response {
            kind: kind.to_string(),
            message,
            next_node: ctx.current_node().map(str::to_string),
            context: ctx.to_value(),
            timestamp: Utc::now(),
        }
    }
}

/// Directive produced by a node executor, telling the cascade loop what to
/// do next.
#[derive(Debug)]
pub(crate) enum Next {
    /// Keep cascading at the given node; `None` means the graph ran off its
    /// end and the scenario is complete.
    Advance(Option<String>),
    /// An `ask` node: `current_node` moves forward but control returns to
    /// the caller until the next inbound message.
    Suspend(Option<String>),
    /// Switch to another scenario graph (sub-flow entry, jump, or a
    /// sub-flow return) and continue cascading there.
    Enter { scenario: Arc<Scenario>, node: String },
    /// A terminal node ran; the executor already set the end-state flags.
    Finished,
    /// Malformed node configuration: report the diagnostic and stop this
    /// step without touching the session position.
    HaltStep,
}

#[derive(Debug)]
pub(crate) struct StepOutcome {
    pub kind: String,
    pub message: Option<String>,
    pub next: Next,
}

impl StepOutcome {
    pub(crate) fn diagnostic(kind: &str, message: impl Into<String>) -> Self {
        StepOutcome {
            kind: kind.to_string(),
            message: Some(message.into()),
            next: Next::HaltStep,
        }
    }
}

/// Drives scenario graphs. One instance serves every session; all state
/// lives in the per-session context owned by the host.
pub struct ScenarioEngine {
    collaborators: Collaborators,
    config: EngineConfig,
}

impl ScenarioEngine {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        Self { collaborators, config }
    }

    /// Executes the cascade for one inbound message, starting from the
    /// context's `current_node` (or the scenario entry when absent).
    /// Messages emitted by consecutive nodes are joined into one reply.
    pub async fn execute_scenario(
        &self,
        scenario: Arc<Scenario>,
        user_input: &str,
        ctx: &mut SessionContext,
    ) -> Result<Response, EngineError> {
        let mut scenario = scenario;
        let mut current = match ctx.current_node() {
            Some(node) => node.to_string(),
            None => scenario
                .entry_node()
                .ok_or_else(|| GraphError::NodeNotFound(format!("entry of `{}`", scenario.id)))?
                .to_string(),
        };

        let mut messages: Vec<String> = Vec::new();
        let mut kind = String::from("announce");
        let mut steps = 0usize;

        loop {
            steps += 1;
            if steps > self.config.max_cascade_steps {
                return Err(GraphError::StepLimitExceeded(self.config.max_cascade_steps).into());
            }

            let outcome = {
                let node = scenario
                    .node(&current)
                    .ok_or_else(|| GraphError::NodeNotFound(current.clone()))?;
                executor::execute(
                    node,
                    &scenario,
                    user_input,
                    ctx,
                    &self.collaborators,
                    &self.config,
                )
                .await?
            };

            kind = outcome.kind;
            if let Some(message) = outcome.message {
                if !message.is_empty() {
                    messages.push(message);
                }
            }

            match outcome.next {
                Next::Advance(Some(next)) => {
                    ctx.advance_to(Some(&next));
                    current = next;
                }
                Next::Advance(None) => {
                    ctx.advance_to(None);
                    break;
                }
                Next::Suspend(next) => {
                    ctx.advance_to(next.as_deref());
                    break;
                }
                Next::Enter { scenario: target, node } => {
                    scenario = target;
                    current = node;
                }
                Next::Finished | Next::HaltStep => break,
            }
        }

        Ok(Response::envelope(&kind, messages.join("\n"), ctx))
    }

    /// Continues the dialogue with the inbound text. When the session was
    /// waiting on an `ask`, the text is recorded as the answer before the
    /// cascade resumes from the node after the question.
    #[tracing::instrument(name = "process_message", skip_all, fields(session = %session_id))]
    pub async fn process_message(
        &self,
        session_id: &str,
        user_input: &str,
        ctx: &mut SessionContext,
    ) -> Response {
        info!("processing message: {}", user_input);
        ctx.insert(keys::USER_MESSAGE, json!(user_input));

        if ctx.waiting_for_input() {
            if let Some(node_id) = ctx.waiting_for_answer_to_node() {
                let key = format!("answer_{node_id}");
                ctx.insert(&key, json!(user_input));
            }
            ctx.insert(keys::LAST_ANSWER, json!(user_input));
            ctx.clear_waiting();
        }

        let Some(scenario_id) = ctx.scenario_id().map(str::to_string) else {
            warn!("session not initialized: no scenario_id in context");
            return Response::envelope("error", APOLOGY_MESSAGE.to_string(), ctx);
        };

        match self.collaborators.scenarios.scenario(&scenario_id).await {
            Ok(scenario) => match self.execute_scenario(scenario, user_input, ctx).await {
                Ok(response) => response,
                Err(e) => {
                    error!("cascade failed: {e}");
                    Response::envelope("error", APOLOGY_MESSAGE.to_string(), ctx)
                }
            },
            Err(e) => {
                error!("could not load scenario `{scenario_id}`: {e}");
                Response::envelope("error", APOLOGY_MESSAGE.to_string(), ctx)
            }
        }
    }

    /// Resumes the cascade with empty input, used after asynchronous side
    /// effects. Completed sessions answer with the farewell straight away.
    #[tracing::instrument(name = "continue_execution", skip_all, fields(session = %session_id))]
    pub async fn continue_execution(&self, session_id: &str, ctx: &mut SessionContext) -> Response {
        if ctx.scenario_completed() || ctx.dialog_ended() {
            return Response::envelope("end", DIALOG_ENDED_MESSAGE.to_string(), ctx);
        }
        let (Some(_), Some(_)) = (ctx.current_node(), ctx.scenario_id()) else {
            return Response::envelope("end", DIALOG_ENDED_MESSAGE.to_string(), ctx);
        };
        self.process_message(session_id, "", ctx).await
    }

    /// Seeds a fresh session from the designated entry-point scenario and
    /// cascades to the first `ask` or terminal node to produce the opening
    /// message.
    #[tracing::instrument(name = "initial_message", skip_all)]
    pub async fn initial_message_from_entry_point(&self, ctx: &mut SessionContext) -> Response {
        let scenario = match self.collaborators.scenarios.entry_point().await {
            Ok(scenario) => scenario,
            Err(e) => {
                error!("could not load entry-point scenario: {e}");
                return Response::envelope("announce", FALLBACK_GREETING.to_string(), ctx);
            }
        };

        let Some(entry) = scenario.entry_node().map(str::to_string) else {
            error!("entry-point scenario `{}` has no nodes", scenario.id);
            return Response::envelope("announce", FALLBACK_GREETING.to_string(), ctx);
        };

        ctx.set_scenario_id(&scenario.id);
        ctx.advance_to(Some(&entry));

        match self.execute_scenario(scenario, "", ctx).await {
            Ok(response) => response,
            Err(e) => {
                error!("entry-point cascade failed: {e}");
                Response::envelope("error", APOLOGY_MESSAGE.to_string(), ctx)
            }
        }
    }
}
