//! Host-facing dialogue manager: pairs the stateless engine with the
//! session store and serializes processing per session id.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::engine::{Response, ScenarioEngine};
use crate::session::SessionStore;

pub const SESSION_NOT_FOUND_MESSAGE: &str = "Session not found. Create a new session.";

pub struct DialogService {
    engine: Arc<ScenarioEngine>,
    sessions: SessionStore,
}

impl DialogService {
    pub fn new(engine: Arc<ScenarioEngine>, sessions: SessionStore) -> Self {
        Self { engine, sessions }
    }

    /// Starts a new dialogue: allocates a session id, seeds the context
    /// from the entry-point scenario and returns the opening message.
    pub async fn create_session(&self) -> (String, Response) {
        let session_id = Uuid::new_v4().to_string();
        let session = self.sessions.get_or_create(&session_id).await;
        let mut ctx = session.context.lock().await;

        let response = self.engine.initial_message_from_entry_point(&mut ctx).await;
        info!(session = %session_id, "created session");
        (session_id, response)
    }

    /// Feeds one user message into the session's cascade. The per-session
    /// lock guarantees a single in-flight cascade per session id.
    pub async fn send_message(&self, session_id: &str, text: &str) -> Response {
        let Some(session) = self.sessions.get(session_id).await else {
            return Response::envelope(
                "error",
                SESSION_NOT_FOUND_MESSAGE.to_string(),
                &Default::default(),
            );
        };
        let mut ctx = session.context.lock().await;
        self.engine.process_message(session_id, text, &mut ctx).await
    }

    /// Resumes a cascade with no user input (after async side effects).
    pub async fn continue_session(&self, session_id: &str) -> Response {
        let Some(session) = self.sessions.get(session_id).await else {
            return Response::envelope(
                "error",
                SESSION_NOT_FOUND_MESSAGE.to_string(),
                &Default::default(),
            );
        };
        let mut ctx = session.context.lock().await;
        self.engine.continue_execution(session_id, &mut ctx).await
    }

    pub async fn end_session(&self, session_id: &str) {
        self.sessions.remove(session_id).await;
        info!(session = %session_id, "ended session");
    }

    pub async fn active_sessions(&self) -> u64 {
        self.sessions.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::collaborator::rest::{ApiCall, ApiReply, RestGateway};
    use crate::collaborator::{Collaborators, IntentAnalysis, IntentClassifier, TextGenerator};
    use crate::collaborator::store::StaticScenarioStore;
    use crate::config::EngineConfig;
    use crate::context::SessionContext;
    use crate::error::CollaboratorError;
    use crate::scenario::Scenario;
    use crate::session::InMemorySessionStore;

    struct StubClassifier;

    #[async_trait]
    impl IntentClassifier for StubClassifier {
        async fn analyze(
            &self,
            _text: &str,
            _context: &SessionContext,
        ) -> Result<IntentAnalysis, CollaboratorError> {
            Ok(IntentAnalysis::default())
        }
    }

    struct StubGenerator;

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, CollaboratorError> {
            Ok("generated".to_string())
        }
    }

    struct StubRest;

    #[async_trait]
    impl RestGateway for StubRest {
        async fn call(&self, _request: ApiCall) -> Result<ApiReply, CollaboratorError> {
            Ok(ApiReply { status: 200, body: json!({}) })
        }
    }

    fn service() -> DialogService {
        let scenario = Scenario::from_envelope(json!({
            "id": "welcome-flow",
            "scenario_data": {
                "start_node": "welcome",
                "nodes": [
                    {"id": "welcome", "type": "announce",
                     "parameters": {"message": "Привет! Как дела?"},
                     "next_nodes": ["ask_name"]},
                    {"id": "ask_name", "type": "ask",
                     "parameters": {"question": "Как вас зовут?"},
                     "next_nodes": ["greet"]},
                    {"id": "greet", "type": "announce",
                     "parameters": {"message": "Приятно познакомиться, {last_answer}!"}}
                ],
                "edges": [
                    {"source": "welcome", "target": "ask_name"},
                    {"source": "ask_name", "target": "greet"}
                ]
            }
        }))
        .expect("valid scenario");

        let collaborators = Collaborators {
            scenarios: Arc::new(StaticScenarioStore::new(vec![scenario], "welcome-flow")),
            classifier: Arc::new(StubClassifier),
            generator: Arc::new(StubGenerator),
            rest: Arc::new(StubRest),
        };
        let engine = Arc::new(ScenarioEngine::new(collaborators, EngineConfig::default()));
        DialogService::new(engine, InMemorySessionStore::new(Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn create_session_yields_opening_message() {
        let service = service();
        let (session_id, opening) = service.create_session().await;

        assert!(opening.message.contains("Привет! Как дела?"));
        assert!(opening.message.contains("Как вас зовут?"));
        assert_eq!(service.active_sessions().await, 1);

        let answer = service.send_message(&session_id, "Alex").await;
        assert!(answer.message.contains("Alex"));
    }

    #[tokio::test]
    async fn unknown_session_gets_an_error_envelope() {
        let service = service();
        let response = service.send_message("no-such-session", "hi").await;
        assert_eq!(response.kind, "error");
        assert_eq!(response.message, SESSION_NOT_FOUND_MESSAGE);
    }

    #[tokio::test]
    async fn end_session_removes_state() {
        let service = service();
        let (session_id, _) = service.create_session().await;
        service.end_session(&session_id).await;

        let response = service.send_message(&session_id, "hi").await;
        assert_eq!(response.kind, "error");
    }
}
