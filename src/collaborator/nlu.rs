//! HTTP gateway to the intent-classification service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::info;
use url::Url;

use super::{IntentAnalysis, IntentClassifier};
use crate::context::SessionContext;
use crate::error::CollaboratorError;

const ANALYZE_PATH: &str = "/api/v1/nlu/analyze";
const SERVICE: &str = "nlu";

pub struct HttpIntentClassifier {
    client: Client,
    base_url: Url,
}

impl HttpIntentClassifier {
    /// `timeout` bounds every classification call so a stalled classifier
    /// cannot hang a session; pair it with an `error` branch on the node.
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }
}

#[async_trait]
impl IntentClassifier for HttpIntentClassifier {
    async fn analyze(
        &self,
        text: &str,
        context: &SessionContext,
    ) -> Result<IntentAnalysis, CollaboratorError> {
        let url = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), ANALYZE_PATH);

        let response = self
            .client
            .post(url)
            .json(&json!({ "text": text, "context": context.to_value() }))
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Status { service: SERVICE.into(), status: status.as_u16() });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, e))?;

        // Intents are normalized to lowercase here so that condition
        // expressions can rely on exact-case comparison downstream.
        let analysis = IntentAnalysis {
            intent: body
                .get("intent")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase(),
            confidence: body.get("confidence").and_then(Value::as_f64).unwrap_or(0.0),
            entities: body
                .get("entities")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            suggested_scenario: body
                .get("suggested_scenario")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };

        info!(intent = %analysis.intent, confidence = analysis.confidence, "nlu analysis completed");
        Ok(analysis)
    }
}
