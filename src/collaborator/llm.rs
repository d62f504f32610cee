//! HTTP gateway to the generative-text service (OpenAI-compatible chat
//! completions endpoint).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::TextGenerator;
use crate::error::CollaboratorError;

const SERVICE: &str = "llm";

pub struct HttpTextGenerator {
    client: Client,
    base_url: Url,
    model: String,
    api_key: Option<String>,
}

impl HttpTextGenerator {
    pub fn new(base_url: Url, model: String, api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, base_url, model, api_key }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        debug!(prompt_len = prompt.len(), model = %self.model, "llm request");

        let url = format!(
            "{}/chat/completions",
            self.base_url.as_str().trim_end_matches('/')
        );
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut builder = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
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

        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CollaboratorError::Decode {
                service: SERVICE.into(),
                message: "completion response had no message content".into(),
            })
    }
}
