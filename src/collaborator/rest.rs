//! Generic REST gateway used by `api-request` nodes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use crate::error::CollaboratorError;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// One outbound call, fully resolved (variables already substituted).
#[derive(Debug, Clone)]
pub struct ApiCall {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

/// The target's answer. `body` holds parsed JSON when the response decodes,
/// otherwise the raw text as a string value.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
}

impl ApiReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait RestGateway: Send + Sync {
    async fn call(&self, request: ApiCall) -> Result<ApiReply, CollaboratorError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpRestGateway {
    client: Client,
}

impl HttpRestGateway {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

#[async_trait]
impl RestGateway for HttpRestGateway {
    async fn call(&self, request: ApiCall) -> Result<ApiReply, CollaboratorError> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| CollaboratorError::Transport {
                service: "api".into(),
                message: format!("invalid HTTP method `{}`", request.method),
            })?;

        info!(method = %method, url = %request.url, "api request");

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest("api", e))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::from_reqwest("api", e))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(ApiReply { status, body })
    }
}
