//! Scenario retrieval: the HTTP scenario service, a directory loader for
//! local runs, and a static in-memory store for embedding and tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde_json::Value;
use tracing::{error, info};
use url::Url;

use super::ScenarioStore;
use crate::error::{CollaboratorError, EngineError, GraphError};
use crate::scenario::Scenario;

const SCENARIOS_PATH: &str = "/api/v1/scenarios";
const SERVICE: &str = "scenario-store";

/// Gateway to the scenario service. Loaded graphs are immutable, so they
/// are cached by id; the entry-point lookup is never cached because the
/// flag can move between scenarios.
pub struct HttpScenarioStore {
    client: Client,
    base_url: Url,
    cache: Cache<String, Arc<Scenario>>,
}

impl HttpScenarioStore {
    pub fn new(base_url: Url, timeout: Duration, cache_ttl: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        let cache = Cache::builder()
            .time_to_live(cache_ttl)
            .max_capacity(1024)
            .build();
        Self { client, base_url, cache }
    }

    async fn fetch(&self, path: &str) -> Result<Arc<Scenario>, EngineError> {
        let url = format!(
            "{}{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            SCENARIOS_PATH,
            path
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, e))
            .map_err(EngineError::from)?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(GraphError::ScenarioNotFound(path.to_string()).into());
        }
        if !status.is_success() {
            return Err(CollaboratorError::Status {
                service: SERVICE.into(),
                status: status.as_u16(),
            }
            .into());
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, e))
            .map_err(EngineError::from)?;
        Ok(Arc::new(Scenario::from_envelope(envelope)?))
    }
}

#[async_trait]
impl ScenarioStore for HttpScenarioStore {
    async fn scenario(&self, id: &str) -> Result<Arc<Scenario>, EngineError> {
        if let Some(cached) = self.cache.get(id).await {
            return Ok(cached);
        }
        let scenario = self.fetch(id).await?;
        self.cache.insert(id.to_string(), scenario.clone()).await;
        Ok(scenario)
    }

    async fn entry_point(&self) -> Result<Arc<Scenario>, EngineError> {
        self.fetch("entry-point").await
    }
}

/// Loads scenario envelopes (`*.json`) from a directory. The file carrying
/// `"is_entry_point": true` becomes the entry point; otherwise the scenario
/// with the lexicographically smallest id does.
pub struct DirScenarioStore {
    scenarios: HashMap<String, Arc<Scenario>>,
    entry_id: Option<String>,
}

impl DirScenarioStore {
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let mut scenarios = HashMap::new();
        let mut entry_id = None;

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            let envelope: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    error!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let flagged = envelope
                .get("is_entry_point")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let scenario = match Scenario::from_envelope(envelope) {
                Ok(s) => s,
                Err(e) => {
                    error!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let id = if scenario.id.is_empty() {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                scenario.id.clone()
            };
            if flagged {
                entry_id = Some(id.clone());
            }
            info!(scenario = %id, "loaded scenario from {}", path.display());
            scenarios.insert(id, Arc::new(scenario));
        }

        if entry_id.is_none() {
            entry_id = scenarios.keys().min().cloned();
        }
        Ok(Self { scenarios, entry_id })
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

#[async_trait]
impl ScenarioStore for DirScenarioStore {
    async fn scenario(&self, id: &str) -> Result<Arc<Scenario>, EngineError> {
        self.scenarios
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::ScenarioNotFound(id.to_string()).into())
    }

    async fn entry_point(&self) -> Result<Arc<Scenario>, EngineError> {
        let id = self
            .entry_id
            .as_deref()
            .ok_or_else(|| EngineError::from(GraphError::ScenarioNotFound("entry-point".into())))?;
        self.scenario(id).await
    }
}

/// Fixed set of scenarios, handed over at construction. Useful for
/// embedding the engine and for tests.
pub struct StaticScenarioStore {
    scenarios: HashMap<String, Arc<Scenario>>,
    entry_id: String,
}

impl StaticScenarioStore {
    pub fn new(scenarios: Vec<Scenario>, entry_id: &str) -> Self {
        Self {
            scenarios: scenarios
                .into_iter()
                .map(|s| (s.id.clone(), Arc::new(s)))
                .collect(),
            entry_id: entry_id.to_string(),
        }
    }
}

#[async_trait]
impl ScenarioStore for StaticScenarioStore {
    async fn scenario(&self, id: &str) -> Result<Arc<Scenario>, EngineError> {
        self.scenarios
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::ScenarioNotFound(id.to_string()).into())
    }

    async fn entry_point(&self) -> Result<Arc<Scenario>, EngineError> {
        self.scenario(&self.entry_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(id: &str, entry: bool) -> String {
        json!({
            "id": id,
            "is_entry_point": entry,
            "scenario_data": {
                "start_node": "hello",
                "nodes": [{"id": "hello", "type": "announce",
                           "parameters": {"message": "hi"}}]
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn dir_store_loads_and_flags_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.json"), envelope("main", false)).unwrap();
        std::fs::write(dir.path().join("welcome.json"), envelope("welcome", true)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = DirScenarioStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.entry_point().await.unwrap().id, "welcome");
        assert_eq!(store.scenario("main").await.unwrap().id, "main");
        assert!(matches!(
            store.scenario("ghost").await,
            Err(EngineError::Graph(GraphError::ScenarioNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn dir_store_falls_back_to_smallest_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), envelope("beta", false)).unwrap();
        std::fs::write(dir.path().join("a.json"), envelope("alpha", false)).unwrap();

        let store = DirScenarioStore::load(dir.path()).unwrap();
        assert_eq!(store.entry_point().await.unwrap().id, "alpha");
    }

    #[tokio::test]
    async fn static_store_serves_fixed_scenarios() {
        let scenario = Scenario::from_envelope(json!({
            "id": "fixed",
            "scenario_data": {"nodes": [{"id": "n", "type": "end"}]}
        }))
        .unwrap();
        let store = StaticScenarioStore::new(vec![scenario], "fixed");
        assert_eq!(store.entry_point().await.unwrap().id, "fixed");
    }
}
