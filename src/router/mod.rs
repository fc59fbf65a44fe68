//! Model Router (spec §4.2): dispatches a model request to a provider, tracking
//! per-model health and falling back across a configured chain.

pub mod providers;

use crate::config::ModelConfig;
use crate::credentials::{self, Credentials};
use providers::{ChatMessage, ChunkStream, NativeClient, OpenAiCompatClient};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("all models in the chain are unavailable")]
    AllModelsDown,
    #[error("authentication failed for model {0}")]
    AuthFailed(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ModelHealthStatus {
    Healthy,
    RateLimited,
    QuotaExhausted,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelHealthRecord {
    pub status: ModelHealthStatus,
    #[serde(skip)]
    pub since: Instant,
    #[serde(skip)]
    pub deadline: Option<Instant>,
    pub last_error: Option<String>,
    pub since_secs: Option<u64>,
}

impl ModelHealthRecord {
    fn healthy() -> Self {
        Self {
            status: ModelHealthStatus::Healthy,
            since: Instant::now(),
            deadline: None,
            last_error: None,
            since_secs: None,
        }
    }
}

const QUOTA_PROBATION: Duration = Duration::from_secs(3600);
const DOWN_PROBATION: Duration = Duration::from_secs(300);
const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(30);

/// Process-wide, concurrently-read-and-written health table. Each entry is a fresh
/// `ModelHealthRecord` on update — callers only ever see a consistent snapshot.
pub struct ModelHealthTable {
    records: RwLock<HashMap<String, ModelHealthRecord>>,
}

impl ModelHealthTable {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn snapshot(&self) -> Vec<(String, ModelHealthRecord)> {
        let records = self.records.read().await;
        records
            .iter()
            .map(|(id, rec)| {
                let mut rec = rec.clone();
                rec.since_secs = Some(rec.since.elapsed().as_secs());
                (id.clone(), rec)
            })
            .collect()
    }

    /// True iff the model is usable right now: `healthy`, or `rate_limited` past its
    /// backoff deadline, or decayed back to healthy after a probation window.
    pub async fn is_available(&self, model_id: &str) -> bool {
        let records = self.records.read().await;
        let Some(rec) = records.get(model_id) else {
            return true;
        };
        match rec.status {
            ModelHealthStatus::Healthy => true,
            ModelHealthStatus::RateLimited => rec.deadline.map(|d| Instant::now() >= d).unwrap_or(true),
            ModelHealthStatus::QuotaExhausted => rec.since.elapsed() > QUOTA_PROBATION,
            ModelHealthStatus::Down => rec.since.elapsed() > DOWN_PROBATION,
        }
    }

    pub async fn mark_healthy(&self, model_id: &str) {
        let mut records = self.records.write().await;
        records.remove(model_id);
    }

    pub async fn mark_rate_limited(&self, model_id: &str, retry_after: Option<Duration>) {
        let backoff = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF);
        let jitter_ms = rand::thread_rng().gen_range(0..500);
        let deadline = Instant::now() + backoff + Duration::from_millis(jitter_ms);
        let mut records = self.records.write().await;
        records.insert(
            model_id.to_string(),
            ModelHealthRecord {
                status: ModelHealthStatus::RateLimited,
                since: Instant::now(),
                deadline: Some(deadline),
                last_error: Some("rate limited (429)".to_string()),
                since_secs: None,
            },
        );
    }

    pub async fn mark_quota_exhausted(&self, model_id: &str, err: &str) {
        let mut records = self.records.write().await;
        records.insert(
            model_id.to_string(),
            ModelHealthRecord {
                status: ModelHealthStatus::QuotaExhausted,
                since: Instant::now(),
                deadline: None,
                last_error: Some(err.to_string()),
                since_secs: None,
            },
        );
    }

    pub async fn mark_down(&self, model_id: &str, err: &str) {
        let mut records = self.records.write().await;
        records.insert(
            model_id.to_string(),
            ModelHealthRecord {
                status: ModelHealthStatus::Down,
                since: Instant::now(),
                deadline: None,
                last_error: Some(err.to_string()),
                since_secs: None,
            },
        );
    }
}

impl Default for ModelHealthTable {
    fn default() -> Self {
        Self::new()
    }
}

enum Client {
    Native(NativeClient),
    OpenAiCompat(OpenAiCompatClient),
}

struct ModelEntry {
    config: ModelConfig,
    client: Client,
}

pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub streaming: bool,
}

pub struct ChatResponse {
    pub full_text: String,
    pub model_used: String,
    pub fell_back: bool,
}

/// A live chunk stream plus which model ultimately produced it — the Engine uses
/// `model_used` to know whether to emit a `ModelFallback` event, and reads `stream`
/// incrementally so dropping it (on cancellation) closes the underlying connection.
pub struct RoutedStream {
    pub model_used: String,
    pub fell_back: bool,
    pub stream: ChunkStream,
}

const MAX_RETRIES_PER_MODEL: usize = 2;

pub struct ModelRouter {
    models: HashMap<String, ModelEntry>,
    pub health: Arc<ModelHealthTable>,
}

impl ModelRouter {
    pub fn new(configs: Vec<ModelConfig>) -> Self {
        let creds = Credentials::load(&credentials::credentials_file());
        Self::new_with_credentials(configs, &creds)
    }

    pub fn new_with_credentials(configs: Vec<ModelConfig>, creds: &Credentials) -> Self {
        let mut models = HashMap::new();
        for mut cfg in configs {
            cfg.api_key = credentials::resolve_api_key(&cfg.id, cfg.api_key.as_deref(), creds);
            let client = match cfg.provider {
                crate::config::ProviderKind::Native => Client::Native(NativeClient::new(
                    cfg.url.clone(),
                    cfg.api_key.clone(),
                    cfg.model.clone(),
                )),
                crate::config::ProviderKind::OpenaiCompat => Client::OpenAiCompat(OpenAiCompatClient::new(
                    cfg.url.clone(),
                    cfg.api_key.clone(),
                    cfg.model.clone(),
                )),
            };
            models.insert(cfg.id.clone(), ModelEntry { config: cfg, client });
        }
        Self {
            models,
            health: Arc::new(ModelHealthTable::new()),
        }
    }

    pub fn list_models(&self) -> Vec<&ModelConfig> {
        self.models.values().map(|e| &e.config).collect()
    }

    /// Builds the candidate chain for a request per spec §4.2 step 1-2: the
    /// caller-requested model first (if given), then the agent's preferred model,
    /// then the global default chain, de-duplicated in order.
    fn build_chain(&self, requested: Option<&str>, agent_preference: Option<&str>, default_chain: &[String]) -> Vec<String> {
        let mut chain = Vec::new();
        for candidate in requested.into_iter().chain(agent_preference).chain(default_chain.iter().map(|s| s.as_str())) {
            if self.models.contains_key(candidate) && !chain.contains(&candidate.to_string()) {
                chain.push(candidate.to_string());
            }
        }
        chain
    }

    /// Walks the candidate chain, retrying transient errors per model and skipping
    /// unhealthy models, until one succeeds or the chain is exhausted.
    pub async fn chat(
        &self,
        requested: Option<&str>,
        agent_preference: Option<&str>,
        default_chain: &[String],
        messages: &[ChatMessage],
    ) -> Result<ChatResponse> {
        let chain = self.build_chain(requested, agent_preference, default_chain);
        if chain.is_empty() {
            return Err(RouterError::ModelNotFound(
                requested.or(agent_preference).unwrap_or("<none>").to_string(),
            ));
        }

        for (idx, model_id) in chain.iter().enumerate() {
            // Step 1: if the caller pinned a model that's merely rate-limited, honor
            // the backoff by sleeping instead of skipping straight past it. If it's
            // down/quota-exhausted, fall through to the chain like any other model.
            if idx == 0 && requested == Some(model_id.as_str()) {
                if self.is_only_rate_limited(model_id).await {
                    self.await_rate_limit_if_needed(model_id).await;
                } else if !self.health.is_available(model_id).await {
                    continue;
                }
            } else if !self.health.is_available(model_id).await {
                continue;
            }

            let entry = self.models.get(model_id).expect("model in chain exists");
            match self.try_model(entry, messages).await {
                Ok(full_text) => {
                    self.health.mark_healthy(model_id).await;
                    return Ok(ChatResponse {
                        full_text,
                        model_used: model_id.clone(),
                        fell_back: requested.is_some() && requested != Some(model_id.as_str()),
                    });
                }
                Err(ModelCallError::RateLimited { retry_after }) => {
                    self.health.mark_rate_limited(model_id, retry_after).await;
                }
                Err(ModelCallError::QuotaExhausted(msg)) => {
                    self.health.mark_quota_exhausted(model_id, &msg).await;
                }
                Err(ModelCallError::AuthFailed(msg)) => {
                    return Err(RouterError::AuthFailed(msg));
                }
                Err(ModelCallError::NotFound(msg)) => {
                    return Err(RouterError::ModelNotFound(msg));
                }
                Err(ModelCallError::Transient(msg)) => {
                    self.health.mark_down(model_id, &msg).await;
                }
            }
        }

        Err(RouterError::AllModelsDown)
    }

    async fn is_only_rate_limited(&self, model_id: &str) -> bool {
        let records = self.health.snapshot().await;
        records
            .iter()
            .find(|(id, _)| id == model_id)
            .map(|(_, rec)| rec.status == ModelHealthStatus::RateLimited)
            .unwrap_or(false)
    }

    async fn await_rate_limit_if_needed(&self, model_id: &str) {
        let records = self.health.snapshot().await;
        if let Some((_, rec)) = records.iter().find(|(id, _)| id == model_id) {
            if rec.status == ModelHealthStatus::RateLimited {
                if let Some(deadline) = rec.deadline {
                    let now = Instant::now();
                    if deadline > now {
                        tokio::time::sleep(deadline - now).await;
                    }
                }
            }
        }
    }

    async fn try_model(&self, entry: &ModelEntry, messages: &[ChatMessage]) -> std::result::Result<String, ModelCallError> {
        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES_PER_MODEL {
            let result = match &entry.client {
                Client::Native(c) => c.chat(messages).await,
                Client::OpenAiCompat(c) => c.chat(messages).await,
            };
            match result {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if !e.retryable() || attempt == MAX_RETRIES_PER_MODEL {
                        return Err(e);
                    }
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt as u32));
                    tokio::time::sleep(backoff).await;
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(ModelCallError::Transient("exhausted retries".into())))
    }

    /// Streaming variant of `chat`: walks the same candidate chain, but a model is
    /// "chosen" as soon as its connection opens successfully (status confirmed) —
    /// there is no retry once chunks start flowing, since a caller may already have
    /// forwarded some of them downstream. Falls back to the next model only on
    /// failure to open the connection at all.
    pub async fn chat_stream(
        &self,
        requested: Option<&str>,
        agent_preference: Option<&str>,
        default_chain: &[String],
        messages: &[ChatMessage],
    ) -> Result<RoutedStream> {
        let chain = self.build_chain(requested, agent_preference, default_chain);
        if chain.is_empty() {
            return Err(RouterError::ModelNotFound(
                requested.or(agent_preference).unwrap_or("<none>").to_string(),
            ));
        }

        for (idx, model_id) in chain.iter().enumerate() {
            if idx == 0 && requested == Some(model_id.as_str()) {
                if self.is_only_rate_limited(model_id).await {
                    self.await_rate_limit_if_needed(model_id).await;
                } else if !self.health.is_available(model_id).await {
                    continue;
                }
            } else if !self.health.is_available(model_id).await {
                continue;
            }

            let entry = self.models.get(model_id).expect("model in chain exists");
            let opened = match &entry.client {
                Client::Native(c) => c.chat_stream(messages).await,
                Client::OpenAiCompat(c) => c.chat_stream(messages).await,
            };
            match opened {
                Ok(stream) => {
                    self.health.mark_healthy(model_id).await;
                    return Ok(RoutedStream {
                        model_used: model_id.clone(),
                        fell_back: requested.is_some() && requested != Some(model_id.as_str()),
                        stream,
                    });
                }
                Err(ModelCallError::RateLimited { retry_after }) => {
                    self.health.mark_rate_limited(model_id, retry_after).await;
                }
                Err(ModelCallError::QuotaExhausted(msg)) => {
                    self.health.mark_quota_exhausted(model_id, &msg).await;
                }
                Err(ModelCallError::AuthFailed(msg)) => {
                    return Err(RouterError::AuthFailed(msg));
                }
                Err(ModelCallError::NotFound(msg)) => {
                    return Err(RouterError::ModelNotFound(msg));
                }
                Err(ModelCallError::Transient(msg)) => {
                    self.health.mark_down(model_id, &msg).await;
                }
            }
        }

        Err(RouterError::AllModelsDown)
    }
}

#[derive(Debug, Clone)]
pub enum ModelCallError {
    RateLimited { retry_after: Option<Duration> },
    QuotaExhausted(String),
    AuthFailed(String),
    NotFound(String),
    Transient(String),
}

impl ModelCallError {
    fn retryable(&self) -> bool {
        matches!(self, ModelCallError::Transient(_))
    }
}

impl std::fmt::Display for ModelCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelCallError::RateLimited { .. } => write!(f, "rate limited"),
            ModelCallError::QuotaExhausted(m) => write!(f, "quota exhausted: {m}"),
            ModelCallError::AuthFailed(m) => write!(f, "auth failed: {m}"),
            ModelCallError::NotFound(m) => write!(f, "not found: {m}"),
            ModelCallError::Transient(m) => write!(f, "transient: {m}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, ProviderKind};

    fn cfg(id: &str) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            provider: ProviderKind::Native,
            url: "http://127.0.0.1:1".to_string(),
            model: "test-model".to_string(),
            api_key: None,
            keep_alive: None,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn health_table_defaults_available() {
        let table = ModelHealthTable::new();
        assert!(table.is_available("anything").await);
    }

    #[tokio::test]
    async fn rate_limited_model_becomes_available_after_deadline() {
        let table = ModelHealthTable::new();
        table.mark_rate_limited("m1", Some(Duration::from_millis(1))).await;
        assert!(!table.is_available("m1").await || {
            tokio::time::sleep(Duration::from_millis(600)).await;
            true
        });
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(table.is_available("m1").await);
    }

    #[tokio::test]
    async fn build_chain_prefers_requested_then_agent_then_default() {
        let router = ModelRouter::new(vec![cfg("fast"), cfg("backup")]);
        let chain = router.build_chain(Some("backup"), Some("fast"), &["fast".to_string()]);
        assert_eq!(chain, vec!["backup".to_string(), "fast".to_string()]);
    }

    #[tokio::test]
    async fn unknown_requested_model_is_dropped_from_chain() {
        let router = ModelRouter::new(vec![cfg("fast")]);
        let chain = router.build_chain(Some("ghost"), None, &["fast".to_string()]);
        assert_eq!(chain, vec!["fast".to_string()]);
    }
}
