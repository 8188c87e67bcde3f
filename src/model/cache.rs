#![allow(dead_code)]
// Thread-safe model metadata cache with TTL-driven staleness.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

pub const DEFAULT_MAX_INPUT_TOKENS: u32 = 200_000;

/// Model information as returned by ListAvailableModels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(rename = "modelId")]
    pub model_id: String,
}

struct Inner {
    models: HashMap<String, ModelInfo>,
    max_input: HashMap<String, u32>,
    hidden_models: HashMap<String, String>,
    last_update: Option<Instant>,
}

/// Process-wide model cache. Reads are concurrent; writers are the startup
/// loader, the background refresher, and hidden-model registration.
pub struct ModelCache {
    inner: RwLock<Inner>,
    ttl: Duration,
    default_max_input: u32,
}

impl ModelCache {
    pub fn new(ttl: Duration, default_max_input: u32, hidden_models: HashMap<String, String>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                models: HashMap::new(),
                max_input: HashMap::new(),
                hidden_models,
                last_update: None,
            }),
            ttl,
            default_max_input,
        }
    }

    /// Seed the cache with the built-in fallback list (used when the
    /// upstream model fetch fails). Does not stamp `last_update`, so the
    /// next refresh cycle still tries the API.
    pub async fn seed_fallback(&self, model_ids: &[String]) {
        let mut inner = self.inner.write().await;
        for id in model_ids {
            inner
                .models
                .insert(id.clone(), ModelInfo { model_id: id.clone() });
            inner.max_input.insert(id.clone(), self.default_max_input);
        }
        debug!("Model cache seeded with {} fallback models", model_ids.len());
    }

    /// Replace the cache contents with a fresh model list from the API.
    pub async fn update(&self, models: Vec<ModelInfo>) {
        let mut inner = self.inner.write().await;
        let count = models.len();
        inner.models = models
            .into_iter()
            .map(|m| (m.model_id.clone(), m))
            .collect();
        inner.last_update = Some(Instant::now());
        debug!("Model cache updated with {} models", count);
    }

    pub async fn is_valid_model(&self, model_id: &str) -> bool {
        self.inner.read().await.models.contains_key(model_id)
    }

    pub async fn get_all_model_ids(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner.models.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn get_max_input_tokens(&self, model_id: &str) -> u32 {
        let inner = self.inner.read().await;
        inner
            .max_input
            .get(model_id)
            .copied()
            .unwrap_or(self.default_max_input)
    }

    pub async fn set_max_input_tokens(&self, model_id: &str, max_tokens: u32) {
        self.inner
            .write()
            .await
            .max_input
            .insert(model_id.to_string(), max_tokens);
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.models.is_empty()
    }

    /// Stale when never updated or when the TTL has elapsed.
    pub async fn is_stale(&self) -> bool {
        match self.inner.read().await.last_update {
            None => true,
            Some(at) => at.elapsed() > self.ttl,
        }
    }

    /// Register a hidden model: display name resolves to an internal id,
    /// and the display name joins the model list.
    pub async fn add_hidden_model(&self, display_name: &str, internal_id: &str) {
        let mut inner = self.inner.write().await;
        inner.models.insert(
            display_name.to_string(),
            ModelInfo {
                model_id: display_name.to_string(),
            },
        );
        inner
            .hidden_models
            .insert(display_name.to_string(), internal_id.to_string());
    }

    pub async fn get_hidden_internal_id(&self, display_name: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .hidden_models
            .get(display_name)
            .cloned()
    }

    pub async fn hidden_display_names(&self) -> Vec<String> {
        self.inner.read().await.hidden_models.keys().cloned().collect()
    }
}
