#![allow(dead_code)]
// Model name resolution: alias table, normalization, dynamic cache,
// hidden-model table, pass-through.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use super::cache::ModelCache;

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    Cache,
    Hidden,
    Passthrough,
}

impl ModelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Hidden => "hidden",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Result of resolving a client-supplied model name.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub internal_id: String,
    pub source: ModelSource,
    pub original_request: String,
    pub normalized: String,
    pub is_verified: bool,
}

/// Normalize a client model name to Kiro format.
///
/// Transformations (first match wins, case-insensitive):
/// 1. claude-haiku-4-5 → claude-haiku-4.5 (dash to dot for minor version)
/// 2. claude-haiku-4-5-20251001 → claude-haiku-4.5 (strip date suffix)
/// 3. claude-sonnet-4-20250514 → claude-sonnet-4 (strip date, no minor)
/// 4. claude-3-7-sonnet → claude-3.7-sonnet (legacy format)
/// 5. claude-3.7-sonnet-20250219 → claude-3.7-sonnet (already dotted + date)
/// 6. claude-4.5-opus-high → claude-opus-4.5 (inverted format with suffix)
pub fn normalize_model_name(name: &str) -> String {
    if name.is_empty() {
        return name.to_string();
    }
    let name_lower = name.to_lowercase();

    // Pattern 1: claude-{family}-{major}-{minor}(-{suffix})?
    let re_standard =
        Regex::new(r"^(claude-(?:haiku|sonnet|opus)-\d+)-(\d{1,2})(?:-(?:\d{8}|latest|\d+))?$")
            .unwrap();
    if let Some(caps) = re_standard.captures(&name_lower) {
        return format!("{}.{}", &caps[1], &caps[2]);
    }

    // Pattern 2: claude-{family}-{major}(-{date})?
    let re_no_minor = Regex::new(r"^(claude-(?:haiku|sonnet|opus)-\d+)(?:-\d{8})?$").unwrap();
    if let Some(caps) = re_no_minor.captures(&name_lower) {
        return caps[1].to_string();
    }

    // Pattern 3: legacy claude-{major}-{minor}-{family}(-{suffix})?
    let re_legacy =
        Regex::new(r"^(claude)-(\d+)-(\d+)-(haiku|sonnet|opus)(?:-(?:\d{8}|latest|\d+))?$")
            .unwrap();
    if let Some(caps) = re_legacy.captures(&name_lower) {
        return format!("{}-{}.{}-{}", &caps[1], &caps[2], &caps[3], &caps[4]);
    }

    // Pattern 4: already dotted but carrying a date suffix
    let re_dot_date =
        Regex::new(r"^(claude-(?:\d+\.\d+-)?(?:haiku|sonnet|opus)(?:-\d+\.\d+)?)-\d{8}$").unwrap();
    if let Some(caps) = re_dot_date.captures(&name_lower) {
        return caps[1].to_string();
    }

    // Pattern 5: inverted claude-{major}.{minor}-{family}-{suffix}
    let re_inverted = Regex::new(r"^claude-(\d+)\.(\d+)-(haiku|sonnet|opus)-(.+)$").unwrap();
    if let Some(caps) = re_inverted.captures(&name_lower) {
        return format!("claude-{}-{}.{}", &caps[3], &caps[1], &caps[2]);
    }

    name.to_string()
}

/// Extract the model family token (haiku | sonnet | opus) if present.
pub fn extract_model_family(model_name: &str) -> Option<String> {
    let re = Regex::new(r"(?i)(haiku|sonnet|opus)").unwrap();
    re.captures(model_name).map(|caps| caps[1].to_lowercase())
}

/// 4-layer model resolution pipeline.
///
/// 1. Aliases (configured name mappings)
/// 2. Normalize (dashes→dots, strip dates)
/// 3. Dynamic cache (models discovered upstream)
/// 4. Hidden models (display name → internal Kiro id)
/// 5. Pass-through - let the upstream decide
pub struct ModelResolver {
    cache: Arc<ModelCache>,
    aliases: HashMap<String, String>,
    hidden_from_list: HashSet<String>,
}

impl ModelResolver {
    pub fn new(
        cache: Arc<ModelCache>,
        aliases: HashMap<String, String>,
        hidden_from_list: Vec<String>,
    ) -> Self {
        Self {
            cache,
            aliases,
            hidden_from_list: hidden_from_list.into_iter().collect(),
        }
    }

    pub async fn resolve(&self, external_model: &str) -> Resolution {
        // Layer 0: alias
        let resolved = match self.aliases.get(external_model) {
            Some(alias) => {
                debug!("Alias resolved: '{}' → '{}'", external_model, alias);
                alias.clone()
            }
            None => external_model.to_string(),
        };

        // Layer 1: normalize
        let normalized = normalize_model_name(&resolved);

        // Layer 2: dynamic cache
        if self.cache.is_valid_model(&normalized).await {
            debug!("Model '{}' found in dynamic cache", normalized);
            return Resolution {
                internal_id: normalized.clone(),
                source: ModelSource::Cache,
                original_request: external_model.to_string(),
                normalized,
                is_verified: true,
            };
        }

        // Layer 3: hidden models
        if let Some(internal_id) = self.cache.get_hidden_internal_id(&normalized).await {
            debug!("Model '{}' found in hidden models → '{}'", normalized, internal_id);
            return Resolution {
                internal_id,
                source: ModelSource::Hidden,
                original_request: external_model.to_string(),
                normalized,
                is_verified: true,
            };
        }

        // Layer 4: pass-through
        info!(
            "Model '{}' (normalized: '{}') not in cache, passing through to Kiro API",
            external_model, normalized
        );
        Resolution {
            internal_id: normalized.clone(),
            source: ModelSource::Passthrough,
            original_request: external_model.to_string(),
            normalized,
            is_verified: false,
        }
    }

    /// All model ids for /v1/models: cache ∪ hidden display names ∪ aliases,
    /// minus the hidden-from-list deny-set (aliases are always listed).
    pub async fn get_available_models(&self) -> Vec<String> {
        let mut models: HashSet<String> = HashSet::new();

        for id in self.cache.get_all_model_ids().await {
            if !self.hidden_from_list.contains(&id) {
                models.insert(id);
            }
        }
        for display_name in self.cache.hidden_display_names().await {
            if !self.hidden_from_list.contains(&display_name) {
                models.insert(display_name);
            }
        }
        for alias in self.aliases.keys() {
            models.insert(alias.clone());
        }

        let mut result: Vec<String> = models.into_iter().collect();
        result.sort();
        result
    }
}
