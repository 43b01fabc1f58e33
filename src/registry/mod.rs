//! Model registry and cost meter.
//!
//! A declarative catalogue of model specs: pricing per megatoken, task
//! affinities, selection priority, and the context ceiling. Loaded from a
//! TOML table at construction, with a compiled-in default catalogue as
//! fallback. Immutable after construction; the router only reads it.

use crate::types::TaskKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Registry construction failures. These are configuration errors, caught
/// before the pipeline runs; they are not part of the runtime taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry table is empty")]
    Empty,

    #[error("no free model covers {kind}; every supported task kind needs a free fallback")]
    MissingFreeModel { kind: TaskKind },

    #[error("failed to parse registry TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One entry in the model catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_id: String,
    pub is_free: bool,
    pub input_price_per_megatoken: f64,
    pub output_price_per_megatoken: f64,
    pub task_affinities: BTreeSet<TaskKind>,
    /// 1..=5, lower is preferred within a pool.
    pub priority: u8,
    pub max_tokens: u32,
}

impl ModelSpec {
    /// Money cost of one completion against this model.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        if self.is_free {
            return 0.0;
        }
        let input = (input_tokens as f64 / 1_000_000.0) * self.input_price_per_megatoken;
        let output = (output_tokens as f64 / 1_000_000.0) * self.output_price_per_megatoken;
        input + output
    }
}

#[derive(Debug, Deserialize)]
struct RegistryTable {
    #[serde(default)]
    models: Vec<ModelSpec>,
}

/// Immutable catalogue of model specs.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
}

impl ModelRegistry {
    /// Build a registry from explicit specs.
    ///
    /// Validates the free-fallback invariant: every task kind that any model
    /// has affinity for must also be covered by at least one free model.
    /// Out-of-range priorities are kept but logged.
    pub fn new(models: Vec<ModelSpec>) -> Result<Self, RegistryError> {
        if models.is_empty() {
            return Err(RegistryError::Empty);
        }

        for spec in &models {
            if !(1..=5).contains(&spec.priority) {
                tracing::warn!(
                    "model {} has priority {} outside 1..=5",
                    spec.model_id,
                    spec.priority
                );
            }
        }

        let mut free_kinds: BTreeSet<TaskKind> = BTreeSet::new();
        let mut all_kinds: BTreeSet<TaskKind> = BTreeSet::new();
        for spec in &models {
            all_kinds.extend(spec.task_affinities.iter().copied());
            if spec.is_free {
                free_kinds.extend(spec.task_affinities.iter().copied());
            }
        }
        if let Some(kind) = all_kinds.difference(&free_kinds).next() {
            return Err(RegistryError::MissingFreeModel { kind: *kind });
        }

        Ok(Self { models })
    }

    /// Parse a registry from a TOML `[[models]]` table.
    pub fn from_toml_str(raw: &str) -> Result<Self, RegistryError> {
        let table: RegistryTable = toml::from_str(raw)?;
        Self::new(table.models)
    }

    /// Compiled-in default catalogue.
    pub fn defaults() -> Self {
        Self::from_toml_str(DEFAULT_REGISTRY_TOML).expect("default registry table is valid")
    }

    /// Models with affinity for `kind` whose context ceiling fits the input,
    /// in catalogue order.
    pub fn candidates(&self, kind: TaskKind, max_input_tokens: u32) -> Vec<&ModelSpec> {
        self.models
            .iter()
            .filter(|m| m.task_affinities.contains(&kind) && m.max_tokens >= max_input_tokens)
            .collect()
    }

    /// Look up a spec by id.
    pub fn get(&self, model_id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.model_id == model_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Kinds at least one model has affinity for, with free/paid counts.
    /// Diagnostic surface for shells; the router does not use it.
    pub fn coverage(&self) -> BTreeMap<TaskKind, (usize, usize)> {
        let mut out: BTreeMap<TaskKind, (usize, usize)> = BTreeMap::new();
        for spec in &self.models {
            for kind in &spec.task_affinities {
                let entry = out.entry(*kind).or_insert((0, 0));
                if spec.is_free {
                    entry.0 += 1;
                } else {
                    entry.1 += 1;
                }
            }
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────
// Default catalogue (compiled in as fallback)
// Free tiers via OpenRouter; paid rates verified 2026-02.
// ─────────────────────────────────────────────────────────────

const DEFAULT_REGISTRY_TOML: &str = r#"
[[models]]
model_id = "deepseek/deepseek-chat-v3.1:free"
is_free = true
input_price_per_megatoken = 0.0
output_price_per_megatoken = 0.0
task_affinities = ["code_generation", "code_review", "general"]
priority = 1
max_tokens = 64000

[[models]]
model_id = "deepseek/deepseek-r1:free"
is_free = true
input_price_per_megatoken = 0.0
output_price_per_megatoken = 0.0
task_affinities = ["deep_reasoning", "agentic_complex"]
priority = 1
max_tokens = 64000

[[models]]
model_id = "qwen/qwen-2.5-coder-32b:free"
is_free = true
input_price_per_megatoken = 0.0
output_price_per_megatoken = 0.0
task_affinities = ["code_generation", "code_review"]
priority = 2
max_tokens = 32000

[[models]]
model_id = "qwen/qwen-2.5-vl-72b:free"
is_free = true
input_price_per_megatoken = 0.0
output_price_per_megatoken = 0.0
task_affinities = ["vision_language", "document_parsing"]
priority = 1
max_tokens = 32000

[[models]]
model_id = "meta-llama/llama-3.3-70b:free"
is_free = true
input_price_per_megatoken = 0.0
output_price_per_megatoken = 0.0
task_affinities = ["general", "agentic_simple", "document_parsing"]
priority = 2
max_tokens = 128000

[[models]]
model_id = "mistralai/mistral-small-3.1:free"
is_free = true
input_price_per_megatoken = 0.0
output_price_per_megatoken = 0.0
task_affinities = ["general", "agentic_simple"]
priority = 3
max_tokens = 96000

[[models]]
model_id = "anthropic/claude-sonnet-4"
is_free = false
input_price_per_megatoken = 3.0
output_price_per_megatoken = 15.0
task_affinities = ["code_generation", "code_review", "agentic_complex", "deep_reasoning", "general"]
priority = 1
max_tokens = 200000

[[models]]
model_id = "openai/gpt-4o"
is_free = false
input_price_per_megatoken = 2.5
output_price_per_megatoken = 10.0
task_affinities = ["vision_language", "document_parsing", "general"]
priority = 2
max_tokens = 128000

[[models]]
model_id = "anthropic/claude-haiku-3.5"
is_free = false
input_price_per_megatoken = 0.8
output_price_per_megatoken = 4.0
task_affinities = ["agentic_simple", "general"]
priority = 2
max_tokens = 200000

[[models]]
model_id = "google/gemini-2.5-pro"
is_free = false
input_price_per_megatoken = 1.25
output_price_per_megatoken = 10.0
task_affinities = ["deep_reasoning", "vision_language", "agentic_complex"]
priority = 2
max_tokens = 1000000
"#;

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn spec(
        model_id: &str,
        is_free: bool,
        priority: u8,
        kinds: &[TaskKind],
    ) -> ModelSpec {
        ModelSpec {
            model_id: model_id.to_string(),
            is_free,
            input_price_per_megatoken: if is_free { 0.0 } else { 3.0 },
            output_price_per_megatoken: if is_free { 0.0 } else { 15.0 },
            task_affinities: kinds.iter().copied().collect(),
            priority,
            max_tokens: 64000,
        }
    }

    #[test]
    fn test_defaults_parse_and_cover_all_kinds_free() {
        let registry = ModelRegistry::defaults();
        assert!(registry.len() >= 8);
        for kind in TaskKind::ALL {
            let free = registry
                .iter()
                .any(|m| m.is_free && m.task_affinities.contains(&kind));
            assert!(free, "no free model for {kind}");
        }
    }

    #[test]
    fn test_cost_is_zero_for_free_models() {
        let registry = ModelRegistry::defaults();
        let free = registry.iter().find(|m| m.is_free).unwrap();
        assert_eq!(free.cost(1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn test_cost_scales_per_megatoken() {
        let registry = ModelRegistry::defaults();
        let sonnet = registry.get("anthropic/claude-sonnet-4").unwrap();
        let cost = sonnet.cost(1_000_000, 1_000_000);
        assert!((cost - 18.0).abs() < 1e-9);
        let half = sonnet.cost(500_000, 0);
        assert!((half - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_free_fallback_is_rejected() {
        let err = ModelRegistry::new(vec![spec(
            "paid-only",
            false,
            1,
            &[TaskKind::CodeGeneration],
        )])
        .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::MissingFreeModel {
                kind: TaskKind::CodeGeneration
            }
        ));
    }

    #[test]
    fn test_empty_table_is_rejected() {
        assert!(matches!(
            ModelRegistry::new(vec![]),
            Err(RegistryError::Empty)
        ));
    }

    #[test]
    fn test_candidates_filter_by_affinity_and_ceiling() {
        let registry = ModelRegistry::defaults();
        let all = registry.candidates(TaskKind::CodeGeneration, 1000);
        assert!(all.iter().all(|m| m
            .task_affinities
            .contains(&TaskKind::CodeGeneration)));

        let big_input = registry.candidates(TaskKind::CodeGeneration, 150_000);
        assert!(big_input.iter().all(|m| m.max_tokens >= 150_000));
        assert!(big_input.len() < all.len());
    }

    #[test]
    fn test_from_toml_str_rejects_bad_toml() {
        assert!(matches!(
            ModelRegistry::from_toml_str("models = 3"),
            Err(RegistryError::Parse(_))
        ));
    }
}
