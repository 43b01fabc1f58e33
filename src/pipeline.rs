//! Pipeline facade.
//!
//! The single entry point composing the core: compress the history, then
//! hand the task to the orchestrator (which classifies, routes, delegates,
//! validates, retries) with every step journaled to the continuity store.
//! One call, one task, one result or one taxonomy error.

use crate::client::ModelClient;
use crate::compressor::{CompressedContext, Compressor};
use crate::continuity::{Attempt, ContinuityStore};
use crate::error::CoreError;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::registry::ModelRegistry;
use crate::router::RoutePolicy;
use crate::types::Message;
use crate::validator::ValidationResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-run knobs with the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    pub target_tokens: usize,
    pub namespace: String,
    pub preserve_system_messages: bool,
    pub threshold: u8,
    pub max_retries: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            target_tokens: 8_000,
            namespace: "default".to_string(),
            preserve_system_messages: false,
            threshold: 80,
            max_retries: 2,
        }
    }
}

/// What a run hands back: the artifact, its validation, the attempt trail,
/// the money spent, and a pointer to the session log holding the events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub artifact: String,
    pub validation: ValidationResult,
    pub attempts: Vec<Attempt>,
    pub total_cost: f64,
    pub events_ref: PathBuf,
}

/// The composed core: compressor, registry, orchestrator, store.
pub struct Pipeline {
    compressor: Compressor,
    orchestrator: Orchestrator,
    store: Arc<ContinuityStore>,
}

impl Pipeline {
    /// Wire up a pipeline over a model client, a registry, and a store root.
    pub fn new(
        client: Arc<dyn ModelClient>,
        registry: ModelRegistry,
        store_root: impl Into<PathBuf>,
    ) -> Result<Self, CoreError> {
        let store = Arc::new(ContinuityStore::open(store_root)?);
        Ok(Self::with_store(client, registry, store))
    }

    /// Wire up a pipeline over an existing store (shared across pipelines).
    pub fn with_store(
        client: Arc<dyn ModelClient>,
        registry: ModelRegistry,
        store: Arc<ContinuityStore>,
    ) -> Self {
        let orchestrator = Orchestrator::new(client, Arc::new(registry), store.clone());
        Self {
            compressor: Compressor::new(),
            orchestrator,
            store,
        }
    }

    pub fn with_orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = self.orchestrator.with_config(config);
        self
    }

    pub fn store(&self) -> &Arc<ContinuityStore> {
        &self.store
    }

    /// Compress without running: exposed for callers that manage delegation
    /// themselves.
    pub fn compress(
        &self,
        history: &[Message],
        task: &str,
        options: &RunOptions,
    ) -> Result<CompressedContext, CoreError> {
        self.compressor.compress(
            history,
            task,
            options.target_tokens,
            &options.namespace,
            options.preserve_system_messages,
        )
    }

    /// Full pipeline: compress -> classify -> route -> delegate -> validate
    /// -> (retry | persist result).
    pub async fn run(
        &self,
        task: &str,
        history: &[Message],
        policy: &RoutePolicy,
        options: &RunOptions,
    ) -> Result<PipelineResult, CoreError> {
        self.run_cancellable(task, history, policy, options, None)
            .await
    }

    /// `run` with a cooperative cancellation token.
    pub async fn run_cancellable(
        &self,
        task: &str,
        history: &[Message],
        policy: &RoutePolicy,
        options: &RunOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<PipelineResult, CoreError> {
        let context = self.compress(history, task, options)?;
        tracing::debug!(
            total_tokens = context.total_tokens,
            ratio = context.compression_ratio,
            "context ready"
        );

        let outcome = self
            .orchestrator
            .orchestrate(
                task,
                &context,
                policy,
                options.threshold,
                options.max_retries,
                cancel,
            )
            .await?;

        Ok(PipelineResult {
            artifact: outcome.artifact,
            validation: outcome.final_validation,
            attempts: outcome.attempts,
            total_cost: outcome.total_cost,
            events_ref: self
                .store
                .root()
                .join("sessions")
                .join(format!("{}.log.jsonl", Utc::now().format("%Y-%m-%d"))),
        })
    }
}
