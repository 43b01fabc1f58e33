//! Hybrid orchestrator: the delegate/validate/retry loop.
//!
//! Per task: route once, then delegate to the chosen model, validate the
//! output, and either accept, refine on the same model with increasingly
//! specific fix instructions, or escalate once to the paid pool when refining
//! stalls. Every transition is journaled to the continuity store before it
//! becomes visible to the caller. Attempts within one task are strictly
//! sequential; the compressed context never changes across retries.

use crate::client::{Completion, ModelClient};
use crate::compressor::CompressedContext;
use crate::continuity::{Attempt, ContinuityStore, EventKind, SessionEvent, TaskRecord, TaskStatus};
use crate::error::CoreError;
use crate::registry::{ModelRegistry, ModelSpec};
use crate::router::{self, RoutePolicy};
use crate::validator::{ValidationResult, Validator};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Knobs that rarely change per call. Threshold and retry cap are per-call
/// arguments; these are the ambient ones.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Soft per-delegation timeout; one same-model retry on expiry.
    pub soft_timeout: Duration,
    /// Minimum score gain a refine pass must show; two consecutive passes
    /// under this trigger escalation.
    pub min_improvement: u8,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            soft_timeout: Duration::from_secs(300),
            min_improvement: 5,
            temperature: 0.2,
            max_output_tokens: 8192,
        }
    }
}

/// Final outcome of one orchestrated task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub artifact: String,
    pub final_validation: ValidationResult,
    pub attempts: Vec<Attempt>,
    pub total_cost: f64,
}

/// Drives delegate -> validate -> retry for one task at a time.
pub struct Orchestrator {
    client: Arc<dyn ModelClient>,
    registry: Arc<ModelRegistry>,
    store: Arc<ContinuityStore>,
    validator: Validator,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn ModelClient>,
        registry: Arc<ModelRegistry>,
        store: Arc<ContinuityStore>,
    ) -> Self {
        Self {
            client,
            registry,
            store,
            validator: Validator::new(),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Run one task to a terminal state.
    ///
    /// Terminates within `(max_retries + 1)` delegations, plus another
    /// `(max_retries + 1)` after the single allowed escalation. Validation
    /// failures are recovered locally; budget, eligibility, persistence, and
    /// cancellation errors surface.
    pub async fn orchestrate(
        &self,
        task: &str,
        context: &CompressedContext,
        policy: &RoutePolicy,
        threshold: u8,
        max_retries: u32,
        cancel: Option<&CancellationToken>,
    ) -> Result<OrchestrationResult, CoreError> {
        let task_id = TaskRecord::derive_id(task);
        let mut record = TaskRecord::new(&task_id);
        self.store.put_task(&record)?;

        // ROUTING
        let mut routing = match router::route(&self.registry, task, policy) {
            Ok(routing) => routing,
            Err(error) => {
                self.emit(
                    EventKind::Error,
                    &task_id,
                    json!({"error": error.to_string()}),
                )?;
                self.fail_task(&mut record, &error)?;
                return Err(error);
            }
        };
        self.emit(
            EventKind::Classify,
            &task_id,
            json!({
                "kind": routing.kind,
                "model_id": routing.model.model_id,
                "reasoning": routing.reasoning,
            }),
        )?;

        let base_prompt = build_prompt(context, task);
        let mut prompt = base_prompt.clone();
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut total_cost = 0.0f64;
        let mut escalated = false;
        // Scores since the last (re-)route; cleared on escalation.
        let mut phase_scores: Vec<u8> = Vec::new();
        let mut phase_cap = max_retries + 1;
        let escalation_budget = max_retries + 1;
        let hard_deadline =
            Instant::now() + self.config.soft_timeout * (1 + max_retries);

        loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    let error = CoreError::Cancelled;
                    self.emit(EventKind::Error, &task_id, json!({"error": "cancelled"}))?;
                    self.fail_task(&mut record, &error)?;
                    return Err(error);
                }
            }
            if Instant::now() >= hard_deadline {
                let error = CoreError::UpstreamUnavailable {
                    model_id: routing.model.model_id.clone(),
                    attempts: attempts.len() as u32,
                    reason: "hard task deadline exceeded".to_string(),
                };
                self.emit(EventKind::Error, &task_id, json!({"error": "hard deadline"}))?;
                self.fail_task(&mut record, &error)?;
                return Err(error);
            }

            // DELEGATING
            record.status = TaskStatus::InProgress;
            record.updated_at = Utc::now();
            self.store.put_task(&record)?;
            self.emit(
                EventKind::Delegate,
                &task_id,
                json!({
                    "model_id": routing.model.model_id,
                    "attempt": attempts.len() + 1,
                }),
            )?;

            let completion = match self
                .delegate_once(&prompt, &routing.model, &task_id, cancel)
                .await
            {
                Ok(completion) => completion,
                Err(error) => {
                    self.emit(
                        EventKind::Error,
                        &task_id,
                        json!({"error": error.to_string()}),
                    )?;
                    self.fail_task(&mut record, &error)?;
                    return Err(error);
                }
            };

            let cost = routing
                .model
                .cost(completion.input_tokens, completion.output_tokens);
            total_cost += cost;

            // VALIDATING. The retry ordinal within the current phase selects
            // the fix tier; the validator itself is stateless.
            let retry_ordinal = phase_scores.len() as u32;
            let validation = self
                .validator
                .validate(task, &completion.text, retry_ordinal);
            self.emit(
                EventKind::Validate,
                &task_id,
                json!({
                    "score": validation.score,
                    "tier": validation.fix_tier,
                    "issues": validation.issues.len(),
                }),
            )?;

            attempts.push(Attempt {
                model_id: routing.model.model_id.clone(),
                score: validation.score,
                cost,
                latency_ms: completion.latency_ms,
                tier: validation.fix_tier,
            });
            record.attempts = attempts.clone();
            record.updated_at = Utc::now();
            self.store.put_task(&record)?;

            // ACCEPT
            if validation.passed(threshold) {
                record.status = TaskStatus::Validated;
                record.final_artifact_ref = Some(format!("{task_id}:attempt:{}", attempts.len()));
                record.updated_at = Utc::now();
                self.store.put_task(&record)?;
                self.emit(
                    EventKind::Complete,
                    &task_id,
                    json!({
                        "score": validation.score,
                        "attempts": attempts.len(),
                        "total_cost": total_cost,
                    }),
                )?;
                tracing::info!(%task_id, score = validation.score, attempts = attempts.len(), "task accepted");
                return Ok(OrchestrationResult {
                    artifact: completion.text,
                    final_validation: validation,
                    attempts,
                    total_cost,
                });
            }

            phase_scores.push(validation.score);
            let refine_exhausted = phase_scores.len() as u32 >= phase_cap;
            let stalled = is_stalled(&phase_scores, self.config.min_improvement);

            // ESCALATE: once, to the paid pool, with a fresh tier-0 prompt
            // that carries only the issues list.
            if (refine_exhausted || stalled) && !escalated && policy.allow_premium {
                let escalation_policy = RoutePolicy {
                    prefer_free: false,
                    ..policy.clone()
                };
                if let Ok(new_routing) = router::route(&self.registry, task, &escalation_policy) {
                    if new_routing.model.model_id != routing.model.model_id {
                        self.emit(
                            EventKind::Escalate,
                            &task_id,
                            json!({
                                "from": routing.model.model_id,
                                "to": new_routing.model.model_id,
                                "stalled": stalled,
                            }),
                        )?;
                        tracing::warn!(
                            %task_id,
                            from = %routing.model.model_id,
                            to = %new_routing.model.model_id,
                            "escalating to the paid pool"
                        );
                        routing = new_routing;
                        escalated = true;
                        phase_scores.clear();
                        phase_cap = escalation_budget;
                        prompt = escalation_prompt(&base_prompt, &validation);
                        continue;
                    }
                }
            }

            // FAIL: refine budget gone and no escalation possible.
            if refine_exhausted {
                let error = CoreError::ValidationBelowThreshold {
                    threshold,
                    last: Box::new(validation),
                };
                self.emit(
                    EventKind::Error,
                    &task_id,
                    json!({"error": "validation below threshold", "attempts": attempts.len()}),
                )?;
                self.fail_task(&mut record, &error)?;
                return Err(error);
            }

            // REFINE: same model, same context, tiered fix text appended.
            self.emit(
                EventKind::Retry,
                &task_id,
                json!({
                    "attempt": attempts.len() + 1,
                    "tier": validation.fix_tier,
                    "score": validation.score,
                }),
            )?;
            prompt = format!("{base_prompt}\n\n{}", validation.fix_instructions);
        }
    }

    /// One delegation with the soft timeout and a single same-model retry on
    /// timeout or retryable transport failure.
    async fn delegate_once(
        &self,
        prompt: &str,
        model: &ModelSpec,
        task_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Completion, CoreError> {
        let max_tries = 2u32;
        for try_index in 0..max_tries {
            let call = self.client.complete(
                prompt,
                &model.model_id,
                self.config.max_output_tokens,
                self.config.temperature,
            );
            let outcome = match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(CoreError::Cancelled),
                        outcome = tokio::time::timeout(self.config.soft_timeout, call) => outcome,
                    }
                }
                None => tokio::time::timeout(self.config.soft_timeout, call).await,
            };

            match outcome {
                Ok(Ok(completion)) => return Ok(completion),
                Ok(Err(client_error)) => {
                    if try_index + 1 < max_tries && client_error.retryable {
                        tracing::warn!(
                            model = %model.model_id,
                            "transport failure, retrying once: {client_error}"
                        );
                        self.emit(
                            EventKind::Retry,
                            task_id,
                            json!({"reason": "transport", "detail": client_error.to_string()}),
                        )?;
                        continue;
                    }
                    return Err(CoreError::UpstreamUnavailable {
                        model_id: model.model_id.clone(),
                        attempts: try_index + 1,
                        reason: client_error.to_string(),
                    });
                }
                Err(_elapsed) => {
                    if try_index + 1 < max_tries {
                        tracing::warn!(model = %model.model_id, "soft timeout, retrying once");
                        self.emit(
                            EventKind::Retry,
                            task_id,
                            json!({"reason": "timeout", "soft_timeout_secs": self.config.soft_timeout.as_secs()}),
                        )?;
                        continue;
                    }
                    return Err(CoreError::UpstreamUnavailable {
                        model_id: model.model_id.clone(),
                        attempts: max_tries,
                        reason: format!(
                            "timed out twice after {}s",
                            self.config.soft_timeout.as_secs()
                        ),
                    });
                }
            }
        }
        unreachable!("delegation loop always returns")
    }

    fn emit(
        &self,
        kind: EventKind,
        task_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), CoreError> {
        self.store
            .append_event(&SessionEvent::new(kind, task_id, payload))
    }

    fn fail_task(&self, record: &mut TaskRecord, error: &CoreError) -> Result<(), CoreError> {
        record.status = TaskStatus::Failed;
        record.updated_at = Utc::now();
        tracing::error!(task_id = %record.task_id, "task failed: {error}");
        self.store.put_task(record)
    }
}

/// The compressed context block plus the task. Stable across retries.
fn build_prompt(context: &CompressedContext, task: &str) -> String {
    let context_block = context.render_prompt();
    if context_block.is_empty() {
        format!("Task: {task}")
    } else {
        format!("{context_block}\n\nTask: {task}")
    }
}

/// Fresh tier-0 prompt for the escalated model: no accumulated fix text,
/// just the known issues.
fn escalation_prompt(base_prompt: &str, last_validation: &ValidationResult) -> String {
    if last_validation.issues.is_empty() {
        return base_prompt.to_string();
    }
    let issues = last_validation
        .issues
        .iter()
        .map(|issue| format!("- {issue}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{base_prompt}\n\nKnown issues from a previous attempt:\n{issues}")
}

/// Two consecutive refine passes each improving by less than `min_improvement`.
fn is_stalled(phase_scores: &[u8], min_improvement: u8) -> bool {
    if phase_scores.len() < 3 {
        return false;
    }
    let n = phase_scores.len();
    let improved = |later: u8, earlier: u8| later.saturating_sub(earlier) >= min_improvement;
    !improved(phase_scores[n - 1], phase_scores[n - 2])
        && !improved(phase_scores[n - 2], phase_scores[n - 3])
}
