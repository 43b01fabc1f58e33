//! Core error taxonomy.
//!
//! Every failure a caller can observe is one of these variants; recoverable
//! conditions (a retryable timeout, a below-threshold score with retries
//! remaining) are handled inside the orchestrator and never surface here.
//! Messages carry a remedial hint where one exists.

use crate::types::TaskKind;
use crate::validator::ValidationResult;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The compressor cannot fit required content into the target budget.
    /// Raise `target_tokens` or drop `preserve_system_messages`.
    #[error(
        "context budget exceeded: preserved system messages alone need {required} tokens; \
         raise target_tokens to at least {required} or drop preservation"
    )]
    BudgetExceeded { required: usize },

    /// The router found no model satisfying the policy.
    /// Widening the policy (e.g. `allow_premium = true`) usually resolves this.
    #[error(
        "no eligible model for {kind} under the current policy; \
         widen the policy (allow_premium = true) or register more models"
    )]
    NoEligibleModel { kind: TaskKind },

    /// `ModelClient::complete` kept failing past the retry cap.
    #[error("model {model_id} unavailable after {attempts} attempt(s): {reason}")]
    UpstreamUnavailable {
        model_id: String,
        attempts: u32,
        reason: String,
    },

    /// Retries exhausted with the output still below threshold. Carries the
    /// last validation so the caller may accept-with-warning.
    #[error(
        "output stayed below threshold {threshold} after all retries (last score {}); \
         the last validation result is attached",
        .last.score
    )]
    ValidationBelowThreshold {
        threshold: u8,
        last: Box<ValidationResult>,
    },

    /// The continuity store refused a write. The task is failed and no
    /// partial state is exposed.
    #[error("continuity store write failed at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cooperative cancellation honored between transitions.
    #[error("cancelled by caller")]
    Cancelled,
}

impl CoreError {
    /// Informational exit-code mapping for a CLI shell.
    /// 1 is reserved for unexpected internal errors in the shell itself and
    /// is never returned here; every taxonomy variant gets its own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::NoEligibleModel { .. } => 2,
            CoreError::BudgetExceeded { .. } => 3,
            CoreError::UpstreamUnavailable { .. } => 4,
            CoreError::Persistence { .. } => 5,
            CoreError::ValidationBelowThreshold { .. } => 6,
            CoreError::Cancelled => 7,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Persistence {
            path: path.into(),
            source,
        }
    }
}
