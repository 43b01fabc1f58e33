//! Model client abstraction.
//!
//! The core never speaks HTTP itself; a `ModelClient` is handed in at
//! construction and carries a single capability: run one completion against
//! one model. Transport failures are raised as `ClientError` and the
//! orchestrator decides whether to retry, escalate, or fail the task.

pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use scripted::{FailingClient, ScriptedClient, SlowClient};

/// Transport-level failure from a model provider.
#[derive(Debug, thiserror::Error)]
#[error("model client error: {message}")]
pub struct ClientError {
    pub message: String,
    /// Whether the caller may reasonably retry the same call.
    pub retryable: bool,
}

impl ClientError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// One finished completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
}

/// Capability interface to a model provider.
///
/// Implementations must raise on transport failure rather than returning
/// placeholder text; the core does not introspect content before validation.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        model_id: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Completion, ClientError>;
}
