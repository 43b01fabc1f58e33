//! Scripted model clients for tests and dry runs (no real LLM).
//!
//! `ScriptedClient` replays a fixed sequence of completions, which is how the
//! delegate/validate/retry loop is exercised without a network: script the
//! outputs, assert on the attempts.

use super::{ClientError, Completion, ModelClient};
use crate::tokenizer;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Replays a fixed sequence of completion texts, one per call.
/// After the script runs out, the last entry repeats forever.
pub struct ScriptedClient {
    script: Vec<String>,
    cursor: Mutex<usize>,
    /// (model_id, prompt) observed by each call, in order.
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<impl Into<String>>) -> Self {
        let script: Vec<String> = script.into_iter().map(Into::into).collect();
        assert!(!script.is_empty(), "script must have at least one entry");
        Self {
            script,
            cursor: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A client that returns the same text on every call.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(vec![text.into()])
    }

    /// Model ids this client has been asked to complete against, in order.
    pub fn observed_models(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .iter()
            .map(|(model, _)| model.clone())
            .collect()
    }

    /// Prompts this client received, in order.
    pub fn observed_prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .iter()
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    /// Number of completions served so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock poisoned").len()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn complete(
        &self,
        prompt: &str,
        model_id: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<Completion, ClientError> {
        let text = {
            let mut cursor = self.cursor.lock().expect("cursor lock poisoned");
            let text = self.script[(*cursor).min(self.script.len() - 1)].clone();
            *cursor += 1;
            text
        };
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push((model_id.to_string(), prompt.to_string()));

        Ok(Completion {
            input_tokens: tokenizer::count_tokens(prompt) as u32,
            output_tokens: tokenizer::count_tokens(&text) as u32,
            latency_ms: 12,
            text,
        })
    }
}

/// Always raises a transport failure.
pub struct FailingClient {
    reason: String,
}

impl FailingClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ModelClient for FailingClient {
    async fn complete(
        &self,
        _prompt: &str,
        _model_id: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<Completion, ClientError> {
        Err(ClientError::retryable(self.reason.clone()))
    }
}

/// Sleeps before answering; drives the soft-timeout path under paused time.
pub struct SlowClient {
    delay: Duration,
    text: String,
}

impl SlowClient {
    pub fn new(delay: Duration, text: impl Into<String>) -> Self {
        Self {
            delay,
            text: text.into(),
        }
    }
}

#[async_trait]
impl ModelClient for SlowClient {
    async fn complete(
        &self,
        prompt: &str,
        _model_id: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<Completion, ClientError> {
        tokio::time::sleep(self.delay).await;
        Ok(Completion {
            input_tokens: tokenizer::count_tokens(prompt) as u32,
            output_tokens: tokenizer::count_tokens(&self.text) as u32,
            latency_ms: self.delay.as_millis() as u64,
            text: self.text.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_replays_in_order_then_repeats() {
        let client = ScriptedClient::new(vec!["first", "second"]);
        for expected in ["first", "second", "second"] {
            let out = client.complete("p", "m", 256, 0.2).await.unwrap();
            assert_eq!(out.text, expected);
        }
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.observed_models(), vec!["m", "m", "m"]);
    }

    #[tokio::test]
    async fn test_failing_client_raises() {
        let client = FailingClient::new("connection reset");
        let err = client.complete("p", "m", 256, 0.2).await.unwrap_err();
        assert!(err.retryable);
        assert!(err.to_string().contains("connection reset"));
    }
}
