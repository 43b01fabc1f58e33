//! Context compressor.
//!
//! Reduces an arbitrarily long conversation history to a bounded token budget
//! while keeping what an executor actually needs: the decisions made, the
//! code written, preserved system instructions, and a dense summary of the
//! rest. Also emits a deterministic expectation vector over the selected
//! content for downstream similarity checks.
//!
//! The pipeline is pure and deterministic: identical inputs produce
//! byte-identical artifacts.

pub mod density;
pub mod embedding;
pub mod segment;
mod select;

use crate::error::CoreError;
use crate::tokenizer;
use crate::types::{Message, Role};
use serde::{Deserialize, Serialize};

pub use density::CodeSnippet;
pub use embedding::EXPECTATION_DIM;
pub use segment::{Segment, SegmentKind};

/// Share of the target budget MMR selection may fill; the rest is headroom
/// for joins and framing.
const SELECT_SHARE_PCT: usize = 60;

/// Compressor output: everything an executor gets instead of raw history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedContext {
    /// Dense prose, at most `target_tokens * 0.6`.
    pub summary: String,
    /// Decision statements in chronological order.
    pub key_decisions: Vec<String>,
    /// Code regions preserved verbatim.
    pub code_snippets: Vec<CodeSnippet>,
    /// System messages routed through uncompressed.
    pub preserved_system_messages: Vec<String>,
    /// Unit vector over the selected segments; all zeros for empty input.
    pub expectation_vector: Vec<f32>,
    pub total_tokens: usize,
    /// Input tokens divided by output tokens; 1.0 for empty input.
    pub compression_ratio: f64,
    pub namespace: String,
}

impl CompressedContext {
    /// Reconstruct a minimal history from the artifact, suitable for feeding
    /// back into `compress` (re-compression is stable after one pass).
    pub fn as_history(&self) -> Vec<Message> {
        let mut history: Vec<Message> = self
            .preserved_system_messages
            .iter()
            .map(|text| Message::system(text.clone()).preserved())
            .collect();
        let body = self.render_body();
        if !body.is_empty() {
            history.push(Message::assistant(body));
        }
        history
    }

    /// Render the artifact as the context block of a delegation prompt.
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::new();
        for preserved in &self.preserved_system_messages {
            prompt.push_str(preserved);
            prompt.push_str("\n\n");
        }
        let body = self.render_body();
        if !body.is_empty() {
            prompt.push_str("Context from the session so far:\n\n");
            prompt.push_str(&body);
        }
        prompt.trim_end().to_string()
    }

    fn render_body(&self) -> String {
        let mut body = String::new();
        if !self.summary.is_empty() {
            body.push_str(&self.summary);
            body.push_str("\n\n");
        }
        for decision in &self.key_decisions {
            body.push_str("Decision: ");
            body.push_str(decision);
            body.push('\n');
        }
        if !self.key_decisions.is_empty() {
            body.push('\n');
        }
        for snippet in &self.code_snippets {
            body.push_str("```");
            body.push_str(&snippet.language);
            body.push('\n');
            body.push_str(&snippet.code);
            body.push_str("\n```\n\n");
        }
        body.trim_end().to_string()
    }
}

/// The context compressor. Stateless; construction exists so callers can hold
/// one next to the other pipeline components.
#[derive(Debug, Clone, Default)]
pub struct Compressor;

impl Compressor {
    pub fn new() -> Self {
        Self
    }

    /// Compress `history` to at most `target_tokens`, preserving what
    /// `current_task` needs.
    ///
    /// Empty history yields an empty artifact with a zero expectation vector
    /// (the documented exception to the unit-norm invariant). Preserved
    /// system messages that alone exceed the target fail with
    /// `BudgetExceeded` before anything else runs.
    pub fn compress(
        &self,
        history: &[Message],
        current_task: &str,
        target_tokens: usize,
        namespace: &str,
        preserve_system_messages: bool,
    ) -> Result<CompressedContext, CoreError> {
        if history.is_empty() {
            return Ok(CompressedContext {
                summary: String::new(),
                key_decisions: Vec::new(),
                code_snippets: Vec::new(),
                preserved_system_messages: Vec::new(),
                expectation_vector: vec![0.0; EXPECTATION_DIM],
                total_tokens: 0,
                compression_ratio: 1.0,
                namespace: namespace.to_string(),
            });
        }

        let input_tokens: usize = history
            .iter()
            .map(|m| tokenizer::count_tokens(&m.content))
            .sum();

        // Partition: preserved system messages bypass scoring and rewriting.
        let mut preserved: Vec<String> = Vec::new();
        let mut rest: Vec<Message> = Vec::new();
        for message in history {
            let keep_verbatim =
                message.role == Role::System && (preserve_system_messages || message.preserve);
            if keep_verbatim {
                preserved.push(message.content.clone());
            } else {
                rest.push(message.clone());
            }
        }

        let preserved_tokens: usize = preserved.iter().map(|p| tokenizer::count_tokens(p)).sum();
        if preserved_tokens > target_tokens {
            return Err(CoreError::BudgetExceeded {
                required: preserved_tokens,
            });
        }

        // Segment and score what remains, then pack the selection budget.
        let mut segments = segment::segment_history(&rest);
        let scored = select::score_segments(&mut segments, current_task);
        let remaining_budget = target_tokens - preserved_tokens;
        let select_budget = (target_tokens * SELECT_SHARE_PCT / 100).min(remaining_budget);
        let picked = select::select_mmr(&segments, &scored, select_budget, select::MMR_LAMBDA);
        let selected: Vec<&Segment> = picked.iter().map(|&i| &segments[i]).collect();

        // Chain-of-density: decisions and code verbatim, then a dense summary
        // out of whatever budget is left.
        let key_decisions = density::extract_decisions(&selected);
        let code_snippets = density::extract_snippets(&selected);
        let decisions_tokens: usize = key_decisions
            .iter()
            .map(|d| tokenizer::count_tokens(d))
            .sum();
        let snippets_tokens: usize = code_snippets
            .iter()
            .map(|s| tokenizer::count_tokens(&s.code))
            .sum();
        let summary_budget = remaining_budget
            .saturating_sub(decisions_tokens)
            .saturating_sub(snippets_tokens);
        let summary = density::build_summary(&selected, summary_budget);

        let expectation_vector = expectation_vector(&selected, &picked, &scored);

        let total_tokens = preserved_tokens
            + decisions_tokens
            + snippets_tokens
            + tokenizer::count_tokens(&summary);
        let compression_ratio = if total_tokens == 0 {
            1.0
        } else {
            input_tokens as f64 / total_tokens as f64
        };

        tracing::debug!(
            input_tokens,
            total_tokens,
            compression_ratio,
            segments = segments.len(),
            selected = selected.len(),
            decisions = key_decisions.len(),
            snippets = code_snippets.len(),
            "compressed history"
        );

        Ok(CompressedContext {
            summary,
            key_decisions,
            code_snippets,
            preserved_system_messages: preserved,
            expectation_vector,
            total_tokens,
            compression_ratio,
            namespace: namespace.to_string(),
        })
    }
}

/// Score-weighted sum of selected-segment vectors, L2-normalized.
/// All zeros when nothing was selected.
fn expectation_vector(
    selected: &[&Segment],
    picked: &[usize],
    scored: &[select::Scored],
) -> Vec<f32> {
    let mut vector = vec![0.0f32; EXPECTATION_DIM];
    for (slot, &index) in picked.iter().enumerate() {
        let weight = scored[index].composite.max(f32::EPSILON);
        for (acc, component) in vector.iter_mut().zip(&scored[index].vector) {
            *acc += weight * component;
        }
        debug_assert_eq!(selected[slot].id, index);
    }
    embedding::normalize(&mut vector);
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    /// A synthetic but realistic session: decisions, code, errors, filler.
    fn build_history(rounds: usize) -> Vec<Message> {
        let mut history = Vec::new();
        for i in 0..rounds {
            history.push(Message::user(format!(
                "Round {i}: please look at the token rotation logic in auth_service.rs, \
                 the refresh path returns 401 for expired sessions."
            )));
            history.push(Message::assistant(format!(
                "We decided to rotate refresh tokens on every call in round {i}.\n\n\
                 ```rust\nfn rotate_{i}(token: &str) -> String {{ format!(\"{{token}}-v{i}\") }}\n```\n\n\
                 Because rotation invalidates the old token, clients must retry once on 401.\n\n\
                 Anyway, the standup ran long and everyone seemed fairly tired today."
            )));
        }
        history
    }

    #[test]
    fn test_scenario_budget_is_respected_with_decisions_and_code() {
        let history = build_history(40);
        let ctx = Compressor::new()
            .compress(&history, "Implement a JWT refresh endpoint", 2000, "default", false)
            .unwrap();

        assert!(ctx.total_tokens <= 2000, "total {} > 2000", ctx.total_tokens);
        assert!(ctx.compression_ratio > 1.0);
        assert!(!ctx.key_decisions.is_empty());
        assert!(!ctx.code_snippets.is_empty());
        let norm = embedding::l2_norm(&ctx.expectation_vector);
        assert!((norm - 1.0).abs() < 1e-6, "norm {norm}");
    }

    #[test]
    fn test_decisions_stay_chronological() {
        let history = vec![
            Message::assistant("We decided to use Postgres 16 for storage."),
            Message::assistant("We decided to use Axum 0.8 for the HTTP layer."),
            Message::assistant("We decided to use Redis 7 for the cache tier."),
        ];
        let ctx = Compressor::new()
            .compress(&history, "storage http cache", 4000, "default", false)
            .unwrap();
        assert_eq!(ctx.key_decisions.len(), 3);
        assert!(ctx.key_decisions[0].contains("Postgres"));
        assert!(ctx.key_decisions[1].contains("Axum"));
        assert!(ctx.key_decisions[2].contains("Redis"));
    }

    #[test]
    fn test_empty_history_yields_zero_artifact() {
        let ctx = Compressor::new()
            .compress(&[], "anything", 8000, "default", false)
            .unwrap();
        assert_eq!(ctx.total_tokens, 0);
        assert_eq!(ctx.compression_ratio, 1.0);
        assert!(ctx.summary.is_empty());
        assert!(ctx.expectation_vector.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_preserved_system_message_round_trips_verbatim() {
        let brain = "You are the deployment supervisor. Never push to main on Fridays. ".repeat(40);
        let mut history = vec![Message::system(brain.clone()).preserved()];
        history.extend(build_history(10));

        let ctx = Compressor::new()
            .compress(&history, "Implement a JWT refresh endpoint", 4000, "default", true)
            .unwrap();

        assert_eq!(ctx.preserved_system_messages.len(), 1);
        assert_eq!(ctx.preserved_system_messages[0], brain);
        let preserved_tokens = tokenizer::count_tokens(&brain);
        assert!(ctx.total_tokens >= preserved_tokens);
        assert!(ctx.total_tokens <= 4000);
        // Everything that is not the preserved message fits the leftover.
        assert!(ctx.total_tokens - preserved_tokens <= 4000 - preserved_tokens);
    }

    #[test]
    fn test_preserve_flag_honored_without_global_switch() {
        let history = vec![
            Message::system("pinned instruction with RuleSeven inside").preserved(),
            Message::user("ordinary chatter about nothing specific"),
        ];
        let ctx = Compressor::new()
            .compress(&history, "task", 4000, "default", false)
            .unwrap();
        assert_eq!(ctx.preserved_system_messages.len(), 1);
    }

    #[test]
    fn test_budget_exceeded_when_preserved_alone_overflow() {
        let big = "Preserved instruction text. ".repeat(300);
        let history = vec![Message::system(big.clone()).preserved()];
        let required = tokenizer::count_tokens(&big);
        let err = Compressor::new()
            .compress(&history, "task", required / 2, "default", true)
            .unwrap_err();
        match err {
            CoreError::BudgetExceeded { required: r } => assert_eq!(r, required),
            other => panic!("expected BudgetExceeded, got {other}"),
        }
    }

    #[test]
    fn test_determinism_byte_identical() {
        let history = build_history(20);
        let a = Compressor::new()
            .compress(&history, "Implement a JWT refresh endpoint", 3000, "ns", false)
            .unwrap();
        let b = Compressor::new()
            .compress(&history, "Implement a JWT refresh endpoint", 3000, "ns", false)
            .unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_recompression_is_stable_after_one_pass() {
        let history = build_history(30);
        let once = Compressor::new()
            .compress(&history, "Implement a JWT refresh endpoint", 3000, "ns", false)
            .unwrap();
        let twice = Compressor::new()
            .compress(&once.as_history(), "Implement a JWT refresh endpoint", 3000, "ns", false)
            .unwrap();
        assert!(twice.total_tokens <= 3000);
        // The artifact is already dense; a second pass keeps the code and
        // does not degenerate to emptiness.
        assert!(!twice.code_snippets.is_empty());
        assert!(twice.total_tokens > 0);
    }

    #[test]
    fn test_render_prompt_contains_all_sections() {
        let mut history = vec![Message::system("pinned brain").preserved()];
        history.extend(build_history(3));
        let ctx = Compressor::new()
            .compress(&history, "Implement a JWT refresh endpoint", 4000, "ns", true)
            .unwrap();
        let prompt = ctx.render_prompt();
        assert!(prompt.contains("pinned brain"));
        assert!(prompt.contains("Decision:"));
        assert!(prompt.contains("```rust"));
    }

    #[test]
    fn test_namespace_is_carried_through() {
        let ctx = Compressor::new()
            .compress(&build_history(2), "task", 4000, "project-alpha", false)
            .unwrap();
        assert_eq!(ctx.namespace, "project-alpha");
    }
}
