//! Specialized task router.
//!
//! Classifies a task prompt into a `TaskKind` by an ordered first-match rule
//! table, then selects a model from the registry under a cost/priority
//! policy: free pool first (unless the caller flips the preference), lowest
//! priority number wins, lexicographic model id breaks ties. Selection is a
//! pure function of (prompt, policy, registry).

use crate::error::CoreError;
use crate::registry::{ModelRegistry, ModelSpec};
use crate::types::TaskKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Routing policy. Defaults prefer free models and refuse paid ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePolicy {
    #[serde(default = "default_true")]
    pub prefer_free: bool,
    #[serde(default)]
    pub allow_premium: bool,
    /// The chosen model's context ceiling must cover at least this many tokens.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: u32,
    #[serde(default)]
    pub exclude_model_ids: BTreeSet<String>,
    /// Skip classification and force a kind.
    #[serde(default)]
    pub override_kind: Option<TaskKind>,
}

fn default_true() -> bool {
    true
}

fn default_max_input_tokens() -> u32 {
    8_000
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            prefer_free: true,
            allow_premium: false,
            max_input_tokens: default_max_input_tokens(),
            exclude_model_ids: BTreeSet::new(),
            override_kind: None,
        }
    }
}

/// Router output: the chosen spec, the detected kind, and a one-line account
/// of how the choice fell out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routing {
    pub model: ModelSpec,
    pub kind: TaskKind,
    pub reasoning: String,
}

struct Rule {
    kind: TaskKind,
    trigger: Regex,
}

/// Words that mark a prompt as being about code, used by the review and
/// generation rules.
const CODE_CUE: &str = r"(?:code|function|class|module|endpoint|api|library|crate|script|bug|compiler|rust|python|javascript|typescript|golang|java\b|sql)";

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let rule = |kind, pattern: &str| Rule {
        kind,
        trigger: Regex::new(pattern).expect("classification rule regex"),
    };
    vec![
        rule(
            TaskKind::DocumentParsing,
            r"\b(?:parse|parsing|extract|extraction)\b.*\b(?:pdf|document|table|ocr)\b|\b(?:pdf|document|table|ocr)\b.*\b(?:parse|parsing|extract|extraction)\b",
        ),
        rule(
            TaskKind::VisionLanguage,
            r"\b(?:image|screenshot|diagram|chart|vision)\b",
        ),
        rule(
            TaskKind::AgenticComplex,
            r"\b(?:orchestrate|coordinate|multi-step|autonomous)\b.*\b(?:complex|advanced|system)\b|\b(?:complex|advanced|system)\b.*\b(?:orchestrate|coordinate|multi-step|autonomous)\b",
        ),
        rule(
            TaskKind::DeepReasoning,
            r"\b(?:prove|proof|mathematical|formal|deduce|deduction)\b",
        ),
        rule(
            TaskKind::CodeReview,
            &format!(r"\b(?:review|audit|bug|issue)\b.*\b{CODE_CUE}\b|\b{CODE_CUE}\b.*\b(?:review|audit|bug|issue)\b"),
        ),
        rule(
            TaskKind::CodeGeneration,
            &format!(r"\b(?:implement|create|build|write)\b.*\b{CODE_CUE}\b|\b{CODE_CUE}\b.*\b(?:implement|create|build|write)\b"),
        ),
        rule(
            TaskKind::AgenticSimple,
            r"\b(?:automate|automation|script|task)\b",
        ),
    ]
});

/// Classify a prompt. Rules run top-to-bottom over the lowercased text;
/// first match wins; `General` is the fallback.
pub fn classify(prompt: &str) -> TaskKind {
    let lowered = prompt.to_lowercase();
    for rule in RULES.iter() {
        if rule.trigger.is_match(&lowered) {
            return rule.kind;
        }
    }
    TaskKind::General
}

/// Classify and select. Fails with `NoEligibleModel` when no registered model
/// satisfies the policy for the detected kind.
pub fn route(
    registry: &ModelRegistry,
    prompt: &str,
    policy: &RoutePolicy,
) -> Result<Routing, CoreError> {
    let kind = policy.override_kind.unwrap_or_else(|| classify(prompt));

    let mut free: Vec<&ModelSpec> = Vec::new();
    let mut paid: Vec<&ModelSpec> = Vec::new();
    for candidate in registry.candidates(kind, policy.max_input_tokens) {
        if policy.exclude_model_ids.contains(&candidate.model_id) {
            continue;
        }
        if candidate.is_free {
            free.push(candidate);
        } else if policy.allow_premium {
            paid.push(candidate);
        }
    }
    let candidate_count = free.len() + paid.len();

    let pools: [(&str, &mut Vec<&ModelSpec>); 2] = if policy.prefer_free {
        [("free", &mut free), ("paid", &mut paid)]
    } else {
        [("paid", &mut paid), ("free", &mut free)]
    };

    for (pool_name, pool) in pools {
        if pool.is_empty() {
            continue;
        }
        pool.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.model_id.cmp(&b.model_id))
        });
        let winner = pool[0].clone();
        let reasoning = format!(
            "classified as {kind}; {candidate_count} candidate(s); \
             selected {} from the {pool_name} pool at priority {}",
            winner.model_id, winner.priority
        );
        tracing::info!(%kind, model = %winner.model_id, pool = pool_name, "routed task");
        return Ok(Routing {
            model: winner,
            kind,
            reasoning,
        });
    }

    tracing::warn!(%kind, "no eligible model under policy");
    Err(CoreError::NoEligibleModel { kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelRegistry;
    use rstest::rstest;

    fn spec(model_id: &str, is_free: bool, priority: u8, kinds: &[TaskKind]) -> ModelSpec {
        ModelSpec {
            model_id: model_id.to_string(),
            is_free,
            input_price_per_megatoken: if is_free { 0.0 } else { 3.0 },
            output_price_per_megatoken: if is_free { 0.0 } else { 15.0 },
            task_affinities: kinds.iter().copied().collect(),
            priority,
            max_tokens: 64_000,
        }
    }

    /// Registry used across scenarios: two free and one paid code model.
    fn code_registry() -> ModelRegistry {
        ModelRegistry::new(vec![
            spec("mA", true, 1, &[TaskKind::CodeGeneration]),
            spec("mB", true, 3, &[TaskKind::CodeGeneration]),
            spec("mC", false, 1, &[TaskKind::CodeGeneration]),
        ])
        .unwrap()
    }

    #[rstest]
    #[case("Parse the quarterly PDF and extract every table", TaskKind::DocumentParsing)]
    #[case("What does this screenshot of the dashboard show?", TaskKind::VisionLanguage)]
    #[case("Orchestrate a complex multi-service rollout", TaskKind::AgenticComplex)]
    #[case("Prove that the scheduler terminates", TaskKind::DeepReasoning)]
    #[case("Review this function for bugs", TaskKind::CodeReview)]
    #[case("Implement a REST endpoint in Python", TaskKind::CodeGeneration)]
    #[case("Automate the weekly backup task", TaskKind::AgenticSimple)]
    #[case("Tell me about the weather in Lisbon", TaskKind::General)]
    fn test_classification_table(#[case] prompt: &str, #[case] expected: TaskKind) {
        assert_eq!(classify(prompt), expected);
    }

    #[test]
    fn test_rules_apply_in_order_first_match_wins() {
        // "parse ... pdf" outranks the code-generation cue also present.
        let prompt = "Write code to parse this PDF document";
        assert_eq!(classify(prompt), TaskKind::DocumentParsing);
    }

    #[test]
    fn test_free_preferred_lowest_priority_wins() {
        let routing = route(
            &code_registry(),
            "Implement a REST endpoint in Python",
            &RoutePolicy::default(),
        )
        .unwrap();
        assert_eq!(routing.model.model_id, "mA");
        assert_eq!(routing.kind, TaskKind::CodeGeneration);
        assert!(routing.reasoning.contains("code_generation"));
        assert!(routing.reasoning.contains("free"));
    }

    #[test]
    fn test_no_eligible_model_when_free_excluded_and_premium_denied() {
        let policy = RoutePolicy {
            exclude_model_ids: ["mA", "mB"].into_iter().map(String::from).collect(),
            ..RoutePolicy::default()
        };
        let err = route(&code_registry(), "Implement a REST endpoint in Python", &policy)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::NoEligibleModel {
                kind: TaskKind::CodeGeneration
            }
        ));
    }

    #[test]
    fn test_premium_fallback_when_free_pool_empty() {
        let policy = RoutePolicy {
            allow_premium: true,
            exclude_model_ids: ["mA", "mB"].into_iter().map(String::from).collect(),
            ..RoutePolicy::default()
        };
        let routing =
            route(&code_registry(), "Implement a REST endpoint in Python", &policy).unwrap();
        assert_eq!(routing.model.model_id, "mC");
    }

    #[test]
    fn test_escalation_policy_lands_on_paid_pool() {
        let policy = RoutePolicy {
            prefer_free: false,
            allow_premium: true,
            ..RoutePolicy::default()
        };
        let routing =
            route(&code_registry(), "Implement a REST endpoint in Python", &policy).unwrap();
        assert_eq!(routing.model.model_id, "mC");
    }

    #[test]
    fn test_paid_preference_falls_back_to_free_without_premium_models() {
        // prefer_free = false but the paid pool is gated off; the free pool
        // still serves rather than failing spuriously.
        let policy = RoutePolicy {
            prefer_free: false,
            allow_premium: false,
            ..RoutePolicy::default()
        };
        let routing =
            route(&code_registry(), "Implement a REST endpoint in Python", &policy).unwrap();
        assert_eq!(routing.model.model_id, "mA");
    }

    #[test]
    fn test_priority_tie_breaks_lexicographically() {
        let registry = ModelRegistry::new(vec![
            spec("zeta", true, 1, &[TaskKind::General]),
            spec("alpha", true, 1, &[TaskKind::General]),
        ])
        .unwrap();
        let routing = route(&registry, "hello there", &RoutePolicy::default()).unwrap();
        assert_eq!(routing.model.model_id, "alpha");
    }

    #[test]
    fn test_token_ceiling_filters_candidates() {
        let policy = RoutePolicy {
            max_input_tokens: 100_000,
            ..RoutePolicy::default()
        };
        let err = route(&code_registry(), "Implement a REST endpoint in Python", &policy)
            .unwrap_err();
        assert!(matches!(err, CoreError::NoEligibleModel { .. }));
    }

    #[test]
    fn test_override_kind_skips_classification() {
        let registry = ModelRegistry::new(vec![
            spec("coder", true, 1, &[TaskKind::CodeGeneration]),
            spec("chatter", true, 1, &[TaskKind::General]),
        ])
        .unwrap();
        let policy = RoutePolicy {
            override_kind: Some(TaskKind::General),
            ..RoutePolicy::default()
        };
        let routing = route(&registry, "Implement a REST endpoint in Python", &policy).unwrap();
        assert_eq!(routing.kind, TaskKind::General);
        assert_eq!(routing.model.model_id, "chatter");
    }

    #[test]
    fn test_routing_is_deterministic() {
        let prompt = "Implement a parser combinator library in Rust";
        let a = route(&code_registry(), prompt, &RoutePolicy::default()).unwrap();
        let b = route(&code_registry(), prompt, &RoutePolicy::default()).unwrap();
        assert_eq!(a.model.model_id, b.model.model_id);
        assert_eq!(a.reasoning, b.reasoning);
    }
}
