//! Output validator.
//!
//! Scores a generated artifact 0..=100 against a fixed rubric: completeness,
//! correctness, production-readiness. Scoring is rubric-based and
//! deterministic: no randomness, no external calls, no model in the loop.
//! Points are withheld only for detected deficiencies relative to what the
//! task demands, so a small clean artifact is not punished for lacking
//! machinery the task never asked for.
//!
//! The validator is stateless; the orchestrator owns retry counting and
//! passes `attempt_index` in to derive the fix tier.

pub mod fixes;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How specific the retry feedback should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixTier {
    Broad,
    Specific,
    Exact,
}

impl FixTier {
    /// Tier for a given retry ordinal: first retry broad, second specific,
    /// anything later exact.
    pub fn for_attempt(attempt_index: u32) -> Self {
        match attempt_index {
            0 => FixTier::Broad,
            1 => FixTier::Specific,
            _ => FixTier::Exact,
        }
    }
}

impl std::fmt::Display for FixTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixTier::Broad => write!(f, "broad"),
            FixTier::Specific => write!(f, "specific"),
            FixTier::Exact => write!(f, "exact"),
        }
    }
}

/// Per-axis rubric points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// 0..=30
    pub completeness: u8,
    /// 0..=40
    pub correctness: u8,
    /// 0..=30
    pub production_ready: u8,
}

/// Validation outcome. `score` always equals the sum of the breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub score: u8,
    pub breakdown: ScoreBreakdown,
    pub issues: Vec<String>,
    pub fix_tier: FixTier,
    pub fix_instructions: String,
}

impl ValidationResult {
    pub fn passed(&self, threshold: u8) -> bool {
        self.score >= threshold
    }
}

/// Rubric weights, exposed as configuration. Defaults are the attested
/// values; the axis totals (30/40/30) follow from them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RubricWeights {
    pub components_present: u8,
    pub no_placeholders: u8,
    pub documented_surfaces: u8,
    pub parses: u8,
    pub addresses_task: u8,
    pub edge_cases: u8,
    pub explicit_types: u8,
    pub error_handling: u8,
    pub no_hardcoded_secrets: u8,
    pub testability: u8,
    pub integration_seams: u8,
}

impl Default for RubricWeights {
    fn default() -> Self {
        Self {
            components_present: 15,
            no_placeholders: 10,
            documented_surfaces: 5,
            parses: 10,
            addresses_task: 15,
            edge_cases: 10,
            explicit_types: 5,
            error_handling: 10,
            no_hardcoded_secrets: 10,
            testability: 5,
            integration_seams: 5,
        }
    }
}

impl RubricWeights {
    fn correctness_total(&self) -> u8 {
        self.parses + self.addresses_task + self.edge_cases + self.explicit_types
    }
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?mi)\bTODO\b|\bFIXME\b|\bXXX\b|\.\.\.\s*implementation|implementation here|unimplemented!|todo!\(|<your code|^\s*pass\s*(#.*)?$|\bstub\b",
    )
    .expect("placeholder regex")
});

static DEFINITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)\b(?:fn|def|class|struct|enum|trait|impl|interface|function)\b|=>|^\s*(?:pub|export)\b")
        .expect("definition regex")
});

static COMMENT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"///|//|/\*|^\s*#|"""|'''"#).expect("comment marker regex")
});

static EDGE_HANDLING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bif\b|\bmatch\b|\belse\b|\bexcept\b|\bcatch\b|\braise\b|\bassert\b|\bguard\b|unwrap_or|\bedge case|\bempty\b|\bnull\b|\bNone\b|\bzero\b|\boverflow\b",
    )
    .expect("edge handling regex")
});

static EDGE_DEMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bedge\b|\brobust\b|\bvalidate\b|\bvalidation\b|\bboundar|\bhandle\b")
        .expect("edge demand regex")
});

static TYPE_DEMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btyped?\b|\btype hints?\b|\bannotat").expect("type demand regex"));

static TYPE_ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"->\s*\w|:\s*[A-Za-z_][A-Za-z0-9_\[\]<>]*").expect("type annotation regex")
});

static ERROR_CONSTRUCT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\bResult\b|\bErr\b|\btry\b|\bexcept\b|\bcatch\b|\braise\b|\bthrow\b|unwrap_or|\?;|\berror\b",
    )
    .expect("error construct regex")
});

static FALLIBLE_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)open\(|read_to|\.read\(|\.write\(|\bhttp\b|\brequest|\bfetch|\bconnect|\bsocket\b|\bdatabase\b|\bsql\b|\bquery\b|\bparse\b|\bnetwork\b|\bfile\b")
        .expect("fallible cue regex")
});

// Sensitive assignment patterns; field-name list follows the redaction table
// used for tool-input sanitization.
static HARDCODED_SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?:api[_-]?key|secret|token|password|passwd|authorization|bearer|private[_-]?key|access[_-]?key|credential)s?\s*[:=]\s*["'][^"']{6,}["']|sk-[A-Za-z0-9]{16,}"#,
    )
    .expect("hardcoded secret regex")
});

static TEST_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btest|\bassert|\bexample|\bmock").expect("test hint regex")
});

static TASK_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"`([A-Za-z_][A-Za-z0-9_]*)`|\b(?:function|class|struct|endpoint|method)\s+(?:called\s+|named\s+)?([A-Za-z_][A-Za-z0-9_]*)|\b([A-Za-z_][A-Za-z0-9_]*)\s*\(",
    )
    .expect("task name regex")
});

/// Names the task requires the output to define or mention, e.g. `add` from
/// "Write an add(a, b) function".
pub(crate) fn required_names(task: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for captures in TASK_NAME.captures_iter(task) {
        for group in 1..=3 {
            if let Some(name) = captures.get(group) {
                let name = name.as_str();
                // Generic surface words are task vocabulary, not identifiers.
                if !matches!(
                    name.to_lowercase().as_str(),
                    "function"
                        | "class"
                        | "struct"
                        | "endpoint"
                        | "method"
                        | "a"
                        | "an"
                        | "the"
                        | "in"
                        | "for"
                        | "to"
                        | "with"
                        | "that"
                        | "this"
                        | "it"
                ) {
                    names.insert(name.to_string());
                }
            }
        }
    }
    names
}

static RUST_PROFILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfn\s+\w+|\bimpl\b|\blet\s+mut\b").expect("rust profile regex"));

static PYTHON_PROFILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bdef\s+\w+|\bimport\s+\w+|\bself\b").expect("python profile regex"));

static JS_PROFILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfunction\s+\w+|\bconst\s+\w+\s*=|=>").expect("js profile regex"));

/// Fence tags and keyword profiles; first hit wins.
pub(crate) fn detect_language(output: &str) -> Option<&'static str> {
    for (tag, name) in [
        ("```rust", "rust"),
        ("```python", "python"),
        ("```typescript", "typescript"),
        ("```javascript", "javascript"),
        ("```go", "go"),
        ("```sql", "sql"),
    ] {
        if output.contains(tag) {
            return Some(name);
        }
    }
    if RUST_PROFILE.is_match(output) {
        return Some("rust");
    }
    if PYTHON_PROFILE.is_match(output) {
        return Some("python");
    }
    if JS_PROFILE.is_match(output) {
        return Some("javascript");
    }
    None
}

/// Balanced-delimiter parse attempt, ignoring string literals and the
/// backtick fences themselves.
pub(crate) fn delimiters_balanced(output: &str) -> bool {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string: Option<char> = None;
    let mut previous = '\0';
    for c in output.chars() {
        if let Some(quote) = in_string {
            if c == quote && previous != '\\' {
                in_string = None;
            }
            previous = c;
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return false;
                }
            }
            _ => {}
        }
        previous = c;
    }
    // An unterminated single quote is usually an apostrophe in prose.
    stack.is_empty()
}

/// Stateless rubric validator.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    weights: RubricWeights,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: RubricWeights) -> Self {
        Self { weights }
    }

    /// Score `output` against `task`. `attempt_index` only selects the fix
    /// tier; it never changes the score.
    pub fn validate(&self, task: &str, output: &str, attempt_index: u32) -> ValidationResult {
        let tier = FixTier::for_attempt(attempt_index);
        let weights = &self.weights;

        if output.trim().is_empty() {
            let issues = vec!["unparseable output".to_string()];
            let fix_instructions = fixes::build(task, output, &issues, tier, &required_names(task));
            return ValidationResult {
                score: 0,
                breakdown: ScoreBreakdown {
                    completeness: 0,
                    correctness: 0,
                    production_ready: 0,
                },
                issues,
                fix_tier: tier,
                fix_instructions,
            };
        }

        let mut issues: Vec<String> = Vec::new();
        let required = required_names(task);
        let found: Vec<&String> = required.iter().filter(|n| output.contains(*n)).collect();
        let has_definitions = DEFINITION.is_match(output);
        let word_count = output.split_whitespace().count();

        // ── Completeness ─────────────────────────────────────
        let components = if required.is_empty() {
            if has_definitions || word_count >= 40 {
                weights.components_present
            } else {
                issues.push("no recognizable components in the output".to_string());
                0
            }
        } else if found.len() == required.len() {
            weights.components_present
        } else {
            let missing: Vec<&str> = required
                .iter()
                .filter(|n| !output.contains(*n))
                .map(String::as_str)
                .collect();
            issues.push(format!("missing components: {}", missing.join(", ")));
            (weights.components_present as usize * found.len() / required.len()) as u8
        };

        let placeholders = if PLACEHOLDER.is_match(output) {
            issues.push("placeholder markers left in the output".to_string());
            0
        } else {
            weights.no_placeholders
        };

        let definition_count = DEFINITION.find_iter(output).count();
        let documented = if definition_count <= 1 || COMMENT_MARKER.is_match(output) {
            weights.documented_surfaces
        } else {
            issues.push("public surfaces lack docstrings or comments".to_string());
            0
        };

        let completeness = components + placeholders + documented;

        // ── Correctness ──────────────────────────────────────
        let language = detect_language(output);
        let balanced = delimiters_balanced(output);

        let correctness = if !balanced {
            issues.push("syntax error: unbalanced delimiters".to_string());
            0
        } else {
            let parses = weights.parses;

            let addresses = if required.is_empty() {
                if shares_task_vocabulary(task, output) {
                    weights.addresses_task
                } else {
                    issues.push("output does not reference the stated task".to_string());
                    0
                }
            } else {
                (weights.addresses_task as usize * found.len() / required.len()) as u8
            };

            let edges = if EDGE_HANDLING.is_match(output) {
                weights.edge_cases
            } else {
                if EDGE_DEMAND.is_match(task) {
                    issues.push("no edge-case handling for a task that demands it".to_string());
                } else {
                    issues.push("edge cases not addressed".to_string());
                }
                0
            };

            let types = if TYPE_DEMAND.is_match(task) && !TYPE_ANNOTATION.is_match(output) {
                issues.push("explicit types required by the task are missing".to_string());
                0
            } else {
                weights.explicit_types
            };

            let mut sum = parses + addresses + edges + types;
            if language.is_none() {
                issues.push("language undetermined".to_string());
                sum = sum.min(weights.correctness_total() / 2);
            }
            sum
        };

        // ── Production readiness ─────────────────────────────
        let fallible = FALLIBLE_CUE.is_match(task) || FALLIBLE_CUE.is_match(output);
        let error_handling = if ERROR_CONSTRUCT.is_match(output) || !fallible {
            weights.error_handling
        } else {
            issues.push("no error handling on fallible paths".to_string());
            0
        };

        let secrets = if HARDCODED_SECRET.is_match(output) {
            issues.push("hardcoded secret detected".to_string());
            0
        } else {
            weights.no_hardcoded_secrets
        };

        let testability = if TEST_HINT.is_match(output) || has_definitions {
            weights.testability
        } else {
            issues.push("no testability hints".to_string());
            0
        };

        let seams = if has_definitions {
            weights.integration_seams
        } else {
            issues.push("no integration seams (functions, classes, exports)".to_string());
            0
        };

        let production_ready = error_handling + secrets + testability + seams;

        let breakdown = ScoreBreakdown {
            completeness,
            correctness,
            production_ready,
        };
        let score = completeness + correctness + production_ready;

        tracing::debug!(
            score,
            completeness,
            correctness,
            production_ready,
            ?language,
            issues = issues.len(),
            "validated output"
        );

        let fix_instructions = fixes::build(task, output, &issues, tier, &required);
        ValidationResult {
            score,
            breakdown,
            issues,
            fix_tier: tier,
            fix_instructions,
        }
    }
}

/// Does the output mention any substantive word from the task?
fn shares_task_vocabulary(task: &str, output: &str) -> bool {
    let output_lower = output.to_lowercase();
    task.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .any(|w| output_lower.contains(w))
}
