//! Chain-of-density rewrite.
//!
//! Pass A lifts decisions and code out of the selected segments verbatim.
//! Pass B rewrites the remaining prose into a dense summary: only sentences
//! carrying a concrete reference (an identifier, a number, a proper noun)
//! survive, up to the leftover token budget.

use super::segment::{Segment, SegmentKind};
use crate::tokenizer;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A verbatim code region preserved through compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub language: String,
    pub code: String,
    /// Where the snippet came from, e.g. "message 17".
    pub provenance: String,
}

static DECISION_SENTENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(decided|decision|decide|chose|chosen|choose|agreed|agree|we will|will use|going with|went with|opting|opted|settled on|let's use)\b",
    )
    .expect("decision sentence regex")
});

// A concrete reference: an identifier-ish token, a number, a backtick span,
// an acronym, or a capitalized word past the sentence start.
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z][A-Za-z0-9]*(?:[_./:]{1,2}[A-Za-z0-9]+)+|\b[a-z]+[A-Z]\w*\b|\b[A-Z]{2,}\b")
        .expect("identifier regex")
});

/// Leading subjects stripped so decisions read verb-first.
const LEADING_SUBJECTS: &[&str] = &["we ", "i ", "the team ", "they ", "let's ", "lets "];

/// Pass A: decision statements from the selected segments, chronological,
/// normalized to a single verb-leading sentence each.
pub(super) fn extract_decisions(selected: &[&Segment]) -> Vec<String> {
    let mut decisions = Vec::new();
    for segment in selected {
        if segment.kind != SegmentKind::Decision {
            continue;
        }
        for sentence in split_sentences(&segment.text) {
            if DECISION_SENTENCE.is_match(&sentence) {
                decisions.push(normalize_decision(&sentence));
                break;
            }
        }
    }
    decisions
}

/// Pass A: code regions from the selected segments, verbatim.
pub(super) fn extract_snippets(selected: &[&Segment]) -> Vec<CodeSnippet> {
    selected
        .iter()
        .filter(|s| s.kind == SegmentKind::Code)
        .map(|s| CodeSnippet {
            language: s.language.clone().unwrap_or_else(|| "text".to_string()),
            code: s.text.clone(),
            provenance: format!("message {}", s.source_index),
        })
        .collect()
}

/// Pass B: dense prose summary from the non-code selected segments, skipping
/// sentences already lifted as decisions, within `budget_tokens`.
pub(super) fn build_summary(selected: &[&Segment], budget_tokens: usize) -> String {
    let mut sentences: Vec<String> = Vec::new();
    let mut used_tokens = 0usize;

    'segments: for segment in selected {
        if segment.kind == SegmentKind::Code {
            continue;
        }
        let mut decision_taken = false;
        for sentence in split_sentences(&segment.text) {
            if segment.kind == SegmentKind::Decision
                && !decision_taken
                && DECISION_SENTENCE.is_match(&sentence)
            {
                // Already captured in key_decisions.
                decision_taken = true;
                continue;
            }
            if !has_concrete_reference(&sentence) {
                continue;
            }
            let cost = tokenizer::count_tokens(&sentence) + 1;
            if used_tokens + cost > budget_tokens {
                break 'segments;
            }
            used_tokens += cost;
            sentences.push(sentence);
        }
    }

    sentences.join(" ")
}

/// True when a sentence names something concrete.
pub(super) fn has_concrete_reference(sentence: &str) -> bool {
    if sentence.contains('`') || sentence.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    if IDENTIFIER.is_match(sentence) {
        return true;
    }
    // A capitalized word that is not the sentence opener.
    sentence
        .split_whitespace()
        .skip(1)
        .any(|word| word.chars().next().is_some_and(|c| c.is_uppercase()))
}

/// Split prose into trimmed sentences at `.`, `!`, `?` boundaries.
pub(super) fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let next_is_break = bytes
                .get(i + 1)
                .is_none_or(|&n| n == b' ' || n == b'\n' || n == b'\t');
            if next_is_break {
                let sentence = text[start..=i].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = i + 1;
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Rewrite a decision sentence to lead with its verb.
fn normalize_decision(sentence: &str) -> String {
    let mut out = sentence.trim().to_string();
    loop {
        let lower = out.to_lowercase();
        match LEADING_SUBJECTS
            .iter()
            .find(|subject| lower.starts_with(**subject))
        {
            Some(subject) => out = out[subject.len()..].trim_start().to_string(),
            None => break,
        }
    }
    let mut chars = out.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => return String::new(),
    };
    if capitalized.ends_with(['.', '!', '?']) {
        capitalized
    } else {
        format!("{capitalized}.")
    }
}
