//! History segmentation and kind classification.
//!
//! Messages are split at fenced code regions and blank-line paragraphs, and
//! every resulting segment is classified into exactly one kind. The kind
//! drives the fixed type score used by selection.

use crate::tokenizer;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// What a segment is, structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Decision,
    Code,
    Error,
    Reasoning,
    Narrative,
}

impl SegmentKind {
    /// Fixed selection weight per kind.
    pub fn type_score(self) -> f32 {
        match self {
            SegmentKind::Decision => 1.0,
            SegmentKind::Code => 0.9,
            SegmentKind::Error => 0.8,
            SegmentKind::Reasoning => 0.6,
            SegmentKind::Narrative => 0.3,
        }
    }
}

/// A chunk produced by segmentation, scored during selection.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    /// Stable within one compression pass; ascending chronological order.
    pub id: usize,
    pub text: String,
    pub token_count: usize,
    pub kind: SegmentKind,
    /// Fence language tag for code segments.
    pub language: Option<String>,
    /// Index of the originating message in the (non-preserved) history.
    pub source_index: usize,
    pub recency_score: f32,
    pub type_score: f32,
    pub relevance_score: f32,
}

static DECISION_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(decided|decision|decide|chose|chosen|choose|agreed|agree|we will|will use|going with|went with|opting|opted|settled on|let's use)\b",
    )
    .expect("decision cue regex")
});

static ERROR_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(error|exception|panic|panicked|failed|failure|traceback|stack trace|segfault|crash|crashed)\b",
    )
    .expect("error cue regex")
});

static REASONING_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(because|therefore|since|thus|hence|tradeoff|trade-off|rationale|implies|consider|considering|alternative)\b",
    )
    .expect("reasoning cue regex")
});

/// Split non-preserved history into classified segments.
///
/// `messages` must already exclude preserved system messages; `source_index`
/// refers to positions within this slice.
pub fn segment_history(messages: &[crate::types::Message]) -> Vec<Segment> {
    let mut segments = Vec::new();
    for (msg_index, message) in messages.iter().enumerate() {
        for piece in split_message(&message.content) {
            match piece {
                Piece::Code { language, text } => {
                    push_segment(&mut segments, msg_index, text, SegmentKind::Code, language);
                }
                Piece::Prose(text) => {
                    let kind = classify_prose(&text);
                    push_segment(&mut segments, msg_index, text, kind, None);
                }
            }
        }
    }
    segments
}

enum Piece {
    Code {
        language: Option<String>,
        text: String,
    },
    Prose(String),
}

fn push_segment(
    segments: &mut Vec<Segment>,
    source_index: usize,
    text: String,
    kind: SegmentKind,
    language: Option<String>,
) {
    let token_count = tokenizer::count_tokens(&text);
    if token_count == 0 {
        return;
    }
    segments.push(Segment {
        id: segments.len(),
        token_count,
        kind,
        language,
        source_index,
        recency_score: 0.0,
        type_score: kind.type_score(),
        relevance_score: 0.0,
        text,
    });
}

/// Split one message body into fenced code pieces and prose paragraphs.
fn split_message(content: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut rest = content;

    while let Some(open) = rest.find("```") {
        let before = &rest[..open];
        push_paragraphs(&mut pieces, before);

        let after_open = &rest[open + 3..];
        let (language, body_start) = match after_open.find('\n') {
            Some(nl) => {
                let tag = after_open[..nl].trim();
                let language = if tag.is_empty() {
                    None
                } else {
                    Some(tag.to_string())
                };
                (language, nl + 1)
            }
            None => (None, after_open.len()),
        };
        let body = &after_open[body_start..];
        match body.find("```") {
            Some(close) => {
                let code = body[..close].trim_end_matches('\n').to_string();
                if !code.trim().is_empty() {
                    pieces.push(Piece::Code {
                        language,
                        text: code,
                    });
                }
                rest = &body[close + 3..];
            }
            None => {
                // Unterminated fence: treat the remainder as code.
                let code = body.trim_end_matches('\n').to_string();
                if !code.trim().is_empty() {
                    pieces.push(Piece::Code {
                        language,
                        text: code,
                    });
                }
                rest = "";
            }
        }
    }
    push_paragraphs(&mut pieces, rest);
    pieces
}

fn push_paragraphs(pieces: &mut Vec<Piece>, text: &str) {
    for paragraph in text.split("\n\n") {
        let trimmed = paragraph.trim();
        if !trimmed.is_empty() {
            pieces.push(Piece::Prose(trimmed.to_string()));
        }
    }
}

/// Classify a prose segment by ordered cue rules.
fn classify_prose(text: &str) -> SegmentKind {
    if DECISION_CUE.is_match(text) {
        SegmentKind::Decision
    } else if ERROR_CUE.is_match(text) {
        SegmentKind::Error
    } else if REASONING_CUE.is_match(text) {
        SegmentKind::Reasoning
    } else {
        SegmentKind::Narrative
    }
}
