//! Shared data model: conversation messages and task classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Conversation ────────────────────────────────────────────

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One element of conversation history.
///
/// System messages may be flagged `preserve`; the compressor then routes them
/// through uncompressed, verbatim. The flag is ignored on other roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub preserve: bool,
}

impl Message {
    /// Create a user message stamped now.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message stamped now.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a system message stamped now.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Flag this message as preserve-verbatim (meaningful on system role).
    pub fn preserved(mut self) -> Self {
        self.preserve = true;
        self
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            preserve: false,
        }
    }
}

// ─── Task classification ─────────────────────────────────────

/// Closed set of task categories the router can assign.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CodeGeneration,
    CodeReview,
    DocumentParsing,
    AgenticComplex,
    AgenticSimple,
    VisionLanguage,
    DeepReasoning,
    General,
}

impl TaskKind {
    /// All kinds, in declaration order. Used for registry validation.
    pub const ALL: [TaskKind; 8] = [
        TaskKind::CodeGeneration,
        TaskKind::CodeReview,
        TaskKind::DocumentParsing,
        TaskKind::AgenticComplex,
        TaskKind::AgenticSimple,
        TaskKind::VisionLanguage,
        TaskKind::DeepReasoning,
        TaskKind::General,
    ];
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskKind::CodeGeneration => "code_generation",
            TaskKind::CodeReview => "code_review",
            TaskKind::DocumentParsing => "document_parsing",
            TaskKind::AgenticComplex => "agentic_complex",
            TaskKind::AgenticSimple => "agentic_simple",
            TaskKind::VisionLanguage => "vision_language",
            TaskKind::DeepReasoning => "deep_reasoning",
            TaskKind::General => "general",
        };
        write!(f, "{name}")
    }
}
