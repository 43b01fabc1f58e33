//! Token counting on tiktoken cl100k_base.
//!
//! One process-wide BPE instance, initialized lazily. Counting is exact for
//! the cl100k vocabulary, which is close enough for budget arithmetic across
//! every model family the registry carries.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

/// Per-message serialization overhead (role tag, separators) in tokens.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

static BPE: Lazy<CoreBPE> = Lazy::new(|| {
    // Vocabulary data is compiled into the binary; construction cannot fail
    // at runtime with a valid build.
    tiktoken_rs::cl100k_base().expect("failed to load cl100k_base vocabulary")
});

/// Count tokens in a text.
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    BPE.encode_with_special_tokens(text).len()
}

/// Count tokens for a message as transmitted, including role framing.
pub fn count_message_tokens(content: &str) -> usize {
    count_tokens(content) + MESSAGE_OVERHEAD_TOKENS
}
