//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 bytes per token, rounded up.
//! Every budget decision in the workspace goes through these functions so
//! that the optimizer's accounting and [`Prompt::estimated_tokens`] agree.
//!
//! [`Prompt::estimated_tokens`]: crate::prompt::Prompt::estimated_tokens

use crate::message::Message;

/// Fixed cost of one message on the wire (role name, delimiters).
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Longest prefix of `text` whose estimate fits in `tokens`.
///
/// Cuts on a `char` boundary, so the result may be a few bytes shorter
/// than the exact allowance.
pub fn truncate_to_tokens(text: &str, tokens: usize) -> &str {
    let max_bytes = tokens.saturating_mul(4);
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Longest prefix of `text` of at most `max_chars` bytes, cut on a `char` boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
