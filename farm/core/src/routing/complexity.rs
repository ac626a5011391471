//! Request Complexity Estimation
//!
//! A cheap lexical guess at how hard a request is, used only to steer harder
//! requests toward the smart tier. It looks at message lengths and the last
//! message's text, nothing else.

use crate::backend::ChatMessage;

/// Estimated difficulty of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Complexity {
    /// Short small talk
    Simple,
    /// Explanations, short writing tasks
    Medium,
    /// Analysis, design work, long conversations
    Complex,
}

impl Complexity {
    /// Lowercase label for logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Character weight of a non-text message
const NON_TEXT_WEIGHT: usize = 100;

const COMPLEX_TOTAL_CHARS: usize = 1200;
const COMPLEX_MESSAGES: usize = 8;
const DEEP_MIN_WORDS: usize = 8;
const MEDIUM_TOTAL_CHARS: usize = 400;
const MEDIUM_MESSAGES: usize = 4;

const DEEP_CUES: &[&str] = &[
    "analyze",
    "compare",
    "design",
    "implement",
    "debug",
    "review",
    "step by step",
    "pros and cons",
    "tradeoff",
    "trade-off",
    "in detail",
    "comprehensive",
];

const MEDIUM_CUES: &[&str] = &[
    "explain",
    "write",
    "create",
    "solve",
    "summarize",
    "translate",
    "code",
    "why",
];

/// Classify a conversation
///
/// Rules are applied in order; the first match wins.
#[must_use]
pub fn estimate(messages: &[ChatMessage]) -> Complexity {
    let total_chars: usize = messages
        .iter()
        .map(|m| {
            m.content
                .as_text()
                .map_or(NON_TEXT_WEIGHT, |t| t.chars().count())
        })
        .sum();

    let last = messages
        .last()
        .and_then(|m| m.content.as_text())
        .unwrap_or_default()
        .to_lowercase();
    let words = last.split_whitespace().count();

    let deep = DEEP_CUES.iter().any(|cue| last.contains(cue));
    let medium = MEDIUM_CUES.iter().any(|cue| last.contains(cue));

    if (deep && words > DEEP_MIN_WORDS)
        || total_chars > COMPLEX_TOTAL_CHARS
        || messages.len() > COMPLEX_MESSAGES
    {
        return Complexity::Complex;
    }
    if medium || total_chars > MEDIUM_TOTAL_CHARS || messages.len() > MEDIUM_MESSAGES {
        return Complexity::Medium;
    }
    Complexity::Simple
}
