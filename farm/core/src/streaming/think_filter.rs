//! Reasoning Span Filter
//!
//! Some node families wrap their chain of thought in `<think>...</think>`
//! and stream it token by token. The filter removes those spans from a
//! stream of text fragments without ever seeing the whole text, so a
//! delimiter may be split across any number of fragments.
//!
//! The filter is a pure state machine: [`FilterState::step`] consumes a
//! fragment and returns the next state plus the text that may be emitted.
//! [`ThinkFilter`] is the mutable convenience wrapper used by the dispatcher.
//!
//! Emitted text never depends on how the input was split into fragments.
//! While outside a span, at most `OPEN.len() - 1` bytes are held back, and
//! only while they could still turn into an open delimiter.

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

/// Filter state between fragments
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterState {
    /// Inside a reasoning span
    inside: bool,
    /// A close delimiter was just consumed; leading whitespace is dropped
    trim_leading: bool,
    /// Held-back tail that may be the start of a delimiter
    pending: String,
}

impl FilterState {
    /// Whether the filter is currently inside a reasoning span
    #[must_use]
    pub fn in_think(&self) -> bool {
        self.inside
    }

    /// Bytes currently held back
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Consume one fragment
    #[must_use]
    pub fn step(mut self, fragment: &str) -> (Self, String) {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.push_str(fragment);

        let mut out = String::new();
        let mut rest = buffer.as_str();

        loop {
            if self.inside {
                if let Some(idx) = rest.find(CLOSE) {
                    rest = &rest[idx + CLOSE.len()..];
                    self.inside = false;
                    self.trim_leading = true;
                    continue;
                }
                // Everything inside is dropped except a possible partial close
                let keep = partial_suffix(rest, CLOSE);
                self.pending = rest[rest.len() - keep..].to_string();
                break;
            }

            if self.trim_leading {
                rest = rest.trim_start();
                if rest.is_empty() {
                    break;
                }
                self.trim_leading = false;
            }

            if let Some(idx) = rest.find(OPEN) {
                out.push_str(&rest[..idx]);
                rest = &rest[idx + OPEN.len()..];
                self.inside = true;
                continue;
            }

            let keep = partial_suffix(rest, OPEN);
            out.push_str(&rest[..rest.len() - keep]);
            self.pending = rest[rest.len() - keep..].to_string();
            break;
        }

        (self, out)
    }

    /// End of input: flush held-back text outside a span, drop it inside one
    #[must_use]
    pub fn finish(self) -> String {
        if self.inside {
            String::new()
        } else {
            self.pending
        }
    }
}

/// Length of the longest proper prefix of `delimiter` that `text` ends with
fn partial_suffix(text: &str, delimiter: &str) -> usize {
    let max = (delimiter.len() - 1).min(text.len());
    (1..=max)
        .rev()
        .find(|&len| text.is_char_boundary(text.len() - len) && delimiter.starts_with(&text[text.len() - len..]))
        .unwrap_or(0)
}

/// Stateful reasoning filter for one stream
#[derive(Debug, Default)]
pub struct ThinkFilter {
    state: FilterState,
}

impl ThinkFilter {
    /// Fresh filter, outside any span
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment, returning the text that may be emitted now
    pub fn push(&mut self, fragment: &str) -> String {
        let (next, out) = std::mem::take(&mut self.state).step(fragment);
        self.state = next;
        out
    }

    /// Flush at end of stream; the filter is reset afterwards
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.state).finish()
    }
}

/// Remove reasoning spans from a complete text and trim the result
#[must_use]
pub fn strip_reasoning(text: &str) -> String {
    let mut filter = ThinkFilter::new();
    let mut out = filter.push(text);
    out.push_str(&filter.finish());
    out.trim().to_string()
}
