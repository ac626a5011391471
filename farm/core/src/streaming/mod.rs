//! Streaming Infrastructure
//!
//! Pieces shared by the backend clients and the dispatcher when relaying a
//! streamed completion:
//!
//! - [`LineBuffer`]: reassembles lines from arbitrary network chunks
//! - [`ThinkFilter`]: strips reasoning spans from a stream of text fragments
//! - [`StreamEvent`]: what the dispatcher hands to the HTTP front

pub mod lines;
pub mod think_filter;

pub use lines::LineBuffer;
pub use think_filter::{strip_reasoning, FilterState, ThinkFilter};

use crate::backend::ChatChunk;
use crate::error::FarmError;

/// One event of a relayed stream
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// A chunk to forward, reasoning already stripped
    Chunk(ChatChunk),
    /// The upstream stream completed normally
    Done,
    /// The upstream stream broke after output was forwarded; nothing follows
    Aborted(FarmError),
}
