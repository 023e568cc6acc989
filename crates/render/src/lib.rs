//! Rendering for streamed chat responses.
//!
//! - [`accumulator`] turns a stream of text deltas into cumulative text and
//!   drives a [`accumulator::StreamSink`].
//! - [`markdown`] renders cumulative (possibly truncated) markdown into safe HTML.

pub mod accumulator;
pub mod escape;
pub mod markdown;
pub mod repair;

pub use accumulator::{StreamAccumulator, StreamSink, StreamState};
pub use escape::escape_html;
pub use markdown::render;
