//! Cumulative text for one in-flight response.

use shared::agent_api::StreamChunk;
use shared::error::ChatError;
use tokio::sync::mpsc::UnboundedReceiver;

/// Receives the accumulator's events. Implemented by the chat surface.
pub trait StreamSink {
    /// Called once per fragment with the whole text received so far.
    fn on_render(&mut self, cumulative: &str);
    /// Called exactly once when the end marker arrives.
    fn on_complete(&mut self, text: &str);
    /// Called instead of `on_complete` when the stream fails.
    fn on_error(&mut self, error: &ChatError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Completed,
    Failed,
}

/// Appends fragments strictly in arrival order: nothing is dropped,
/// reordered or deduplicated.
#[derive(Debug)]
pub struct StreamAccumulator {
    buffer: String,
    state: StreamState,
    fragments: usize,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: StreamState::Open,
            fragments: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Start over for a new request.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = StreamState::Open;
        self.fragments = 0;
    }

    pub fn on_fragment(&mut self, fragment: &str, sink: &mut impl StreamSink) -> &str {
        if self.state != StreamState::Open {
            tracing::warn!(state = ?self.state, "fragment after end of stream ignored");
            return &self.buffer;
        }
        self.buffer.push_str(fragment);
        self.fragments += 1;
        sink.on_render(&self.buffer);
        &self.buffer
    }

    /// Close the stream. Only the first call notifies the sink.
    pub fn on_complete(&mut self, sink: &mut impl StreamSink) -> &str {
        if self.state == StreamState::Open {
            self.state = StreamState::Completed;
            tracing::debug!(
                fragments = self.fragments,
                len = self.buffer.len(),
                "stream complete"
            );
            sink.on_complete(&self.buffer);
        }
        &self.buffer
    }

    /// Fail the stream. The text received so far is kept as is.
    pub fn fail(&mut self, error: &ChatError, sink: &mut impl StreamSink) {
        if self.state == StreamState::Open {
            self.state = StreamState::Failed;
            tracing::warn!(%error, fragments = self.fragments, "stream failed");
            sink.on_error(error);
        }
    }

    /// Drain `rx` into `sink` until the end marker, an error, or the channel
    /// closing (which counts as a failure). Returns the final text.
    pub async fn pump(
        &mut self,
        mut rx: UnboundedReceiver<StreamChunk>,
        sink: &mut impl StreamSink,
    ) -> Result<String, ChatError> {
        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::Text(fragment) => {
                    self.on_fragment(&fragment, sink);
                }
                StreamChunk::Done => return Ok(self.on_complete(sink).to_string()),
                StreamChunk::Error(error) => {
                    self.fail(&error, sink);
                    return Err(error);
                }
            }
        }
        let error = ChatError::Stream("stream closed before the end marker".into());
        self.fail(&error, sink);
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        renders: Vec<String>,
        completions: Vec<String>,
        errors: Vec<String>,
    }

    impl StreamSink for Recorder {
        fn on_render(&mut self, cumulative: &str) {
            self.renders.push(cumulative.to_string());
        }

        fn on_complete(&mut self, text: &str) {
            self.completions.push(text.to_string());
        }

        fn on_error(&mut self, error: &ChatError) {
            self.errors.push(error.to_string());
        }
    }

    #[test]
    fn test_fragments_concatenate_in_order() {
        let mut acc = StreamAccumulator::new();
        let mut sink = Recorder::default();
        for fragment in ["Hel", "lo ", "world"] {
            acc.on_fragment(fragment, &mut sink);
        }
        assert_eq!(acc.on_complete(&mut sink), "Hello world");
        assert_eq!(sink.renders, vec!["Hel", "Hello ", "Hello world"]);
        assert_eq!(sink.completions, vec!["Hello world"]);
        assert!(sink.errors.is_empty());
    }

    #[test]
    fn test_duplicate_fragments_are_kept() {
        let mut acc = StreamAccumulator::new();
        let mut sink = Recorder::default();
        acc.on_fragment("ha", &mut sink);
        acc.on_fragment("ha", &mut sink);
        assert_eq!(acc.text(), "haha");
    }

    #[test]
    fn test_complete_is_notified_once() {
        let mut acc = StreamAccumulator::new();
        let mut sink = Recorder::default();
        acc.on_fragment("x", &mut sink);
        acc.on_complete(&mut sink);
        acc.on_complete(&mut sink);
        acc.on_fragment("late", &mut sink);
        assert_eq!(sink.completions.len(), 1);
        assert_eq!(sink.renders.len(), 1);
        assert_eq!(acc.text(), "x");
    }

    #[test]
    fn test_reset_starts_a_new_request() {
        let mut acc = StreamAccumulator::new();
        let mut sink = Recorder::default();
        acc.on_fragment("old", &mut sink);
        acc.on_complete(&mut sink);
        acc.reset();
        assert_eq!(acc.text(), "");
        assert_eq!(acc.state(), StreamState::Open);
        assert_eq!(acc.on_fragment("new", &mut sink), "new");
    }

    #[tokio::test]
    async fn test_pump_counts_renders_and_completion() {
        let (tx, rx) = mpsc::unbounded_channel();
        for fragment in ["Hel", "lo ", "world"] {
            tx.send(StreamChunk::Text(fragment.into())).unwrap();
        }
        tx.send(StreamChunk::Done).unwrap();

        let mut acc = StreamAccumulator::new();
        let mut sink = Recorder::default();
        let text = acc.pump(rx, &mut sink).await.unwrap();
        assert_eq!(text, "Hello world");
        assert_eq!(sink.renders.len(), 3);
        assert_eq!(sink.completions, vec!["Hello world"]);
    }

    #[tokio::test]
    async fn test_pump_error_keeps_text_and_skips_completion() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamChunk::Text("partial".into())).unwrap();
        tx.send(StreamChunk::Error(ChatError::Network("reset".into())))
            .unwrap();

        let mut acc = StreamAccumulator::new();
        let mut sink = Recorder::default();
        let err = acc.pump(rx, &mut sink).await.unwrap_err();
        assert!(matches!(err, ChatError::Network(_)));
        assert!(sink.completions.is_empty());
        assert_eq!(sink.errors.len(), 1);
        assert_eq!(acc.text(), "partial");
        assert_eq!(acc.state(), StreamState::Failed);
    }

    #[tokio::test]
    async fn test_pump_closed_channel_is_a_failure() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamChunk::Text("half".into())).unwrap();
        drop(tx);

        let mut acc = StreamAccumulator::new();
        let mut sink = Recorder::default();
        let err = acc.pump(rx, &mut sink).await.unwrap_err();
        assert!(matches!(err, ChatError::Stream(_)));
        assert!(sink.completions.is_empty());
    }
}
