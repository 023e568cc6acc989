//! Line parser for the chat backend's streaming responses.
//!
//! The backend writes one `data: <json>` line per delta and a final
//! `data: [DONE]`. Lines may be split across network chunks, and a chunk may
//! end in the middle of a UTF-8 sequence, so raw bytes are buffered until a
//! newline arrives.

/// A single parsed stream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of a `data:` line.
    Data(String),
    /// The `[DONE]` end marker.
    Done,
}

/// Incremental parser that buffers incomplete lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the HTTP response. Returns every complete line's event.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    // Ignore other fields (event:, id:, retry:, comments starting with :)
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(data.to_string()))
    }
}
