//! Incremental Server-Sent Events parsing for the client transport.
//!
//! Fields are `id`, `event`, `data`, `retry`, one per line; an event ends at
//! a blank line. Comment lines (leading `:`) are keepalives and are ignored.

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event id, if the server sent one
    pub id: Option<String>,
    /// Event type (`message` when absent)
    pub event: Option<String>,
    /// Data payload; multi-line data is joined with `\n`
    pub data: String,
    /// Retry hint in milliseconds
    pub retry: Option<u64>,
}

/// Streaming SSE parser: feed it byte chunks as they arrive, collect
/// complete events.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current_id: Option<String>,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_retry: Option<u64>,
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let Ok(text) = std::str::from_utf8(chunk) else {
            return Vec::new();
        };
        self.buffer.push_str(text);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.finish_event() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.find(':') {
                Some(colon) => (&line[..colon], line[colon + 1..].trim_start()),
                None => (line, ""),
            };
            match field {
                "id" => self.current_id = Some(value.to_string()),
                "event" => self.current_event = Some(value.to_string()),
                "data" => self.current_data.push(value.to_string()),
                "retry" => self.current_retry = value.parse().ok(),
                _ => {}
            }
        }
        events
    }

    fn finish_event(&mut self) -> Option<SseEvent> {
        let id = self.current_id.take();
        let event = self.current_event.take();
        let retry = self.current_retry.take();
        if self.current_data.is_empty() && id.is_none() && retry.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.current_data).join("\n");
        Some(SseEvent {
            id,
            event,
            data,
            retry,
        })
    }
}
