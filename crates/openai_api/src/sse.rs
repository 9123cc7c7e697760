use serde_json::Value;

use crate::events::{ChatStreamEvent, FinishReason};

/// Incremental parser for `chat.completion.chunk` SSE streams.
///
/// Bytes are buffered undecoded until a full frame is available, so a
/// multi-byte character split across network reads is never mangled.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: Vec<u8>,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ChatStreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some((end, separator_len)) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + separator_len).take(end).collect();
            parse_frame(&String::from_utf8_lossy(&frame), &mut events);
        }

        events
    }

    /// Drain a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<ChatStreamEvent> {
        let frame = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        parse_frame(&String::from_utf8_lossy(&frame), &mut events);
        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<ChatStreamEvent> {
        let mut parser = Self::default();
        let mut events = parser.feed(input.as_bytes());
        events.extend(parser.finish());
        events
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|window| window == b"\n\n");
    let crlf = buffer.windows(4).position(|window| window == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(lf), Some(crlf)) if crlf < lf => Some((crlf, 4)),
        (Some(lf), _) => Some((lf, 2)),
        (None, Some(crlf)) => Some((crlf, 4)),
        (None, None) => None,
    }
}

fn parse_frame(frame: &str, events: &mut Vec<ChatStreamEvent>) {
    let Some(payload) = extract_data_payload(frame) else {
        return;
    };
    if payload.is_empty() {
        return;
    }
    if payload == "[DONE]" {
        events.push(ChatStreamEvent::Done);
        return;
    }

    match serde_json::from_str::<Value>(&payload) {
        Ok(value) => map_chunk(&value, events),
        Err(error) => tracing::debug!(%error, "skipping malformed SSE frame"),
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n").trim().to_owned())
    }
}

fn map_chunk(value: &Value, events: &mut Vec<ChatStreamEvent>) {
    if let Some(error) = value.get("error") {
        events.push(map_error(error));
        return;
    }

    let Some(choice) = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        return;
    };

    if let Some(delta) = choice.get("delta") {
        if let Some(text) = string_field(delta, "reasoning_content") {
            events.push(ChatStreamEvent::ReasoningDelta { delta: text });
        }
        if let Some(text) = string_field(delta, "content") {
            events.push(ChatStreamEvent::ContentDelta { delta: text });
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        events.push(ChatStreamEvent::Finished {
            reason: FinishReason::parse(reason),
        });
    }
}

fn map_error(error: &Value) -> ChatStreamEvent {
    if let Some(message) = error.as_str() {
        return ChatStreamEvent::Error {
            code: None,
            message: Some(message.to_owned()),
        };
    }

    let code = error.get("code").and_then(|code| match code {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    });
    ChatStreamEvent::Error {
        code,
        message: string_field(error, "message"),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}
