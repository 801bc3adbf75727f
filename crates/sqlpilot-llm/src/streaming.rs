use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{Stream, StreamExt};

use sqlpilot_core::error::{Result, SqlPilotError};
use sqlpilot_core::types::StreamDelta;

/// Incremental parser for `text/event-stream` bodies.
///
/// Bytes arrive in arbitrary chunks; events are only yielded once their
/// blank-line terminator has been seen. `\r\n` line endings are accepted.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// OpenAI-style end-of-stream marker.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and drain every complete event from the buffer.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        if chunk.contains('\r') {
            self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        } else {
            self.buffer.push_str(chunk);
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut data_lines = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            // comment / keep-alive
            continue;
        }
        if let Some(val) = line.strip_prefix("event:") {
            event_type = Some(val.trim_start().to_string());
        } else if let Some(val) = line.strip_prefix("data:") {
            data_lines.push(val.strip_prefix(' ').unwrap_or(val).to_string());
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(SseEvent {
            event_type,
            data: data_lines.join("\n"),
        })
    }
}

/// Adapts a `reqwest` byte stream into a stream of [`SseEvent`]s.
pub struct SseStream<S> {
    inner: S,
    parser: SseParser,
    pending: std::collections::VecDeque<SseEvent>,
    // Bytes of a UTF-8 sequence split across chunk boundaries.
    carry: Vec<u8>,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: SseParser::new(),
            pending: Default::default(),
            carry: Vec::new(),
        }
    }
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = SseEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.carry.extend_from_slice(&bytes);
                    let valid_up_to = match std::str::from_utf8(&this.carry) {
                        Ok(_) => this.carry.len(),
                        Err(e) => e.valid_up_to(),
                    };
                    let text: Vec<u8> = this.carry.drain(..valid_up_to).collect();
                    let text = String::from_utf8_lossy(&text);
                    this.pending.extend(this.parser.feed(&text));
                }
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Drain a delta stream into the full response text.
///
/// Stops at the first `Stop` delta; a stream error aborts with that error.
pub async fn collect_text(
    mut stream: futures::stream::BoxStream<'_, Result<StreamDelta>>,
) -> Result<String> {
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::TextDelta(chunk) => text.push_str(&chunk),
            StreamDelta::Stop(_) => break,
            StreamDelta::Usage { .. } | StreamDelta::MessageId(_) => {}
        }
    }
    if text.trim().is_empty() {
        return Err(SqlPilotError::LlmStream("empty response".into()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlpilot_core::types::StopReason;

    #[test]
    fn test_sse_parser_basic() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{\"type\":\"message_start\"}");
    }

    #[test]
    fn test_sse_parser_chunked_and_crlf() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: {\"x\":").is_empty());
        let events = parser.feed("1}\r\n\r\ndata: [DONE]\r\n\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"x\":1}");
        assert!(events[1].is_done());
    }

    #[test]
    fn test_sse_parser_skips_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keep-alive\n\ndata:{\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_collect_text_stops_at_stop() {
        let deltas: Vec<Result<StreamDelta>> = vec![
            Ok(StreamDelta::MessageId("m1".into())),
            Ok(StreamDelta::TextDelta("SELECT ".into())),
            Ok(StreamDelta::TextDelta("1".into())),
            Ok(StreamDelta::Stop(StopReason::EndTurn)),
            Ok(StreamDelta::TextDelta("ignored".into())),
        ];
        let text = collect_text(Box::pin(futures::stream::iter(deltas)))
            .await
            .unwrap();
        assert_eq!(text, "SELECT 1");
    }

    #[tokio::test]
    async fn test_collect_text_empty_is_error() {
        let deltas: Vec<Result<StreamDelta>> = vec![Ok(StreamDelta::Stop(StopReason::EndTurn))];
        let err = collect_text(Box::pin(futures::stream::iter(deltas)))
            .await
            .unwrap_err();
        assert!(matches!(err, SqlPilotError::LlmStream(_)));
    }
}
