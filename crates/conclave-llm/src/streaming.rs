use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;

use conclave_core::error::{ConclaveError, Result};

/// Incremental parser for `text/event-stream` bodies.
///
/// Bytes are buffered until a complete event block is available, so
/// multi-byte characters split across network reads decode correctly.
/// `\r\n` line endings are normalized.
#[derive(Default)]
pub struct SseParser {
    pending_bytes: Vec<u8>,
    buffer: String,
}

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every event completed by them.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending_bytes.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.pending_bytes) {
            Ok(s) => s.len(),
            Err(e) => e.valid_up_to(),
        };
        let text: String = String::from_utf8_lossy(&self.pending_bytes[..valid]).into_owned();
        self.pending_bytes.drain(..valid);
        self.feed(&text)
    }

    /// Feed text and return every event completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        if chunk.contains('\r') {
            self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        } else {
            self.buffer.push_str(chunk);
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&block[..pos]) {
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
        return None;
    }
    Some(SseEvent {
        event_type,
        data: data_lines.join("\n"),
    })
}

/// A stream of SSE events over an HTTP byte stream.
///
/// Transport failures are surfaced as `LlmStream` errors rather than a
/// silent end of stream, so truncated responses are not mistaken for
/// complete ones.
pub struct SseStream<S> {
    inner: S,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    done: bool,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<SseEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend(this.parser.feed_bytes(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(ConclaveError::LlmStream(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
        let events = parser.feed("1}\r\n\r\n: ping\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"x\":1}");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn test_sse_parser_split_utf8() {
        let frame = "data: 综合\n\n".as_bytes();
        // Split inside the first multi-byte character
        let (head, tail) = frame.split_at(7);
        let mut parser = SseParser::new();
        assert!(parser.feed_bytes(head).is_empty());
        let events = parser.feed_bytes(tail);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "综合");
    }

    #[test]
    fn test_sse_parser_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[tokio::test]
    async fn test_sse_stream_drains_buffered_events() {
        use futures::StreamExt;

        let body: Vec<std::result::Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"data: 1\n\ndata: 2\n\n")),
            Ok(bytes::Bytes::from_static(b"data: 3")),
            Ok(bytes::Bytes::from_static(b"\n\n")),
        ];
        let stream = SseStream::new(futures::stream::iter(body));
        let events: Vec<_> = stream.map(|e| e.unwrap().data).collect().await;
        assert_eq!(events, vec!["1", "2", "3"]);
    }
}
