//! # SSE Parser
//!
//! Turns the relay's chunked byte stream into complete Server-Sent Events.
//! Handles line buffering across chunks, `id:`/`event:`/`data:` fields,
//! multi-line data and comment (keep-alive) lines.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tracing::warn;

use super::BridgeError;

/// Longest line accepted from the relay.
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_heartbeat(&self) -> bool {
        self.event.as_deref() == Some("heartbeat") || self.data == "heartbeat"
    }

    fn is_empty(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_empty()
    }
}

struct ParserState<S> {
    stream: S,
    buffer: BytesMut,
    pending: SseEvent,
    has_data: bool,
    done: bool,
}

/// Parse complete events out of `byte_stream`.
///
/// A transport error is yielded once and ends the stream. A clean end of the
/// byte stream ends the event stream; a trailing event without its blank
/// line terminator is discarded, like browsers do.
pub fn parse_sse_events<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<SseEvent, BridgeError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Into<BridgeError> + Send + 'static,
{
    let state = ParserState {
        stream: byte_stream,
        buffer: BytesMut::with_capacity(8192),
        pending: SseEvent::default(),
        has_data: false,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        loop {
            if let Some(newline_pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let mut line_bytes = state.buffer.split_to(newline_pos + 1);
                line_bytes.truncate(line_bytes.len() - 1);
                if line_bytes.last() == Some(&b'\r') {
                    line_bytes.truncate(line_bytes.len() - 1);
                }

                let Ok(line) = std::str::from_utf8(&line_bytes) else {
                    warn!("skipping non utf-8 SSE line");
                    continue;
                };

                if line.is_empty() {
                    let event = std::mem::take(&mut state.pending);
                    state.has_data = false;
                    if event.is_empty() {
                        continue;
                    }
                    return Some((Ok(event), state));
                }

                apply_field(&mut state.pending, &mut state.has_data, line);
                continue;
            }

            if state.buffer.len() > MAX_LINE_BYTES {
                state.done = true;
                let err = format!("SSE line longer than {MAX_LINE_BYTES} bytes");
                return Some((Err(BridgeError::Stream(err)), state));
            }

            match state.stream.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => return None,
            }
        }
    })
}

fn apply_field(event: &mut SseEvent, has_data: &mut bool, line: &str) {
    if line.starts_with(':') {
        return;
    }

    let (field, value) = match line.split_once(':') {
        Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
        None => (line, ""),
    };

    match field {
        "id" => event.id = Some(value.to_string()),
        "event" => event.event = Some(value.to_string()),
        "data" => {
            if *has_data {
                event.data.push('\n');
            }
            event.data.push_str(value);
            *has_data = true;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(
        parts: &[&str],
    ) -> impl Stream<Item = Result<Bytes, BridgeError>> + Send + Unpin + 'static {
        let owned: Vec<Result<Bytes, BridgeError>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        futures::stream::iter(owned)
    }

    async fn collect(parts: &[&str]) -> Vec<Result<SseEvent, BridgeError>> {
        parse_sse_events(chunks(parts)).collect().await
    }

    #[tokio::test]
    async fn parses_message_event() {
        let events =
            collect(&["id: 17\nevent: message\ndata: {\"from\":\"ab\",\"message\":\"cd\"}\n\n"]).await;
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.id.as_deref(), Some("17"));
        assert_eq!(event.event.as_deref(), Some("message"));
        assert_eq!(event.data, "{\"from\":\"ab\",\"message\":\"cd\"}");
    }

    #[tokio::test]
    async fn reassembles_across_chunks_and_crlf() {
        let events =
            collect(&["id: 1\r\nda", "ta: hel", "lo\r\n", "\r\n", "data: a\ndata: b\n\n"]).await;
        let events: Vec<SseEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events[0].data, "hello");
        assert_eq!(events[0].id.as_deref(), Some("1"));
        assert_eq!(events[1].data, "a\nb");
        assert_eq!(events[1].id, None);
    }

    #[tokio::test]
    async fn comments_and_heartbeats() {
        let events = collect(&[": keep-alive\n\n", "event: heartbeat\ndata: heartbeat\n\n"]).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap().is_heartbeat());
    }

    #[tokio::test]
    async fn unterminated_tail_is_dropped() {
        let events = collect(&["data: complete\n\n", "data: partial"]).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn endless_line_is_rejected() {
        let half = Bytes::from(vec![b'a'; MAX_LINE_BYTES / 2 + 1]);
        let parts: Vec<Result<Bytes, BridgeError>> =
            vec![Ok(half.clone()), Ok(half.clone()), Ok(half)];
        let events: Vec<_> = parse_sse_events(futures::stream::iter(parts)).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(BridgeError::Stream(_))));
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let parts: Vec<Result<Bytes, BridgeError>> = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Err(BridgeError::Stream("reset".into())),
            Ok(Bytes::from_static(b"data: two\n\n")),
        ];
        let events: Vec<_> = parse_sse_events(futures::stream::iter(parts)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(BridgeError::Stream(_))));
    }
}
