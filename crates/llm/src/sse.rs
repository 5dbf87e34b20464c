//! SSE relay: byte-level frame filtering and streaming usage capture.
//!
//! Upstream bodies are relayed without re-interpreting events: bytes
//! accumulate in a framer, complete frames split on blank lines, and
//! only `data:` lines are forwarded, each re-terminated with a blank
//! line. The `[DONE]` sentinel is an ordinary data line. Any buffered
//! tail at EOF is flushed through the same rule, so a truncated upstream
//! never swallows a final frame.

use std::{collections::VecDeque, pin::Pin, time::Instant};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;
use uuid::Uuid;

use crate::{error::LlmError, messages::openai::Usage};

/// Boxed stream of filtered SSE frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, LlmError>> + Send>>;

/// Accumulates upstream bytes and yields complete, filtered frames.
#[derive(Debug, Default)]
pub struct SseFramer {
    buffer: BytesMut,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of upstream bytes; returns every complete frame it
    /// finishes, already filtered to `data:` lines.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();

        while let Some(boundary) = find_blank_line(&self.buffer) {
            let frame = self.buffer.split_to(boundary + 2);
            if let Some(filtered) = filter_data_lines(&frame) {
                frames.push(filtered);
            }
        }

        frames
    }

    /// Flush whatever remains at EOF through the same filtering rule.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            return None;
        }

        let tail = self.buffer.split();
        filter_data_lines(&tail)
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\n\n")
}

/// Keep only lines beginning `data:`, each re-terminated with one blank
/// line. Returns None when the frame carried no data lines at all.
fn filter_data_lines(frame: &[u8]) -> Option<Bytes> {
    let mut out = BytesMut::new();

    for line in frame.split(|&byte| byte == b'\n') {
        if line.starts_with(b"data:") {
            out.extend_from_slice(line);
            out.extend_from_slice(b"\n\n");
        }
    }

    if out.is_empty() { None } else { Some(out.freeze()) }
}

/// Adapt an upstream byte stream into a stream of filtered frames.
///
/// An upstream read error terminates the stream after flushing the
/// buffered tail; once bytes have been yielded to the caller there is
/// nothing to retry, the caller observes truncation.
pub(crate) fn relay_data_frames<S>(upstream: S) -> impl Stream<Item = Result<Bytes, LlmError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    struct State<S> {
        upstream: S,
        framer: SseFramer,
        pending: VecDeque<Bytes>,
        done: bool,
    }

    let state = State {
        upstream,
        framer: SseFramer::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }

            if state.done {
                return None;
            }

            match state.upstream.next().await {
                Some(Ok(chunk)) => state.pending.extend(state.framer.push(&chunk)),
                Some(Err(e)) => {
                    log::warn!("Upstream stream failed mid-flight, truncating: {e}");
                    state.done = true;
                    state.pending.extend(state.framer.flush());
                }
                None => {
                    state.done = true;
                    state.pending.extend(state.framer.flush());
                }
            }
        }
    })
}

/// Per-stream accounting: watches forwarded frames for an in-band
/// `usage` object and logs timing plus captured usage when the stream
/// is dropped, on every exit path.
pub(crate) struct UsageAccounting {
    request_id: Uuid,
    backend: String,
    started: Instant,
    usage: Option<Usage>,
}

impl UsageAccounting {
    pub(crate) fn new(request_id: Uuid, backend: String, started: Instant) -> Self {
        Self {
            request_id,
            backend,
            started,
            usage: None,
        }
    }

    fn observe_frame(&mut self, frame: &[u8]) {
        for line in frame.split(|&byte| byte == b'\n') {
            let Some(payload) = line.strip_prefix(b"data:") else {
                continue;
            };
            let payload = payload.strip_prefix(b" ").unwrap_or(payload);

            if payload == b"[DONE]" {
                continue;
            }

            let Ok(value) = serde_json::from_slice::<Value>(payload) else {
                continue;
            };

            if let Some(usage) = value.get("usage")
                && !usage.is_null()
                && let Ok(usage) = serde_json::from_value::<Usage>(usage.clone())
            {
                self.usage = Some(usage);
            }
        }
    }
}

impl Drop for UsageAccounting {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed().as_millis();

        match self.usage {
            Some(usage) => log::info!(
                "request {} streamed via '{}' in {elapsed} ms (prompt {}, completion {} tokens)",
                self.request_id,
                self.backend,
                usage.prompt_tokens,
                usage.completion_tokens,
            ),
            None => log::info!(
                "request {} streamed via '{}' in {elapsed} ms (no usage reported)",
                self.request_id,
                self.backend,
            ),
        }
    }
}

/// Splice usage accounting over a frame stream; bytes pass through
/// unchanged.
pub(crate) fn with_usage_accounting<S>(
    frames: S,
    mut accounting: UsageAccounting,
) -> impl Stream<Item = Result<Bytes, LlmError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, LlmError>> + Send + 'static,
{
    frames.map(move |item| {
        if let Ok(frame) = &item {
            accounting.observe_frame(frame);
        }
        item
    })
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn collect(framer: &mut SseFramer, chunks: &[&str]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            for frame in framer.push(chunk.as_bytes()) {
                out.push_str(std::str::from_utf8(&frame).unwrap());
            }
        }
        if let Some(tail) = framer.flush() {
            out.push_str(std::str::from_utf8(&tail).unwrap());
        }
        out
    }

    #[test]
    fn forwards_data_lines_and_drops_others() {
        let mut framer = SseFramer::new();
        let out = collect(
            &mut framer,
            &["event: message\ndata: {\"a\":1}\n\nretry: 100\n\ndata: [DONE]\n\n"],
        );

        assert_eq!(out, "data: {\"a\":1}\n\ndata: [DONE]\n\n");
    }

    #[test]
    fn frames_split_across_chunk_boundaries() {
        let mut framer = SseFramer::new();
        let out = collect(&mut framer, &["data: {\"a\"", ":1}\n", "\ndata: {\"b\":2}\n\n"]);

        assert_eq!(out, "data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
    }

    #[test]
    fn multiple_data_lines_in_one_frame_each_get_their_own_termination() {
        let mut framer = SseFramer::new();
        let out = collect(&mut framer, &["data: one\ndata: two\n\n"]);

        assert_eq!(out, "data: one\n\ndata: two\n\n");
    }

    #[test]
    fn residual_tail_is_flushed_at_eof() {
        let mut framer = SseFramer::new();
        // No trailing blank line before EOF.
        let out = collect(&mut framer, &["data: unterminated"]);

        assert_eq!(out, "data: unterminated\n\n");
    }

    #[test]
    fn frames_without_data_lines_vanish() {
        let mut framer = SseFramer::new();
        let out = collect(&mut framer, &[": keep-alive\n\nevent: ping\n\n"]);

        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn relay_preserves_order_and_flushes_the_tail() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(b"data: 1\n\ndata: 2\n\ndata: tail")),
        ];
        let upstream = futures::stream::iter(chunks).boxed();

        let frames: Vec<String> = relay_data_frames(upstream)
            .map(|frame| String::from_utf8(frame.unwrap().to_vec()).unwrap())
            .collect()
            .await;

        assert_eq!(frames, vec!["data: 1\n\n", "data: 2\n\n", "data: tail\n\n"]);
    }

    #[tokio::test]
    async fn usage_is_captured_from_frames() {
        let mut accounting = UsageAccounting::new(Uuid::new_v4(), "openai:gpt-4o".into(), Instant::now());

        accounting.observe_frame(b"data: {\"choices\":[]}\n\n");
        assert!(accounting.usage.is_none());

        accounting.observe_frame(b"data: {\"usage\":{\"prompt_tokens\":11,\"completion_tokens\":3}}\n\n");
        let usage = accounting.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 11);
        assert_eq!(usage.completion_tokens, 3);

        accounting.observe_frame(b"data: [DONE]\n\n");
        assert!(accounting.usage.is_some());
    }
}
