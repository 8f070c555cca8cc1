//! Container log streams.
//!
//! Engines deliver output in arbitrary chunks: one chunk may hold several
//! lines, and a line may be split across chunks. [`frame_lines`] turns such
//! a chunk stream into a stream of whole lines in emission order.

use std::fmt::Display;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use gantry_common::error::{GantryError, Result};

/// Lines emitted by one container, in order.
pub type LogStream = BoxStream<'static, Result<String>>;

/// Reassembles whole lines from arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    /// Creates an empty framer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Feeds a chunk and returns every line it completed.
    ///
    /// Line terminators (`\n` or `\r\n`) are stripped. Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(self.take_line());
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flushes a trailing line that had no terminator.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    fn take_line(&mut self) -> String {
        if self.pending.last() == Some(&b'\r') {
            let _ = self.pending.pop();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

/// Adapts a stream of byte chunks into a [`LogStream`] of whole lines.
///
/// Chunk errors are forwarded as [`GantryError::Runtime`] items tagged with
/// `target`. A final unterminated line is emitted when the chunk stream ends.
pub fn frame_lines<S, B, E>(chunks: S, target: impl Into<String>) -> LogStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let target = target.into();
    let mut framer = LineFramer::new();
    chunks
        .map(Some)
        .chain(stream::once(async { None }))
        .flat_map(move |item| {
            let lines: Vec<Result<String>> = match item {
                Some(Ok(chunk)) => framer.push(chunk.as_ref()).into_iter().map(Ok).collect(),
                Some(Err(e)) => vec![Err(GantryError::runtime(
                    "stream_logs",
                    target.clone(),
                    e,
                ))],
                None => framer.finish().into_iter().map(Ok).collect(),
            };
            stream::iter(lines)
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_splits_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"booting\nloading config\n");
        assert_eq!(lines, vec!["booting", "loading config"]);
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn framer_joins_line_split_across_chunks() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"Started Demo").is_empty());
        let lines = framer.push(b"Application in 3.2s\nnext");
        assert_eq!(lines, vec!["Started DemoApplication in 3.2s"]);
        assert_eq!(framer.finish().as_deref(), Some("next"));
    }

    #[test]
    fn framer_strips_carriage_returns() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"windows line\r\n"), vec!["windows line"]);
    }

    #[test]
    fn framer_keeps_empty_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"a\n\nb\n"), vec!["a", "", "b"]);
    }

    #[tokio::test]
    async fn frame_lines_flushes_trailing_line_and_preserves_order() {
        let chunks = stream::iter(vec![
            Ok::<_, String>(b"one\ntw".to_vec()),
            Ok(b"o\nthree".to_vec()),
        ]);
        let lines: Vec<String> = frame_lines(chunks, "svc")
            .map(|r| r.expect("no errors"))
            .collect()
            .await;
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn frame_lines_forwards_chunk_errors() {
        let chunks = stream::iter(vec![
            Ok(b"fine\n".to_vec()),
            Err("connection reset".to_string()),
        ]);
        let items: Vec<Result<String>> = frame_lines(chunks, "policy").collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        let err = items[1].as_ref().expect_err("second item is the error");
        assert!(err.to_string().contains("connection reset"));
        assert!(err.to_string().contains("policy"));
    }
}
