//! REPL stdout demultiplexer.
//!
//! Echoes every chunk to the pass-through sink and, while the result slot is
//! armed, looks for the first marker line in the completed output lines.
//!
//! Partial lines are carried over between reads, so a marker line split across
//! two chunks is still recognised once its newline arrives. Only completed
//! lines are classified.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::command::ReplOutput;
use super::slot::ResultSlot;

/// Prefix of a line carrying an evaluated value.
pub const SUCCESS_PREFIX: &str = "-> ";
/// Prefix of a line reporting an evaluation error.
pub const ERROR_PREFIX: &str = "ERROR: ";

/// Carried-over bytes beyond this are dropped; a line that long is never a marker we can use.
const MAX_PARTIAL_LINE: usize = 1024 * 1024;

/// Classification of one completed output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLine<'a> {
    Plain,
    Success(&'a str),
    Error(&'a str),
}

impl OutputLine<'_> {
    pub fn into_output(self) -> Option<ReplOutput> {
        match self {
            OutputLine::Plain => None,
            OutputLine::Success(payload) => Some(ReplOutput::Value(payload.to_string())),
            OutputLine::Error(line) => Some(ReplOutput::Error(line.to_string())),
        }
    }
}

pub fn classify_line(line: &str) -> OutputLine<'_> {
    if let Some(payload) = line.strip_prefix(SUCCESS_PREFIX) {
        OutputLine::Success(payload)
    } else if line.starts_with(ERROR_PREFIX) {
        OutputLine::Error(line)
    } else {
        OutputLine::Plain
    }
}

/// Splits a byte stream into lines, keeping the unterminated tail between pushes.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            if self.partial.last() == Some(&b'\r') {
                self.partial.pop();
            }
            lines.push(String::from_utf8_lossy(&self.partial).into_owned());
            self.partial.clear();
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
        if self.partial.len() > MAX_PARTIAL_LINE {
            debug!(len = self.partial.len(), "Dropping oversized partial line");
            self.partial.clear();
        }
        lines
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }
}

/// Errors that end a stream reader task.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Cannot read REPL {stream}: {source}")]
    Read {
        stream: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Single reader of the REPL's stdout.
pub struct OutputDemultiplexer<W> {
    slot: Arc<ResultSlot>,
    sink: W,
    buffer_size: usize,
    lines: LineBuffer,
}

impl<W: AsyncWrite + Unpin> OutputDemultiplexer<W> {
    pub fn new(slot: Arc<ResultSlot>, sink: W, buffer_size: usize) -> Self {
        Self {
            slot,
            sink,
            buffer_size: buffer_size.max(1),
            lines: LineBuffer::new(),
        }
    }

    /// Drain `reader` until end of file.
    ///
    /// A read error means the REPL is gone and is returned to the supervisor.
    pub async fn run<R: AsyncRead + Unpin>(mut self, mut reader: R) -> Result<(), StreamError> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|source| StreamError::Read {
                    stream: "stdout",
                    source,
                })?;
            if n == 0 {
                info!("REPL stdout closed");
                return Ok(());
            }
            let chunk = &buf[..n];
            self.echo(chunk).await;
            self.scan(chunk);
        }
    }

    async fn echo(&mut self, chunk: &[u8]) {
        if let Err(e) = self.sink.write_all(chunk).await {
            warn!(error = %e, "Failed to echo REPL stdout");
            return;
        }
        if let Err(e) = self.sink.flush().await {
            warn!(error = %e, "Failed to flush REPL stdout echo");
        }
    }

    fn scan(&mut self, chunk: &[u8]) {
        let lines = self.lines.push(chunk);
        if !self.slot.is_armed() {
            return;
        }
        for line in &lines {
            let Some(output) = classify_line(line).into_output() else {
                continue;
            };
            let is_error = output.is_error();
            if self.slot.deliver(output) {
                debug!(is_error, "Captured REPL result");
            } else {
                debug!(is_error, "REPL result arrived after its waiter left");
            }
            // Later lines in this chunk predate the next arming.
            break;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[test]
    fn classifies_marker_lines() {
        assert_eq!(classify_line("-> 42"), OutputLine::Success("42"));
        assert_eq!(classify_line("-> "), OutputLine::Success(""));
        assert_eq!(
            classify_line("ERROR: Message 'foo' not understood."),
            OutputLine::Error("ERROR: Message 'foo' not understood.")
        );
        assert_eq!(classify_line("compiling class library..."), OutputLine::Plain);
        assert_eq!(classify_line(" -> indented"), OutputLine::Plain);
        assert_eq!(classify_line("->42"), OutputLine::Plain);
    }

    #[test]
    fn line_buffer_carries_partial_lines() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"-> hel").is_empty());
        assert_eq!(buf.pending(), b"-> hel");
        assert_eq!(buf.push(b"lo\nnext"), vec!["-> hello".to_string()]);
        assert_eq!(buf.pending(), b"next");
    }

    #[test]
    fn line_buffer_splits_many_lines_and_strips_cr() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"a\r\nb\n\nc\n");
        assert_eq!(lines, vec!["a", "b", "", "c"]);
        assert!(buf.pending().is_empty());
    }

    #[test]
    fn line_buffer_tolerates_split_utf8() {
        let mut buf = LineBuffer::new();
        let snowman = "☃".as_bytes();
        assert!(buf.push(&snowman[..1]).is_empty());
        let mut rest = snowman[1..].to_vec();
        rest.push(b'\n');
        assert_eq!(buf.push(&rest), vec!["☃".to_string()]);
    }

    /// Feed `chunks` through a demultiplexer and return what it echoed.
    async fn run_chunks(
        slot: Arc<ResultSlot>,
        chunks: &[&[u8]],
        buffer_size: usize,
    ) -> Vec<u8> {
        let (mut repl_out, reader) = duplex(4096);
        let (sink, mut echoed) = duplex(4096);
        let demux = OutputDemultiplexer::new(slot, sink, buffer_size);
        let task = tokio::spawn(demux.run(reader));

        for chunk in chunks {
            repl_out.write_all(chunk).await.unwrap();
            repl_out.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(repl_out);
        task.await.unwrap().unwrap();

        let mut out = Vec::new();
        echoed.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn success_marker_is_stripped() {
        let slot = Arc::new(ResultSlot::new());
        let rx = slot.arm();
        run_chunks(Arc::clone(&slot), &[b"chatter\n-> 3\n"], 64).await;
        assert_eq!(rx.await.unwrap(), ReplOutput::Value("3".into()));
        assert!(!slot.is_armed());
    }

    #[tokio::test]
    async fn error_marker_keeps_whole_line() {
        let slot = Arc::new(ResultSlot::new());
        let rx = slot.arm();
        run_chunks(slot, &[b"ERROR: syntax error, unexpected $end\n"], 64).await;
        assert_eq!(
            rx.await.unwrap(),
            ReplOutput::Error("ERROR: syntax error, unexpected $end".into())
        );
    }

    #[tokio::test]
    async fn first_marker_wins() {
        let slot = Arc::new(ResultSlot::new());
        let rx = slot.arm();
        run_chunks(Arc::clone(&slot), &[b"-> first\n-> second\n"], 64).await;
        assert_eq!(rx.await.unwrap(), ReplOutput::Value("first".into()));
        assert!(!slot.is_armed());
    }

    #[tokio::test]
    async fn markers_are_ignored_while_disarmed() {
        let slot = Arc::new(ResultSlot::new());
        run_chunks(Arc::clone(&slot), &[b"-> unsolicited\n"], 64).await;
        assert!(!slot.is_armed());
    }

    #[tokio::test]
    async fn marker_split_across_chunks_is_captured() {
        let slot = Arc::new(ResultSlot::new());
        let rx = slot.arm();
        run_chunks(slot, &[b"noise\n-", b"> split", b" value\n"], 64).await;
        assert_eq!(rx.await.unwrap(), ReplOutput::Value("split value".into()));
    }

    #[tokio::test]
    async fn small_buffer_still_captures() {
        let slot = Arc::new(ResultSlot::new());
        let rx = slot.arm();
        run_chunks(slot, &[b"-> tiny reads\n"], 3).await;
        assert_eq!(rx.await.unwrap(), ReplOutput::Value("tiny reads".into()));
    }

    #[tokio::test]
    async fn every_byte_is_echoed() {
        let slot = Arc::new(ResultSlot::new());
        let _rx = slot.arm();
        let echoed = run_chunks(slot, &[b"sc3> ", b"-> 1\n", b"\x0cpartial"], 4).await;
        assert_eq!(echoed, b"sc3> -> 1\n\x0cpartial");
    }
}
