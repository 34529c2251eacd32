//! REPL stderr relay. Copies the diagnostic stream verbatim, nothing else.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::demux::StreamError;

pub struct DiagnosticRelay<W> {
    sink: W,
    buffer_size: usize,
}

impl<W: AsyncWrite + Unpin> DiagnosticRelay<W> {
    pub fn new(sink: W, buffer_size: usize) -> Self {
        Self {
            sink,
            buffer_size: buffer_size.max(1),
        }
    }

    pub async fn run<R: AsyncRead + Unpin>(mut self, mut reader: R) -> Result<(), StreamError> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|source| StreamError::Read {
                    stream: "stderr",
                    source,
                })?;
            if n == 0 {
                info!("REPL stderr closed");
                return Ok(());
            }
            if let Err(e) = self.sink.write_all(&buf[..n]).await {
                warn!(error = %e, "Failed to relay REPL stderr");
                continue;
            }
            if let Err(e) = self.sink.flush().await {
                warn!(error = %e, "Failed to flush REPL stderr relay");
            }
        }
    }
}
