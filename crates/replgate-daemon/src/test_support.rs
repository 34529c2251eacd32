//! In-memory REPL used by unit tests.
//!
//! The fake reads stdin until a terminator byte, records what it received and
//! writes whatever the response closure returns to its stdout. The dispatcher
//! and demultiplexer under test are wired to it exactly as to a real process.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::subprocess::{
    DispatchError, Dispatcher, DispatcherHandle, ExecMode, OutputDemultiplexer, ResultSlot,
};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Late-result window of the harness dispatcher.
pub const LATE_RESULT_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub code: String,
    pub mode: ExecMode,
}

/// Prints `-> <code>` for capturing commands, nothing otherwise.
pub fn echo_value(code: &str, mode: ExecMode) -> Option<String> {
    (mode == ExecMode::ExecuteAndCapture).then(|| format!("-> {code}\n"))
}

pub struct Harness {
    pub dispatcher: DispatcherHandle,
    pub slot: Arc<ResultSlot>,
    pub close: CancellationToken,
    pub dispatcher_task: JoinHandle<Result<(), DispatchError>>,
    received: Arc<Mutex<Vec<Received>>>,
    delay: Arc<Mutex<Duration>>,
    eof: watch::Receiver<bool>,
}

impl Harness {
    pub fn start<F>(respond: F) -> Self
    where
        F: FnMut(&str, ExecMode) -> Option<String> + Send + 'static,
    {
        let (stdin_writer, stdin_reader) = duplex(PIPE_CAPACITY);
        let (stdout_writer, stdout_reader) = duplex(PIPE_CAPACITY);

        let received = Arc::new(Mutex::new(Vec::new()));
        let delay = Arc::new(Mutex::new(Duration::ZERO));
        let (eof_tx, eof) = watch::channel(false);
        tokio::spawn(fake_repl(
            stdin_reader,
            stdout_writer,
            respond,
            Arc::clone(&received),
            Arc::clone(&delay),
            eof_tx,
        ));

        let slot = Arc::new(ResultSlot::new());
        let close = CancellationToken::new();
        let (dispatcher, handle) = Dispatcher::new(stdin_writer, Arc::clone(&slot), close.clone());
        let dispatcher_task =
            tokio::spawn(dispatcher.with_late_result_window(LATE_RESULT_WINDOW).run());
        let demux = OutputDemultiplexer::new(Arc::clone(&slot), tokio::io::sink(), 64);
        tokio::spawn(demux.run(stdout_reader));

        Self {
            dispatcher: handle,
            slot,
            close,
            dispatcher_task,
            received,
            delay,
            eof,
        }
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_log(&self) -> Arc<Mutex<Vec<Received>>> {
        Arc::clone(&self.received)
    }

    /// Delay every response written by the fake from now on.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub async fn wait_for_received(&self, count: usize) {
        for _ in 0..200 {
            if self.received.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fake REPL never received {count} commands");
    }

    /// Wait until the fake has seen end of input.
    pub async fn wait_for_eof(&self) {
        let mut eof = self.eof.clone();
        tokio::time::timeout(Duration::from_secs(2), eof.wait_for(|seen| *seen))
            .await
            .expect("fake REPL never saw end of input")
            .unwrap();
    }

    pub fn saw_eof(&self) -> bool {
        *self.eof.borrow()
    }
}

async fn fake_repl<F>(
    mut stdin: DuplexStream,
    mut stdout: DuplexStream,
    mut respond: F,
    received: Arc<Mutex<Vec<Received>>>,
    delay: Arc<Mutex<Duration>>,
    eof: watch::Sender<bool>,
) where
    F: FnMut(&str, ExecMode) -> Option<String> + Send + 'static,
{
    let mut pending = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = match stdin.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..n] {
            let mode = match byte {
                0x1b => ExecMode::SilentExecute,
                0x0c => ExecMode::ExecuteAndCapture,
                other => {
                    pending.push(other);
                    continue;
                }
            };
            let code = String::from_utf8_lossy(&pending).into_owned();
            pending.clear();
            received.lock().unwrap().push(Received {
                code: code.clone(),
                mode,
            });
            if let Some(output) = respond(&code, mode) {
                let wait = *delay.lock().unwrap();
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                if stdout.write_all(output.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }
    eof.send_replace(true);
}
