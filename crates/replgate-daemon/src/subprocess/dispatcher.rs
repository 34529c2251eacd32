//! Single writer of the REPL's stdin.
//!
//! Commands are taken from a queue one at a time. A capturing command arms the
//! result slot before its bytes are written and holds the queue until its value
//! arrives or its timeout expires, so captured values are always attributed to
//! the command that produced them.
//!
//! A capture that times out stays outstanding: the slot remains armed to a
//! receiver the dispatcher keeps, and the next capture first waits up to the
//! late-result window for that value and discards it.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::{Command, ReplOutput};
use super::slot::ResultSlot;

const QUEUE_CAPACITY: usize = 32;

/// Default bound on waiting for a timed-out command's value.
pub const DEFAULT_LATE_RESULT_WINDOW: Duration = Duration::from_secs(4);

/// Outcome of one submission: the captured value, if one was requested.
pub type DispatchResult = Result<Option<ReplOutput>, DispatchError>;

/// Errors reported to a submitter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Timed out waiting for the REPL result")]
    Timeout,

    #[error("REPL input is closed")]
    Closed,

    #[error("Failed to write to REPL stdin: {0}")]
    Write(String),
}

struct Envelope {
    command: Command,
    /// `None` waits for the value until the dispatcher closes.
    timeout: Option<Duration>,
    reply: Option<oneshot::Sender<DispatchResult>>,
}

/// Cloneable submission side of the dispatcher queue.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Envelope>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("command", &self.command)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DispatcherHandle {
    /// Queue `command` for the REPL.
    ///
    /// Silent commands return `Ok(None)` as soon as they are queued. Capturing
    /// commands wait for their value; `timeout` bounds the whole wait including
    /// queueing. Giving up does not cancel the command.
    pub async fn submit(&self, command: Command, timeout: Duration) -> DispatchResult {
        let deadline = Instant::now() + timeout;
        tokio::time::timeout_at(deadline, self.enqueue(command, Some(timeout)))
            .await
            .unwrap_or(Err(DispatchError::Timeout))
    }

    /// Queue `command` and wait for its value for as long as it takes.
    ///
    /// Only closing the dispatcher ends the wait early.
    pub async fn submit_untimed(&self, command: Command) -> DispatchResult {
        self.enqueue(command, None).await
    }

    async fn enqueue(&self, command: Command, timeout: Option<Duration>) -> DispatchResult {
        if !command.wants_result {
            let envelope = Envelope {
                command,
                timeout,
                reply: None,
            };
            return match self.tx.send(envelope).await {
                Ok(()) => Ok(None),
                Err(_) => Err(DispatchError::Closed),
            };
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            command,
            timeout,
            reply: Some(reply_tx),
        };
        self.tx
            .send(envelope)
            .await
            .map_err(|_| DispatchError::Closed)?;
        reply_rx.await.unwrap_or(Err(DispatchError::Closed))
    }

    /// True once the dispatcher has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// How a capture's wait ended.
enum Waited {
    Value(ReplOutput),
    Dropped,
    TimedOut,
    Closed,
}

pub struct Dispatcher<W> {
    stdin: W,
    slot: Arc<ResultSlot>,
    rx: mpsc::Receiver<Envelope>,
    close: CancellationToken,
    /// Receiver of a capture that timed out while its value was still due.
    stale: Option<oneshot::Receiver<ReplOutput>>,
    late_result_window: Duration,
}

impl<W: AsyncWrite + Unpin> Dispatcher<W> {
    /// Build the dispatcher around the REPL's stdin. Cancelling `close` stops
    /// it and closes stdin.
    pub fn new(
        stdin: W,
        slot: Arc<ResultSlot>,
        close: CancellationToken,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (
            Self {
                stdin,
                slot,
                rx,
                close,
                stale: None,
                late_result_window: DEFAULT_LATE_RESULT_WINDOW,
            },
            DispatcherHandle { tx },
        )
    }

    /// Set how long the next capture waits for a timed-out command's value.
    #[must_use]
    pub const fn with_late_result_window(mut self, window: Duration) -> Self {
        self.late_result_window = window;
        self
    }

    /// Process commands until closed. Returns an error only if stdin broke.
    pub async fn run(mut self) -> Result<(), DispatchError> {
        let result = loop {
            let envelope = tokio::select! {
                biased;
                () = self.close.cancelled() => {
                    info!("Close requested, ending REPL input");
                    break Ok(());
                }
                envelope = self.rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => {
                        info!("No dispatcher handles left, ending REPL input");
                        break Ok(());
                    }
                },
            };
            if let Err(e) = self.dispatch(envelope).await {
                break Err(e);
            }
        };

        self.rx.close();
        if self.stale.take().is_some() {
            self.slot.disarm();
        }
        if let Err(e) = self.stdin.shutdown().await {
            debug!(error = %e, "REPL stdin shutdown failed");
        }
        result
    }

    async fn write(&mut self, command: &Command) -> std::io::Result<()> {
        self.stdin.write_all(&command.to_bytes()).await?;
        self.stdin.flush().await
    }

    /// Wait for an outstanding timed-out value before the slot is re-armed.
    ///
    /// Returns `false` if the dispatcher was closed meanwhile.
    async fn settle_stale(&mut self) -> bool {
        let Some(stale) = self.stale.take() else {
            return true;
        };
        let window = self.late_result_window;
        let late = tokio::select! {
            late = tokio::time::timeout(window, stale) => late,
            () = self.close.cancelled() => {
                self.slot.disarm();
                return false;
            }
        };
        match late {
            Ok(Ok(output)) => {
                debug!(is_error = output.is_error(), "Discarded late REPL result");
            }
            Ok(Err(_)) => {}
            Err(_) => {
                self.slot.disarm();
                warn!(?window, "Timed-out command never produced a value, disarming");
            }
        }
        true
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Result<(), DispatchError> {
        let Envelope {
            command,
            timeout,
            reply,
        } = envelope;

        if command.wants_result && !self.settle_stale().await {
            if let Some(reply) = reply {
                let _ = reply.send(Err(DispatchError::Closed));
            }
            return Ok(());
        }

        // Armed before the write so the demultiplexer cannot miss the value.
        let receiver = command.wants_result.then(|| self.slot.arm());

        debug!(
            wants_result = command.wants_result,
            bytes = command.code.len(),
            "Dispatching command"
        );
        if let Err(e) = self.write(&command).await {
            self.slot.disarm();
            let err = DispatchError::Write(e.to_string());
            if let Some(reply) = reply {
                let _ = reply.send(Err(err.clone()));
            }
            return Err(err);
        }

        let Some(mut receiver) = receiver else {
            return Ok(());
        };

        let waited = {
            let wait = async {
                match timeout {
                    Some(timeout) => tokio::time::timeout(timeout, &mut receiver).await.ok(),
                    None => Some((&mut receiver).await),
                }
            };
            tokio::select! {
                waited = wait => match waited {
                    Some(Ok(output)) => Waited::Value(output),
                    Some(Err(_)) => Waited::Dropped,
                    None => Waited::TimedOut,
                },
                () = self.close.cancelled() => Waited::Closed,
            }
        };

        let outcome = match waited {
            Waited::Value(output) => Ok(Some(output)),
            Waited::Dropped => Err(DispatchError::Closed),
            Waited::TimedOut => {
                warn!(?timeout, "No REPL result before timeout, discarding it when it arrives");
                self.stale = Some(receiver);
                Err(DispatchError::Timeout)
            }
            Waited::Closed => {
                self.slot.disarm();
                Err(DispatchError::Closed)
            }
        };

        if let Some(reply) = reply
            && reply.send(outcome).is_err()
        {
            debug!("Submitter stopped waiting for its result");
        }
        Ok(())
    }
}
