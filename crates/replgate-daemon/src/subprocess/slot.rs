//! Single-slot handoff between the dispatcher and the stdout demultiplexer.
//!
//! The REPL prints every captured value behind the same marker, so at most one
//! capturing command may be outstanding. The dispatcher arms the slot before
//! writing, the demultiplexer fills it from the next marker line.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use super::command::ReplOutput;

#[derive(Debug, Default)]
pub struct ResultSlot {
    armed: Mutex<Option<oneshot::Sender<ReplOutput>>>,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<oneshot::Sender<ReplOutput>>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expect the next marker line. A stale arming is discarded first.
    pub fn arm(&self) -> oneshot::Receiver<ReplOutput> {
        let (tx, rx) = oneshot::channel();
        if self.lock().replace(tx).is_some() {
            debug!("Discarding stale result arming");
        }
        rx
    }

    /// Stop expecting a marker line.
    pub fn disarm(&self) {
        self.lock().take();
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    /// Hand `output` to the armed waiter and disarm.
    ///
    /// Returns `false` when nothing was armed or the waiter already gave up;
    /// the value is dropped in both cases.
    pub fn deliver(&self, output: ReplOutput) -> bool {
        let Some(tx) = self.lock().take() else {
            return false;
        };
        tx.send(output).is_ok()
    }
}
