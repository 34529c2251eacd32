//! REPL lifecycle: kill, reload and external termination.
//!
//! Kill and reload first drain the REPL by submitting the quit command and
//! waiting for its value, so that value can never be handed to a later
//! request. Kill then closes stdin and lets the REPL exit on end of input;
//! reload signals the REPL and pings it so it notices the signal. External
//! termination closes stdin immediately without draining.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::subprocess::{
    Command, ControlSignal, DispatchError, DispatcherHandle, ProcessControl, ProcessError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Draining,
    ReloadPending,
    Terminating,
    Terminated,
}

impl SessionState {
    pub const fn is_stopping(self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Code that releases the REPL's runtime resources.
    pub quit_command: String,
    /// How often a slow drain is reported while waiting for the quit value.
    pub drain_warn_interval: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            quit_command: "Server.quitAll;".to_string(),
            drain_warn_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("REPL is not running ({0:?})")]
    NotRunning(SessionState),

    #[error("Failed to drain REPL: {0}")]
    Drain(#[from] DispatchError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

pub struct LifecycleController {
    dispatcher: DispatcherHandle,
    control: Arc<dyn ProcessControl>,
    close: CancellationToken,
    state: watch::Sender<SessionState>,
    // Serialises kill and reload against each other.
    transition: Mutex<()>,
    settings: LifecycleSettings,
}

impl LifecycleController {
    pub fn new(
        dispatcher: DispatcherHandle,
        control: Arc<dyn ProcessControl>,
        close: CancellationToken,
        settings: LifecycleSettings,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Running);
        Self {
            dispatcher,
            control,
            close,
            state,
            transition: Mutex::new(()),
            settings,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Move to `next`. Once stopping, only `Terminated` is accepted.
    fn advance(&self, next: SessionState) -> bool {
        let mut from = next;
        let changed = self.state.send_if_modified(|state| {
            if *state == next || (state.is_stopping() && next != SessionState::Terminated) {
                return false;
            }
            from = *state;
            *state = next;
            true
        });
        if changed {
            info!(?from, to = ?next, "REPL lifecycle transition");
        }
        changed
    }

    fn ensure_running(&self) -> Result<(), LifecycleError> {
        match self.state() {
            SessionState::Running => Ok(()),
            other => Err(LifecycleError::NotRunning(other)),
        }
    }

    /// Submit the quit command and wait for its value.
    ///
    /// There is no deadline: the value must be consumed before input is closed
    /// or the slot re-armed. A warning is logged every `drain_warn_interval`.
    /// Only closing the dispatcher ends the wait early.
    async fn drain(&self) -> Result<(), DispatchError> {
        let quit = Command::eval(self.settings.quit_command.clone());
        let interval = self.settings.drain_warn_interval;
        let submitted = self.dispatcher.submit_untimed(quit);
        tokio::pin!(submitted);

        let mut waited = Duration::ZERO;
        let output = loop {
            match tokio::time::timeout(interval, &mut submitted).await {
                Ok(result) => break result?,
                Err(_) => {
                    waited += interval;
                    warn!(?waited, "Still waiting for the quit command's value");
                }
            }
        };
        debug!(?output, "REPL drained");
        Ok(())
    }

    /// Drain the REPL, then close its input so it exits on its own.
    pub async fn kill(&self) -> Result<(), LifecycleError> {
        let _guard = self.transition.lock().await;
        self.ensure_running()?;

        info!("Killing REPL");
        self.advance(SessionState::Draining);
        let drained = self.drain().await;
        self.advance(SessionState::Terminating);
        self.close.cancel();
        drained.map_err(LifecycleError::from)
    }

    /// Drain the REPL, signal it to reinitialise and ping it so it notices.
    pub async fn reload(&self) -> Result<(), LifecycleError> {
        let _guard = self.transition.lock().await;
        self.ensure_running()?;

        info!("Reloading REPL");
        self.advance(SessionState::Draining);
        if let Err(e) = self.drain().await {
            self.advance(SessionState::Running);
            return Err(e.into());
        }

        self.advance(SessionState::ReloadPending);
        let result = self.signal_reload().await;
        self.advance(SessionState::Running);
        result
    }

    async fn signal_reload(&self) -> Result<(), LifecycleError> {
        self.control.signal(ControlSignal::Reload)?;
        self.dispatcher.submit_untimed(Command::ping()).await?;
        Ok(())
    }

    /// Close the REPL's input right away, skipping the drain.
    pub fn terminate(&self) {
        if self.advance(SessionState::Terminating) {
            info!("Terminating REPL without drain");
        }
        self.close.cancel();
    }

    /// Record that the REPL process has exited.
    pub fn mark_terminated(&self) {
        self.advance(SessionState::Terminated);
        self.close.cancel();
    }
}
