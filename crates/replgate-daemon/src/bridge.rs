//! Wires a running REPL's streams to the dispatcher, demultiplexer and relay
//! and supervises the three tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::lifecycle::{LifecycleController, LifecycleSettings};
use crate::subprocess::{
    DiagnosticRelay, DispatchError, Dispatcher, DispatcherHandle, OutputDemultiplexer,
    ProcessControl, ProcessStreams, ResultSlot, StreamError,
};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Bridge task failed: {0}")]
    Task(#[from] JoinError),
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub buffer_size: usize,
    pub quit_command: String,
    pub drain_warn_interval: Duration,
    pub late_result_window: Duration,
}

pub struct ReplBridge {
    dispatcher: DispatcherHandle,
    lifecycle: Arc<LifecycleController>,
    tasks: JoinSet<Result<(), BridgeError>>,
}

impl ReplBridge {
    /// Start the bridge on a spawned REPL, echoing its output to ours.
    pub fn start(
        streams: ProcessStreams,
        control: Arc<dyn ProcessControl>,
        settings: &BridgeSettings,
    ) -> Self {
        Self::start_with(
            streams.stdin,
            streams.stdout,
            streams.stderr,
            tokio::io::stdout(),
            tokio::io::stderr(),
            control,
            settings,
        )
    }

    /// Start the bridge on arbitrary streams and echo sinks.
    pub fn start_with<I, O, E, SO, SE>(
        stdin: I,
        stdout: O,
        stderr: E,
        stdout_sink: SO,
        stderr_sink: SE,
        control: Arc<dyn ProcessControl>,
        settings: &BridgeSettings,
    ) -> Self
    where
        I: AsyncWrite + Unpin + Send + 'static,
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
        SO: AsyncWrite + Unpin + Send + 'static,
        SE: AsyncWrite + Unpin + Send + 'static,
    {
        let slot = Arc::new(ResultSlot::new());
        let close = CancellationToken::new();
        let (dispatcher, handle) = Dispatcher::new(stdin, Arc::clone(&slot), close.clone());
        let dispatcher = dispatcher.with_late_result_window(settings.late_result_window);
        let demux = OutputDemultiplexer::new(slot, stdout_sink, settings.buffer_size);
        let relay = DiagnosticRelay::new(stderr_sink, settings.buffer_size);

        let mut tasks = JoinSet::new();
        tasks.spawn(async move { dispatcher.run().await.map_err(BridgeError::from) });
        tasks.spawn(async move { demux.run(stdout).await.map_err(BridgeError::from) });
        tasks.spawn(async move { relay.run(stderr).await.map_err(BridgeError::from) });

        let lifecycle = Arc::new(LifecycleController::new(
            handle.clone(),
            control,
            close,
            LifecycleSettings {
                quit_command: settings.quit_command.clone(),
                drain_warn_interval: settings.drain_warn_interval,
            },
        ));

        info!(buffer_size = settings.buffer_size, "REPL bridge started");
        Self {
            dispatcher: handle,
            lifecycle,
            tasks,
        }
    }

    pub fn dispatcher(&self) -> DispatcherHandle {
        self.dispatcher.clone()
    }

    pub fn lifecycle(&self) -> Arc<LifecycleController> {
        Arc::clone(&self.lifecycle)
    }

    /// Wait for the bridge tasks. Returns early with the first fatal error;
    /// returns `Ok` once every stream has ended normally.
    pub async fn supervise(&mut self) -> Result<(), BridgeError> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined.map_err(BridgeError::from).and_then(|r| r) {
                error!(error = %e, "REPL bridge failed");
                return Err(e);
            }
        }
        info!("REPL bridge streams ended");
        Ok(())
    }
}
