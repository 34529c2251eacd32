//! `replgate` Daemon
//!
//! Spawns the REPL, bridges its streams and serves queries over HTTP until
//! the REPL exits.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use replgate_core::Config;
use replgate_core::config::{apply_env_overrides, load_config, load_config_file, parse_duration};
use replgate_daemon::bridge::{BridgeSettings, ReplBridge};
use replgate_daemon::lifecycle::LifecycleController;
use replgate_daemon::server::{self, AppState, Gateway, ServerError};
use replgate_daemon::subprocess::{
    ControlSignal, ProcessControl, ProcessHandle, ProcessSignaller, SpawnConfig,
};

#[derive(Parser, Debug)]
#[command(name = "replgate")]
#[command(version, about = "Serve a long-lived REPL over HTTP")]
struct Args {
    /// Host to bind the gateway to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the gateway to
    #[arg(short, long)]
    port: Option<u16>,

    /// How long a request waits for the REPL's value (e.g. "4s", "500ms")
    #[arg(short, long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Bytes per read from the REPL's stdout and stderr
    #[arg(short, long)]
    buffer_size: Option<usize>,

    /// REPL executable
    #[arg(long)]
    repl: Option<PathBuf>,

    /// Settings file used instead of the global one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    /// Arguments passed to the REPL
    #[arg(last = true)]
    repl_args: Vec<String>,
}

impl Args {
    fn resolve_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = load_config_file(path)?;
                apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
                config
            }
            None => load_config()?,
        };

        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.server.timeout = timeout;
        }
        if let Some(buffer_size) = self.buffer_size {
            config.repl.buffer_size = buffer_size;
        }
        if let Some(repl) = &self.repl {
            config.repl.executable.clone_from(repl);
        }
        if let Some(level) = &self.log_level {
            config.server.log_level.clone_from(level);
        }
        config.repl.args.extend(self.repl_args.iter().cloned());

        config.validate()?;
        Ok(config)
    }
}

/// Why the daemon stopped waiting.
enum Stop {
    Exited(ExitStatus),
    Fatal(anyhow::Error),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.resolve_config()?;

    let level = &config.server.log_level;
    let log_filter = format!("replgate={level},replgate_daemon={level}");
    replgate_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        repl = %config.repl.executable.display(),
        timeout = ?config.server.timeout,
        "Starting replgate"
    );

    let spawn = SpawnConfig::new(config.repl.executable.clone(), config.repl.args.clone());
    let (mut process, streams) = ProcessHandle::spawn(&spawn).context("Cannot start REPL")?;
    let signaller = process.signaller();

    let mut bridge = ReplBridge::start(
        streams,
        Arc::new(signaller),
        &BridgeSettings {
            buffer_size: config.repl.buffer_size,
            quit_command: config.repl.quit_command.clone(),
            drain_warn_interval: config.repl.drain_warn_interval,
            late_result_window: config.repl.late_result_window,
        },
    );
    let lifecycle = bridge.lifecycle();

    // Dropping `process` on this error path kills the REPL.
    let listener = server::bind(&config.server.host, config.server.port).await?;
    let gateway = Arc::new(Gateway::new(
        bridge.dispatcher(),
        Arc::clone(&lifecycle),
        config.server.timeout,
    ));
    let shutdown = CancellationToken::new();
    let mut server_task: JoinHandle<Result<(), ServerError>> = tokio::spawn(server::serve(
        listener,
        AppState { gateway },
        shutdown.clone(),
    ));
    let signal_task = tokio::spawn(watch_signals(Arc::clone(&lifecycle)));

    let stop = tokio::select! {
        status = process.wait() => match status {
            Ok(status) => Stop::Exited(status),
            Err(e) => Stop::Fatal(e.into()),
        },
        supervised = bridge.supervise() => match supervised {
            Ok(()) => match process.wait().await {
                Ok(status) => Stop::Exited(status),
                Err(e) => Stop::Fatal(e.into()),
            },
            Err(e) => Stop::Fatal(e.into()),
        },
        served = &mut server_task => {
            let err = match served {
                Ok(Ok(())) => anyhow::anyhow!("Gateway stopped unexpectedly"),
                Ok(Err(e)) => e.into(),
                Err(e) => e.into(),
            };
            Stop::Fatal(err)
        }
    };

    lifecycle.mark_terminated();
    signal_task.abort();
    shutdown.cancel();

    match stop {
        Stop::Exited(status) => {
            if let Err(e) = server_task.await {
                warn!(error = %e, "Gateway task ended abnormally");
            }
            if !status.success() {
                anyhow::bail!("REPL exited abnormally: {status}");
            }
            info!("replgate stopped");
            Ok(())
        }
        Stop::Fatal(e) => {
            error!(error = %e, "Fatal error, stopping REPL");
            abort_repl(signaller, &mut process).await;
            server_task.abort();
            Err(e)
        }
    }
}

/// Stop the REPL's process group and reap it.
async fn abort_repl(signaller: ProcessSignaller, process: &mut ProcessHandle) {
    if let Err(e) = signaller.signal(ControlSignal::Terminate) {
        warn!(error = %e, "Failed to signal REPL");
    }
    if let Err(e) = process.wait().await {
        warn!(error = %e, "Failed to reap REPL");
    }
}

/// Ctrl+C or SIGTERM closes the REPL's input without draining.
async fn watch_signals(lifecycle: Arc<LifecycleController>) {
    #[cfg(unix)]
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                None
            }
        };

    #[cfg(unix)]
    let sigterm_future = async {
        match sigterm.as_mut() {
            Some(sigterm) => sigterm.recv().await,
            None => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }
    lifecycle.terminate();
}
