//! Translates decoded queries into dispatcher commands and lifecycle
//! transitions.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use replgate_core::Query;

use crate::lifecycle::{LifecycleController, LifecycleError};
use crate::subprocess::{Command, DispatchError, DispatcherHandle, ReplOutput};

/// What the gateway hands back for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The captured value or error line.
    Output(ReplOutput),
    /// Nothing was requested back.
    Ack,
    /// The value did not arrive in time.
    Timeout,
}

impl Reply {
    pub fn body(&self) -> &str {
        match self {
            Self::Output(output) => output.as_str(),
            Self::Ack => "",
            Self::Timeout => "Timeout",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("REPL is shutting down")]
    Unavailable,

    #[error(transparent)]
    Dispatch(DispatchError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub struct Gateway {
    dispatcher: DispatcherHandle,
    lifecycle: Arc<LifecycleController>,
    result_timeout: Duration,
}

impl Gateway {
    pub const fn new(
        dispatcher: DispatcherHandle,
        lifecycle: Arc<LifecycleController>,
        result_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            lifecycle,
            result_timeout,
        }
    }

    /// Run one query: submit its code, then kill or reload if asked.
    ///
    /// A timeout on the value still lets the kill or reload go ahead.
    pub async fn handle(&self, query: Query) -> Result<Reply, GatewayError> {
        if self.lifecycle.state().is_stopping() {
            return Err(GatewayError::Unavailable);
        }

        let command = Command::from(query);
        let (kill, reload) = (command.kill, command.reload);

        let reply = match self.dispatcher.submit(command, self.result_timeout).await {
            Ok(Some(output)) => Reply::Output(output),
            Ok(None) => Reply::Ack,
            Err(DispatchError::Timeout) => {
                warn!(timeout = ?self.result_timeout, "Request timed out waiting for REPL");
                Reply::Timeout
            }
            Err(DispatchError::Closed) => return Err(GatewayError::Unavailable),
            Err(e) => return Err(GatewayError::Dispatch(e)),
        };

        if kill {
            self.lifecycle.kill().await?;
            info!("REPL killed on request");
        } else if reload {
            self.lifecycle.reload().await?;
            info!("REPL reloaded on request");
        }
        Ok(reply)
    }
}
