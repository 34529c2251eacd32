//! REPL subprocess bridge: process handle, stdin dispatcher, stdout
//! demultiplexer and stderr relay.

pub mod command;
pub mod demux;
pub mod dispatcher;
pub mod process;
pub mod relay;
pub mod slot;

pub use command::{Command, ExecMode, ReplOutput};
pub use demux::{OutputDemultiplexer, StreamError};
pub use dispatcher::{
    DEFAULT_LATE_RESULT_WINDOW, DispatchError, DispatchResult, Dispatcher, DispatcherHandle,
};
pub use process::{
    ControlSignal, ProcessControl, ProcessError, ProcessHandle, ProcessSignaller, ProcessStreams,
    SpawnConfig,
};
pub use relay::DiagnosticRelay;
pub use slot::ResultSlot;
