//! `replgate` Daemon Library
//!
//! Runs one REPL subprocess and serves it over HTTP:
//! - Subprocess spawn, stdin dispatch and stdout/stderr demultiplexing
//! - Kill, reload and termination of the REPL
//! - Supervision of the stream tasks
//! - HTTP gateway translating queries into REPL commands

pub mod bridge;
pub mod lifecycle;
pub mod server;
pub mod subprocess;

#[cfg(test)]
mod test_support;
