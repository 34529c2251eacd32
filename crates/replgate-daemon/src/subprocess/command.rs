//! Commands written to the REPL and the values it prints back.

use replgate_core::Query;

/// Control byte appended after the code text.
///
/// These are the only two terminators the REPL recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Execute the accumulated input.
    SilentExecute,
    /// Execute the accumulated input and print the resulting value.
    ExecuteAndCapture,
}

impl ExecMode {
    /// The byte the REPL expects for this mode.
    pub const fn terminator(self) -> u8 {
        match self {
            Self::SilentExecute => 0x1b,
            Self::ExecuteAndCapture => 0x0c,
        }
    }
}

/// One unit of work for the REPL. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub code: String,
    pub wants_result: bool,
    pub kill: bool,
    pub reload: bool,
}

impl Command {
    /// Evaluate `code` and capture the printed value.
    pub fn eval(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            wants_result: true,
            kill: false,
            reload: false,
        }
    }

    /// Evaluate `code` without capturing anything.
    pub fn run(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            wants_result: false,
            kill: false,
            reload: false,
        }
    }

    /// Empty silent command. Makes the REPL notice a pending reload signal.
    pub fn ping() -> Self {
        Self::run(String::new())
    }

    pub const fn mode(&self) -> ExecMode {
        if self.wants_result {
            ExecMode::ExecuteAndCapture
        } else {
            ExecMode::SilentExecute
        }
    }

    /// Bytes written to the REPL's stdin: the code followed by its terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.code.len() + 1);
        bytes.extend_from_slice(self.code.as_bytes());
        bytes.push(self.mode().terminator());
        bytes
    }
}

impl From<Query> for Command {
    fn from(query: Query) -> Self {
        Self {
            code: query.code,
            wants_result: query.stdout,
            kill: query.kill,
            reload: query.reload,
        }
    }
}

/// Value extracted from a marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplOutput {
    /// Payload of a success marker line, prefix stripped.
    Value(String),
    /// A whole error marker line, prefix included.
    Error(String),
}

impl ReplOutput {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Value(s) | Self::Error(s) => s,
        }
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}
