//! Query accepted by the gateway.
//!
//! Field names are part of the wire contract and stay capitalised. Decoding
//! also accepts the lower-case spelling and treats every field as optional.

use serde::{Deserialize, Serialize};

/// A single request for the REPL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Source code passed verbatim to the REPL.
    #[serde(rename = "Code", alias = "code")]
    pub code: String,
    /// When true the evaluated value is captured and returned.
    #[serde(rename = "Stdout", alias = "stdout")]
    pub stdout: bool,
    /// When true the REPL is drained and its input closed.
    #[serde(rename = "Kill", alias = "kill")]
    pub kill: bool,
    /// When true the REPL is drained and asked to reinitialise.
    #[serde(rename = "Reload", alias = "reload")]
    pub reload: bool,
}

impl Query {
    /// Query that evaluates `code` and asks for its printed value.
    pub fn eval(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stdout: true,
            ..Self::default()
        }
    }

    /// Query that runs `code` without waiting for a value.
    pub fn run(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }
}
