//! `replgate` Core Library
//!
//! Shared functionality for `replgate` components:
//! - The JSON query accepted by the gateway
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod query;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use query::Query;
