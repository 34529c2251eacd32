//! `replgate` Client Library
//!
//! Sends queries to a running `replgate` gateway.

pub mod client;

pub use client::{ClientError, ClientOptions, ReplClient};
