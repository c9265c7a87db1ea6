//! Core types, errors, and configuration for the IBKR MCP bridge.
//!
//! Everything here is shared by the gateway session layer, the request
//! orchestration layer, and the tool surface binary. No I/O lives in
//! this crate.

pub mod config;
pub mod error;
pub mod types;

pub use error::{GatewayError, Result};
