//! Request orchestration for the IBKR MCP bridge.
//!
//! Converts single stateless tool invocations into awaited gateway
//! operations: the [`dispatcher::RequestDispatcher`] runs one logical
//! operation under a deadline against a supervised connection, and the
//! [`chain::ChainAggregator`] merges concurrent per-contract Greeks
//! snapshots into one ordered option chain.

pub mod chain;
pub mod dispatcher;

pub use chain::ChainAggregator;
pub use dispatcher::RequestDispatcher;
