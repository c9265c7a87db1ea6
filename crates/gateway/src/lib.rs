//! Gateway session layer for the IBKR MCP bridge.
//!
//! Defines the [`session::GatewaySession`] capability trait the
//! orchestration layer is written against, the
//! [`supervisor::ConnectionSupervisor`] owning connection lifecycle
//! and the process-wide session state, the live ibapi binding, and a
//! deterministic simulated backend for paper/offline mode and tests.

pub mod ib;
pub mod reconnect;
pub mod session;
pub mod sim;
pub mod supervisor;

pub use session::{DisconnectEvent, GatewaySession};
pub use supervisor::ConnectionSupervisor;
