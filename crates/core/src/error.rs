//! Error taxonomy for the bridge.
//!
//! Every failure a tool call can observe is one of these variants; the
//! tool surface renders them as `kind` + `message` and never as a
//! crash or partial data (chain aggregation's per-leg tolerance is the
//! single documented exception).

use thiserror::Error;

use crate::types::OrderStatus;

/// Errors surfaced by the session, supervisor, dispatcher, and
/// aggregator layers.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Cannot establish or re-establish the gateway session.
    #[error("connection error: {0}")]
    Connection(String),

    /// Automatic reconnects are exhausted; the supervisor is in the
    /// terminal `Failed` state until manually reset.
    #[error("reconnect failed after {attempts} attempts: {reason}")]
    ReconnectFailed { attempts: u32, reason: String },

    /// Operation exceeded its deadline. The connection itself is
    /// assumed fine; a timeout is not a disconnect.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Transport fault mid-call; the connection is now reconnecting.
    /// The caller decides whether to retry, the dispatcher never does.
    #[error("{operation} hit a transport fault, connection is reconnecting: {reason}")]
    Retryable { operation: String, reason: String },

    /// Raw transport-level fault reported by a session backend. The
    /// dispatcher converts this into [`GatewayError::Retryable`] after
    /// flagging the supervisor.
    #[error("transport error: {0}")]
    Transport(String),

    /// The requested expiry is not in the resolved expiration list.
    #[error("expiry {expiry} is not available for {symbol}")]
    InvalidExpiry { symbol: String, expiry: String },

    /// No usable underlying price; the chain window cannot be placed.
    #[error("no usable underlying price for {symbol}")]
    UnderlyingPriceUnavailable { symbol: String },

    /// Cancel requested for an order already in a terminal status.
    /// A no-op for the caller, not a failure.
    #[error("order {order_id} is already terminal ({status}); cancel is a no-op")]
    AlreadyTerminal { order_id: i64, status: OrderStatus },

    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: i64 },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    /// Malformed tool arguments (bad expiry text, unknown right, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The session backend has no implementation for this operation.
    #[error("{operation} is not supported by this gateway backend")]
    Unsupported { operation: String },
}

impl GatewayError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection(reason.into())
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn retryable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Retryable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_expiry(symbol: impl Into<String>, expiry: impl Into<String>) -> Self {
        Self::InvalidExpiry {
            symbol: symbol.into(),
            expiry: expiry.into(),
        }
    }

    pub fn underlying_price_unavailable(symbol: impl Into<String>) -> Self {
        Self::UnderlyingPriceUnavailable {
            symbol: symbol.into(),
        }
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Transport-level fault that must flip the supervisor out of
    /// `Connected` before being surfaced.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the caller may reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. } | Self::Timeout { .. })
    }

    /// No-op outcomes the tool surface reports as success.
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::AlreadyTerminal { .. })
    }

    /// Stable machine-readable kind for the tool surface.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::ReconnectFailed { .. } => "connection_failed",
            Self::Timeout { .. } => "timeout",
            Self::Retryable { .. } => "retryable",
            Self::Transport(_) => "transport",
            Self::InvalidExpiry { .. } => "invalid_expiry",
            Self::UnderlyingPriceUnavailable { .. } => "underlying_price_unavailable",
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::OrderNotFound { .. } => "order_not_found",
            Self::SymbolNotFound { .. } => "symbol_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

/// Result alias used throughout the bridge.
pub type Result<T> = std::result::Result<T, GatewayError>;
