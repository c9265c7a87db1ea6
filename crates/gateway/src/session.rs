//! The gateway session capability trait.
//!
//! One implementor wraps one connection to the brokerage endpoint.
//! Every call is a suspension point pending the gateway's asynchronous
//! reply; backends convert their event-driven callback model into
//! these await-style contracts internally.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use ibkr_mcp_core::types::{
    AccountSummary, Execution, Greeks, OptionContractKey, Order, Position, Quote, Trade,
};
use ibkr_mcp_core::Result;

/// Connection-loss notification surfaced by a session backend.
#[derive(Debug, Clone)]
pub struct DisconnectEvent {
    pub reason: String,
}

/// Capability surface of one brokerage gateway connection.
///
/// Snapshots are regenerated per call; the session owns orders,
/// trades, and executions — this layer reads them and may submit a
/// cancel, nothing else. Transport faults are reported as
/// `GatewayError::Transport` so the supervisor can leave `Connected`.
#[async_trait]
pub trait GatewaySession: Send + Sync + 'static {
    /// Establish the connection. Called again with a fresh transport
    /// for every reconnect attempt.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Subscribe to asynchronous connection-loss notifications.
    fn disconnect_events(&self) -> broadcast::Receiver<DisconnectEvent>;

    async fn portfolio(&self) -> Result<Vec<Position>>;

    async fn account_summary(&self) -> Result<AccountSummary>;

    async fn stock_quote(&self, symbol: &str, exchange: &str) -> Result<Quote>;

    /// Quote plus Greeks snapshot for one option contract.
    async fn option_quote(&self, contract: &OptionContractKey) -> Result<(Quote, Greeks)>;

    /// Available option expiries for an underlying, ascending.
    async fn option_expirations(&self, symbol: &str, exchange: &str) -> Result<Vec<NaiveDate>>;

    /// Full strike ladder for (symbol, expiry), ascending.
    async fn strike_ladder(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        exchange: &str,
    ) -> Result<Vec<Decimal>>;

    /// All orders known to the session, terminal ones included.
    async fn orders(&self) -> Result<Vec<Order>>;

    async fn trades(&self) -> Result<Vec<Trade>>;

    async fn executions(&self) -> Result<Vec<Execution>>;

    /// Submit a cancel for an order. Idempotent at the gateway: a
    /// re-cancel of an already cancelled order must not error.
    async fn cancel_order(&self, order_id: i64) -> Result<()>;
}
