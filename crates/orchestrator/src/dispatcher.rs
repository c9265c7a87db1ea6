//! The request dispatcher.
//!
//! Executes one logical operation against the supervised session:
//! ensure connected, issue the call, await the result under the
//! operation's deadline. A timeout is surfaced as such and leaves the
//! connection alone (a slow gateway is not a dead one); a transport
//! fault flips the supervisor to reconnecting and surfaces a
//! retryable outcome — the dispatcher itself never retries a call,
//! that decision belongs to the tool surface.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::debug;

use ibkr_mcp_core::config::TimeoutSettings;
use ibkr_mcp_core::types::{
    AccountSummary, ConnectionStatus, Execution, Greeks, OptionContractKey, Order, Position,
    Quote, Trade,
};
use ibkr_mcp_core::{GatewayError, Result};
use ibkr_mcp_gateway::{ConnectionSupervisor, GatewaySession};

pub struct RequestDispatcher<S: GatewaySession> {
    supervisor: Arc<ConnectionSupervisor<S>>,
    timeouts: TimeoutSettings,
}

impl<S: GatewaySession> RequestDispatcher<S> {
    pub fn new(supervisor: Arc<ConnectionSupervisor<S>>, timeouts: TimeoutSettings) -> Self {
        Self {
            supervisor,
            timeouts,
        }
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor<S>> {
        &self.supervisor
    }

    /// Run one operation with the standard connect/deadline/transport
    /// handling. The operation future is not polled until the session
    /// is known to be connected, so no call is ever dispatched against
    /// a stale handle.
    pub(crate) async fn execute<T, F>(
        &self,
        operation: &'static str,
        deadline: Duration,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.supervisor.ensure_connected().await?;

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if err.is_transport() => {
                let reason = err.to_string();
                self.supervisor.mark_connection_lost(&reason);
                Err(GatewayError::retryable(operation, reason))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                // The abandoned future is dropped here; any late reply
                // the session still produces has no receiver and is
                // discarded without touching shared state.
                debug!(operation, "deadline elapsed, connection left untouched");
                Err(GatewayError::timeout(operation, deadline.as_millis() as u64))
            }
        }
    }

    pub async fn portfolio(&self) -> Result<Vec<Position>> {
        let session = self.supervisor.session();
        self.execute("get_portfolio", self.timeouts.account(), session.portfolio())
            .await
    }

    pub async fn account_summary(&self) -> Result<AccountSummary> {
        let session = self.supervisor.session();
        self.execute(
            "get_account_summary",
            self.timeouts.account(),
            session.account_summary(),
        )
        .await
    }

    pub async fn stock_price(&self, symbol: &str, exchange: &str) -> Result<Quote> {
        let session = self.supervisor.session();
        self.execute(
            "get_stock_price",
            self.timeouts.market_data(),
            session.stock_quote(symbol, exchange),
        )
        .await
    }

    pub async fn option_price(&self, contract: &OptionContractKey) -> Result<(Quote, Greeks)> {
        let session = self.supervisor.session();
        self.execute(
            "get_option_price",
            self.timeouts.market_data(),
            session.option_quote(contract),
        )
        .await
    }

    pub async fn option_expirations(
        &self,
        symbol: &str,
        exchange: &str,
    ) -> Result<Vec<NaiveDate>> {
        let session = self.supervisor.session();
        self.execute(
            "get_option_expirations",
            self.timeouts.market_data(),
            session.option_expirations(symbol, exchange),
        )
        .await
    }

    /// All orders, or only the open ones. The open view is a strict
    /// filter of the full list, never a separate gateway query.
    pub async fn orders(&self, include_inactive: bool) -> Result<Vec<Order>> {
        let session = self.supervisor.session();
        let mut orders = self
            .execute("get_orders", self.timeouts.orders(), session.orders())
            .await?;
        if !include_inactive {
            orders.retain(|order| order.status.is_open());
        }
        Ok(orders)
    }

    pub async fn trades(&self) -> Result<Vec<Trade>> {
        let session = self.supervisor.session();
        self.execute("get_trades", self.timeouts.orders(), session.trades())
            .await
    }

    pub async fn executions(&self) -> Result<Vec<Execution>> {
        let session = self.supervisor.session();
        self.execute(
            "get_executions",
            self.timeouts.orders(),
            session.executions(),
        )
        .await
    }

    /// Cancel an order. Unknown ids fail with `OrderNotFound`; orders
    /// already in a terminal status report `AlreadyTerminal`, a no-op
    /// that leaves the order untouched.
    pub async fn cancel_order(&self, order_id: i64) -> Result<()> {
        let session = self.supervisor.session();
        let orders = self
            .execute("cancel_order", self.timeouts.orders(), session.orders())
            .await?;

        let Some(order) = orders.iter().find(|o| o.order_id == order_id) else {
            return Err(GatewayError::OrderNotFound { order_id });
        };
        if !order.status.is_cancellable() {
            return Err(GatewayError::AlreadyTerminal {
                order_id,
                status: order.status,
            });
        }

        self.execute(
            "cancel_order",
            self.timeouts.orders(),
            session.cancel_order(order_id),
        )
        .await
    }

    /// Read-only health report; no gateway traffic, no side effects.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.supervisor.status()
    }

    pub(crate) fn timeouts(&self) -> &TimeoutSettings {
        &self.timeouts
    }
}
