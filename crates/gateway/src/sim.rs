//! Simulated gateway session.
//!
//! Deterministic in-memory backend used for paper/offline mode and as
//! the shared test double: seeded market data, scripted connect
//! failures, per-contract snapshot latency, and observable call
//! counters. No wire protocol, no background threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use ibkr_mcp_core::types::{
    AccountSummary, AccountValue, Execution, Greeks, OptionContractKey, Order, OrderSide,
    OrderStatus, Position, Quote, Trade,
};
use ibkr_mcp_core::{GatewayError, Result};

use crate::session::{DisconnectEvent, GatewaySession};

#[derive(Default)]
struct SimState {
    connect_failures_remaining: u32,
    connect_delay: Duration,
    account_id: String,
    account_values: HashMap<String, AccountValue>,
    positions: Vec<Position>,
    quotes: HashMap<String, Quote>,
    option_quotes: HashMap<OptionContractKey, (Quote, Greeks)>,
    option_latency: HashMap<OptionContractKey, Duration>,
    expirations: HashMap<String, Vec<NaiveDate>>,
    ladders: HashMap<(String, NaiveDate), Vec<Decimal>>,
    orders: Vec<Order>,
    trades: Vec<Trade>,
    executions: Vec<Execution>,
    /// One-shot scripted failure for the next data call.
    fail_next: Option<GatewayError>,
}

pub struct SimGateway {
    state: Mutex<SimState>,
    connected: AtomicBool,
    connect_calls: AtomicU32,
    option_quote_calls: AtomicU32,
    disconnect_tx: broadcast::Sender<DisconnectEvent>,
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SimGateway {
    pub fn new() -> Self {
        let (disconnect_tx, _) = broadcast::channel(16);
        let mut state = SimState::default();
        state.account_id = "DU0000001".to_string();
        Self {
            state: Mutex::new(state),
            connected: AtomicBool::new(false),
            connect_calls: AtomicU32::new(0),
            option_quote_calls: AtomicU32::new(0),
            disconnect_tx,
        }
    }

    /// A populated fixture: AAPL around 225 with a 150–300 strike
    /// ladder in steps of 5, one expiry, a few orders and fills.
    pub fn demo() -> Self {
        let sim = Self::new();
        let expiry = NaiveDate::from_ymd_opt(2024, 12, 20).expect("valid date");

        sim.set_quote(Quote {
            symbol: "AAPL".to_string(),
            last: Some(Decimal::new(22500, 2)),
            bid: Some(Decimal::new(22498, 2)),
            ask: Some(Decimal::new(22502, 2)),
            volume: Some(31_254_000),
            timestamp: Utc::now(),
        });
        sim.set_expirations("AAPL", vec![expiry]);
        let ladder: Vec<Decimal> = (30..=60).map(|n| Decimal::from(n * 5)).collect();
        sim.set_ladder("AAPL", expiry, ladder.clone());
        for strike in ladder {
            for right in [
                ibkr_mcp_core::types::OptionRight::Call,
                ibkr_mcp_core::types::OptionRight::Put,
            ] {
                let key = OptionContractKey::new("AAPL", expiry, strike, right);
                let quote = Quote {
                    symbol: key.display_name(),
                    last: Some(Decimal::new(345, 2)),
                    bid: Some(Decimal::new(340, 2)),
                    ask: Some(Decimal::new(350, 2)),
                    volume: Some(120),
                    timestamp: Utc::now(),
                };
                let greeks = Greeks {
                    delta: Some(if right == ibkr_mcp_core::types::OptionRight::Call {
                        0.52
                    } else {
                        -0.48
                    }),
                    gamma: Some(0.031),
                    theta: Some(-0.085),
                    vega: Some(0.12),
                    rho: Some(0.04),
                    implied_volatility: Some(0.27),
                };
                sim.set_option_quote(key, quote, greeks);
            }
        }

        sim.set_account_value("NetLiquidation", Decimal::from(250_000), "USD");
        sim.set_account_value("TotalCashValue", Decimal::from(120_000), "USD");
        sim.set_account_value("BuyingPower", Decimal::from(480_000), "USD");
        sim.push_position(Position {
            symbol: "AAPL".to_string(),
            quantity: Decimal::from(100),
            average_cost: Decimal::new(19820, 2),
            market_price: Decimal::new(22500, 2),
            market_value: Decimal::from(22_500),
            unrealized_pnl: Decimal::new(268_000, 2),
            realized_pnl: Decimal::ZERO,
            currency: "USD".to_string(),
            account: "DU0000001".to_string(),
        });
        sim.push_order(Order {
            order_id: 1001,
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            quantity: Decimal::from(50),
            filled_quantity: Decimal::ZERO,
            limit_price: Some(Decimal::new(22000, 2)),
            stop_price: None,
            status: OrderStatus::Submitted,
        });
        sim.push_order(Order {
            order_id: 1000,
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            quantity: Decimal::from(100),
            filled_quantity: Decimal::from(100),
            limit_price: Some(Decimal::new(19850, 2)),
            stop_price: None,
            status: OrderStatus::Filled,
        });
        sim
    }

    // Scripting and seeding (shared with tests, hence `&self`).

    pub fn fail_next_connects(&self, count: u32) {
        self.lock().connect_failures_remaining = count;
    }

    pub fn clear_connect_failures(&self) {
        self.lock().connect_failures_remaining = 0;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    /// Silent connection drop: no disconnect event is delivered, the
    /// loss is only visible through `is_connected`.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Event-driven connection loss, as the live gateway surfaces it.
    pub fn emit_disconnect(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.disconnect_tx.send(DisconnectEvent {
            reason: reason.to_string(),
        });
    }

    /// Script a one-shot failure for the next data call.
    pub fn fail_next_call(&self, error: GatewayError) {
        self.lock().fail_next = Some(error);
    }

    pub fn set_quote(&self, quote: Quote) {
        self.lock().quotes.insert(quote.symbol.to_uppercase(), quote);
    }

    pub fn set_option_quote(&self, contract: OptionContractKey, quote: Quote, greeks: Greeks) {
        self.lock().option_quotes.insert(contract, (quote, greeks));
    }

    pub fn set_option_latency(&self, contract: OptionContractKey, latency: Duration) {
        self.lock().option_latency.insert(contract, latency);
    }

    pub fn set_expirations(&self, symbol: &str, expirations: Vec<NaiveDate>) {
        self.lock()
            .expirations
            .insert(symbol.to_uppercase(), expirations);
    }

    pub fn set_ladder(&self, symbol: &str, expiry: NaiveDate, strikes: Vec<Decimal>) {
        self.lock()
            .ladders
            .insert((symbol.to_uppercase(), expiry), strikes);
    }

    pub fn set_account_value(&self, tag: &str, value: Decimal, currency: &str) {
        self.lock().account_values.insert(
            tag.to_string(),
            AccountValue {
                value,
                currency: currency.to_string(),
            },
        );
    }

    pub fn push_position(&self, position: Position) {
        self.lock().positions.push(position);
    }

    pub fn push_order(&self, order: Order) {
        self.lock().orders.push(order);
    }

    pub fn push_trade(&self, trade: Trade) {
        self.lock().trades.push(trade);
    }

    pub fn push_execution(&self, execution: Execution) {
        self.lock().executions.push(execution);
    }

    pub fn order_status(&self, order_id: i64) -> Option<OrderStatus> {
        self.lock()
            .orders
            .iter()
            .find(|o| o.order_id == order_id)
            .map(|o| o.status)
    }

    // Observability for tests.

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn option_quote_calls(&self) -> u32 {
        self.option_quote_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state lock")
    }

    fn ensure_session(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::transport("session is not connected"));
        }
        if let Some(err) = self.lock().fail_next.take() {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl GatewaySession for SimGateway {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, fail) = {
            let mut state = self.lock();
            let fail = if state.connect_failures_remaining > 0 {
                state.connect_failures_remaining -= 1;
                true
            } else {
                false
            };
            (state.connect_delay, fail)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            self.connected.store(false, Ordering::SeqCst);
            return Err(GatewayError::connection("simulated connect refusal"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect_events(&self) -> broadcast::Receiver<DisconnectEvent> {
        self.disconnect_tx.subscribe()
    }

    async fn portfolio(&self) -> Result<Vec<Position>> {
        self.ensure_session()?;
        Ok(self.lock().positions.clone())
    }

    async fn account_summary(&self) -> Result<AccountSummary> {
        self.ensure_session()?;
        let state = self.lock();
        Ok(AccountSummary {
            account_id: state.account_id.clone(),
            values: state
                .account_values
                .iter()
                .map(|(tag, value)| (tag.clone(), value.clone()))
                .collect(),
            timestamp: Utc::now(),
        })
    }

    async fn stock_quote(&self, symbol: &str, _exchange: &str) -> Result<Quote> {
        self.ensure_session()?;
        self.lock()
            .quotes
            .get(&symbol.to_uppercase())
            .cloned()
            .ok_or_else(|| GatewayError::SymbolNotFound {
                symbol: symbol.to_uppercase(),
            })
    }

    async fn option_quote(&self, contract: &OptionContractKey) -> Result<(Quote, Greeks)> {
        self.option_quote_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_session()?;
        let (latency, snapshot) = {
            let state = self.lock();
            (
                state.option_latency.get(contract).copied(),
                state.option_quotes.get(contract).cloned(),
            )
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        snapshot.ok_or_else(|| {
            GatewayError::transport(format!("no market data for {}", contract.display_name()))
        })
    }

    async fn option_expirations(&self, symbol: &str, _exchange: &str) -> Result<Vec<NaiveDate>> {
        self.ensure_session()?;
        let mut expirations = self
            .lock()
            .expirations
            .get(&symbol.to_uppercase())
            .cloned()
            .unwrap_or_default();
        expirations.sort();
        Ok(expirations)
    }

    async fn strike_ladder(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        _exchange: &str,
    ) -> Result<Vec<Decimal>> {
        self.ensure_session()?;
        let mut strikes = self
            .lock()
            .ladders
            .get(&(symbol.to_uppercase(), expiry))
            .cloned()
            .unwrap_or_default();
        strikes.sort();
        Ok(strikes)
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        self.ensure_session()?;
        Ok(self.lock().orders.clone())
    }

    async fn trades(&self) -> Result<Vec<Trade>> {
        self.ensure_session()?;
        Ok(self.lock().trades.clone())
    }

    async fn executions(&self) -> Result<Vec<Execution>> {
        self.ensure_session()?;
        Ok(self.lock().executions.clone())
    }

    async fn cancel_order(&self, order_id: i64) -> Result<()> {
        self.ensure_session()?;
        let mut state = self.lock();
        let Some(order) = state.orders.iter_mut().find(|o| o.order_id == order_id) else {
            return Err(GatewayError::OrderNotFound { order_id });
        };
        // Idempotent at the gateway: re-cancel of a terminal order is
        // accepted and changes nothing.
        if order.status.is_cancellable() {
            order.status = OrderStatus::Cancelled;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibkr_mcp_core::types::OptionRight;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn calls_require_a_connection() {
        let sim = SimGateway::new();
        let err = sim.portfolio().await.unwrap_err();
        assert!(err.is_transport());

        sim.connect().await.unwrap();
        assert!(sim.portfolio().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scripted_failure_fires_once() {
        let sim = SimGateway::new();
        sim.connect().await.unwrap();
        sim.fail_next_call(GatewayError::transport("flaky wire"));
        assert!(sim.orders().await.is_err());
        assert!(sim.orders().await.is_ok());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let sim = SimGateway::demo();
        sim.connect().await.unwrap();
        sim.cancel_order(1001).await.unwrap();
        assert_eq!(sim.order_status(1001), Some(OrderStatus::Cancelled));
        // Re-cancel of the now-cancelled order never raises.
        sim.cancel_order(1001).await.unwrap();
        assert_eq!(sim.order_status(1001), Some(OrderStatus::Cancelled));
    }

    #[tokio::test]
    async fn demo_fixture_is_coherent() {
        let sim = SimGateway::demo();
        sim.connect().await.unwrap();

        let quote = sim.stock_quote("aapl", "SMART").await.unwrap();
        assert_eq!(quote.usable_price(), Some(dec!(225.00)));

        let expiry = NaiveDate::from_ymd_opt(2024, 12, 20).unwrap();
        let ladder = sim.strike_ladder("AAPL", expiry, "SMART").await.unwrap();
        assert_eq!(ladder.first(), Some(&dec!(150)));
        assert_eq!(ladder.last(), Some(&dec!(300)));
        assert_eq!(ladder.len(), 31);

        let key = OptionContractKey::new("AAPL", expiry, dec!(225), OptionRight::Call);
        let (_, greeks) = sim.option_quote(&key).await.unwrap();
        assert!(!greeks.is_empty());
    }
}
