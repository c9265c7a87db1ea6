//! Domain types shared across the bridge.
//!
//! All market snapshots are regenerated per call; nothing here is
//! cached. Prices and quantities use `Decimal`, Greeks stay `f64`
//! (sensitivities, not money).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Connection lifecycle state. Exactly one instance exists per
/// process, owned and mutated only by the connection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal until an explicit manual reconnect resets the counter.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Read-only health report for `get_connection_status`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub state: SessionState,
    pub last_error: Option<String>,
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub paper: bool,
    pub timestamp: DateTime<Utc>,
}

/// Option right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

impl std::str::FromStr for OptionRight {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "C" | "CALL" => Ok(Self::Call),
            "P" | "PUT" => Ok(Self::Put),
            other => Err(GatewayError::invalid_request(format!(
                "option right must be 'C' or 'P', got '{other}'"
            ))),
        }
    }
}

/// Immutable identity of one option contract. Used to correlate a
/// requested contract with its returned snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionContractKey {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub right: OptionRight,
}

impl OptionContractKey {
    pub fn new(symbol: &str, expiry: NaiveDate, strike: Decimal, right: OptionRight) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            expiry,
            strike,
            right,
        }
    }

    /// Local symbol style description, e.g. "AAPL 20241220 225 C".
    pub fn display_name(&self) -> String {
        format!(
            "{} {} {} {}",
            self.symbol,
            format_expiry(self.expiry),
            self.strike,
            self.right
        )
    }
}

/// Parse a strict 8-digit `YYYYMMDD` expiry as used on the tool surface.
pub fn parse_expiry(text: &str) -> Result<NaiveDate, GatewayError> {
    if text.len() != 8 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GatewayError::invalid_request(format!(
            "expiry must be 8 digits YYYYMMDD, got '{text}'"
        )));
    }
    NaiveDate::parse_from_str(text, "%Y%m%d")
        .map_err(|_| GatewayError::invalid_request(format!("'{text}' is not a calendar date")))
}

/// Render an expiry back to the 8-digit wire form.
pub fn format_expiry(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Market data snapshot. Fields are independently nullable: delayed or
/// entitlement-limited feeds routinely omit bid/ask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub volume: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Best usable price: positive last, else bid/ask midpoint.
    /// Zero counts as unavailable (delayed feeds report 0 for "none").
    pub fn usable_price(&self) -> Option<Decimal> {
        if let Some(last) = self.last {
            if last > Decimal::ZERO {
                return Some(last);
            }
        }
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid > Decimal::ZERO && ask > Decimal::ZERO => {
                Some((bid + ask) / Decimal::TWO)
            }
            _ => None,
        }
    }
}

/// Option sensitivities, each independently nullable since market data
/// can be partial.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,
    pub implied_volatility: Option<f64>,
}

impl Greeks {
    pub fn is_empty(&self) -> bool {
        self.delta.is_none()
            && self.gamma.is_none()
            && self.theta.is_none()
            && self.vega.is_none()
            && self.rho.is_none()
            && self.implied_volatility.is_none()
    }
}

/// One entry of an aggregated chain. Identity is always present; quote
/// and Greeks are whatever the snapshot delivered before its deadline.
#[derive(Debug, Clone, Serialize)]
pub struct ChainEntry {
    pub contract: OptionContractKey,
    pub quote: Option<Quote>,
    pub greeks: Greeks,
}

/// Aggregated option chain, ascending strike, call before put.
#[derive(Debug, Clone, Serialize)]
pub struct OptionChain {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub underlying_price: Decimal,
    pub entries: Vec<ChainEntry>,
    pub timestamp: DateTime<Utc>,
}

/// A single portfolio position snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub market_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub currency: String,
    pub account: String,
}

/// One account metric with its currency tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountValue {
    pub value: Decimal,
    pub currency: String,
}

/// Account summary as a tag → value map (NetLiquidation,
/// TotalCashValue, BuyingPower, ...), regenerated on each call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub values: BTreeMap<String, AccountValue>,
    pub timestamp: DateTime<Utc>,
}

impl AccountSummary {
    pub fn get(&self, tag: &str) -> Option<Decimal> {
        self.values.get(tag).map(|v| v.value)
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Gateway order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingSubmit,
    PreSubmitted,
    Submitted,
    Filled,
    Cancelled,
    Inactive,
}

impl OrderStatus {
    /// Open orders: everything not filled, cancelled, or inactive.
    pub fn is_open(self) -> bool {
        !matches!(self, Self::Filled | Self::Cancelled | Self::Inactive)
    }

    /// Whether a cancel request makes sense for this status.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::PendingSubmit | Self::PreSubmitted | Self::Submitted)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingSubmit => "pending_submit",
            Self::PreSubmitted => "pre_submitted",
            Self::Submitted => "submitted",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Inactive => "inactive",
        };
        write!(f, "{s}")
    }
}

/// Order snapshot owned by the brokerage session; this layer only
/// reads it and optionally submits a cancel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
}

impl Order {
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }
}

/// One fill against an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub exec_id: String,
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub realized_pnl: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// An order together with its executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub executions: Vec<Execution>,
}

impl Trade {
    pub fn total_commission(&self) -> Decimal {
        self.executions.iter().map(|e| e.commission).sum()
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.executions.iter().map(|e| e.realized_pnl).sum()
    }
}
