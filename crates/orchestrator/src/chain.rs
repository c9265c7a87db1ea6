//! Option-chain aggregation.
//!
//! One chain call fans out into many per-contract Greeks snapshots.
//! The preconditions fail fast — no usable underlying price or an
//! unknown expiry aborts the whole request before any leg is issued —
//! but individual legs are best-effort: a timed-out or partial
//! snapshot keeps its contract identity in the chain with the missing
//! fields null. That asymmetry is deliberate; this is the one place
//! degraded data is preferred over no data.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use tracing::{debug, info};

use ibkr_mcp_core::types::{
    format_expiry, ChainEntry, Greeks, OptionChain, OptionContractKey, OptionRight,
};
use ibkr_mcp_core::{GatewayError, Result};
use ibkr_mcp_gateway::GatewaySession;

use crate::dispatcher::RequestDispatcher;

pub struct ChainAggregator<S: GatewaySession> {
    dispatcher: Arc<RequestDispatcher<S>>,
}

impl<S: GatewaySession> ChainAggregator<S> {
    pub fn new(dispatcher: Arc<RequestDispatcher<S>>) -> Self {
        Self { dispatcher }
    }

    /// Aggregate the chain for (symbol, expiry): the `strike_count`
    /// strikes nearest the live underlying price, both rights, sorted
    /// ascending by strike with calls before puts.
    pub async fn option_chain(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        strike_count: usize,
        exchange: &str,
    ) -> Result<OptionChain> {
        let symbol = symbol.to_uppercase();
        if strike_count == 0 {
            return Err(GatewayError::invalid_request("strike_count must be positive"));
        }

        // 1. Underlying price gate. Never guess a window.
        let underlying = self.dispatcher.stock_price(&symbol, exchange).await?;
        let Some(price) = underlying.usable_price() else {
            return Err(GatewayError::underlying_price_unavailable(&symbol));
        };

        // 2. Expiry must exist before a single leg goes out.
        let expirations = self
            .dispatcher
            .option_expirations(&symbol, exchange)
            .await?;
        if !expirations.contains(&expiry) {
            return Err(GatewayError::invalid_expiry(&symbol, format_expiry(expiry)));
        }

        // 3. Strike window around at-the-money.
        let session = self.dispatcher.supervisor().session();
        let ladder = self
            .dispatcher
            .execute(
                "strike_ladder",
                self.dispatcher.timeouts().market_data(),
                session.strike_ladder(&symbol, expiry, exchange),
            )
            .await?;
        if ladder.is_empty() {
            return Err(GatewayError::invalid_expiry(&symbol, format_expiry(expiry)));
        }
        let window = select_strike_window(&ladder, price, strike_count);
        debug!(
            symbol = %symbol,
            price = %price,
            strikes = window.len(),
            "selected strike window"
        );

        // 4. Concurrent Greeks snapshots, bounded in flight, each with
        //    its own deadline.
        let leg_timeout = self.dispatcher.timeouts().chain_leg();
        // A zero limit would stall the stream forever; always admit at
        // least one leg.
        let max_inflight = self.dispatcher.timeouts().max_inflight_legs.max(1);
        let symbol_ref = &symbol;
        let contracts = window.iter().flat_map(|&strike| {
            [OptionRight::Call, OptionRight::Put]
                .into_iter()
                .map(move |right| OptionContractKey::new(symbol_ref, expiry, strike, right))
        });

        let mut entries: Vec<ChainEntry> = stream::iter(contracts.map(|contract| {
            let session = Arc::clone(session);
            async move {
                match tokio::time::timeout(leg_timeout, session.option_quote(&contract)).await {
                    Ok(Ok((quote, greeks))) => ChainEntry {
                        contract,
                        quote: Some(quote),
                        greeks,
                    },
                    Ok(Err(err)) => {
                        debug!(contract = %contract.display_name(), error = %err, "chain leg failed");
                        ChainEntry {
                            contract,
                            quote: None,
                            greeks: Greeks::default(),
                        }
                    }
                    Err(_) => {
                        debug!(contract = %contract.display_name(), "chain leg timed out");
                        ChainEntry {
                            contract,
                            quote: None,
                            greeks: Greeks::default(),
                        }
                    }
                }
            }
        }))
        .buffer_unordered(max_inflight)
        .collect()
        .await;

        // 5. Merge by contract key, not completion order.
        entries.sort_by(|a, b| {
            a.contract
                .strike
                .cmp(&b.contract.strike)
                .then(a.contract.right.cmp(&b.contract.right))
        });

        info!(
            symbol = %symbol,
            expiry = %expiry,
            entries = entries.len(),
            "option chain aggregated"
        );
        Ok(OptionChain {
            symbol,
            expiry,
            underlying_price: price,
            entries,
            timestamp: Utc::now(),
        })
    }
}

/// The `count` strikes nearest `price`, ties broken toward the lower
/// strike, returned ascending. Fewer than `count` near ladder edges.
fn select_strike_window(ladder: &[Decimal], price: Decimal, count: usize) -> Vec<Decimal> {
    let mut strikes: Vec<Decimal> = ladder.to_vec();
    strikes.sort();
    strikes.dedup();

    strikes.sort_by(|a, b| {
        let da = (*a - price).abs();
        let db = (*b - price).abs();
        da.cmp(&db).then(a.cmp(b))
    });
    strikes.truncate(count);
    strikes.sort();
    strikes
}
