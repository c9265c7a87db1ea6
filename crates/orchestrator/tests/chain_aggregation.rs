//! End-to-end chain aggregation against the simulated gateway.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use ibkr_mcp_core::config::BridgeConfig;
use ibkr_mcp_core::types::{Greeks, OptionContractKey, OptionRight, Quote};
use ibkr_mcp_core::GatewayError;
use ibkr_mcp_gateway::sim::SimGateway;
use ibkr_mcp_gateway::ConnectionSupervisor;
use ibkr_mcp_orchestrator::{ChainAggregator, RequestDispatcher};

fn aggregator(sim: &Arc<SimGateway>) -> ChainAggregator<SimGateway> {
    aggregator_with(sim, BridgeConfig::default())
}

fn aggregator_with(sim: &Arc<SimGateway>, config: BridgeConfig) -> ChainAggregator<SimGateway> {
    let supervisor = Arc::new(ConnectionSupervisor::new(Arc::clone(sim), &config));
    let dispatcher = Arc::new(RequestDispatcher::new(supervisor, config.timeouts.clone()));
    ChainAggregator::new(dispatcher)
}

fn demo_expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 20).unwrap()
}

#[tokio::test]
async fn ten_strikes_around_the_money() {
    let sim = Arc::new(SimGateway::demo());
    let chain = aggregator(&sim)
        .option_chain("AAPL", demo_expiry(), 10, "SMART")
        .await
        .unwrap();

    assert_eq!(chain.underlying_price, dec!(225.00));
    assert_eq!(chain.entries.len(), 20, "10 strikes, call and put each");

    let expected: Vec<Decimal> = [200, 205, 210, 215, 220, 225, 230, 235, 240, 245]
        .into_iter()
        .map(Decimal::from)
        .collect();
    for (i, strike) in expected.iter().enumerate() {
        let call = &chain.entries[2 * i];
        let put = &chain.entries[2 * i + 1];
        assert_eq!(call.contract.strike, *strike);
        assert_eq!(call.contract.right, OptionRight::Call);
        assert_eq!(put.contract.strike, *strike);
        assert_eq!(put.contract.right, OptionRight::Put);
        assert!(!call.greeks.is_empty());
        assert!(!put.greeks.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_leg_keeps_its_identity() {
    let sim = Arc::new(SimGateway::demo());
    let slow = OptionContractKey::new("AAPL", demo_expiry(), dec!(225), OptionRight::Put);
    sim.set_option_latency(slow.clone(), Duration::from_secs(60));

    let chain = aggregator(&sim)
        .option_chain("AAPL", demo_expiry(), 10, "SMART")
        .await
        .unwrap();

    assert_eq!(chain.entries.len(), 20, "the slow leg is still present");
    let entry = chain
        .entries
        .iter()
        .find(|e| e.contract == slow)
        .expect("identity preserved");
    assert!(entry.quote.is_none());
    assert!(entry.greeks.is_empty());

    // Every other leg came back whole.
    let populated = chain.entries.iter().filter(|e| e.quote.is_some()).count();
    assert_eq!(populated, 19);
}

#[tokio::test]
async fn partial_greeks_are_tolerated_per_leg() {
    let sim = Arc::new(SimGateway::demo());
    let thin = OptionContractKey::new("AAPL", demo_expiry(), dec!(230), OptionRight::Call);
    sim.set_option_quote(
        thin.clone(),
        Quote {
            symbol: thin.display_name(),
            last: Some(dec!(2.10)),
            bid: None,
            ask: None,
            volume: None,
            timestamp: Utc::now(),
        },
        Greeks {
            delta: Some(0.41),
            ..Greeks::default()
        },
    );

    let chain = aggregator(&sim)
        .option_chain("AAPL", demo_expiry(), 10, "SMART")
        .await
        .unwrap();

    let entry = chain.entries.iter().find(|e| e.contract == thin).unwrap();
    assert_eq!(entry.greeks.delta, Some(0.41));
    assert_eq!(entry.greeks.gamma, None);
    assert!(entry.quote.is_some());
}

#[tokio::test]
async fn unknown_expiry_fails_before_any_leg() {
    let sim = Arc::new(SimGateway::demo());
    let absent = NaiveDate::from_ymd_opt(2025, 1, 17).unwrap();

    let err = aggregator(&sim)
        .option_chain("AAPL", absent, 10, "SMART")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::InvalidExpiry { .. }));
    assert_eq!(sim.option_quote_calls(), 0, "no Greeks sub-requests issued");
}

#[tokio::test]
async fn unusable_underlying_price_fails_the_whole_chain() {
    let sim = Arc::new(SimGateway::demo());
    // Delayed feed: zero last, no book.
    sim.set_quote(Quote {
        symbol: "AAPL".to_string(),
        last: Some(Decimal::ZERO),
        bid: None,
        ask: None,
        volume: None,
        timestamp: Utc::now(),
    });

    let err = aggregator(&sim)
        .option_chain("AAPL", demo_expiry(), 10, "SMART")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::UnderlyingPriceUnavailable { .. }));
    assert_eq!(sim.option_quote_calls(), 0);
}

#[tokio::test]
async fn zero_inflight_limit_still_makes_progress() {
    let sim = Arc::new(SimGateway::demo());
    let mut config = BridgeConfig::default();
    config.timeouts.max_inflight_legs = 0;

    let chain = aggregator_with(&sim, config)
        .option_chain("AAPL", demo_expiry(), 10, "SMART")
        .await
        .unwrap();

    assert_eq!(chain.entries.len(), 20);
}

#[tokio::test]
async fn window_narrows_at_the_ladder_edge() {
    let sim = Arc::new(SimGateway::demo());
    // Re-seed a short ladder: only three strikes remain listed.
    sim.set_ladder(
        "AAPL",
        demo_expiry(),
        vec![dec!(220), dec!(225), dec!(230)],
    );

    let chain = aggregator(&sim)
        .option_chain("AAPL", demo_expiry(), 10, "SMART")
        .await
        .unwrap();

    assert_eq!(chain.entries.len(), 6, "fewer strikes than requested is fine");
}
