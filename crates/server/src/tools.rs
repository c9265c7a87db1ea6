//! The tool and resource surface.
//!
//! Every inbound call is a self-contained request: tool name plus a
//! JSON argument object. The handler parses arguments, runs the
//! operation through the dispatcher, and renders a uniform envelope,
//! `{"ok": true, "result": ...}` on success or
//! `{"ok": false, "error": {"kind", "message"}}` on failure. Cancelling
//! an already-terminal order is the one error reported as success,
//! since from the caller's point of view the desired end state holds.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use ibkr_mcp_core::types::{parse_expiry, OptionContractKey, OptionRight};
use ibkr_mcp_core::{GatewayError, Result};
use ibkr_mcp_gateway::GatewaySession;
use ibkr_mcp_orchestrator::{ChainAggregator, RequestDispatcher};

#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

pub struct ToolHandler<S: GatewaySession> {
    dispatcher: Arc<RequestDispatcher<S>>,
    chain: ChainAggregator<S>,
}

impl<S: GatewaySession> ToolHandler<S> {
    pub fn new(dispatcher: Arc<RequestDispatcher<S>>) -> Self {
        let chain = ChainAggregator::new(Arc::clone(&dispatcher));
        Self { dispatcher, chain }
    }

    /// Run one tool call and render the response envelope. Never
    /// returns Err; every failure becomes an error envelope.
    pub async fn handle(&self, request: &ToolRequest) -> Value {
        debug!(tool = %request.tool, "tool call");
        match self.dispatch(&request.tool, &request.args).await {
            Ok(result) => json!({ "ok": true, "result": result }),
            Err(err) if err.is_noop() => json!({
                "ok": true,
                "result": { "noop": true, "detail": err.to_string() },
            }),
            Err(err) => render_error(&err),
        }
    }

    /// Resolve a resource URI. Resources are read-only views over the
    /// same operations the tools expose.
    pub async fn read_resource(&self, uri: &str) -> Value {
        debug!(uri, "resource read");
        let result = match uri {
            "portfolio://current" | "positions://all" => {
                self.dispatcher.portfolio().await.and_then(|v| to_json(&v))
            }
            "account://summary" => {
                self.dispatcher
                    .account_summary()
                    .await
                    .and_then(|v| to_json(&v))
            }
            "orders://open" => self.dispatcher.orders(false).await.and_then(|v| to_json(&v)),
            "trades://today" => self.dispatcher.trades().await.and_then(|v| to_json(&v)),
            other => Err(GatewayError::invalid_request(format!(
                "unknown resource '{other}'"
            ))),
        };
        match result {
            Ok(result) => json!({ "ok": true, "result": result }),
            Err(err) => render_error(&err),
        }
    }

    async fn dispatch(&self, tool: &str, args: &Value) -> Result<Value> {
        match tool {
            "get_portfolio" => to_json(&self.dispatcher.portfolio().await?),
            "get_account_summary" => to_json(&self.dispatcher.account_summary().await?),
            "get_stock_price" => {
                let symbol = required_str(args, "symbol")?;
                let exchange = optional_str(args, "exchange", "SMART");
                to_json(&self.dispatcher.stock_price(symbol, exchange).await?)
            }
            "get_option_price" => {
                let contract = contract_key(args)?;
                let (quote, greeks) = self.dispatcher.option_price(&contract).await?;
                to_json(&json!({
                    "contract": contract,
                    "quote": quote,
                    "greeks": greeks,
                }))
            }
            "get_option_chain" => {
                let symbol = required_str(args, "symbol")?;
                let expiry = parse_expiry(required_str(args, "expiry")?)?;
                let strike_count = optional_usize(args, "strike_count", 10)?;
                let exchange = optional_str(args, "exchange", "SMART");
                to_json(
                    &self
                        .chain
                        .option_chain(symbol, expiry, strike_count, exchange)
                        .await?,
                )
            }
            "get_option_expirations" => {
                let symbol = required_str(args, "symbol")?;
                let exchange = optional_str(args, "exchange", "SMART");
                let expirations = self
                    .dispatcher
                    .option_expirations(symbol, exchange)
                    .await?;
                let rendered: Vec<String> = expirations
                    .into_iter()
                    .map(ibkr_mcp_core::types::format_expiry)
                    .collect();
                to_json(&rendered)
            }
            "get_orders" => {
                let include_inactive = optional_bool(args, "include_inactive", false)?;
                to_json(&self.dispatcher.orders(include_inactive).await?)
            }
            "get_trades" => to_json(&self.dispatcher.trades().await?),
            "get_executions" => to_json(&self.dispatcher.executions().await?),
            "cancel_order" => {
                let order_id = required_i64(args, "order_id")?;
                self.dispatcher.cancel_order(order_id).await?;
                to_json(&json!({ "order_id": order_id, "cancelled": true }))
            }
            "get_connection_status" => to_json(&self.dispatcher.connection_status()),
            "reconnect" => {
                self.dispatcher.supervisor().reset_and_reconnect().await?;
                to_json(&self.dispatcher.connection_status())
            }
            other => Err(GatewayError::invalid_request(format!(
                "unknown tool '{other}'"
            ))),
        }
    }
}

fn render_error(err: &GatewayError) -> Value {
    json!({
        "ok": false,
        "error": { "kind": err.kind(), "message": err.to_string() },
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::invalid_request(format!("unserializable response: {e}")))
}

fn contract_key(args: &Value) -> Result<OptionContractKey> {
    let symbol = required_str(args, "symbol")?;
    let expiry = parse_expiry(required_str(args, "expiry")?)?;
    let strike = required_decimal(args, "strike")?;
    let right = OptionRight::from_str(required_str(args, "right")?)?;
    Ok(OptionContractKey::new(symbol, expiry, strike, right))
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_request(format!("missing string argument '{key}'")))
}

fn optional_str<'a>(args: &'a Value, key: &str, default: &'a str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn required_i64(args: &Value, key: &str) -> Result<i64> {
    args.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| GatewayError::invalid_request(format!("missing integer argument '{key}'")))
}

fn optional_usize(args: &Value, key: &str, default: usize) -> Result<usize> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| {
                GatewayError::invalid_request(format!("'{key}' must be a non-negative integer"))
            }),
    }
}

fn optional_bool(args: &Value, key: &str, default: bool) -> Result<bool> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_bool().ok_or_else(|| {
            GatewayError::invalid_request(format!("'{key}' must be a boolean"))
        }),
    }
}

fn required_decimal(args: &Value, key: &str) -> Result<Decimal> {
    let value = args
        .get(key)
        .ok_or_else(|| GatewayError::invalid_request(format!("missing argument '{key}'")))?;
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => {
            return Err(GatewayError::invalid_request(format!(
                "'{key}' must be a number"
            )))
        }
    };
    Decimal::from_str(&text)
        .map_err(|_| GatewayError::invalid_request(format!("'{key}' is not a valid decimal")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibkr_mcp_core::config::BridgeConfig;
    use ibkr_mcp_gateway::sim::SimGateway;
    use ibkr_mcp_gateway::ConnectionSupervisor;

    fn handler(sim: &Arc<SimGateway>) -> ToolHandler<SimGateway> {
        let config = BridgeConfig::default();
        let supervisor = Arc::new(ConnectionSupervisor::new(Arc::clone(sim), &config));
        let dispatcher = Arc::new(RequestDispatcher::new(supervisor, config.timeouts.clone()));
        ToolHandler::new(dispatcher)
    }

    fn request(tool: &str, args: Value) -> ToolRequest {
        ToolRequest {
            tool: tool.to_string(),
            args,
        }
    }

    #[tokio::test]
    async fn stock_price_round_trip() {
        let sim = Arc::new(SimGateway::demo());
        let handler = handler(&sim);

        let response = handler
            .handle(&request("get_stock_price", json!({ "symbol": "aapl" })))
            .await;
        assert_eq!(response["ok"], json!(true));
        assert_eq!(response["result"]["symbol"], json!("AAPL"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_invalid_request() {
        let sim = Arc::new(SimGateway::demo());
        let handler = handler(&sim);

        let response = handler.handle(&request("list_weather", json!({}))).await;
        assert_eq!(response["ok"], json!(false));
        assert_eq!(response["error"]["kind"], json!("invalid_request"));
    }

    #[tokio::test]
    async fn malformed_expiry_is_rejected_before_the_gateway() {
        let sim = Arc::new(SimGateway::demo());
        let handler = handler(&sim);

        let response = handler
            .handle(&request(
                "get_option_chain",
                json!({ "symbol": "AAPL", "expiry": "2024-12-20" }),
            ))
            .await;
        assert_eq!(response["ok"], json!(false));
        assert_eq!(response["error"]["kind"], json!("invalid_request"));
        assert_eq!(sim.connect_calls(), 0);
    }

    #[tokio::test]
    async fn chain_tool_returns_the_full_window() {
        let sim = Arc::new(SimGateway::demo());
        let handler = handler(&sim);

        let response = handler
            .handle(&request(
                "get_option_chain",
                json!({ "symbol": "AAPL", "expiry": "20241220", "strike_count": 4 }),
            ))
            .await;
        assert_eq!(response["ok"], json!(true));
        assert_eq!(response["result"]["entries"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn cancelling_a_filled_order_reports_a_noop_success() {
        let sim = Arc::new(SimGateway::demo());
        let handler = handler(&sim);

        let response = handler
            .handle(&request("cancel_order", json!({ "order_id": 1000 })))
            .await;
        assert_eq!(response["ok"], json!(true));
        assert_eq!(response["result"]["noop"], json!(true));
    }

    #[tokio::test]
    async fn open_orders_resource_filters_terminal_statuses() {
        let sim = Arc::new(SimGateway::demo());
        let handler = handler(&sim);

        let response = handler.read_resource("orders://open").await;
        assert_eq!(response["ok"], json!(true));
        let orders = response["result"].as_array().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0]["order_id"], json!(1001));
    }

    #[tokio::test]
    async fn option_price_requires_a_right() {
        let sim = Arc::new(SimGateway::demo());
        let handler = handler(&sim);

        let response = handler
            .handle(&request(
                "get_option_price",
                json!({ "symbol": "AAPL", "expiry": "20241220", "strike": 225 }),
            ))
            .await;
        assert_eq!(response["ok"], json!(false));
        assert_eq!(response["error"]["kind"], json!("invalid_request"));
    }
}
