//! Live IB Gateway/TWS session backed by the `ibapi` crate.
//!
//! Connection lifecycle (connect, liveness, loss notification) is
//! fully wired: every reconnect attempt builds a fresh client, and a
//! liveness probe task turns a dead transport into a disconnect event
//! for the supervisor. Market-data and order mappings that are not
//! wired yet report `Unsupported` rather than empty data.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ibkr_mcp_core::config::GatewayConfig;
use ibkr_mcp_core::types::{
    AccountSummary, Execution, Greeks, OptionContractKey, Order, Position, Quote, Trade,
};
use ibkr_mcp_core::{GatewayError, Result};

use crate::session::{DisconnectEvent, GatewaySession};

const LIVENESS_PROBE_INTERVAL: Duration = Duration::from_secs(2);

type SharedClient = Arc<RwLock<Option<ibapi::Client>>>;

pub struct IbGateway {
    config: GatewayConfig,
    client: SharedClient,
    disconnect_tx: broadcast::Sender<DisconnectEvent>,
    liveness_probe: Mutex<Option<JoinHandle<()>>>,
}

impl IbGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let (disconnect_tx, _) = broadcast::channel(16);
        Self {
            config,
            client: Arc::new(RwLock::new(None)),
            disconnect_tx,
            liveness_probe: Mutex::new(None),
        }
    }

    /// Poll the transport and emit one disconnect event when it dies.
    /// The gateway does not push loss notifications through the async
    /// client, so liveness is sampled.
    fn spawn_liveness_probe(&self) -> JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let disconnect_tx = self.disconnect_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(LIVENESS_PROBE_INTERVAL).await;
                let alive = client
                    .read()
                    .await
                    .as_ref()
                    .is_some_and(|c| c.is_connected());
                if !alive {
                    let _ = disconnect_tx.send(DisconnectEvent {
                        reason: "gateway liveness probe failed".to_string(),
                    });
                    return;
                }
            }
        })
    }

    async fn replace_probe(&self, probe: Option<JoinHandle<()>>) {
        let mut slot = self.liveness_probe.lock().await;
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = probe;
    }

    async fn ensure_client(&self) -> Result<()> {
        if self.client.read().await.is_none() {
            return Err(GatewayError::transport("no active IB client"));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewaySession for IbGateway {
    async fn connect(&self) -> Result<()> {
        let url = self.config.connection_url();
        info!(url = %url, client_id = self.config.client_id, "connecting to IB Gateway");

        // Fresh client per attempt; a half-dead transport from the
        // previous session must not be reused.
        self.replace_probe(None).await;
        *self.client.write().await = None;

        let client = ibapi::Client::connect(&url, self.config.client_id)
            .await
            .map_err(|e| GatewayError::connection(format!("IB Gateway connect failed: {e}")))?;

        *self.client.write().await = Some(client);
        self.replace_probe(Some(self.spawn_liveness_probe())).await;
        info!(url = %url, "connected to IB Gateway");
        Ok(())
    }

    async fn disconnect(&self) {
        self.replace_probe(None).await;
        if self.client.write().await.take().is_some() {
            info!("disconnected from IB Gateway");
        }
    }

    fn is_connected(&self) -> bool {
        self.client
            .try_read()
            .map(|guard| guard.as_ref().is_some_and(|c| c.is_connected()))
            .unwrap_or(false)
    }

    fn disconnect_events(&self) -> broadcast::Receiver<DisconnectEvent> {
        self.disconnect_tx.subscribe()
    }

    async fn portfolio(&self) -> Result<Vec<Position>> {
        self.ensure_client().await?;
        // TODO: drain the positions subscription into Position rows
        // (client.positions() yields PositionUpdate events until End).
        Err(GatewayError::unsupported("get_portfolio"))
    }

    async fn account_summary(&self) -> Result<AccountSummary> {
        self.ensure_client().await?;
        // TODO: request client.account_summary(&"All".into(), tags) and
        // iterate the Subscription<AccountSummaryResult> stream into
        // the tag map.
        Err(GatewayError::unsupported("get_account_summary"))
    }

    async fn stock_quote(&self, symbol: &str, _exchange: &str) -> Result<Quote> {
        self.ensure_client().await?;
        debug!(symbol, "stock quote requested");
        // TODO: build Contract::stock(symbol), request a market data
        // snapshot, and fill last/bid/ask from the tick stream.
        Err(GatewayError::unsupported("get_stock_price"))
    }

    async fn option_quote(&self, contract: &OptionContractKey) -> Result<(Quote, Greeks)> {
        self.ensure_client().await?;
        debug!(contract = %contract.display_name(), "option quote requested");
        // TODO: build the option contract, request a snapshot with
        // model greeks, and map tick fields into (Quote, Greeks).
        Err(GatewayError::unsupported("get_option_price"))
    }

    async fn option_expirations(&self, symbol: &str, _exchange: &str) -> Result<Vec<NaiveDate>> {
        self.ensure_client().await?;
        debug!(symbol, "option expirations requested");
        // TODO: request security definition option parameters and
        // collect the expiration set, sorted ascending.
        Err(GatewayError::unsupported("get_option_expirations"))
    }

    async fn strike_ladder(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        _exchange: &str,
    ) -> Result<Vec<Decimal>> {
        self.ensure_client().await?;
        debug!(symbol, expiry = %expiry, "strike ladder requested");
        // TODO: take the strike set from the same option parameters
        // response used for expirations.
        Err(GatewayError::unsupported("strike_ladder"))
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        self.ensure_client().await?;
        // TODO: map completed + open order subscriptions into Order rows.
        Err(GatewayError::unsupported("get_orders"))
    }

    async fn trades(&self) -> Result<Vec<Trade>> {
        self.ensure_client().await?;
        // TODO: join order state with execution reports by order id.
        Err(GatewayError::unsupported("get_trades"))
    }

    async fn executions(&self) -> Result<Vec<Execution>> {
        self.ensure_client().await?;
        // TODO: request execution reports with an empty filter and map
        // fills + commission reports into Execution rows.
        Err(GatewayError::unsupported("get_executions"))
    }

    async fn cancel_order(&self, order_id: i64) -> Result<()> {
        self.ensure_client().await?;
        warn!(order_id, "cancel requested");
        // TODO: submit the cancel via the order management API once
        // order ids are tracked against the live session.
        Err(GatewayError::unsupported("cancel_order"))
    }
}
