//! Bridge configuration.
//!
//! Read once at process start (no reload): gateway endpoint, reconnect
//! policy, and per-operation timeouts. Backoff timing and timeout
//! values are deliberately configuration rather than hidden constants.

use std::time::Duration;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

/// Gateway endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway/TWS host (use 127.0.0.1, not localhost — TWS may block IPv6).
    pub host: String,
    /// 7497 = TWS paper, 7496 = TWS live.
    pub port: u16,
    /// Client id, unique per connection.
    pub client_id: i32,
    pub paper: bool,
    /// Account to use; auto-detected by the gateway when absent.
    pub account: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::paper()
    }
}

impl GatewayConfig {
    pub fn paper() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 1,
            paper: true,
            account: None,
        }
    }

    pub fn live() -> Self {
        Self {
            port: 7496,
            paper: false,
            ..Self::paper()
        }
    }

    pub fn connection_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reconnect policy knobs. Delays are monotone non-decreasing:
/// `initial_delay_ms` scaled by `multiplier` per attempt, capped at
/// `max_delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Per-operation deadlines and the chain-leg concurrency bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    pub connect_ms: u64,
    pub market_data_ms: u64,
    pub account_ms: u64,
    pub orders_ms: u64,
    pub chain_leg_ms: u64,
    /// Maximum concurrent Greeks snapshot requests within one chain
    /// aggregation, to respect gateway pacing limits.
    pub max_inflight_legs: usize,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            market_data_ms: 5_000,
            account_ms: 10_000,
            orders_ms: 10_000,
            chain_leg_ms: 5_000,
            max_inflight_legs: 8,
        }
    }
}

impl TimeoutSettings {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn market_data(&self) -> Duration {
        Duration::from_millis(self.market_data_ms)
    }

    pub fn account(&self) -> Duration {
        Duration::from_millis(self.account_ms)
    }

    pub fn orders(&self) -> Duration {
        Duration::from_millis(self.orders_ms)
    }

    pub fn chain_leg(&self) -> Duration {
        Duration::from_millis(self.chain_leg_ms)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging the TOML file (if present) with
    /// `IBKR_`-prefixed environment variables. Nested keys use `__`,
    /// e.g. `IBKR_GATEWAY__PORT=7496`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be parsed.
    pub fn load(path: &str) -> Result<BridgeConfig> {
        let config: BridgeConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("IBKR_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_paper_trading() {
        let config = BridgeConfig::default();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 7497);
        assert!(config.gateway.paper);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.timeouts.market_data(), Duration::from_secs(5));
        assert_eq!(config.timeouts.max_inflight_legs, 8);
    }

    #[test]
    fn live_preset_switches_port() {
        let live = GatewayConfig::live();
        assert_eq!(live.port, 7496);
        assert!(!live.paper);
        assert_eq!(live.connection_url(), "127.0.0.1:7496");
    }

    #[test]
    fn toml_overrides_defaults() {
        let config: BridgeConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [gateway]
                host = "10.0.0.5"
                port = 4002
                client_id = 7
                paper = true

                [reconnect]
                max_attempts = 5
                initial_delay_ms = 500
                max_delay_ms = 4000
                multiplier = 2.0
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(config.gateway.host, "10.0.0.5");
        assert_eq!(config.gateway.port, 4002);
        assert_eq!(config.gateway.client_id, 7);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.initial_delay(), Duration::from_millis(500));
        // Sections not present keep their defaults.
        assert_eq!(config.timeouts.orders(), Duration::from_secs(10));
    }
}
