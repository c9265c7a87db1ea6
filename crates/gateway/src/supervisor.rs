//! Connection supervision.
//!
//! The supervisor owns the gateway session and the single process-wide
//! [`SessionState`]; nothing else mutates it. Reconnect sequences are
//! serialized by the policy mutex: concurrent callers block on the
//! lock and re-check state once they hold it, so an in-flight attempt
//! is awaited rather than duplicated. `Failed` is terminal until an
//! explicit [`ConnectionSupervisor::reset_and_reconnect`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ibkr_mcp_core::config::{BridgeConfig, GatewayConfig};
use ibkr_mcp_core::types::{ConnectionStatus, SessionState};
use ibkr_mcp_core::{GatewayError, Result};

use crate::reconnect::ReconnectPolicy;
use crate::session::GatewaySession;

pub struct ConnectionSupervisor<S: GatewaySession> {
    session: Arc<S>,
    gateway: GatewayConfig,
    connect_timeout: Duration,
    /// Holding this lock is what serializes reconnect sequences.
    policy: Mutex<ReconnectPolicy>,
    state_tx: watch::Sender<SessionState>,
    last_error: std::sync::RwLock<Option<String>>,
}

impl<S: GatewaySession> ConnectionSupervisor<S> {
    pub fn new(session: Arc<S>, config: &BridgeConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            session,
            gateway: config.gateway.clone(),
            connect_timeout: config.timeouts.connect(),
            policy: Mutex::new(ReconnectPolicy::new(config.reconnect.clone())),
            state_tx,
            last_error: std::sync::RwLock::new(None),
        }
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions (used by tests and the loss watcher).
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Read-only health report: current state, last error, endpoint.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state(),
            last_error: self.last_error.read().expect("last_error lock").clone(),
            host: self.gateway.host.clone(),
            port: self.gateway.port,
            client_id: self.gateway.client_id,
            paper: self.gateway.paper,
            timestamp: Utc::now(),
        }
    }

    /// Returns only when the session is connected, running the
    /// reconnect protocol if it is not. `Failed` short-circuits: no
    /// automatic attempts happen past the configured budget.
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.state() == SessionState::Connected && self.session.is_connected() {
            return Ok(());
        }
        if self.state() == SessionState::Failed {
            return Err(self.failed_error().await);
        }

        let mut policy = self.policy.lock().await;
        // A concurrent caller may have completed the sequence while we
        // waited on the lock.
        if self.state() == SessionState::Connected && self.session.is_connected() {
            return Ok(());
        }
        if self.state() == SessionState::Failed {
            return Err(self.locked_failed_error(&policy));
        }

        self.run_connect_sequence(&mut policy).await
    }

    /// Dispatcher-reported transport fault: leave `Connected` so the
    /// next call runs the reconnect protocol. Does not reconnect
    /// eagerly; callers of `ensure_connected` drive the attempts.
    pub fn mark_connection_lost(&self, reason: &str) {
        self.record_error(reason);
        let flipped = self.state_tx.send_if_modified(|state| {
            if matches!(*state, SessionState::Connected | SessionState::Connecting) {
                *state = SessionState::Reconnecting;
                true
            } else {
                false
            }
        });
        if flipped {
            warn!(reason, "gateway connection lost, marked for reconnect");
        }
    }

    /// Forgive a failed sequence without reconnecting: restores the
    /// full automatic budget and leaves the supervisor `Disconnected`,
    /// so the next `ensure_connected` starts a fresh sequence. Used
    /// after the optional eager connect at startup, which must not
    /// consume the budget the first tool call relies on.
    pub async fn clear_failure(&self) {
        let mut policy = self.policy.lock().await;
        policy.reset();
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Failed {
                *state = SessionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    /// Explicit manual reconnect: resets the attempt counter and runs
    /// the connect protocol, the only way out of `Failed`.
    pub async fn reset_and_reconnect(&self) -> Result<()> {
        let mut policy = self.policy.lock().await;
        policy.reset();
        self.set_state(SessionState::Disconnected);
        self.run_connect_sequence(&mut policy).await
    }

    /// Watch the session's disconnect notifications and flip state out
    /// of `Connected` when one arrives.
    pub fn spawn_loss_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        let mut events = supervisor.session.disconnect_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => supervisor.mark_connection_lost(&event.reason),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "disconnect event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn run_connect_sequence(&self, policy: &mut ReconnectPolicy) -> Result<()> {
        loop {
            let Some(attempt) = policy.next_attempt() else {
                self.set_state(SessionState::Failed);
                return Err(self.locked_failed_error(policy));
            };

            if !attempt.delay.is_zero() {
                self.set_state(SessionState::Reconnecting);
                debug!(
                    attempt = attempt.number,
                    delay_ms = attempt.delay.as_millis() as u64,
                    "backing off before reconnect attempt"
                );
                tokio::time::sleep(attempt.delay).await;
            }

            self.set_state(SessionState::Connecting);
            info!(
                attempt = attempt.number,
                max_attempts = policy.max_attempts(),
                url = %self.gateway.connection_url(),
                "connecting to gateway"
            );

            match tokio::time::timeout(self.connect_timeout, self.session.connect()).await {
                Ok(Ok(())) => {
                    policy.reset();
                    self.clear_error();
                    self.set_state(SessionState::Connected);
                    info!(url = %self.gateway.connection_url(), "gateway connected");
                    return Ok(());
                }
                Ok(Err(err)) => {
                    self.record_error(&err.to_string());
                    warn!(attempt = attempt.number, error = %err, "gateway connect failed");
                }
                Err(_) => {
                    let reason = format!(
                        "connect timed out after {}ms",
                        self.connect_timeout.as_millis()
                    );
                    self.record_error(&reason);
                    warn!(attempt = attempt.number, "{reason}");
                }
            }
        }
    }

    async fn failed_error(&self) -> GatewayError {
        let policy = self.policy.lock().await;
        self.locked_failed_error(&policy)
    }

    fn locked_failed_error(&self, policy: &ReconnectPolicy) -> GatewayError {
        GatewayError::ReconnectFailed {
            attempts: policy.attempts(),
            reason: self
                .last_error
                .read()
                .expect("last_error lock")
                .clone()
                .unwrap_or_else(|| "connect failed".to_string()),
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "session state transition");
        }
    }

    fn record_error(&self, reason: &str) {
        *self.last_error.write().expect("last_error lock") = Some(reason.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write().expect("last_error lock") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimGateway;
    use ibkr_mcp_core::config::ReconnectSettings;

    fn test_config(max_attempts: u32) -> BridgeConfig {
        BridgeConfig {
            reconnect: ReconnectSettings {
                max_attempts,
                initial_delay_ms: 100,
                max_delay_ms: 1_000,
                multiplier: 2.0,
            },
            ..BridgeConfig::default()
        }
    }

    fn supervisor(
        sim: &Arc<SimGateway>,
        max_attempts: u32,
    ) -> Arc<ConnectionSupervisor<SimGateway>> {
        Arc::new(ConnectionSupervisor::new(
            Arc::clone(sim),
            &test_config(max_attempts),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_bounded_then_failed_is_terminal() {
        let sim = Arc::new(SimGateway::new());
        sim.fail_next_connects(u32::MAX);
        let sup = supervisor(&sim, 3);

        let err = sup.ensure_connected().await.unwrap_err();
        assert!(matches!(err, GatewayError::ReconnectFailed { attempts: 3, .. }));
        assert_eq!(sup.state(), SessionState::Failed);
        assert_eq!(sim.connect_calls(), 3);

        // Failed is terminal: no further automatic attempts.
        let err = sup.ensure_connected().await.unwrap_err();
        assert!(matches!(err, GatewayError::ReconnectFailed { .. }));
        assert_eq!(sim.connect_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_budget_and_resets_counter() {
        let sim = Arc::new(SimGateway::new());
        sim.fail_next_connects(2);
        let sup = supervisor(&sim, 3);

        sup.ensure_connected().await.unwrap();
        assert_eq!(sup.state(), SessionState::Connected);
        assert_eq!(sim.connect_calls(), 3);

        // Counter reset on success: a later loss gets the full budget.
        sim.drop_connection();
        sim.fail_next_connects(2);
        sup.ensure_connected().await.unwrap();
        assert_eq!(sup.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_sequence() {
        let sim = Arc::new(SimGateway::new());
        sim.set_connect_delay(Duration::from_millis(200));
        let sup = supervisor(&sim, 3);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let sup = Arc::clone(&sup);
            handles.push(tokio::spawn(async move { sup.ensure_connected().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        // One caller connected; the rest observed Connected after the
        // lock, never starting a duplicate sequence.
        assert_eq!(sim.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_failure_restores_the_automatic_budget() {
        let sim = Arc::new(SimGateway::new());
        sim.fail_next_connects(u32::MAX);
        let sup = supervisor(&sim, 3);

        assert!(sup.ensure_connected().await.is_err());
        assert_eq!(sup.state(), SessionState::Failed);
        assert_eq!(sim.connect_calls(), 3);

        sup.clear_failure().await;
        assert_eq!(sup.state(), SessionState::Disconnected);

        // Gateway comes back: the next caller reconnects by itself,
        // with the full budget rather than a spent one.
        sim.clear_connect_failures();
        sup.ensure_connected().await.unwrap();
        assert_eq!(sup.state(), SessionState::Connected);
        assert_eq!(sim.connect_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reset_leaves_failed() {
        let sim = Arc::new(SimGateway::new());
        sim.fail_next_connects(u32::MAX);
        let sup = supervisor(&sim, 2);

        assert!(sup.ensure_connected().await.is_err());
        assert_eq!(sup.state(), SessionState::Failed);

        sim.clear_connect_failures();
        sup.reset_and_reconnect().await.unwrap();
        assert_eq!(sup.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn loss_event_flips_connected_to_reconnecting() {
        let sim = Arc::new(SimGateway::new());
        let sup = supervisor(&sim, 3);
        let _watcher = sup.spawn_loss_watcher();

        sup.ensure_connected().await.unwrap();
        let mut state_rx = sup.subscribe_state();

        sim.emit_disconnect("socket closed");
        state_rx
            .wait_for(|state| *state == SessionState::Reconnecting)
            .await
            .unwrap();

        // Next call recovers transparently.
        sup.ensure_connected().await.unwrap();
        assert_eq!(sup.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_fault_marks_reconnecting_only_from_connected() {
        let sim = Arc::new(SimGateway::new());
        let sup = supervisor(&sim, 3);

        // Not connected yet: a stray report must not disturb Disconnected.
        sup.mark_connection_lost("early noise");
        assert_eq!(sup.state(), SessionState::Disconnected);

        sup.ensure_connected().await.unwrap();
        sup.mark_connection_lost("mid-call transport fault");
        assert_eq!(sup.state(), SessionState::Reconnecting);
        let status = sup.status();
        assert_eq!(status.last_error.as_deref(), Some("mid-call transport fault"));
    }
}
