//! Bounded-retry connection supervision.
//!
//! The supervisor owns the broker connection lifecycle for both the
//! producer and the consumer binaries:
//!
//! 1. Dial (the connector applies its own short retry budget)
//! 2. Declare the topology
//! 3. Mark the session Ready and hand the channel to the session closure
//! 4. On a connection-class error, count the failure, sleep a fixed delay
//!    and redial
//!
//! After `max_retries` consecutive failures the supervisor gives up and
//! returns [`AppError::RetriesExhausted`]. Restarting the process is left to
//! the process manager.
//!
//! A failure only starts a fresh count when the session before it stayed
//! Ready for at least `stable_after`. A broker that accepts the dial and the
//! declarations but drops the channel right away still exhausts the budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{BrokerChannel, ConnectionState, Connector, SupervisorState, Topology};
use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Ready time after which a session's failure starts a fresh count.
const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(30);

pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    topology: Topology,
    max_retries: u32,
    retry_delay: Duration,
    stable_after: Duration,
    state: Arc<ConnectionState>,
    shutdown: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        topology: Topology,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            connector,
            topology,
            max_retries: max_retries.max(1),
            retry_delay,
            stable_after: DEFAULT_STABLE_AFTER,
            state: Arc::new(ConnectionState::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(connector: Arc<dyn Connector>, config: &Config) -> Self {
        Self::new(
            connector,
            Topology::from_config(config),
            config.max_retries,
            config.retry_delay,
        )
        .with_stable_after(config.session_stable_after)
    }

    /// Minimum Ready time for a session's failure to start a fresh count.
    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }

    /// Stop retrying once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state.state()
    }

    /// Shared handle to the supervisor's state, for observers.
    pub fn connection_state(&self) -> Arc<ConnectionState> {
        Arc::clone(&self.state)
    }

    /// Drive sessions until one ends cleanly, a non-connection error
    /// surfaces, shutdown is requested or the retry budget is spent.
    ///
    /// `session` is invoked once per Ready transition with a fresh channel.
    /// Returning `Ok(())` ends supervision; returning a connection-class
    /// error triggers a reconnect.
    ///
    /// # Errors
    ///
    /// - `AppError::RetriesExhausted` after `max_retries` failures with no
    ///   stable session in between
    /// - Any non-connection error returned by `session`, unchanged
    pub async fn run<F, Fut>(&self, mut session: F) -> AppResult<()>
    where
        F: FnMut(Arc<dyn BrokerChannel>) -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        loop {
            if self.shutdown.is_cancelled() {
                self.state.set_disconnected();
                return Ok(());
            }

            let mut ready_since = None;
            match self.run_session(&mut session, &mut ready_since).await {
                Ok(()) => {
                    self.state.set_disconnected();
                    info!("Broker session ended");
                    return Ok(());
                }
                Err(e) if e.is_connection_error() => {
                    if ready_since.is_some_and(|since| since.elapsed() >= self.stable_after) {
                        self.state.reset_failures();
                    }
                    let failures = self.state.record_failure();
                    if failures >= self.max_retries {
                        error!(
                            failures,
                            max_retries = self.max_retries,
                            error = %e,
                            "Broker retry budget exhausted"
                        );
                        return Err(AppError::RetriesExhausted(failures));
                    }

                    warn!(
                        failures,
                        max_retries = self.max_retries,
                        delay = ?self.retry_delay,
                        error = %e,
                        "Broker session lost, reconnecting"
                    );

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            info!("Shutdown requested while waiting to reconnect");
                            return Ok(());
                        }
                        _ = sleep(self.retry_delay) => {}
                    }
                }
                Err(e) => {
                    self.state.set_disconnected();
                    error!(error = %e, "Broker session failed with a non-retryable error");
                    return Err(e);
                }
            }
        }
    }

    async fn run_session<F, Fut>(
        &self,
        session: &mut F,
        ready_since: &mut Option<Instant>,
    ) -> AppResult<()>
    where
        F: FnMut(Arc<dyn BrokerChannel>) -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        self.state.set_connecting();
        let channel = self.connector.dial().await?;
        self.topology.ensure(channel.as_ref()).await?;

        self.state.set_ready();
        *ready_since = Some(Instant::now());
        info!("Broker session ready");
        session(channel).await
    }
}
