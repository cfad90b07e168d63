//! Reconnection supervisor
//!
//! Listens for [`ConnectionSignal`]s and runs a fixed-interval retry loop
//! until a reconnection succeeds. Entry into the loop goes through a single
//! flag, so signals arriving while a loop runs are absorbed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::{ConnectionSignal, EslClient};
use crate::errors::EslResult;

/// Something the supervisor can bring back after a disconnect
#[async_trait]
pub trait Reconnect: Send + Sync + 'static {
    /// One reconnection attempt
    async fn reconnect(&self) -> EslResult<()>;

    /// Cancelled when the retry loop must stop for good
    fn shutdown_token(&self) -> CancellationToken;

    /// Called once when a retry loop begins
    fn reconnect_started(&self) {}
}

#[async_trait]
impl Reconnect for EslClient {
    async fn reconnect(&self) -> EslResult<()> {
        EslClient::reconnect(self).await
    }

    fn shutdown_token(&self) -> CancellationToken {
        EslClient::shutdown_token(self)
    }

    fn reconnect_started(&self) {
        self.mark_reconnecting();
    }
}

pub struct ReconnectSupervisor<R: Reconnect> {
    target: R,
    interval: Duration,
    reconnecting: AtomicBool,
    attempts: AtomicU64,
}

impl<R: Reconnect> ReconnectSupervisor<R> {
    pub fn new(target: R, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            target,
            interval,
            reconnecting: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
        })
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::Acquire)
    }

    /// Total reconnection attempts made so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Start a retry loop unless one is already running.
    ///
    /// Returns whether a new loop was started.
    pub fn trigger(self: &Arc<Self>, reason: ConnectionSignal) -> bool {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(reason = ?reason, "Reconnection already in progress");
            return false;
        }

        warn!(
            reason = ?reason,
            interval = ?self.interval,
            "Starting ESL reconnection loop"
        );
        self.target.reconnect_started();

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.retry_loop().await;
        });
        true
    }

    async fn retry_loop(&self) {
        let shutdown = self.target.shutdown_token();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("ESL reconnection loop cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.target.reconnect().await {
                Ok(()) => {
                    info!(attempt, "Reconnected to FreeSWITCH ESL");
                    break;
                }
                Err(e) if !e.is_retryable() => {
                    error!(attempt, error = %e, "Giving up on ESL reconnection");
                    break;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        "Failed to reconnect to FSESL, try again in {:?}",
                        self.interval
                    );
                }
            }
        }

        self.reconnecting.store(false, Ordering::Release);
    }

    /// Feed connection signals into [`ReconnectSupervisor::trigger`] until
    /// the target shuts down.
    pub fn spawn(
        self: &Arc<Self>,
        mut signals: broadcast::Receiver<ConnectionSignal>,
    ) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        let shutdown = self.target.shutdown_token();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = signals.recv() => received,
                };

                match received {
                    Ok(signal) => {
                        supervisor.trigger(signal);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Connection signals lagged");
                        supervisor.trigger(ConnectionSignal::TransportError);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
