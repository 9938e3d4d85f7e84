//! Radio link lifecycle: connect-with-retry, subscribe, loss detection,
//! availability tracking and teardown.
//!
//! A pulse oximeter is a battery device that is switched off most of the
//! time, so an unreachable peripheral is the expected steady state. The
//! manager logs each unavailability episode exactly once instead of on every
//! poll tick, and logs a single "back online" line when the device returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

use crate::error::{Error, TransportError};
use crate::transport::{NotificationSink, Transport};

/// Connect attempts per `ensure_connected` call
const CONNECT_ATTEMPTS: u32 = 2;
/// Timeout per connect attempt. Worst case ~10s per call
const CONNECT_TIMEOUT_S: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Owns the transport handle and serializes all state transitions.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    address: String,
    sink: NotificationSink,
    /// Exclusive guard over the connect/subscribe sequence. Held only across
    /// the transition, never across buffer operations.
    state: Mutex<ConnectionState>,
    available: AtomicBool,
    unavailable_logged: AtomicBool,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, address: &str, sink: NotificationSink) -> Self {
        Self {
            transport,
            address: address.to_string(),
            sink,
            state: Mutex::new(ConnectionState::Disconnected),
            available: AtomicBool::new(false),
            unavailable_logged: AtomicBool::new(false),
        }
    }

    /// Whether the device is currently considered reachable.
    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Make sure there is an active, subscribed connection.
    ///
    /// No-op when the link is already up. Otherwise resolves the peripheral,
    /// connects with a bounded retry budget and subscribes to notifications.
    /// Concurrent callers collapse onto one underlying attempt: the second
    /// caller blocks on the guard and re-checks the link once it gets in.
    pub async fn ensure_connected(&self) -> Result<(), Error> {
        if self.transport.is_connected().await {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        // Check again after acquiring the guard
        if *state == ConnectionState::Connected && self.transport.is_connected().await {
            return Ok(());
        }

        *state = ConnectionState::Connecting;
        tracing::debug!(address = %self.address, "establishing connection");

        let result = self.connect_and_subscribe().await;
        match result {
            Ok(()) => {
                *state = ConnectionState::Connected;
                self.available.store(true, Ordering::SeqCst);
                if self.unavailable_logged.swap(false, Ordering::SeqCst) {
                    tracing::info!(address = %self.address, "oximeter is back online");
                } else {
                    tracing::info!(address = %self.address, "connected, notifications started");
                }
                Ok(())
            }
            Err(err) => {
                *state = ConnectionState::Disconnected;
                self.available.store(false, Ordering::SeqCst);
                // Log once per episode, not every tick
                if !self.unavailable_logged.swap(true, Ordering::SeqCst) {
                    tracing::info!(
                        address = %self.address,
                        "oximeter is unavailable (device may be turned off)"
                    );
                }
                Err(err)
            }
        }
    }

    async fn connect_and_subscribe(&self) -> Result<(), Error> {
        self.transport
            .resolve()
            .await
            .map_err(Error::TransportUnavailable)?;

        let mut last_err = TransportError::Timeout;
        let mut connected = false;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match timeout(
                Duration::from_secs(CONNECT_TIMEOUT_S),
                self.transport.connect(),
            )
            .await
            {
                Ok(Ok(())) => {
                    connected = true;
                    break;
                }
                Ok(Err(err)) => {
                    tracing::debug!(attempt, %err, "connect attempt failed");
                    last_err = err;
                }
                Err(_) => {
                    tracing::debug!(attempt, "connect attempt timed out");
                    last_err = TransportError::Timeout;
                }
            }
        }
        if !connected {
            return Err(Error::ConnectionFailed {
                attempts: CONNECT_ATTEMPTS,
                source: last_err,
            });
        }

        if let Err(err) = self.transport.subscribe(self.sink.clone()).await {
            // Drop the half-open link so the next tick starts clean
            if let Err(err) = self.transport.disconnect().await {
                tracing::debug!(%err, "disconnect after failed subscribe");
            }
            return Err(Error::TransportUnavailable(err));
        }
        Ok(())
    }

    /// Tear down the subscription and the connection.
    ///
    /// Each step is best-effort: an unsubscribe error must not prevent the
    /// disconnect attempt. Errors are logged, never propagated. Acquiring
    /// the guard also preempts any in-flight connect attempt.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;

        if let Err(err) = self.transport.unsubscribe().await {
            tracing::warn!(%err, "unsubscribe failed during shutdown");
        }
        if let Err(err) = self.transport.disconnect().await {
            tracing::warn!(%err, "disconnect failed during shutdown");
        }

        *state = ConnectionState::Disconnected;
        self.available.store(false, Ordering::SeqCst);
        tracing::info!(address = %self.address, "disconnected");
    }
}
