use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Duration;

use crate::codec::codec_for_model;
use crate::connection::ConnectionManager;
use crate::error::Error;
use crate::measurement::Measurement;
use crate::session::{BufferInfo, DeviceSession};
use crate::transport::{BleTransport, NotificationSink, Transport};

/// Default cadence for calling [`OximeterClient::tick`]
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The session mutex is only held for synchronous buffer work; recover the
/// data if a holder ever panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client for one pulse oximeter.
///
/// Notifications from the peripheral are buffered as they arrive; calling
/// [`tick`](Self::tick) on a fixed cadence drives the connection lifecycle
/// and publishes the most recent valid measurement. A tick never fails: when
/// the device is off or no frame has arrived, the previous snapshot (or a
/// well-formed empty measurement) is returned instead.
pub struct OximeterClient {
    connection: ConnectionManager,
    session: Arc<Mutex<DeviceSession>>,
    current: Mutex<Option<Measurement>>,
}

impl OximeterClient {
    /// Create a client over the default BLE adapter.
    ///
    /// Fails if the adapter is missing or `model` has no registered codec.
    /// An unreachable peripheral is not an error here; connection is
    /// attempted on each tick.
    pub async fn new(address: &str, model: &str) -> anyhow::Result<Self> {
        let metadata = codec_for_model(model)?.metadata().clone();
        let transport = BleTransport::new(address, metadata).await?;
        Ok(Self::with_transport(Arc::new(transport), address, model)?)
    }

    /// Create a client over a caller-supplied transport.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        address: &str,
        model: &str,
    ) -> Result<Self, Error> {
        let codec = codec_for_model(model)?;
        let session = Arc::new(Mutex::new(DeviceSession::new(codec)));

        // The notification producer only appends to the buffer and returns
        let sink: NotificationSink = {
            let session = Arc::clone(&session);
            Arc::new(move |data: &[u8]| {
                lock(&session).ingest(data);
            })
        };

        let connection = ConnectionManager::new(transport, address, sink);
        Ok(Self {
            connection,
            session,
            current: Mutex::new(None),
        })
    }

    /// Run one poll cycle and return the published snapshot.
    ///
    /// Ensures the connection, then tries to extract a fresh measurement
    /// from the buffered notification data. Falls back to the previous
    /// snapshot, and before any data has arrived to an empty measurement.
    pub async fn tick(&self) -> Measurement {
        let snapshot = match self.connection.ensure_connected().await {
            Ok(()) => match lock(&self.session).try_extract() {
                Some(measurement) => {
                    tracing::debug!(
                        spo2 = ?measurement.spo2,
                        pulse = ?measurement.pulse,
                        perfusion_index = ?measurement.perfusion_index,
                        finger = measurement.finger_present,
                        "oximeter data"
                    );
                    measurement
                }
                None => self.fallback(),
            },
            Err(err) => {
                // Expected when the device is switched off; retried next
                // tick. A failed tick is strictly "not updated": any bytes
                // still buffered from before the link dropped stay put until
                // the connection is back.
                tracing::debug!(%err, "tick without connection");
                self.fallback()
            }
        };

        *lock(&self.current) = Some(snapshot.clone());
        snapshot
    }

    /// The previous snapshot if one exists, else a well-formed empty
    /// measurement for consumers awaiting the first frame.
    fn fallback(&self) -> Measurement {
        match lock(&self.current).clone() {
            Some(previous) => {
                tracing::debug!("no new frame yet, returning cached data");
                previous
            }
            None => {
                tracing::debug!("waiting for first measurement");
                Measurement::empty()
            }
        }
    }

    /// The currently published snapshot, if any tick has run.
    pub fn current(&self) -> Option<Measurement> {
        lock(&self.current).clone()
    }

    /// The last successfully decoded measurement, independent of the current
    /// tick's outcome.
    pub fn last_known(&self) -> Option<Measurement> {
        lock(&self.session).last_measurement().cloned()
    }

    /// Whether the device is currently considered reachable.
    pub fn available(&self) -> bool {
        self.connection.available()
    }

    /// Buffer state for diagnostics.
    pub fn buffer_info(&self) -> BufferInfo {
        lock(&self.session).buffer_info()
    }

    /// Disconnect from the oximeter. Best-effort; never fails.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::sync::atomic::Ordering;

    fn client(transport: Arc<MockTransport>) -> OximeterClient {
        OximeterClient::with_transport(transport, "AA:BB:CC:11:22:33", "JKS50F").unwrap()
    }

    fn valid_frame() -> Vec<u8> {
        crate::codec::jks50f::tests::make_frame(0x00, 0x64, 0x50, [0x00, 0x00])
    }

    #[test]
    fn test_unknown_model_is_a_setup_error() {
        let transport = Arc::new(MockTransport::new());
        let result = OximeterClient::with_transport(transport, "AA:BB:CC:11:22:33", "NONSUCH");
        assert!(matches!(result, Err(Error::UnknownModel(_))));
    }

    #[tokio::test]
    async fn test_tick_sequence_empty_fresh_cached() {
        let transport = Arc::new(MockTransport::new());
        let c = client(Arc::clone(&transport));

        // Tick 1: connected but no frames yet
        let first = c.tick().await;
        assert!(!first.finger_present);
        assert_eq!(first.spo2, None);
        assert_eq!(first.pulse, None);
        assert_eq!(first.perfusion_index, None);
        assert_eq!(c.last_known(), None);

        // A frame arrives via notifications between ticks
        transport.notify(&valid_frame());
        let second = c.tick().await;
        assert_eq!(second.spo2, Some(100));
        assert_eq!(second.pulse, Some(80));

        // Tick 3: nothing new, the previous snapshot is re-published
        let third = c.tick().await;
        assert_eq!(third, second);
        assert_eq!(c.current(), Some(second.clone()));
        assert_eq!(c.last_known(), Some(second));
    }

    #[tokio::test]
    async fn test_tick_survives_unavailable_device() {
        let transport = Arc::new(MockTransport::new());
        transport.present.store(false, Ordering::SeqCst);
        let c = client(Arc::clone(&transport));

        let m = c.tick().await;
        assert!(!m.finger_present);
        assert!(!c.available());

        // Device switched on between ticks
        transport.present.store(true, Ordering::SeqCst);
        transport.notify(&valid_frame()); // ignored: not subscribed yet
        let m = c.tick().await;
        assert!(c.available());
        assert_eq!(m.spo2, None);
    }

    #[tokio::test]
    async fn test_notifications_delivered_in_chunks() {
        let transport = Arc::new(MockTransport::new());
        let c = client(Arc::clone(&transport));
        c.tick().await; // connect + subscribe

        let frame = valid_frame();
        let (a, b) = frame.split_at(20);
        transport.notify(a);
        assert_eq!(c.buffer_info().size, 20);
        transport.notify(b);

        let m = c.tick().await;
        assert_eq!(m.spo2, Some(100));
        assert_eq!(c.buffer_info().size, 0);
    }

    #[tokio::test]
    async fn test_cached_measurement_survives_connection_loss() {
        let transport = Arc::new(MockTransport::new());
        let c = client(Arc::clone(&transport));
        c.tick().await;
        transport.notify(&valid_frame());
        let fresh = c.tick().await;

        // Link drops and the device disappears
        transport.connected.store(false, Ordering::SeqCst);
        transport.present.store(false, Ordering::SeqCst);
        let cached = c.tick().await;
        assert_eq!(cached, fresh);
        assert!(!c.available());
        assert_eq!(c.last_known(), Some(fresh));
    }

    #[tokio::test]
    async fn test_failed_tick_never_publishes_buffered_frame() {
        let transport = Arc::new(MockTransport::new());
        let c = client(Arc::clone(&transport));
        c.tick().await; // connect + subscribe

        // A complete frame sits in the buffer when the link drops
        transport.notify(&valid_frame());
        transport.connected.store(false, Ordering::SeqCst);
        transport.present.store(false, Ordering::SeqCst);

        let m = c.tick().await;
        assert_eq!(m.spo2, None);
        assert_eq!(c.last_known(), None);
        // The frame was not touched by the failed tick
        assert_eq!(c.buffer_info().size, 69);

        // Once the device is back, the buffered frame is extracted
        transport.present.store(true, Ordering::SeqCst);
        let m = c.tick().await;
        assert_eq!(m.spo2, Some(100));
        assert_eq!(c.buffer_info().size, 0);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let transport = Arc::new(MockTransport::new());
        let c = client(Arc::clone(&transport));
        c.tick().await;

        c.shutdown().await;
        assert!(!c.available());
        assert_eq!(transport.disconnect_calls.load(Ordering::SeqCst), 1);
    }
}
