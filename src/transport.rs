//! Transport seam between the connection manager and the BLE stack.
//!
//! [`Transport`] captures exactly what the connection lifecycle needs from
//! the radio: presence lookup, a single connect attempt, notification
//! subscribe/unsubscribe, disconnect and a liveness flag. [`BleTransport`]
//! implements it on top of `bluest`; tests use a scripted mock instead.

use std::sync::Arc;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::codec::DeviceMetadata;
use crate::error::TransportError;

/// Receives raw notification payloads. Must not block: it is invoked from
/// the notification pump for every chunk the peripheral sends.
pub type NotificationSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Check that the target peripheral is currently visible and resolve a
    /// handle to it. Fails fast with [`TransportError::NotFound`] otherwise.
    async fn resolve(&self) -> Result<(), TransportError>;

    /// One connection attempt to the resolved peripheral.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Subscribe to the notification source, delivering every payload to
    /// `sink`.
    async fn subscribe(&self, sink: NotificationSink) -> Result<(), TransportError>;

    async fn unsubscribe(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Liveness of the underlying link.
    async fn is_connected(&self) -> bool;
}

/// How long to scan for the peripheral before declaring it not found
const DISCOVER_TIMEOUT_S: u64 = 5;

/// Real BLE transport for one peripheral address.
pub struct BleTransport {
    adapter: Adapter,
    address: String,
    metadata: DeviceMetadata,
    device: Mutex<Option<Device>>,
    notify_task: Mutex<Option<JoinHandle<()>>>,
}

impl BleTransport {
    /// Acquire the default adapter and bind to the peripheral address.
    pub async fn new(address: &str, metadata: DeviceMetadata) -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or(TransportError::AdapterUnavailable)?;
        adapter.wait_available().await?;

        Ok(Self {
            adapter,
            address: address.to_string(),
            metadata,
            device: Mutex::new(None),
            notify_task: Mutex::new(None),
        })
    }

    async fn discover_device(&self) -> Result<Device, TransportError> {
        let required_services = [self.metadata.service_uuid()];
        let scan = self
            .adapter
            .scan(&required_services)
            .await?
            .map(|adv| (adv.device.id().to_string(), adv.device));
        find_by_id(&self.address, scan, Duration::from_secs(DISCOVER_TIMEOUT_S)).await
    }

    async fn discover_notify_characteristic(
        &self,
        device: &Device,
    ) -> Result<Characteristic, TransportError> {
        let service = device
            .discover_services_with_uuid(self.metadata.service_uuid())
            .await?
            .first()
            .ok_or_else(|| TransportError::NotFound(self.address.clone()))?
            .clone();
        let notify = service
            .discover_characteristics_with_uuid(self.metadata.notify_uuid())
            .await?
            .first()
            .ok_or_else(|| TransportError::NotFound(self.address.clone()))?
            .clone();
        Ok(notify)
    }
}

/// Drain scan results until the target id shows up, under one overall
/// deadline. The service UUID is shared by common serial-over-BLE modules,
/// so unrelated peripherals may advertise continuously; their advertisements
/// must not extend the deadline.
async fn find_by_id<S, T>(address: &str, mut scan: S, deadline: Duration) -> Result<T, TransportError>
where
    S: Stream<Item = (String, T)> + Unpin,
{
    let not_found = || TransportError::NotFound(address.to_string());
    timeout(deadline, async {
        while let Some((id, device)) = scan.next().await {
            if id.eq_ignore_ascii_case(address) {
                return Ok(device);
            }
        }
        // End of scan stream
        Err(not_found())
    })
    .await
    .map_err(|_| not_found())?
}

#[async_trait]
impl Transport for BleTransport {
    async fn resolve(&self) -> Result<(), TransportError> {
        let device = self.discover_device().await?;
        *self.device.lock().await = Some(device);
        Ok(())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let guard = self.device.lock().await;
        let device = guard.as_ref().ok_or(TransportError::NotConnected)?;
        self.adapter.connect_device(device).await?;
        Ok(())
    }

    async fn subscribe(&self, sink: NotificationSink) -> Result<(), TransportError> {
        let guard = self.device.lock().await;
        let device = guard.as_ref().ok_or(TransportError::NotConnected)?;
        let notify = self.discover_notify_characteristic(device).await?;

        // Pump the notification stream into the sink until unsubscribed or
        // the stream ends. Dropping the stream tears down the subscription.
        let handle = tokio::spawn(async move {
            let stream = match notify.notify().await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(%err, "failed to start notifications");
                    return;
                }
            };
            futures_util::pin_mut!(stream);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(data) => sink(&data),
                    Err(err) => {
                        tracing::debug!(%err, "notification error");
                    }
                }
            }
            tracing::debug!("end of notification stream");
        });

        let mut task = self.notify_task.lock().await;
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        if let Some(handle) = self.notify_task.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let guard = self.device.lock().await;
        let device = guard.as_ref().ok_or(TransportError::NotConnected)?;
        self.adapter.disconnect_device(device).await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.device.lock().await.as_ref() {
            Some(device) => device.is_connected().await,
            None => false,
        }
    }
}


#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Scripted transport for connection and poll cycle tests.
    pub(crate) struct MockTransport {
        pub present: AtomicBool,
        pub connect_ok: AtomicBool,
        pub connected: AtomicBool,
        pub connect_attempts: AtomicUsize,
        pub connect_delay: StdMutex<Duration>,
        pub unsubscribe_ok: AtomicBool,
        pub unsubscribe_calls: AtomicUsize,
        pub disconnect_calls: AtomicUsize,
        sink: StdMutex<Option<NotificationSink>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                present: AtomicBool::new(true),
                connect_ok: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                connect_attempts: AtomicUsize::new(0),
                connect_delay: StdMutex::new(Duration::ZERO),
                unsubscribe_ok: AtomicBool::new(true),
                unsubscribe_calls: AtomicUsize::new(0),
                disconnect_calls: AtomicUsize::new(0),
                sink: StdMutex::new(None),
            }
        }

        /// Push bytes through the subscribed sink, as a notification would.
        pub fn notify(&self, data: &[u8]) {
            let sink = self.sink.lock().unwrap().clone();
            if let Some(sink) = sink {
                sink(data);
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn resolve(&self) -> Result<(), TransportError> {
            if self.present.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(TransportError::NotFound("mock".to_string()))
            }
        }

        async fn connect(&self) -> Result<(), TransportError> {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            let delay = *self.connect_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.connect_ok.load(Ordering::SeqCst) {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                Err(TransportError::NotConnected)
            }
        }

        async fn subscribe(&self, sink: NotificationSink) -> Result<(), TransportError> {
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        async fn unsubscribe(&self) -> Result<(), TransportError> {
            self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock().unwrap() = None;
            if self.unsubscribe_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(TransportError::NotConnected)
            }
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }
}
