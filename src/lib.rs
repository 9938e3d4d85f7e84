//! Read live vital signs from certain models of fingertip pulse oximeter
//! over Bluetooth Low Energy.
//!
//! Tested with a JKS50F made by Guangdong Health Medical Technology. The
//! oximeter streams fixed-length binary frames over a GATT notify
//! characteristic with no length prefix and no framing guarantee, so this
//! crate reassembles the notification byte stream, re-synchronizes on the
//! frame header, validates the checksum and decodes each frame into a typed
//! [`Measurement`]:
//!
//! - Finger presence
//! - SpO2 (%)
//! - Pulse rate (bpm)
//! - Perfusion index (%)
//!
//! The connection lifecycle is managed independently of polling: a device
//! that is switched off (the normal state for a battery gadget) just means
//! the last known measurement keeps being served until it comes back.
//!
//! # Example
//!
//! ```no_run
//! # #[tokio::main]
//! # pub async fn main(){
//!     let client = oxiread::OximeterClient::new("E0:4E:7A:12:34:56", "JKS50F").await.unwrap();
//!     loop {
//!         let measurement = client.tick().await;
//!         println!("{measurement:?}");
//!         tokio::time::sleep(oxiread::POLL_INTERVAL).await;
//!     }
//! # }
//! ```

mod codec;
mod connection;
mod error;
mod measurement;
mod oximeter_client;
mod session;
mod transport;

pub use codec::{codec_for_model, DeviceMetadata, FrameCodec, Jks50f, SUPPORTED_MODELS};
pub use connection::ConnectionManager;
pub use error::{DecodeError, Error, TransportError};
pub use measurement::Measurement;
pub use oximeter_client::{OximeterClient, POLL_INTERVAL};
pub use session::{BufferInfo, DeviceSession};
pub use transport::{BleTransport, NotificationSink, Transport};
