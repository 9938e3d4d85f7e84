//! Error types for the connection and decode layers.
//!
//! Nothing here is fatal to the process. Transport and connection errors are
//! retried on the next poll tick; frame-level errors are absorbed inside
//! [`crate::DeviceSession::try_extract`] and reduced to "no measurement this
//! tick". The only hard setup-time failure is an unrecognized device model.

use thiserror::Error;

/// Errors produced by the transport seam.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("default bluetooth adapter not found")]
    AdapterUnavailable,

    /// The peripheral is not currently visible on the air.
    #[error("peripheral {0} not found")]
    NotFound(String),

    #[error("not connected")]
    NotConnected,

    #[error("connect attempt timed out")]
    Timeout,

    #[error(transparent)]
    Ble(#[from] bluest::Error),
}

/// Errors surfaced by [`crate::ConnectionManager`] and client construction.
#[derive(Debug, Error)]
pub enum Error {
    /// The peripheral is unreachable. Expected steady state for a battery
    /// device that is switched off; retried on the next tick.
    #[error("device is unavailable: {0}")]
    TransportUnavailable(#[source] TransportError),

    /// The connect retry budget was exhausted. Retried on the next tick.
    #[error("connection failed after {attempts} attempts: {source}")]
    ConnectionFailed {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// No codec is registered for the requested device model.
    #[error("unknown device model: {0}")]
    UnknownModel(String),

    /// A registered codec declares a malformed UUID in its metadata.
    #[error("invalid metadata for model {model}: bad uuid {uuid:?}")]
    InvalidMetadata { model: String, uuid: String },
}

/// A frame passed its checksum but a field could not be decoded.
///
/// Always caught by the session; a malformed frame is an expected
/// steady-state condition on a wireless link.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
}
