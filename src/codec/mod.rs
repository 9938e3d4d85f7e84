//! Per-model frame codecs.
//!
//! Each supported oximeter model provides a [`FrameCodec`] implementation
//! describing its wire protocol: the fixed frame header, the fixed frame
//! length, the checksum rule and the field layout. A codec is a pure
//! function of a single frame of the declared length; it holds no session
//! state and can be swapped per device model.
//!
//! To add a new model, implement [`FrameCodec`] in a new file in this
//! directory and register it in [`codec_for_model`].

pub(crate) mod jks50f;

pub use jks50f::Jks50f;

use crate::error::{DecodeError, Error};
use crate::measurement::Measurement;
use bluest::Uuid;

/// Model names accepted by [`codec_for_model`].
pub const SUPPORTED_MODELS: &[&str] = &[jks50f::MODEL];

/// Static metadata describing one oximeter model.
#[derive(Debug, Clone)]
pub struct DeviceMetadata {
    pub manufacturer: &'static str,
    pub model: &'static str,
    /// Fixed bytes that mark the start of every frame
    pub frame_header: &'static [u8],
    /// Total length of one frame in bytes, checksum included
    pub frame_length: usize,
    pub service_uuid: &'static str,
    pub notify_uuid: &'static str,
    /// MAC OUI prefixes (first 6 hex digits) registered to the manufacturer,
    /// used to pre-filter discovery
    pub supported_ouis: &'static [&'static str],
}

impl DeviceMetadata {
    /// Parsed service UUID.
    ///
    /// Panics on a malformed UUID string; [`codec_for_model`] validates
    /// registered codecs up front so this cannot fire for them.
    pub fn service_uuid(&self) -> Uuid {
        Uuid::parse_str(self.service_uuid).unwrap()
    }

    /// Parsed notify characteristic UUID. See [`Self::service_uuid`].
    pub fn notify_uuid(&self) -> Uuid {
        Uuid::parse_str(self.notify_uuid).unwrap()
    }

    /// Reject metadata whose UUID strings do not parse.
    fn validate(&self) -> Result<(), Error> {
        for raw in [self.service_uuid, self.notify_uuid] {
            if Uuid::parse_str(raw).is_err() {
                return Err(Error::InvalidMetadata {
                    model: self.model.to_string(),
                    uuid: raw.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether the given MAC address starts with one of the model's OUIs.
    pub fn matches_oui(&self, address: &str) -> bool {
        let prefix: String = address
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .take(6)
            .collect::<String>()
            .to_ascii_uppercase();
        self.supported_ouis.iter().any(|oui| *oui == prefix)
    }
}

/// Protocol rules for one device model.
pub trait FrameCodec: Send + Sync {
    fn metadata(&self) -> &DeviceMetadata;

    /// Verify the checksum of a complete candidate frame.
    fn verify_checksum(&self, frame: &[u8]) -> bool;

    /// Decode the fields of a checksum-verified frame.
    fn decode(&self, frame: &[u8]) -> Result<Measurement, DecodeError>;
}

/// Resolve the codec for a device model name.
///
/// This is the one hard setup-time failure in the crate: a model with no
/// registered codec cannot be polled at all.
pub fn codec_for_model(model: &str) -> Result<Box<dyn FrameCodec>, Error> {
    let codec: Box<dyn FrameCodec> = match model {
        jks50f::MODEL => Box::new(Jks50f),
        other => return Err(Error::UnknownModel(other.to_string())),
    };
    codec.metadata().validate()?;
    Ok(codec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_for_known_model() {
        let codec = codec_for_model("JKS50F").unwrap();
        assert_eq!(codec.metadata().model, "JKS50F");
    }

    #[test]
    fn test_codec_for_unknown_model() {
        let result = codec_for_model("NONSUCH");
        assert!(matches!(result, Err(Error::UnknownModel(m)) if m == "NONSUCH"));
    }

    #[test]
    fn test_registered_codecs_have_valid_metadata() {
        for model in SUPPORTED_MODELS {
            assert!(codec_for_model(model).is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_malformed_uuid() {
        let meta = DeviceMetadata {
            manufacturer: "Test",
            model: "TEST",
            frame_header: &[0xff],
            frame_length: 8,
            service_uuid: "not-a-uuid",
            notify_uuid: "0000ffe1-0000-1000-8000-00805f9b34fb",
            supported_ouis: &[],
        };
        assert!(matches!(meta.validate(), Err(Error::InvalidMetadata { .. })));
    }

    #[test]
    fn test_matches_oui() {
        let codec = codec_for_model("JKS50F").unwrap();
        let meta = codec.metadata();
        assert!(meta.matches_oui("E0:4E:7A:12:34:56"));
        assert!(meta.matches_oui("e0:4e:7a:ab:cd:ef"));
        assert!(!meta.matches_oui("AA:BB:CC:12:34:56"));
    }
}
