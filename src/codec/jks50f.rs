use std::time::SystemTime;

use crate::codec::{DeviceMetadata, FrameCodec};
use crate::error::DecodeError;
use crate::measurement::Measurement;

pub(crate) const MODEL: &str = "JKS50F";

/// The N/A value for the SpO2 and pulse rate bytes
const VITALS_NA_VALUE: u8 = 127;
/// The raw 13-bit perfusion index N/A pattern. Decodes to exactly 81.91
const PI_NA_RAW: u16 = 0x1FFF;
/// Perfusion index readings above this are not physiologically plausible
const PI_MAX_PLAUSIBLE: f32 = 20.0;

const METADATA: DeviceMetadata = DeviceMetadata {
    manufacturer: "Guangdong Health Medical Technology Co., Ltd.",
    model: MODEL,
    frame_header: &[0xff, 0x44, 0x01],
    frame_length: 69,
    service_uuid: "0000ffe0-0000-1000-8000-00805f9b34fb",
    notify_uuid: "0000ffe1-0000-1000-8000-00805f9b34fb",
    // All registered OUIs for Nanjing Qinheng Microelectronics Co., Ltd.
    // Source: IEEE OUI database (https://standards-oui.ieee.org/)
    supported_ouis: &[
        "DC045A", "5414A7", "E04E7A", "0C3D5E", "701988", "C817F5", "50547B", "5C5310",
    ],
};

/// Codec for the JKS50F fingertip pulse oximeter.
///
/// The device streams 69-byte frames over a notify characteristic. Each
/// frame starts with `FF 44 01`, carries the vitals in bytes 3..=7 and ends
/// in a single additive checksum byte.
pub struct Jks50f;

impl FrameCodec for Jks50f {
    fn metadata(&self) -> &DeviceMetadata {
        &METADATA
    }

    /// Checksum is `(sum of all bytes except the last, + 1) & 0xFF`,
    /// compared against the last byte of the frame.
    fn verify_checksum(&self, frame: &[u8]) -> bool {
        let Some((&checksum, data)) = frame.split_last() else {
            return false;
        };
        if data.is_empty() {
            return false;
        }
        let sum: u32 = data.iter().map(|&b| u32::from(b)).sum();
        ((sum + 1) & 0xff) as u8 == checksum
    }

    fn decode(&self, frame: &[u8]) -> Result<Measurement, DecodeError> {
        if frame.len() < 8 {
            return Err(DecodeError::TooShort { len: frame.len() });
        }

        // Byte 3: finger flag (0 = finger present, nonzero = no finger)
        let finger_present = frame[3] == 0;

        let spo2 = match frame[4] {
            VITALS_NA_VALUE => None,
            v => Some(v),
        };

        let pulse = match frame[5] {
            VITALS_NA_VALUE => None,
            v => Some(v),
        };

        // Perfusion index: 13 bits packed across bytes 6 and 7, in 1/100 %
        let pi_raw = u16::from(frame[6] & 0x7f) | (u16::from(frame[7] & 0x3f) << 7);
        let pi = pi_raw as f32 / 100.0;
        let perfusion_index = if pi_raw == PI_NA_RAW || pi > PI_MAX_PLAUSIBLE {
            None
        } else {
            Some(pi)
        };

        Ok(Measurement {
            finger_present,
            spo2,
            pulse,
            perfusion_index,
            timestamp: SystemTime::now(),
        })
    }
}
