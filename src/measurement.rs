use std::time::SystemTime;

/// A single reading reported by the oximeter
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Whether a finger is currently inserted in the sensor
    pub finger_present: bool,
    /// Blood oxygen saturation in %. None if the device reports no valid value
    pub spo2: Option<u8>,
    /// Pulse rate in bpm. None if the device reports no valid value
    pub pulse: Option<u8>,
    /// Perfusion index in %. None if the device reports no valid value
    pub perfusion_index: Option<f32>,
    /// When this measurement was decoded
    pub timestamp: SystemTime,
}

impl Measurement {
    /// A well-formed placeholder published before the first frame arrives
    pub fn empty() -> Self {
        Self {
            finger_present: false,
            spo2: None,
            pulse: None,
            perfusion_index: None,
            timestamp: SystemTime::now(),
        }
    }
}
