//! Reassembly of the raw notification byte stream into decoded measurements.
//!
//! BLE notifications arrive at arbitrary times and arbitrary sizes with no
//! relationship to frame boundaries, so the session accumulates bytes in a
//! bounded buffer and re-synchronizes on the codec's frame header. Corrupt
//! frames are an expected steady-state condition on a wireless link; they
//! are consumed and dropped, never surfaced as errors.

use crate::codec::FrameCodec;
use crate::measurement::Measurement;

/// Bounded byte accumulator for the notification stream.
///
/// Capacity is fixed at twice the codec's frame length. On overflow the
/// oldest bytes are dropped: for a live vital-sign stream a stale partial
/// frame is not worth preserving over fresher data.
struct FrameBuffer {
    data: Vec<u8>,
    max_size: usize,
}

impl FrameBuffer {
    fn new(frame_length: usize) -> Self {
        let max_size = 2 * frame_length;
        Self {
            data: Vec::with_capacity(max_size),
            max_size,
        }
    }

    fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.trim();
    }

    /// Keep only the newest `max_size` bytes.
    fn trim(&mut self) {
        if self.data.len() > self.max_size {
            let excess = self.data.len() - self.max_size;
            self.data.drain(..excess);
        }
    }

    /// Position of the first occurrence of `header`, if any.
    fn find_header(&self, header: &[u8]) -> Option<usize> {
        self.data.windows(header.len()).position(|w| w == header)
    }

    fn discard_prefix(&mut self, len: usize) {
        self.data.drain(..len);
    }

    /// Remove and return exactly `len` bytes from the front.
    fn take_frame(&mut self, len: usize) -> Vec<u8> {
        self.data.drain(..len).collect()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// Buffer state for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: usize,
    pub content_hex: String,
    pub max_size: usize,
}

/// One oximeter session: a frame buffer plus the codec for the device model.
///
/// The notification producer calls [`ingest`](Self::ingest); the poll cycle
/// calls [`try_extract`](Self::try_extract). Both are synchronous and cheap,
/// so the session can sit behind a plain mutex shared between the two.
pub struct DeviceSession {
    codec: Box<dyn FrameCodec>,
    buffer: FrameBuffer,
    last_measurement: Option<Measurement>,
}

impl DeviceSession {
    pub fn new(codec: Box<dyn FrameCodec>) -> Self {
        let buffer = FrameBuffer::new(codec.metadata().frame_length);
        Self {
            codec,
            buffer,
            last_measurement: None,
        }
    }

    /// Append incoming notification data to the buffer.
    ///
    /// Called from the notification handler; does no parsing.
    pub fn ingest(&mut self, data: &[u8]) {
        self.buffer.append(data);
    }

    /// Try to extract and decode one frame from the buffered data.
    ///
    /// Seeks the frame header, discarding any garbage before it, and waits
    /// (returns `None`) until a full frame's worth of bytes has arrived.
    /// A candidate frame is removed from the buffer unconditionally, even if
    /// it then fails the checksum or the decode — otherwise a stream of
    /// malformed frames sharing a valid header could stall the buffer
    /// forever.
    pub fn try_extract(&mut self) -> Option<Measurement> {
        let header = self.codec.metadata().frame_header;
        let frame_length = self.codec.metadata().frame_length;

        let idx = self.buffer.find_header(header)?;
        if idx > 0 {
            tracing::debug!(bytes = idx, "discarding garbage before frame header");
            self.buffer.discard_prefix(idx);
        }

        if self.buffer.len() < frame_length {
            // Not enough data yet
            return None;
        }

        let frame = self.buffer.take_frame(frame_length);

        // Guaranteed by the header seek above, but checked explicitly
        if !frame.starts_with(header) {
            return None;
        }

        if !self.codec.verify_checksum(&frame) {
            tracing::debug!(frame = %hex::encode(&frame), "checksum mismatch, frame dropped");
            return None;
        }

        match self.codec.decode(&frame) {
            Ok(measurement) => {
                self.last_measurement = Some(measurement.clone());
                Some(measurement)
            }
            Err(err) => {
                tracing::debug!(frame = %hex::encode(&frame), %err, "undecodable frame dropped");
                None
            }
        }
    }

    /// The last successfully decoded measurement, independent of the current
    /// poll cycle's outcome.
    pub fn last_measurement(&self) -> Option<&Measurement> {
        self.last_measurement.as_ref()
    }

    pub fn buffer_info(&self) -> BufferInfo {
        BufferInfo {
            size: self.buffer.len(),
            content_hex: hex::encode(&self.buffer.data),
            max_size: self.buffer.max_size,
        }
    }
}
