/// Payload chunking and stream reassembly over the TLV frame codec

use super::frame::{self, DecodedFrame, FrameCeiling, FrameError, FRAME_HEADER_SIZE};

/// Splits application payloads into MTU-bounded frames
pub struct Chunker;

impl Chunker {
    /// Split `data` into encoded frames of the given type, each no larger
    /// than the negotiated transport unit. Empty data yields one empty frame
    /// so the receiver still observes the message boundary.
    pub fn split(
        frame_type: u8,
        data: &[u8],
        ceiling: FrameCeiling,
    ) -> Result<Vec<Vec<u8>>, FrameError> {
        let max_payload = ceiling.max_payload();

        if data.is_empty() {
            return Ok(vec![frame::encode(frame_type, &[], ceiling)?]);
        }

        data.chunks(max_payload)
            .map(|chunk| frame::encode(frame_type, chunk, ceiling))
            .collect()
    }

    /// Number of frames `split` would produce for `len` payload bytes
    pub fn frame_count(len: usize, ceiling: FrameCeiling) -> usize {
        if len == 0 {
            return 1;
        }
        len.div_ceil(ceiling.max_payload())
    }
}

/// Accumulates bytes from a streaming transport and yields complete frames
///
/// A partial trailing frame stays buffered until more bytes arrive; the
/// reassembler never treats it as an error.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append bytes received from the transport
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete frame, or `None` if the buffer holds only a
    /// partial frame (wait for more data)
    pub fn next_frame(&mut self) -> Option<DecodedFrame> {
        let decoded = frame::decode(&self.buffer)?;
        self.buffer.drain(..decoded.wire_size());
        Some(decoded)
    }

    /// Bytes buffered but not yet consumed as a complete frame
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Discard buffered bytes (message-bounded transports discard partials)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
