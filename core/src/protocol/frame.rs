/// TLV frame codec — transport layer framing bounded by the negotiated MTU

use thiserror::Error;

/// Frame header: 1 byte type + 2 byte little-endian length
pub const FRAME_HEADER_SIZE: usize = 3;

/// Default ATT MTU before negotiation
pub const DEFAULT_MTU: usize = 23;

/// Errors for frame encoding
///
/// Decoding has no error type: malformed or incomplete input is a
/// recoverable condition and `decode` reports it by returning `None`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too large: {size} bytes exceeds ceiling of {ceiling}")]
    PayloadTooLarge { size: usize, ceiling: usize },
    #[error("Transport unit too small: {mtu} bytes cannot carry a frame header")]
    TransportUnitTooSmall { mtu: usize },
}

/// Closed message-type catalog
///
/// The catalog is versionable: receivers must decode unknown type bytes
/// structurally even when they cannot interpret the payload, so `decode`
/// yields the raw byte and `from_u8` is a separate interpretation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Keepalive (0x01)
    Heartbeat = 0x01,
    /// UTF-8 text payload (0x02)
    Text = 0x02,
    /// Sensor sample (0x03)
    SensorSample = 0x03,
    /// Control command (0x04)
    ControlCommand = 0x04,
    /// Acknowledgement (0x05)
    Ack = 0x05,
    /// Error report (0x06)
    Error = 0x06,
}

impl MessageType {
    /// Interpret a raw type byte, `None` for types outside the catalog
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MessageType::Heartbeat),
            0x02 => Some(MessageType::Text),
            0x03 => Some(MessageType::SensorSample),
            0x04 => Some(MessageType::ControlCommand),
            0x05 => Some(MessageType::Ack),
            0x06 => Some(MessageType::Error),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Payload ceiling derived from the negotiated transport unit size
///
/// ceiling = mtu - 3 (header) - reserved margin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCeiling {
    mtu: usize,
    reserved: usize,
}

impl FrameCeiling {
    /// Build a ceiling from a negotiated MTU with no reserved margin
    pub fn from_mtu(mtu: usize) -> Result<Self, FrameError> {
        Self::with_reserved(mtu, 0)
    }

    /// Build a ceiling reserving `reserved` bytes below the MTU
    pub fn with_reserved(mtu: usize, reserved: usize) -> Result<Self, FrameError> {
        if mtu < FRAME_HEADER_SIZE + reserved + 1 {
            return Err(FrameError::TransportUnitTooSmall { mtu });
        }
        Ok(Self { mtu, reserved })
    }

    /// Maximum payload bytes a single frame may carry
    ///
    /// The wire length field is a u16, so the ceiling never exceeds 65535
    /// regardless of how large a transport unit the radio stack reports.
    pub fn max_payload(&self) -> usize {
        (self.mtu - FRAME_HEADER_SIZE - self.reserved).min(u16::MAX as usize)
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }
}

impl Default for FrameCeiling {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            reserved: 0,
        }
    }
}

/// A decoded frame: raw type byte, declared length, payload copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub frame_type: u8,
    pub length: u16,
    pub payload: Vec<u8>,
}

impl DecodedFrame {
    /// Catalog interpretation of the raw type byte, if any
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.frame_type)
    }

    /// Total bytes this frame occupied on the wire
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.length as usize
    }
}

/// Encode a frame: [type:1][length:2 LE][payload]
///
/// Fails with `PayloadTooLarge` when the payload exceeds the ceiling.
pub fn encode(
    frame_type: u8,
    payload: &[u8],
    ceiling: FrameCeiling,
) -> Result<Vec<u8>, FrameError> {
    let max = ceiling.max_payload();
    if payload.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            ceiling: max,
        });
    }

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.push(frame_type);
    // payload.len() <= max_payload() <= u16::MAX, checked above
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode one frame from the front of `data`
///
/// Returns `None` when fewer than 3 bytes are available or the declared
/// length exceeds the remaining buffer. Incomplete input is not an error:
/// on a streaming transport the caller waits for more bytes, on a
/// message-bounded transport it discards.
pub fn decode(data: &[u8]) -> Option<DecodedFrame> {
    if data.len() < FRAME_HEADER_SIZE {
        return None;
    }

    let frame_type = data[0];
    let length = u16::from_le_bytes([data[1], data[2]]);

    let end = FRAME_HEADER_SIZE + length as usize;
    if data.len() < end {
        return None;
    }

    Some(DecodedFrame {
        frame_type,
        length,
        payload: data[FRAME_HEADER_SIZE..end].to_vec(),
    })
}
