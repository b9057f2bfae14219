/// Binary message protocol carried over an established session
///
/// - **frame**: TLV frame codec ([type:1][length:2 LE][payload]) bounded by
///   the negotiated transport unit size
/// - **chunk**: payload chunking into MTU-sized frames and stream reassembly
///
/// The codec is a pure transform with no radio dependencies; everything in
/// this module is testable without hardware.

pub mod chunk;
pub mod frame;

pub use chunk::{Chunker, Reassembler};
pub use frame::{
    decode, encode, DecodedFrame, FrameCeiling, FrameError, MessageType, DEFAULT_MTU,
    FRAME_HEADER_SIZE,
};
