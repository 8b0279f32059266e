//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the frame layer:
//! - 8-byte protocol header validation (AMQP or SASL)
//! - 8-byte fixed frame header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct carrying a decoded performative and payload

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{Frame, FrameBody, Inbound};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    frame_type, protocol_id, FrameHeader, ProtocolHeader, FRAME_HEADER_SIZE, MIN_DOFF,
    MIN_MAX_FRAME_SIZE, PROTOCOL_HEADER_SIZE,
};
