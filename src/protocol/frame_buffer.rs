//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented input:
//! - `AwaitingProtocolHeader`: Need 8 bytes of protocol header
//! - `AwaitingFrameHeader`: Need 8 bytes of fixed frame header
//! - `AwaitingFrameBody`: Header parsed, need the rest of the frame
//!
//! Empty frames (heartbeats) are counted and dropped. After a SASL exchange
//! the peer sends a second protocol header; call [`FrameBuffer::expect_header`]
//! before extracting further units.
//!
//! # Example
//!
//! ```
//! use amqp_engine::protocol::{FrameBuffer, Inbound, ProtocolHeader};
//!
//! let mut buffer = FrameBuffer::new();
//! let mut bytes = ProtocolHeader::AMQP.encode().to_vec();
//! bytes.extend_from_slice(&[0, 0, 0, 8, 2, 0, 0, 0]); // heartbeat
//!
//! let units = buffer.push(&bytes).unwrap();
//! assert_eq!(units, vec![Inbound::Header(ProtocolHeader::AMQP)]);
//! assert_eq!(buffer.empty_frames(), 1);
//! ```

use bytes::BytesMut;

use super::frame::{Frame, Inbound};
use super::wire_format::{FrameHeader, ProtocolHeader, MIN_MAX_FRAME_SIZE, PROTOCOL_HEADER_SIZE};
use crate::error::Result;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    AwaitingProtocolHeader,
    AwaitingFrameHeader,
    AwaitingFrameBody { header: FrameHeader },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_frame_size: u32,
    empty_frames: u64,
    frames_read: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer that first expects a protocol header.
    ///
    /// Frames are limited to 512 bytes until [`set_max_frame_size`](Self::set_max_frame_size).
    pub fn new() -> Self {
        Self::with_max_frame_size(MIN_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::AwaitingProtocolHeader,
            max_frame_size,
            empty_frames: 0,
            frames_read: 0,
        }
    }

    /// Push data into the buffer and extract all complete units.
    ///
    /// Callers that must react to a unit before the next one is parsed (the
    /// SASL gate does) use [`extend`](Self::extend) and
    /// [`try_extract_one`](Self::try_extract_one) instead.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Inbound>> {
        self.buffer.extend_from_slice(data);

        let mut units = Vec::new();
        while let Some(unit) = self.try_extract_one()? {
            units.push(unit);
        }
        Ok(units)
    }

    /// Append data to the buffer without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract a single header or frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(unit))` if a complete unit was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a malformed header, oversized frame or undecodable body
    pub fn try_extract_one(&mut self) -> Result<Option<Inbound>> {
        loop {
            match &self.state {
                State::AwaitingProtocolHeader => {
                    if self.buffer.len() < PROTOCOL_HEADER_SIZE {
                        return Ok(None);
                    }
                    let header = ProtocolHeader::decode(&self.buffer[..PROTOCOL_HEADER_SIZE])?;
                    let _ = self.buffer.split_to(PROTOCOL_HEADER_SIZE);
                    self.state = State::AwaitingFrameHeader;
                    tracing::trace!("read protocol header {:?}", header);
                    return Ok(Some(Inbound::Header(header)));
                }

                State::AwaitingFrameHeader => {
                    let Some(header) = FrameHeader::decode(&self.buffer) else {
                        return Ok(None);
                    };
                    header.validate(self.max_frame_size)?;
                    self.state = State::AwaitingFrameBody { header };
                }

                State::AwaitingFrameBody { header } => {
                    let header = *header;
                    let size = header.size as usize;
                    if self.buffer.len() < size {
                        return Ok(None);
                    }
                    let mut frame = self.buffer.split_to(size).freeze();
                    self.state = State::AwaitingFrameHeader;

                    let body = frame.split_off(header.body_offset());
                    if body.is_empty() {
                        self.empty_frames += 1;
                        tracing::trace!("empty frame on channel {}", header.channel);
                        continue;
                    }
                    self.frames_read += 1;
                    let frame = Frame::decode(&header, body)?;
                    tracing::trace!(
                        "read {} on channel {} ({} bytes)",
                        frame.body.name(),
                        frame.channel,
                        frame.frame_size
                    );
                    return Ok(Some(Inbound::Frame(frame)));
                }
            }
        }
    }

    /// Require a new protocol header before the next frame.
    pub fn expect_header(&mut self) {
        self.state = State::AwaitingProtocolHeader;
    }

    /// Largest frame accepted from the peer.
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    #[inline]
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Number of empty (heartbeat) frames seen.
    #[inline]
    pub fn empty_frames(&self) -> u64 {
        self.empty_frames
    }

    /// Number of non-empty frames decoded.
    #[inline]
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and drop any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        if matches!(self.state, State::AwaitingFrameBody { .. }) {
            self.state = State::AwaitingFrameHeader;
        }
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::AwaitingProtocolHeader => "AwaitingProtocolHeader",
            State::AwaitingFrameHeader => "AwaitingFrameHeader",
            State::AwaitingFrameBody { .. } => "AwaitingFrameBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_value;
    use crate::error::EngineError;
    use crate::protocol::{frame_type, FRAME_HEADER_SIZE};
    use crate::types::{Begin, Close, Performative};

    fn make_frame_bytes(channel: u16, performative: &Performative, payload: &[u8]) -> Vec<u8> {
        let body = encode_value(&performative.to_value()).unwrap();
        let size = (FRAME_HEADER_SIZE + body.len() + payload.len()) as u32;
        let mut bytes = FrameHeader::new(size, frame_type::AMQP, channel).encode().to_vec();
        bytes.extend_from_slice(&body);
        bytes.extend_from_slice(payload);
        bytes
    }

    fn opened() -> FrameBuffer {
        let mut buffer = FrameBuffer::with_max_frame_size(65536);
        buffer.push(&ProtocolHeader::AMQP.encode()).unwrap();
        buffer
    }

    fn close() -> Performative {
        Performative::Close(Close::default())
    }

    #[test]
    fn test_header_then_frame() {
        let mut buffer = FrameBuffer::with_max_frame_size(65536);
        let mut bytes = ProtocolHeader::AMQP.encode().to_vec();
        bytes.extend(make_frame_bytes(0, &close(), b""));

        let units = buffer.push(&bytes).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], Inbound::Header(ProtocolHeader::AMQP));
        match &units[1] {
            Inbound::Frame(frame) => assert_eq!(frame.performative(), Some(&close())),
            other => panic!("unexpected {:?}", other),
        }
        assert!(buffer.is_empty());
        assert_eq!(buffer.frames_read(), 1);
    }

    #[test]
    fn test_bad_protocol_header() {
        let mut buffer = FrameBuffer::new();
        let err = buffer.push(b"AMQP\x09\x01\x00\x00").unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = opened();
        let begin = Performative::Begin(Begin::default());
        let mut combined = make_frame_bytes(1, &begin, b"");
        combined.extend(make_frame_bytes(2, &begin, b""));
        combined.extend(make_frame_bytes(0, &close(), b""));

        let units = buffer.push(&combined).unwrap();
        assert_eq!(units.len(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header_and_body() {
        let mut buffer = opened();
        let bytes = make_frame_bytes(0, &close(), b"");

        assert!(buffer.push(&bytes[..5]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "AwaitingFrameHeader");
        assert!(buffer.push(&bytes[5..9]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "AwaitingFrameBody");
        assert_eq!(buffer.push(&bytes[9..]).unwrap().len(), 1);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::with_max_frame_size(65536);
        let mut bytes = ProtocolHeader::AMQP.encode().to_vec();
        bytes.extend(make_frame_bytes(0, &close(), b""));

        let mut units = Vec::new();
        for byte in &bytes {
            units.extend(buffer.push(&[*byte]).unwrap());
        }
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn test_heartbeat_counted_not_yielded() {
        let mut buffer = opened();
        let heartbeat = FrameHeader::new(8, frame_type::AMQP, 0).encode();
        let units = buffer.push(&heartbeat).unwrap();
        assert!(units.is_empty());
        assert_eq!(buffer.empty_frames(), 1);
        assert_eq!(buffer.frames_read(), 0);
    }

    #[test]
    fn test_extended_header_skipped() {
        let mut buffer = opened();
        let body = encode_value(&close().to_value()).unwrap();
        let mut header = FrameHeader::new((16 + body.len()) as u32, frame_type::AMQP, 0);
        header.doff = 4;
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&[0xff; 8]);
        bytes.extend_from_slice(&body);

        let units = buffer.push(&bytes).unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buffer = FrameBuffer::with_max_frame_size(512);
        buffer.push(&ProtocolHeader::AMQP.encode()).unwrap();
        let header = FrameHeader::new(1000, frame_type::AMQP, 0).encode();
        let err = buffer.push(&header).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_expect_header_after_sasl() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&ProtocolHeader::SASL.encode()).unwrap();
        buffer.expect_header();
        assert_eq!(buffer.state_name(), "AwaitingProtocolHeader");
        let units = buffer.push(&ProtocolHeader::AMQP.encode()).unwrap();
        assert_eq!(units, vec![Inbound::Header(ProtocolHeader::AMQP)]);
    }

    #[test]
    fn test_transfer_payload_is_sliced() {
        let mut buffer = opened();
        let transfer = Performative::Transfer(crate::types::Transfer {
            handle: 0,
            delivery_id: Some(1),
            ..Default::default()
        });
        let units = buffer.push(&make_frame_bytes(1, &transfer, b"abc")).unwrap();
        match &units[0] {
            Inbound::Frame(frame) => {
                assert_eq!(frame.payload.as_deref(), Some(&b"abc"[..]));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
