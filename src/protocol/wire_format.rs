//! Wire format encoding and decoding.
//!
//! The stream opens with an 8-byte protocol header:
//! ```text
//! ┌────────┬─────────┬───────┬───────┬──────────┐
//! │ "AMQP" │ proto id│ major │ minor │ revision │
//! │ 4 bytes│ 1 byte  │ 1 byte│ 1 byte│ 1 byte   │
//! └────────┴─────────┴───────┴───────┴──────────┘
//! ```
//!
//! Every frame after it starts with an 8-byte fixed header:
//! ```text
//! ┌──────────┬──────┬──────┬──────────┐
//! │ Size     │ DOFF │ Type │ Channel  │
//! │ uint32 BE│1 byte│1 byte│ uint16 BE│
//! └──────────┴──────┴──────┴──────────┘
//! ```
//!
//! `Size` counts the whole frame including the fixed header. `DOFF` is the
//! body offset in 4-byte words; anything between byte 8 and `DOFF * 4` is
//! an extended header, which is skipped.

use crate::error::{EngineError, Result};

/// Protocol header size in bytes.
pub const PROTOCOL_HEADER_SIZE: usize = 8;

/// Fixed frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Smallest max-frame-size a peer may advertise.
pub const MIN_MAX_FRAME_SIZE: u32 = 512;

/// Minimum data offset (no extended header).
pub const MIN_DOFF: u8 = 2;

/// Frame type codes.
pub mod frame_type {
    pub const AMQP: u8 = 0x00;
    pub const SASL: u8 = 0x01;
}

/// Protocol ids carried in byte 4 of the protocol header.
pub mod protocol_id {
    pub const AMQP: u8 = 0;
    pub const SASL: u8 = 3;
}

/// The 8-byte protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    pub protocol_id: u8,
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

impl ProtocolHeader {
    /// `AMQP 0 1 0 0`
    pub const AMQP: ProtocolHeader = ProtocolHeader::new(protocol_id::AMQP);
    /// `AMQP 3 1 0 0`
    pub const SASL: ProtocolHeader = ProtocolHeader::new(protocol_id::SASL);

    const fn new(protocol_id: u8) -> Self {
        Self {
            protocol_id,
            major: 1,
            minor: 0,
            revision: 0,
        }
    }

    #[inline]
    pub fn is_sasl(&self) -> bool {
        self.protocol_id == protocol_id::SASL
    }

    /// Encode to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use amqp_engine::protocol::ProtocolHeader;
    ///
    /// assert_eq!(&ProtocolHeader::SASL.encode(), b"AMQP\x03\x01\x00\x00");
    /// ```
    pub fn encode(&self) -> [u8; PROTOCOL_HEADER_SIZE] {
        [
            b'A',
            b'M',
            b'Q',
            b'P',
            self.protocol_id,
            self.major,
            self.minor,
            self.revision,
        ]
    }

    /// Decode and validate a header, byte by byte.
    ///
    /// Only the AMQP and SASL headers for version 1.0.0 are accepted.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PROTOCOL_HEADER_SIZE {
            return Err(EngineError::violation(format!(
                "protocol header needs {} bytes, got {}",
                PROTOCOL_HEADER_SIZE,
                buf.len()
            )));
        }
        for (index, expected) in b"AMQP".iter().enumerate() {
            if buf[index] != *expected {
                return Err(EngineError::violation(format!(
                    "invalid protocol header byte {} (0x{:02x}), expected 0x{:02x}",
                    index, buf[index], expected
                )));
            }
        }
        let header = match buf[4] {
            protocol_id::AMQP => Self::AMQP,
            protocol_id::SASL => Self::SASL,
            other => {
                return Err(EngineError::violation(format!(
                    "unsupported protocol id {}",
                    other
                )))
            }
        };
        let version = [header.major, header.minor, header.revision];
        for (offset, expected) in version.iter().enumerate() {
            let actual = buf[5 + offset];
            if actual != *expected {
                return Err(EngineError::violation(format!(
                    "unsupported protocol version byte {} (0x{:02x}), expected 0x{:02x}",
                    5 + offset,
                    actual,
                    expected
                )));
            }
        }
        Ok(header)
    }
}

/// Decoded fixed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame size, header included.
    pub size: u32,
    /// Data offset in 4-byte words.
    pub doff: u8,
    /// Frame type (see [`frame_type`]).
    pub frame_type: u8,
    pub channel: u16,
}

impl FrameHeader {
    pub fn new(size: u32, frame_type: u8, channel: u16) -> Self {
        Self {
            size,
            doff: MIN_DOFF,
            frame_type,
            channel,
        }
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `FRAME_HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= FRAME_HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.size.to_be_bytes());
        buf[4] = self.doff;
        buf[5] = self.frame_type;
        buf[6..8].copy_from_slice(&self.channel.to_be_bytes());
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    #[inline]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            size: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            doff: buf[4],
            frame_type: buf[5],
            channel: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }

    /// Byte offset of the body from the start of the frame.
    #[inline]
    pub fn body_offset(&self) -> usize {
        usize::from(self.doff) * 4
    }

    /// Validate the header against the local max-frame-size.
    ///
    /// Checks:
    /// - DOFF is at least 2
    /// - Size covers the header and extended header
    /// - Size doesn't exceed max
    /// - Frame type is AMQP or SASL
    pub fn validate(&self, max_frame_size: u32) -> Result<()> {
        if self.doff < MIN_DOFF {
            return Err(EngineError::violation(format!(
                "frame data offset {} is below the minimum of {}",
                self.doff, MIN_DOFF
            )));
        }
        if (self.size as usize) < self.body_offset() {
            return Err(EngineError::violation(format!(
                "frame size {} is smaller than its data offset {}",
                self.size,
                self.body_offset()
            )));
        }
        if self.size > max_frame_size {
            return Err(EngineError::violation(format!(
                "frame size {} exceeds maximum {}",
                self.size, max_frame_size
            )));
        }
        if self.frame_type != frame_type::AMQP && self.frame_type != frame_type::SASL {
            return Err(EngineError::violation(format!(
                "unknown frame type 0x{:02x}",
                self.frame_type
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_header_bytes() {
        assert_eq!(&ProtocolHeader::AMQP.encode(), b"AMQP\x00\x01\x00\x00");
        assert_eq!(ProtocolHeader::decode(b"AMQP\x03\x01\x00\x00").unwrap(), ProtocolHeader::SASL);
        assert!(ProtocolHeader::SASL.is_sasl());
    }

    #[test]
    fn test_protocol_header_rejects_tls_and_versions() {
        // TLS id
        assert!(ProtocolHeader::decode(b"AMQP\x02\x01\x00\x00").is_err());
        // 0-10 style header
        assert!(ProtocolHeader::decode(b"AMQP\x01\x01\x00\x0a").is_err());
        assert!(ProtocolHeader::decode(b"AMQP\x00\x02\x00\x00").is_err());
        let err = ProtocolHeader::decode(b"HTTP/1.1").unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }

    #[test]
    fn test_frame_header_big_endian_byte_order() {
        let header = FrameHeader::new(0x0102_0304, frame_type::SASL, 0x0506);
        assert_eq!(header.encode(), [0x01, 0x02, 0x03, 0x04, 0x02, 0x01, 0x05, 0x06]);
        assert_eq!(FrameHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(FrameHeader::decode(&[0u8; 7]).is_none());
    }

    #[test]
    fn test_validate() {
        assert!(FrameHeader::new(8, frame_type::AMQP, 0).validate(512).is_ok());
        assert!(FrameHeader::new(513, frame_type::AMQP, 0).validate(512).is_err());
        assert!(FrameHeader::new(8, 0x07, 0).validate(512).is_err());

        let mut header = FrameHeader::new(8, frame_type::AMQP, 0);
        header.doff = 1;
        assert!(header.validate(512).is_err());
        header.doff = 4;
        assert!(header.validate(512).is_err());
        header.size = 16;
        assert!(header.validate(512).is_ok());
        assert_eq!(header.body_offset(), 16);
    }
}
