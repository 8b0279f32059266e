//! Decoded frames.
//!
//! A frame is a channel number, one performative and, for Transfer, the
//! message bytes that follow it. The payload is a zero-copy slice of the
//! inbound buffer.
//!
//! # Example
//!
//! ```
//! use amqp_engine::protocol::{Frame, FrameBody};
//! use amqp_engine::types::{Close, Performative};
//!
//! let frame = Frame::amqp(0, Performative::Close(Close::default()));
//! assert!(matches!(frame.body, FrameBody::Amqp(Performative::Close(_))));
//! assert!(frame.payload.is_none());
//! ```

use bytes::Bytes;

use super::wire_format::{frame_type, FrameHeader, ProtocolHeader};
use crate::codec::Decoder;
use crate::error::Result;
use crate::types::{Performative, SaslPerformative};

/// Body of a non-empty frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    Amqp(Performative),
    Sasl(SaslPerformative),
}

impl FrameBody {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Amqp(p) => p.name(),
            Self::Sasl(p) => p.name(),
        }
    }
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub channel: u16,
    pub body: FrameBody,
    /// Bytes following the performative (Transfer only).
    pub payload: Option<Bytes>,
    /// Encoded size on the wire, header included. Zero for frames built locally.
    pub frame_size: u32,
}

impl Frame {
    pub fn amqp(channel: u16, performative: Performative) -> Self {
        Self {
            channel,
            body: FrameBody::Amqp(performative),
            payload: None,
            frame_size: 0,
        }
    }

    pub fn sasl(performative: SaslPerformative) -> Self {
        Self {
            channel: 0,
            body: FrameBody::Sasl(performative),
            payload: None,
            frame_size: 0,
        }
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Decode the body of a frame whose fixed header was already read.
    ///
    /// `body` starts at the data offset and runs to the end of the frame.
    pub fn decode(header: &FrameHeader, body: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(body);
        let value = decoder.read_value()?;
        let body = match header.frame_type {
            frame_type::SASL => FrameBody::Sasl(SaslPerformative::from_value(value)?),
            _ => FrameBody::Amqp(Performative::from_value(value)?),
        };
        let payload = if decoder.is_empty() {
            None
        } else {
            Some(decoder.rest())
        };
        Ok(Self {
            channel: header.channel,
            body,
            payload,
            frame_size: header.size,
        })
    }

    /// The AMQP performative, if this is an AMQP frame.
    #[inline]
    pub fn performative(&self) -> Option<&Performative> {
        match &self.body {
            FrameBody::Amqp(p) => Some(p),
            FrameBody::Sasl(_) => None,
        }
    }

    #[inline]
    pub fn is_sasl(&self) -> bool {
        matches!(self.body, FrameBody::Sasl(_))
    }

    /// Payload length, zero when absent.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }
}

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Header(ProtocolHeader),
    Frame(Frame),
}
