//! Outbound frame encoding.
//!
//! [`FrameWriter`] encodes frames straight into one `BytesMut` so that a
//! burst of performatives produced during a single engine call leaves as
//! one contiguous buffer. The caller drains it with [`FrameWriter::take`].
//!
//! # Transfer splitting
//!
//! ```text
//! payload ──► [Transfer more=true | chunk] [Transfer more=true | chunk] [Transfer more=<caller> | tail]
//! ```
//!
//! Every fragment repeats the caller's Transfer fields. Only the last
//! fragment carries the caller's `more` flag; all earlier ones set it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{encode_value, Encoder, Value};
use crate::error::{EngineError, Result};
use crate::protocol::{frame_type, FrameHeader, ProtocolHeader, FRAME_HEADER_SIZE};
use crate::types::{Performative, SaslPerformative, Transfer};

/// Encodes outbound frames into a batched byte buffer.
pub struct FrameWriter {
    out: BytesMut,
    /// Largest frame the peer accepts.
    max_frame_size: u32,
    frames_written: u64,
}

impl FrameWriter {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            out: BytesMut::with_capacity(4096),
            max_frame_size,
            frames_written: 0,
        }
    }

    /// Apply the max-frame-size from the peer's Open.
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    #[inline]
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub fn write_protocol_header(&mut self, header: ProtocolHeader) {
        tracing::trace!("write protocol header {:?}", header);
        self.out.put_slice(&header.encode());
    }

    /// Write an AMQP frame without payload.
    pub fn write_performative(&mut self, channel: u16, performative: &Performative) -> Result<()> {
        tracing::trace!("write {} on channel {}", performative.name(), channel);
        self.write_frame(frame_type::AMQP, channel, &performative.to_value(), &[])
    }

    /// Write a SASL frame (always channel 0).
    pub fn write_sasl(&mut self, performative: &SaslPerformative) -> Result<()> {
        tracing::trace!("write {}", performative.name());
        self.write_frame(frame_type::SASL, 0, &performative.to_value(), &[])
    }

    /// Write an empty frame, used as a heartbeat.
    pub fn write_empty_frame(&mut self) {
        let header = FrameHeader::new(FRAME_HEADER_SIZE as u32, frame_type::AMQP, 0);
        self.out.put_slice(&header.encode());
    }

    /// Write as much of `payload` as fits into at most `frame_limit` frames.
    ///
    /// The written prefix is consumed from `payload`; whatever remains must
    /// be passed again on a later call. Returns the number of frames written.
    ///
    /// # Errors
    ///
    /// `FrameSizeExceeded` if the Transfer performative leaves no room for
    /// payload within the max-frame-size.
    pub fn write_transfer(
        &mut self,
        channel: u16,
        transfer: &Transfer,
        payload: &mut Bytes,
        frame_limit: u32,
    ) -> Result<u32> {
        let mut fragment = transfer.clone();
        fragment.more = true;
        let partial = encode_value(&Performative::Transfer(fragment).to_value())?;
        let last = encode_value(&Performative::Transfer(transfer.clone()).to_value())?;

        let max = self.max_frame_size as usize;
        let partial_overhead = FRAME_HEADER_SIZE + partial.len();
        let last_overhead = FRAME_HEADER_SIZE + last.len();
        if last_overhead > max || (partial_overhead >= max && last_overhead + payload.len() > max) {
            return Err(EngineError::FrameSizeExceeded {
                size: partial_overhead.max(last_overhead),
                max: self.max_frame_size,
            });
        }

        let mut written = 0;
        while written < frame_limit {
            if last_overhead + payload.len() <= max {
                let tail = payload.split_to(payload.len());
                self.put_frame(frame_type::AMQP, channel, &last, &tail);
                written += 1;
                break;
            }
            let chunk = payload.split_to(max - partial_overhead);
            self.put_frame(frame_type::AMQP, channel, &partial, &chunk);
            written += 1;
        }
        tracing::trace!(
            "write Transfer on channel {} as {} frame(s), {} bytes left",
            channel,
            written,
            payload.remaining()
        );
        Ok(written)
    }

    /// Take all encoded bytes written so far.
    pub fn take(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    /// Number of encoded bytes not yet taken.
    #[inline]
    pub fn pending_bytes(&self) -> usize {
        self.out.len()
    }

    #[inline]
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn write_frame(&mut self, kind: u8, channel: u16, body: &Value, payload: &[u8]) -> Result<()> {
        let start = self.out.len();
        self.out.put_slice(&[0u8; FRAME_HEADER_SIZE]);
        if let Err(e) = Encoder::new(&mut self.out).write(body) {
            self.out.truncate(start);
            return Err(e.into());
        }
        self.out.put_slice(payload);

        let size = self.out.len() - start;
        if size > self.max_frame_size as usize {
            self.out.truncate(start);
            return Err(EngineError::FrameSizeExceeded {
                size,
                max: self.max_frame_size,
            });
        }
        FrameHeader::new(size as u32, kind, channel).encode_into(&mut self.out[start..]);
        self.frames_written += 1;
        Ok(())
    }

    fn put_frame(&mut self, kind: u8, channel: u16, body: &[u8], payload: &[u8]) {
        let size = FRAME_HEADER_SIZE + body.len() + payload.len();
        self.out.reserve(size);
        self.out
            .put_slice(&FrameHeader::new(size as u32, kind, channel).encode());
        self.out.put_slice(body);
        self.out.put_slice(payload);
        self.frames_written += 1;
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new(crate::protocol::MIN_MAX_FRAME_SIZE)
    }
}
