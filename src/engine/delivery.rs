//! Delivery lifecycle.
//!
//! ```text
//! created ──► partial* ──► complete | aborted ──► disposed ──► settled
//! ```
//!
//! Incoming deliveries accumulate payload across Transfer frames until a
//! frame arrives without `more`. An abort on any frame drops what was
//! gathered. Settlement on either side is terminal.

use bytes::{Bytes, BytesMut};

use crate::error::{EngineError, Result};
use crate::types::DeliveryState;

/// One message transfer on a link.
#[derive(Debug, Clone)]
pub struct Delivery {
    id: u32,
    tag: Bytes,
    message_format: u32,
    local_state: Option<DeliveryState>,
    remote_state: Option<DeliveryState>,
    locally_settled: bool,
    remotely_settled: bool,
    partial: bool,
    aborted: bool,
    payload: BytesMut,
    /// Payload bytes received over the delivery's lifetime.
    received: usize,
}

impl Delivery {
    pub(crate) fn new(id: u32, tag: Bytes, message_format: u32) -> Self {
        Self {
            id,
            tag,
            message_format,
            local_state: None,
            remote_state: None,
            locally_settled: false,
            remotely_settled: false,
            partial: true,
            aborted: false,
            payload: BytesMut::new(),
            received: 0,
        }
    }

    /// Session-scoped delivery-id.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn tag(&self) -> &Bytes {
        &self.tag
    }

    #[inline]
    pub fn message_format(&self) -> u32 {
        self.message_format
    }

    #[inline]
    pub fn local_state(&self) -> Option<&DeliveryState> {
        self.local_state.as_ref()
    }

    #[inline]
    pub fn remote_state(&self) -> Option<&DeliveryState> {
        self.remote_state.as_ref()
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        self.locally_settled
    }

    #[inline]
    pub fn is_remotely_settled(&self) -> bool {
        self.remotely_settled
    }

    /// More frames of this delivery are still expected.
    #[inline]
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Every frame arrived and the delivery was not aborted.
    #[inline]
    pub fn is_complete(&self) -> bool {
        !self.partial && !self.aborted
    }

    /// Bytes buffered and not yet read.
    #[inline]
    pub fn available(&self) -> usize {
        self.payload.len()
    }

    /// Total payload bytes received, including bytes already read.
    #[inline]
    pub fn received(&self) -> usize {
        self.received
    }

    /// Buffered payload, without consuming it.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Append one frame's payload. Ignored once aborted.
    pub(crate) fn append(&mut self, chunk: &[u8]) {
        if self.aborted {
            return;
        }
        self.payload.extend_from_slice(chunk);
        self.received += chunk.len();
    }

    /// Mark the last frame seen.
    pub(crate) fn finish(&mut self) {
        self.partial = false;
    }

    /// Drop accumulated payload. Returns the bytes discarded.
    pub(crate) fn abort(&mut self) -> usize {
        let discarded = self.payload.len();
        self.payload.clear();
        self.aborted = true;
        self.partial = false;
        discarded
    }

    /// Take everything buffered so far.
    pub(crate) fn take_payload(&mut self) -> Bytes {
        self.payload.split().freeze()
    }

    pub(crate) fn set_local_state(&mut self, state: Option<DeliveryState>) {
        self.local_state = state;
    }

    pub(crate) fn set_remote_state(&mut self, state: Option<DeliveryState>) {
        if state.is_some() {
            self.remote_state = state;
        }
    }

    /// Settle locally. Settling twice is a caller error.
    pub(crate) fn settle(&mut self) -> Result<()> {
        if self.locally_settled {
            return Err(EngineError::local(format!(
                "delivery {} is already settled",
                self.id
            )));
        }
        self.locally_settled = true;
        Ok(())
    }

    pub(crate) fn remote_settle(&mut self) {
        self.remotely_settled = true;
    }

    /// Settled on both ends.
    #[inline]
    pub fn is_fully_settled(&self) -> bool {
        self.locally_settled && self.remotely_settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_across_frames() {
        let mut delivery = Delivery::new(0, Bytes::from_static(b"t"), 0);
        delivery.append(b"abc");
        delivery.append(b"def");
        assert!(delivery.is_partial());
        delivery.append(b"g");
        delivery.finish();
        assert!(delivery.is_complete());
        assert_eq!(delivery.payload(), b"abcdefg");
        assert_eq!(delivery.received(), 7);
    }

    #[test]
    fn test_abort_discards_payload() {
        let mut delivery = Delivery::new(3, Bytes::from_static(b"t"), 0);
        delivery.append(b"abc");
        assert_eq!(delivery.abort(), 3);
        delivery.append(b"late");
        assert!(delivery.is_aborted());
        assert!(!delivery.is_complete());
        assert_eq!(delivery.available(), 0);
    }

    #[test]
    fn test_settlement_is_terminal() {
        let mut delivery = Delivery::new(1, Bytes::new(), 0);
        delivery.settle().unwrap();
        assert!(matches!(delivery.settle(), Err(EngineError::LocalState(_))));
        assert!(!delivery.is_fully_settled());
        delivery.remote_settle();
        assert!(delivery.is_fully_settled());
    }

    #[test]
    fn test_remote_state_kept_when_absent() {
        let mut delivery = Delivery::new(1, Bytes::new(), 0);
        delivery.set_remote_state(Some(DeliveryState::Accepted));
        delivery.set_remote_state(None);
        assert_eq!(delivery.remote_state(), Some(&DeliveryState::Accepted));
    }
}
