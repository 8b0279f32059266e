//! Session transfer windows.
//!
//! The incoming window bounds how many Transfer frames the peer may send
//! before we issue a replenishing Flow. The outgoing window tracks how many
//! we may still send given the peer's advertised incoming window. Transfer
//! ids and window arithmetic wrap at 2^32.

use super::credit::serial_distance;
use crate::error::{EngineError, Result};
use crate::types::{Begin, Flow};

/// Window advertised when no capacity is configured.
pub const UNBOUNDED_WINDOW: u32 = u32::MAX;

/// `floor((capacity - buffered) / max_frame_size)`, or unbounded when either
/// the capacity or the frame size is zero.
///
/// # Example
///
/// ```
/// use amqp_engine::engine::{incoming_window_for, UNBOUNDED_WINDOW};
///
/// assert_eq!(incoming_window_for(10_000, 1_000, 2_500), 7);
/// assert_eq!(incoming_window_for(0, 1_000, 0), UNBOUNDED_WINDOW);
/// assert_eq!(incoming_window_for(1_000, 512, 4_000), 0);
/// ```
pub fn incoming_window_for(capacity: u32, max_frame_size: u32, buffered: u32) -> u32 {
    if capacity == 0 || max_frame_size == 0 {
        UNBOUNDED_WINDOW
    } else {
        capacity.saturating_sub(buffered) / max_frame_size
    }
}

/// What the peer may still send us.
#[derive(Debug, Clone)]
pub struct IncomingWindow {
    capacity: u32,
    max_frame_size: u32,
    buffered: u32,
    window: u32,
    next_incoming_id: u32,
    remote_outgoing_window: u32,
    remote_next_outgoing_id: u32,
}

impl IncomingWindow {
    pub fn new(capacity: u32, max_frame_size: u32) -> Self {
        Self {
            capacity,
            max_frame_size,
            buffered: 0,
            window: 0,
            next_incoming_id: 0,
            remote_outgoing_window: 0,
            remote_next_outgoing_id: 0,
        }
    }

    #[inline]
    pub fn window(&self) -> u32 {
        self.window
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Payload bytes received and not yet read by the application.
    #[inline]
    pub fn buffered(&self) -> u32 {
        self.buffered
    }

    #[inline]
    pub fn next_incoming_id(&self) -> u32 {
        self.next_incoming_id
    }

    #[inline]
    pub fn remote_outgoing_window(&self) -> u32 {
        self.remote_outgoing_window
    }

    #[inline]
    pub fn remote_next_outgoing_id(&self) -> u32 {
        self.remote_next_outgoing_id
    }

    #[inline]
    fn is_bounded(&self) -> bool {
        self.capacity != 0 && self.max_frame_size != 0
    }

    pub(crate) fn set_capacity(&mut self, capacity: u32) {
        self.capacity = capacity;
    }

    pub(crate) fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    /// Recompute the window from capacity and buffered bytes.
    pub(crate) fn update(&mut self) -> u32 {
        self.window = incoming_window_for(self.capacity, self.max_frame_size, self.buffered);
        self.window
    }

    pub(crate) fn configure_begin(&mut self, begin: &mut Begin) {
        begin.incoming_window = self.update();
    }

    pub(crate) fn remote_begin(&mut self, begin: &Begin) {
        self.next_incoming_id = begin.next_outgoing_id;
        self.remote_next_outgoing_id = begin.next_outgoing_id;
        self.remote_outgoing_window = begin.outgoing_window;
    }

    pub(crate) fn remote_flow(&mut self, flow: &Flow) {
        self.remote_next_outgoing_id = flow.next_outgoing_id;
        self.remote_outgoing_window = flow.outgoing_window;
    }

    /// Account for one inbound Transfer frame.
    ///
    /// Aborted transfers consume a transfer id and window but their payload
    /// is not buffered.
    pub(crate) fn on_transfer(&mut self, payload_len: usize, aborted: bool) -> Result<()> {
        if self.window == 0 {
            return Err(EngineError::violation(
                "transfer received while the session incoming window is 0",
            ));
        }
        if !aborted {
            let len = u32::try_from(payload_len).unwrap_or(u32::MAX);
            self.buffered = self.buffered.saturating_add(len);
        }
        if self.is_bounded() {
            self.window -= 1;
        }
        self.next_incoming_id = self.next_incoming_id.wrapping_add(1);
        self.remote_next_outgoing_id = self.remote_next_outgoing_id.wrapping_add(1);
        self.remote_outgoing_window = self.remote_outgoing_window.saturating_sub(1);
        Ok(())
    }

    /// Release bytes the application consumed.
    ///
    /// Returns true when a recomputed window would let the peer send more
    /// than it currently may, i.e. a Flow is worth sending.
    pub(crate) fn release(&mut self, bytes: usize) -> bool {
        let bytes = u32::try_from(bytes).unwrap_or(u32::MAX);
        self.buffered = self.buffered.saturating_sub(bytes);
        self.is_bounded()
            && incoming_window_for(self.capacity, self.max_frame_size, self.buffered) > self.window
    }
}

/// What we may still send the peer.
#[derive(Debug, Clone)]
pub struct OutgoingWindow {
    next_outgoing_id: u32,
    outgoing_window: u32,
    remote_incoming_window: u32,
}

impl OutgoingWindow {
    pub fn new() -> Self {
        Self {
            next_outgoing_id: 0,
            outgoing_window: UNBOUNDED_WINDOW,
            remote_incoming_window: 0,
        }
    }

    #[inline]
    pub fn next_outgoing_id(&self) -> u32 {
        self.next_outgoing_id
    }

    #[inline]
    pub fn outgoing_window(&self) -> u32 {
        self.outgoing_window
    }

    #[inline]
    pub fn remote_incoming_window(&self) -> u32 {
        self.remote_incoming_window
    }

    /// Transfer frames the peer will currently accept.
    #[inline]
    pub fn available(&self) -> u32 {
        self.remote_incoming_window.min(self.outgoing_window)
    }

    pub(crate) fn configure_begin(&self, begin: &mut Begin) {
        begin.next_outgoing_id = self.next_outgoing_id;
        begin.outgoing_window = self.outgoing_window;
    }

    pub(crate) fn remote_begin(&mut self, begin: &Begin) {
        self.remote_incoming_window = begin.incoming_window;
    }

    /// `remote-incoming-window = next-incoming-id + incoming-window - next-outgoing-id`
    ///
    /// A Flow without `next-incoming-id` comes from a peer that has not seen
    /// our Begin yet; our initial id stands in for it.
    pub(crate) fn remote_flow(&mut self, flow: &Flow) {
        let next_incoming = flow.next_incoming_id.unwrap_or(0);
        let limit = next_incoming.wrapping_add(flow.incoming_window);
        self.remote_incoming_window = if flow.incoming_window == UNBOUNDED_WINDOW {
            UNBOUNDED_WINDOW
        } else {
            serial_distance(limit, self.next_outgoing_id)
        };
    }

    /// Account for transfer frames just written.
    pub(crate) fn on_frames_sent(&mut self, frames: u32) {
        self.next_outgoing_id = self.next_outgoing_id.wrapping_add(frames);
        if self.remote_incoming_window != UNBOUNDED_WINDOW {
            self.remote_incoming_window = self.remote_incoming_window.saturating_sub(frames);
        }
    }
}

impl Default for OutgoingWindow {
    fn default() -> Self {
        Self::new()
    }
}
