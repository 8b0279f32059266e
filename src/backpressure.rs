//! Sends waiting on link credit.
//!
//! A send submitted while its link cannot transfer (no credit, link not yet
//! attached by the peer, or session window closed) is parked here in
//! submission order. When credit arrives the link services the queue from
//! the head; a send that cannot start after all goes back to the head so it
//! keeps its place ahead of newer submissions.
//!
//! Each parked send may carry a timeout timer. When it fires, or when the
//! caller cancels, the entry is removed and its result fails. Neither path
//! can touch a send that has already been written.
//!
//! Send ids are handed out per link for every send, parked or not, so an id
//! never names two sends.

use std::collections::VecDeque;

use crate::engine::result::Completer;
use crate::engine::{DeliveryId, SendRequest, TimerId};
use crate::error::EngineError;

/// A send parked until its link can transfer.
#[derive(Debug)]
pub struct BlockedSend {
    pub id: u64,
    pub request: SendRequest,
    pub result: Completer<Option<DeliveryId>>,
    pub timer: Option<TimerId>,
}

/// FIFO of sends blocked on credit, per link.
#[derive(Debug, Default)]
pub struct BlockedSends {
    queue: VecDeque<BlockedSend>,
    next_id: u64,
}

impl BlockedSends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the id of a new send.
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Park a new send behind everything already waiting.
    pub fn push_back(
        &mut self,
        id: u64,
        request: SendRequest,
        result: Completer<Option<DeliveryId>>,
        timer: Option<TimerId>,
    ) {
        self.queue.push_back(BlockedSend {
            id,
            request,
            result,
            timer,
        });
    }

    /// Return a send to the head of the queue.
    pub fn push_front(&mut self, send: BlockedSend) {
        self.queue.push_front(send);
    }

    pub fn pop_front(&mut self) -> Option<BlockedSend> {
        self.queue.pop_front()
    }

    /// Remove the parked send with `id`, if it is still waiting.
    pub fn remove(&mut self, id: u64) -> Option<BlockedSend> {
        let index = self.queue.iter().position(|send| send.id == id)?;
        self.queue.remove(index)
    }

    /// Fail every parked send with `error`, returning their timers.
    pub fn fail_all(&mut self, error: &EngineError) -> Vec<TimerId> {
        self.queue
            .drain(..)
            .filter_map(|mut send| {
                send.result.fail(error.clone());
                send.timer
            })
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::result::pending;
    use bytes::Bytes;

    fn request(body: &'static [u8]) -> SendRequest {
        SendRequest::new(Bytes::from_static(body))
    }

    fn park(sends: &mut BlockedSends, body: &'static [u8], timer: Option<TimerId>) -> u64 {
        let id = sends.next_id();
        let (completer, _) = pending();
        sends.push_back(id, request(body), completer, timer);
        id
    }

    #[test]
    fn test_head_first_order() {
        let mut sends = BlockedSends::new();
        park(&mut sends, b"a", None);
        park(&mut sends, b"b", None);

        let first = sends.pop_front().unwrap();
        assert_eq!(first.request.payload, Bytes::from_static(b"a"));
        // could not start after all, goes back ahead of "b"
        sends.push_front(first);
        park(&mut sends, b"c", None);

        let order: Vec<_> = std::iter::from_fn(|| sends.pop_front())
            .map(|s| s.request.payload)
            .collect();
        assert_eq!(order, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }

    #[test]
    fn test_remove_by_id() {
        let mut sends = BlockedSends::new();
        let first = park(&mut sends, b"a", None);
        let second = park(&mut sends, b"b", Some(TimerId(4)));
        assert_ne!(first, second);

        assert!(sends.remove(first).is_some());
        assert!(sends.remove(first).is_none());
        let removed = sends.remove(second).unwrap();
        assert_eq!(removed.timer, Some(TimerId(4)));
        assert!(sends.is_empty());
    }

    #[test]
    fn test_ids_unique_without_parking() {
        let mut sends = BlockedSends::new();
        let written = sends.next_id();
        let parked = park(&mut sends, b"a", None);
        assert_ne!(written, parked);
        assert!(sends.remove(written).is_none());
    }

    #[test]
    fn test_fail_all() {
        let mut sends = BlockedSends::new();
        let (completer, mut result) = pending();
        let id = sends.next_id();
        sends.push_back(id, request(b"a"), completer, Some(TimerId(1)));
        let timers = sends.fail_all(&EngineError::ResourceClosed("link detached".into()));
        assert_eq!(timers, vec![TimerId(1)]);
        assert!(result.is_failed());
        assert_eq!(sends.len(), 0);
    }
}
