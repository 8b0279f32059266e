//! Timer requests handed to the host.
//!
//! The engine never sleeps. When an operation needs a deadline it files a
//! [`TimerRequest`]; the host collects these with
//! [`Engine::take_timer_requests`](crate::Engine::take_timer_requests) and
//! calls [`Engine::fire_timer`](crate::Engine::fire_timer) when one expires.
//! Completing the guarded operation cancels the timer, so a late fire finds
//! nothing and is ignored.

use std::collections::BTreeMap;

use super::LinkId;

/// Identifies a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// A deadline the host should arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub id: TimerId,
    pub delay_ms: u64,
}

/// What a timer guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Open,
    Close,
    Send { link: LinkId, send_id: u64 },
    Drain(LinkId),
}

#[derive(Debug, Default)]
pub(crate) struct Timers {
    next_id: u64,
    armed: BTreeMap<TimerId, TimerKind>,
    requests: Vec<TimerRequest>,
}

impl Timers {
    /// Arm a timer. A zero delay means "no timeout" and arms nothing.
    pub fn schedule(&mut self, kind: TimerKind, delay_ms: u64) -> Option<TimerId> {
        if delay_ms == 0 {
            return None;
        }
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.armed.insert(id, kind);
        self.requests.push(TimerRequest { id, delay_ms });
        Some(id)
    }

    pub fn cancel(&mut self, id: Option<TimerId>) {
        if let Some(id) = id {
            self.armed.remove(&id);
        }
    }

    /// Claim a fired timer; `None` if it was cancelled or already fired.
    pub fn fire(&mut self, id: TimerId) -> Option<TimerKind> {
        self.armed.remove(&id)
    }

    pub fn take_requests(&mut self) -> Vec<TimerRequest> {
        std::mem::take(&mut self.requests)
    }

    pub fn clear(&mut self) {
        self.armed.clear();
    }

    #[cfg(test)]
    pub fn armed(&self) -> usize {
        self.armed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_once() {
        let mut timers = Timers::default();
        let id = timers.schedule(TimerKind::Open, 100).unwrap();
        assert_eq!(timers.take_requests(), vec![TimerRequest { id, delay_ms: 100 }]);
        assert!(timers.take_requests().is_empty());
        assert_eq!(timers.fire(id), Some(TimerKind::Open));
        assert_eq!(timers.fire(id), None);
    }

    #[test]
    fn test_cancelled_timer_is_noop() {
        let mut timers = Timers::default();
        let id = timers.schedule(TimerKind::Close, 5);
        timers.cancel(id);
        assert_eq!(timers.fire(id.unwrap()), None);
    }

    #[test]
    fn test_zero_delay_disabled() {
        let mut timers = Timers::default();
        assert!(timers.schedule(TimerKind::Open, 0).is_none());
        assert_eq!(timers.armed(), 0);
    }
}
