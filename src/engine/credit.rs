//! Link credit accounting.
//!
//! `delivery-count` is a 32-bit serial number (RFC 1982), so comparisons
//! between counts use the signed distance rather than `<`. Credit itself is a
//! plain count that never drops below zero.

/// True when serial number `a` is after `b`.
#[inline]
pub(crate) fn serial_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Distance from `b` forward to `a`, or 0 if `a` is not after `b`.
#[inline]
pub(crate) fn serial_distance(a: u32, b: u32) -> u32 {
    if serial_after(a, b) {
        a.wrapping_sub(b)
    } else {
        0
    }
}

/// Credit and delivery-count of one link end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkCredit {
    credit: u32,
    delivery_count: u32,
    delivery_count_initialised: bool,
    drain: bool,
    remote_delivery_count: Option<u32>,
    remote_link_credit: Option<u32>,
}

impl LinkCredit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delivery_count(delivery_count: u32) -> Self {
        let mut credit = Self::default();
        credit.initialise_delivery_count(delivery_count);
        credit
    }

    #[inline]
    pub fn credit(&self) -> u32 {
        self.credit
    }

    #[inline]
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    #[inline]
    pub fn is_drain(&self) -> bool {
        self.drain
    }

    #[inline]
    pub fn is_delivery_count_initialised(&self) -> bool {
        self.delivery_count_initialised
    }

    /// Last `delivery-count` and `link-credit` the peer reported.
    pub fn remote(&self) -> (Option<u32>, Option<u32>) {
        (self.remote_delivery_count, self.remote_link_credit)
    }

    pub(crate) fn initialise_delivery_count(&mut self, delivery_count: u32) {
        self.delivery_count = delivery_count;
        self.delivery_count_initialised = true;
    }

    pub(crate) fn increment_credit(&mut self, credit: u32) {
        self.credit = self.credit.saturating_add(credit);
    }

    /// Take one credit, never going below zero.
    pub(crate) fn decrement_credit(&mut self) {
        self.credit = self.credit.saturating_sub(1);
    }

    /// Advance the delivery-count, returning the value before the increment.
    pub(crate) fn increment_delivery_count(&mut self) -> u32 {
        let previous = self.delivery_count;
        self.delivery_count = self.delivery_count.wrapping_add(1);
        previous
    }

    pub(crate) fn set_drain(&mut self, drain: bool) {
        self.drain = drain;
    }

    /// Sender side: a Flow from the receiver sets credit to
    /// `remote delivery-count + link-credit - local delivery-count`.
    ///
    /// A missing remote delivery-count means the receiver has not yet seen
    /// our initial count, which is then used in its place.
    pub(crate) fn sender_flow(&mut self, delivery_count: Option<u32>, link_credit: u32, drain: bool) {
        self.remote_delivery_count = delivery_count;
        self.remote_link_credit = Some(link_credit);
        let base = delivery_count.unwrap_or(self.delivery_count);
        let limit = base.wrapping_add(link_credit);
        self.credit = serial_distance(limit, self.delivery_count);
        self.drain = drain;
    }

    /// Sender side: use up all remaining credit for a drain.
    pub(crate) fn drain_credit(&mut self) {
        self.delivery_count = self.delivery_count.wrapping_add(self.credit);
        self.credit = 0;
        self.drain = false;
    }

    /// Receiver side: a Flow from the sender moves our delivery-count forward
    /// and shrinks the outstanding credit by the same amount.
    ///
    /// Returns true when the sender consumed all credit (a drain answer).
    pub(crate) fn receiver_flow(&mut self, delivery_count: Option<u32>, link_credit: Option<u32>) -> bool {
        self.remote_delivery_count = delivery_count;
        self.remote_link_credit = link_credit;
        if let Some(remote_count) = delivery_count {
            let limit = self.delivery_count.wrapping_add(self.credit);
            self.credit = serial_distance(limit, remote_count);
            if serial_after(remote_count, self.delivery_count) {
                self.delivery_count = remote_count;
            }
        }
        self.credit == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_floor() {
        let mut credit = LinkCredit::new();
        credit.decrement_credit();
        credit.decrement_credit();
        assert_eq!(credit.credit(), 0);
        credit.increment_credit(1);
        credit.decrement_credit();
        credit.decrement_credit();
        assert_eq!(credit.credit(), 0);
    }

    #[test]
    fn test_serial_comparison_wraps() {
        assert!(serial_after(1, 0));
        assert!(serial_after(0, u32::MAX));
        assert!(!serial_after(u32::MAX, 0));
        assert_eq!(serial_distance(2, u32::MAX - 1), 4);
        assert_eq!(serial_distance(5, 10), 0);
    }

    #[test]
    fn test_sender_flow_across_wrap() {
        let mut credit = LinkCredit::with_delivery_count(u32::MAX - 1);
        // receiver saw delivery-count MAX-1 and grants 10
        credit.sender_flow(Some(u32::MAX - 1), 10, false);
        assert_eq!(credit.credit(), 10);
        for _ in 0..3 {
            credit.increment_delivery_count();
            credit.decrement_credit();
        }
        assert_eq!(credit.delivery_count(), 1);
        // receiver has since seen 1 delivery and tops up to 10 from there
        credit.sender_flow(Some(u32::MAX), 10, false);
        assert_eq!(credit.credit(), 8);
    }

    #[test]
    fn test_sender_flow_without_remote_count() {
        let mut credit = LinkCredit::with_delivery_count(100);
        credit.sender_flow(None, 5, true);
        assert_eq!(credit.credit(), 5);
        assert!(credit.is_drain());
        credit.drain_credit();
        assert_eq!(credit.delivery_count(), 105);
        assert_eq!(credit.credit(), 0);
    }

    #[test]
    fn test_stale_flow_gives_no_credit() {
        let mut credit = LinkCredit::with_delivery_count(50);
        credit.sender_flow(Some(10), 20, false);
        assert_eq!(credit.credit(), 0);
    }

    #[test]
    fn test_receiver_flow_after_drain() {
        let mut credit = LinkCredit::with_delivery_count(0);
        credit.increment_credit(10);
        // two transfers arrived
        credit.increment_delivery_count();
        credit.decrement_credit();
        credit.increment_delivery_count();
        credit.decrement_credit();
        // sender drained the remaining 8
        assert!(credit.receiver_flow(Some(10), Some(0)));
        assert_eq!(credit.credit(), 0);
        assert_eq!(credit.delivery_count(), 10);
    }
}
