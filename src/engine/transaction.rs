//! Session-scoped transaction context.
//!
//! A coordinator link declares a transaction; the peer answers with a
//! `Declared` disposition carrying the transaction id, which activates the
//! context on the session. Deliveries sent or disposed while active are
//! enlisted: their state is wrapped in a `TransactionalState`. Discharging
//! puts the context in doubt until the coordinator settles the Discharge.

use bytes::Bytes;

use crate::types::{DeliveryState, SenderSettleMode, TransactionalState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    #[default]
    Idle,
    Declaring,
    Active,
    Discharging,
}

/// Current transaction of a session.
#[derive(Debug, Clone, Default)]
pub struct TransactionContext {
    txn_id: Option<Bytes>,
    status: TransactionStatus,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn txn_id(&self) -> Option<&Bytes> {
        self.txn_id.as_ref()
    }

    #[inline]
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// A transaction id is held; sends and dispositions are enlisted.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.txn_id.is_some()
    }

    /// The outcome of a discharge is not yet known.
    #[inline]
    pub fn is_in_doubt(&self) -> bool {
        self.status == TransactionStatus::Discharging
    }

    pub(crate) fn declaring(&mut self) {
        self.status = TransactionStatus::Declaring;
    }

    pub(crate) fn declared(&mut self, txn_id: Bytes) {
        tracing::debug!("transaction {:?} declared", txn_id);
        self.txn_id = Some(txn_id);
        self.status = TransactionStatus::Active;
    }

    pub(crate) fn discharging(&mut self) {
        self.status = TransactionStatus::Discharging;
    }

    /// Forget the transaction, whatever its outcome.
    pub(crate) fn reset(&mut self) {
        self.txn_id = None;
        self.status = TransactionStatus::Idle;
    }

    /// Wrap `state` in the transactional state for the current transaction.
    ///
    /// Returns the enlisted state and the settled flag to send: forced true
    /// only for a link in `Settled` mode or a delivery already settled.
    pub(crate) fn enlist(
        &self,
        state: Option<DeliveryState>,
        settled: bool,
        mode: SenderSettleMode,
    ) -> Option<(DeliveryState, bool)> {
        let txn_id = self.txn_id.clone()?;
        let enlisted = DeliveryState::Transactional(TransactionalState {
            txn_id,
            outcome: state.map(Box::new),
        });
        Some((enlisted, settled || mode == SenderSettleMode::Settled))
    }
}
