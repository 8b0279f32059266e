//! Link endpoint.
//!
//! A link is one direction of message flow inside a session, addressed by
//! its handle. Senders spend credit granted by the peer; receivers grant it.
//! The link owns its deliveries until both sides have settled them.
//!
//! Termini, settle modes, capabilities and properties may only be changed
//! before the Attach is sent.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::credit::LinkCredit;
use super::delivery::Delivery;
use super::result::Completer;
use super::{DeliveryId, EndpointState, LinkId, TimerId};
use crate::backpressure::BlockedSends;
use crate::codec::{Fields, Symbol};
use crate::error::{EngineError, Result};
use crate::types::{
    Attach, Coordinator, DeliveryState, ErrorCondition, ReceiverSettleMode, Role, Section,
    SenderSettleMode, Source, Target, TargetKind, Transfer,
};

/// A message submitted for sending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendRequest {
    /// Delivery tag; generated from a per-link counter when absent.
    pub tag: Option<Bytes>,
    pub payload: Bytes,
    pub message_format: u32,
    /// Send pre-settled.
    pub settled: bool,
    pub state: Option<DeliveryState>,
}

impl SendRequest {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Encode `sections` as the payload.
    pub fn from_sections(sections: &[Section]) -> Result<Self> {
        Ok(Self::new(crate::types::encode_sections(sections)?))
    }

    pub fn tag(mut self, tag: impl Into<Bytes>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn settled(mut self, settled: bool) -> Self {
        self.settled = settled;
        self
    }

    pub fn message_format(mut self, message_format: u32) -> Self {
        self.message_format = message_format;
        self
    }

    pub fn state(mut self, state: DeliveryState) -> Self {
        self.state = Some(state);
        self
    }
}

/// A delivery whose payload did not fit the session window.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub transfer: Transfer,
    pub payload: Bytes,
    pub result: Completer<Option<DeliveryId>>,
}

/// Pending coordinator request, keyed by delivery tag.
#[derive(Debug)]
pub(crate) enum TxnOp {
    Declare(Completer<Bytes>),
    Discharge(Completer<()>),
}

impl TxnOp {
    pub fn fail(self, error: EngineError) {
        match self {
            TxnOp::Declare(mut result) => result.fail(error),
            TxnOp::Discharge(mut result) => result.fail(error),
        };
    }
}

/// One end of a link.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    name: String,
    role: Role,
    local_state: EndpointState,
    remote_state: EndpointState,
    pub(crate) attach_sent: bool,
    /// Local end was closed rather than just detached.
    closing: bool,
    remote_handle: Option<u32>,
    source: Option<Source>,
    target: Option<TargetKind>,
    snd_settle_mode: SenderSettleMode,
    rcv_settle_mode: ReceiverSettleMode,
    max_message_size: Option<u64>,
    offered_capabilities: Option<Vec<Symbol>>,
    desired_capabilities: Option<Vec<Symbol>>,
    properties: Option<Fields>,
    remote_attach: Option<Attach>,
    local_error: Option<ErrorCondition>,
    remote_error: Option<ErrorCondition>,
    pub(crate) credit: LinkCredit,
    pub(crate) deliveries: BTreeMap<u32, Delivery>,
    /// Incoming delivery still receiving frames.
    pub(crate) incoming: Option<u32>,
    pub(crate) blocked: BlockedSends,
    pub(crate) in_flight: Option<InFlight>,
    next_tag: u64,
    pub(crate) drain: Option<(Completer<()>, Option<TimerId>)>,
    pub(crate) txn_ops: BTreeMap<Bytes, TxnOp>,
}

impl Link {
    pub(crate) fn new(id: LinkId, name: impl Into<String>, role: Role) -> Self {
        let credit = if role.is_sender() {
            LinkCredit::with_delivery_count(0)
        } else {
            LinkCredit::new()
        };
        Self {
            id,
            name: name.into(),
            role,
            local_state: EndpointState::Idle,
            remote_state: EndpointState::Idle,
            attach_sent: false,
            closing: false,
            remote_handle: None,
            source: None,
            target: None,
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            max_message_size: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
            remote_attach: None,
            local_error: None,
            remote_error: None,
            credit,
            deliveries: BTreeMap::new(),
            incoming: None,
            blocked: BlockedSends::new(),
            in_flight: None,
            next_tag: 0,
            drain: None,
            txn_ops: BTreeMap::new(),
        }
    }

    /// A sender whose target is a transaction coordinator.
    pub(crate) fn coordinator(id: LinkId, name: impl Into<String>) -> Self {
        let mut link = Self::new(id, name, Role::Sender);
        link.source = Some(Source {
            outcomes: Some(vec![
                Symbol::from("amqp:accepted:list"),
                Symbol::from("amqp:rejected:list"),
            ]),
            ..Source::default()
        });
        link.target = Some(TargetKind::Coordinator(Coordinator {
            capabilities: Some(vec![Symbol::from(
                crate::types::transactions::capabilities::LOCAL_TRANSACTIONS,
            )]),
        }));
        link
    }

    #[inline]
    pub fn id(&self) -> LinkId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn is_sender(&self) -> bool {
        self.role.is_sender()
    }

    #[inline]
    pub fn local_state(&self) -> EndpointState {
        self.local_state
    }

    #[inline]
    pub fn remote_state(&self) -> EndpointState {
        self.remote_state
    }

    #[inline]
    pub fn credit(&self) -> u32 {
        self.credit.credit()
    }

    #[inline]
    pub fn delivery_count(&self) -> u32 {
        self.credit.delivery_count()
    }

    #[inline]
    pub fn is_drain(&self) -> bool {
        self.credit.is_drain()
    }

    pub fn link_credit(&self) -> &LinkCredit {
        &self.credit
    }

    /// Open on both ends with credit to spend.
    pub fn is_sendable(&self) -> bool {
        self.is_sender()
            && self.credit.credit() > 0
            && self.local_state == EndpointState::Active
            && self.remote_state == EndpointState::Active
    }

    pub fn is_coordinator(&self) -> bool {
        self.target.as_ref().is_some_and(TargetKind::is_coordinator)
    }

    #[inline]
    pub fn remote_handle(&self) -> Option<u32> {
        self.remote_handle
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn target(&self) -> Option<&TargetKind> {
        self.target.as_ref()
    }

    pub fn snd_settle_mode(&self) -> SenderSettleMode {
        self.snd_settle_mode
    }

    pub fn rcv_settle_mode(&self) -> ReceiverSettleMode {
        self.rcv_settle_mode
    }

    pub fn remote_source(&self) -> Option<&Source> {
        self.remote_attach.as_ref()?.source.as_ref()
    }

    pub fn remote_target(&self) -> Option<&TargetKind> {
        self.remote_attach.as_ref()?.target.as_ref()
    }

    pub fn remote_max_message_size(&self) -> Option<u64> {
        self.remote_attach.as_ref()?.max_message_size
    }

    pub fn remote_offered_capabilities(&self) -> Option<&[Symbol]> {
        self.remote_attach.as_ref()?.offered_capabilities.as_deref()
    }

    pub fn remote_properties(&self) -> Option<&Fields> {
        self.remote_attach.as_ref()?.properties.as_ref()
    }

    pub fn remote_error(&self) -> Option<&ErrorCondition> {
        self.remote_error.as_ref()
    }

    pub fn delivery(&self, id: u32) -> Option<&Delivery> {
        self.deliveries.get(&id)
    }

    pub fn deliveries(&self) -> impl Iterator<Item = &Delivery> {
        self.deliveries.values()
    }

    /// Sends waiting for credit or window.
    pub fn queued_sends(&self) -> usize {
        self.blocked.len() + usize::from(self.in_flight.is_some())
    }

    fn check_idle(&self, what: &str) -> Result<()> {
        if self.local_state != EndpointState::Idle {
            return Err(EngineError::local(format!(
                "cannot set {} on link '{}' after it was opened",
                what, self.name
            )));
        }
        Ok(())
    }

    pub fn set_source(&mut self, source: Source) -> Result<()> {
        self.check_idle("source")?;
        self.source = Some(source);
        Ok(())
    }

    pub fn set_target(&mut self, target: Target) -> Result<()> {
        self.check_idle("target")?;
        self.target = Some(TargetKind::Target(target));
        Ok(())
    }

    pub fn set_snd_settle_mode(&mut self, mode: SenderSettleMode) -> Result<()> {
        self.check_idle("snd-settle-mode")?;
        self.snd_settle_mode = mode;
        Ok(())
    }

    pub fn set_rcv_settle_mode(&mut self, mode: ReceiverSettleMode) -> Result<()> {
        self.check_idle("rcv-settle-mode")?;
        self.rcv_settle_mode = mode;
        Ok(())
    }

    pub fn set_max_message_size(&mut self, size: u64) -> Result<()> {
        self.check_idle("max-message-size")?;
        self.max_message_size = Some(size);
        Ok(())
    }

    pub fn set_offered_capabilities(&mut self, capabilities: Vec<Symbol>) -> Result<()> {
        self.check_idle("offered-capabilities")?;
        self.offered_capabilities = Some(capabilities);
        Ok(())
    }

    pub fn set_desired_capabilities(&mut self, capabilities: Vec<Symbol>) -> Result<()> {
        self.check_idle("desired-capabilities")?;
        self.desired_capabilities = Some(capabilities);
        Ok(())
    }

    pub fn set_properties(&mut self, properties: Fields) -> Result<()> {
        self.check_idle("properties")?;
        self.properties = Some(properties);
        Ok(())
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        match self.local_state {
            EndpointState::Idle => {
                self.local_state = EndpointState::Active;
                Ok(())
            }
            EndpointState::Active => Err(EngineError::local(format!(
                "link '{}' is already open",
                self.name
            ))),
            EndpointState::Closed => Err(EngineError::ResourceClosed(format!(
                "link '{}' is closed",
                self.name
            ))),
        }
    }

    /// Locally detach; `close` also closes the link.
    pub(crate) fn close(&mut self, close: bool, error: Option<ErrorCondition>) -> Result<()> {
        if self.local_state == EndpointState::Closed {
            return Err(EngineError::ResourceClosed(format!(
                "link '{}' is already detached",
                self.name
            )));
        }
        self.local_state = EndpointState::Closed;
        self.closing = close;
        self.local_error = error;
        Ok(())
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing
    }

    pub(crate) fn local_error(&self) -> Option<&ErrorCondition> {
        self.local_error.as_ref()
    }

    /// Both ends detached; the handle can be reused.
    pub(crate) fn is_finished(&self) -> bool {
        self.local_state == EndpointState::Closed && self.remote_state == EndpointState::Closed
    }

    /// Next generated delivery tag.
    pub(crate) fn next_tag(&mut self) -> Bytes {
        let tag = Bytes::copy_from_slice(&self.next_tag.to_be_bytes());
        self.next_tag += 1;
        tag
    }

    /// Build our Attach.
    pub(crate) fn attach_frame(&self) -> Attach {
        let mut attach = Attach::new(self.name.clone(), self.id.handle, self.role);
        attach.snd_settle_mode = self.snd_settle_mode;
        attach.rcv_settle_mode = self.rcv_settle_mode;
        attach.source = self.source.clone();
        attach.target = self.target.clone();
        attach.max_message_size = self.max_message_size;
        attach.offered_capabilities = self.offered_capabilities.clone();
        attach.desired_capabilities = self.desired_capabilities.clone();
        attach.properties = self.properties.clone();
        if self.is_sender() {
            attach.initial_delivery_count = Some(self.credit.delivery_count());
        }
        attach
    }

    /// Apply the peer's Attach.
    pub(crate) fn remote_attach(&mut self, attach: Attach) {
        self.remote_handle = Some(attach.handle);
        self.remote_state = EndpointState::Active;
        if !self.is_sender() {
            self.credit
                .initialise_delivery_count(attach.initial_delivery_count.unwrap_or(0));
        }
        // a peer-initiated link mirrors the peer's termini until told otherwise
        if self.local_state == EndpointState::Idle {
            if self.source.is_none() {
                self.source = attach.source.clone();
            }
            if self.target.is_none() {
                self.target = attach.target.clone();
            }
            self.snd_settle_mode = attach.snd_settle_mode;
            self.rcv_settle_mode = attach.rcv_settle_mode;
        }
        self.remote_attach = Some(attach);
    }

    pub(crate) fn remote_detach(&mut self, error: Option<ErrorCondition>) {
        self.remote_state = EndpointState::Closed;
        self.remote_error = error;
    }

    /// Fail everything waiting on this link.
    pub(crate) fn fail_pending(&mut self, error: &EngineError) -> Vec<TimerId> {
        let mut timers = self.blocked.fail_all(error);
        if let Some(mut in_flight) = self.in_flight.take() {
            in_flight.result.fail(error.clone());
        }
        if let Some((mut result, timer)) = self.drain.take() {
            result.fail(error.clone());
            timers.extend(timer);
        }
        for (_, op) in std::mem::take(&mut self.txn_ops) {
            op.fail(error.clone());
        }
        timers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::result::pending;
    use crate::engine::SessionId;

    fn link_id() -> LinkId {
        LinkId {
            session: SessionId(0),
            handle: 0,
        }
    }

    #[test]
    fn test_setters_guarded_after_open() {
        let mut link = Link::new(link_id(), "out", Role::Sender);
        link.set_target(Target::new("queue")).unwrap();
        link.open().unwrap();
        let err = link.set_source(Source::new("x")).unwrap_err();
        assert!(matches!(err, EngineError::LocalState(_)));
        assert!(matches!(link.open(), Err(EngineError::LocalState(_))));
    }

    #[test]
    fn test_sendable_requires_both_ends_and_credit() {
        let mut link = Link::new(link_id(), "out", Role::Sender);
        link.open().unwrap();
        assert!(!link.is_sendable());
        link.remote_attach(Attach::new("out", 7, Role::Receiver));
        assert!(!link.is_sendable());
        link.credit.sender_flow(Some(0), 1, false);
        assert!(link.is_sendable());
        assert_eq!(link.remote_handle(), Some(7));
    }

    #[test]
    fn test_receiver_takes_initial_delivery_count() {
        let mut link = Link::new(link_id(), "in", Role::Receiver);
        let mut attach = Attach::new("in", 0, Role::Sender);
        attach.initial_delivery_count = Some(42);
        link.remote_attach(attach);
        assert_eq!(link.delivery_count(), 42);
        assert!(link.attach_frame().initial_delivery_count.is_none());
    }

    #[test]
    fn test_generated_tags_are_unique() {
        let mut link = Link::new(link_id(), "out", Role::Sender);
        let a = link.next_tag();
        let b = link.next_tag();
        assert_ne!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn test_coordinator_target() {
        let link = Link::coordinator(link_id(), "txn");
        assert!(link.is_coordinator());
        assert!(link.is_sender());
    }

    #[test]
    fn test_fail_pending() {
        let mut link = Link::new(link_id(), "out", Role::Sender);
        let (completer, mut result) = pending();
        let id = link.blocked.next_id();
        link.blocked
            .push_back(id, SendRequest::new("x"), completer, Some(TimerId(3)));
        let (completer, mut declare) = pending();
        link.txn_ops
            .insert(Bytes::from_static(b"t"), TxnOp::Declare(completer));
        let timers = link.fail_pending(&EngineError::ResourceClosed("detached".into()));
        assert_eq!(timers, vec![TimerId(3)]);
        assert!(result.is_failed());
        assert!(declare.is_failed());
    }
}
