//! Session endpoint.
//!
//! A session pairs a local and a remote channel and owns the links attached
//! on it. It enforces the two transfer windows: the incoming window bounds
//! what the peer may send before we replenish it with a Flow, and the
//! outgoing window tracks what the peer will still accept from us.
//!
//! Links are kept in a [`Slots`] arena indexed by local handle. Remote
//! handles map onto local ones through a second arena. A handle returns to
//! the free list once both ends have detached.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::delivery::Delivery;
use super::link::{InFlight, Link, SendRequest, TxnOp};
use super::outbound::Outbound;
use super::timer::TimerKind;
use super::transaction::{TransactionContext, TransactionStatus};
use super::window::{IncomingWindow, OutgoingWindow};
use super::result::{self, Completer};
use super::{AsyncResult, DeliveryId, EndpointState, LinkId, SessionId, Slots};
use crate::codec::{DescribedType, Fields, Symbol};
use crate::error::{EngineError, Result};
use crate::handler::{Endpoint, Event};
use crate::types::{
    encode_sections, Attach, Begin, Declare, DeliveryState, Detach, Discharge, Disposition, End,
    ErrorCondition, Flow, Performative, Role, Section, Transfer,
};

/// True when `id` lies in the serial range `first..=last`.
#[inline]
fn in_range(id: u32, first: u32, last: u32) -> bool {
    id.wrapping_sub(first) <= last.wrapping_sub(first)
}

/// One end of a session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    remote_channel: Option<u16>,
    local_state: EndpointState,
    remote_state: EndpointState,
    begin_sent: bool,
    handle_max: u32,
    offered_capabilities: Option<Vec<Symbol>>,
    desired_capabilities: Option<Vec<Symbol>>,
    properties: Option<Fields>,
    remote_begin: Option<Begin>,
    local_error: Option<ErrorCondition>,
    remote_error: Option<ErrorCondition>,
    incoming: IncomingWindow,
    outgoing: OutgoingWindow,
    next_delivery_id: u32,
    links: Slots<Link>,
    remote_handles: Slots<u32>,
    /// Our unsettled outgoing deliveries: delivery-id to local handle.
    unsettled_out: BTreeMap<u32, u32>,
    /// Unsettled incoming deliveries: delivery-id to local handle.
    unsettled_in: BTreeMap<u32, u32>,
    transaction: TransactionContext,
}

impl Session {
    pub(crate) fn new(id: SessionId, capacity: u32, max_frame_size: u32, handle_max: u32) -> Self {
        Self {
            id,
            remote_channel: None,
            local_state: EndpointState::Idle,
            remote_state: EndpointState::Idle,
            begin_sent: false,
            handle_max,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
            remote_begin: None,
            local_error: None,
            remote_error: None,
            incoming: IncomingWindow::new(capacity, max_frame_size),
            outgoing: OutgoingWindow::new(),
            next_delivery_id: 0,
            links: Slots::new(handle_max),
            remote_handles: Slots::new(handle_max),
            unsettled_out: BTreeMap::new(),
            unsettled_in: BTreeMap::new(),
            transaction: TransactionContext::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Local channel number.
    #[inline]
    pub fn channel(&self) -> u16 {
        self.id.0
    }

    #[inline]
    pub fn remote_channel(&self) -> Option<u16> {
        self.remote_channel
    }

    #[inline]
    pub fn local_state(&self) -> EndpointState {
        self.local_state
    }

    #[inline]
    pub fn remote_state(&self) -> EndpointState {
        self.remote_state
    }

    /// Our Begin has been written.
    pub(crate) fn begin_sent(&self) -> bool {
        self.begin_sent
    }

    pub fn incoming(&self) -> &IncomingWindow {
        &self.incoming
    }

    pub fn outgoing(&self) -> &OutgoingWindow {
        &self.outgoing
    }

    #[inline]
    pub fn handle_max(&self) -> u32 {
        self.handle_max
    }

    pub fn remote_handle_max(&self) -> Option<u32> {
        self.remote_begin.as_ref().map(|b| b.handle_max)
    }

    pub fn remote_offered_capabilities(&self) -> Option<&[Symbol]> {
        self.remote_begin.as_ref()?.offered_capabilities.as_deref()
    }

    pub fn remote_properties(&self) -> Option<&Fields> {
        self.remote_begin.as_ref()?.properties.as_ref()
    }

    pub fn remote_error(&self) -> Option<&ErrorCondition> {
        self.remote_error.as_ref()
    }

    pub fn transaction(&self) -> &TransactionContext {
        &self.transaction
    }

    pub fn link(&self, handle: u32) -> Option<&Link> {
        self.links.get(handle)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().map(|(_, link)| link)
    }

    /// Deliveries awaiting settlement, outgoing then incoming.
    pub fn unsettled(&self) -> (usize, usize) {
        (self.unsettled_out.len(), self.unsettled_in.len())
    }

    fn check_idle(&self, what: &str) -> Result<()> {
        if self.local_state != EndpointState::Idle {
            return Err(EngineError::local(format!(
                "cannot set {} on session {} after it was opened",
                what, self.id.0
            )));
        }
        Ok(())
    }

    /// Incoming byte capacity; 0 leaves the window unbounded.
    pub fn set_incoming_capacity(&mut self, capacity: u32) -> Result<()> {
        self.check_idle("incoming capacity")?;
        self.incoming.set_capacity(capacity);
        Ok(())
    }

    pub fn set_handle_max(&mut self, handle_max: u32) -> Result<()> {
        self.check_idle("handle-max")?;
        if (self.links.len() as u64) > u64::from(handle_max) + 1 {
            return Err(EngineError::local("handle-max below the number of links"));
        }
        self.handle_max = handle_max;
        self.links.set_max_index(handle_max);
        self.remote_handles.set_max_index(handle_max);
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

    pub(crate) fn link_mut(&mut self, handle: u32) -> Option<&mut Link> {
        self.links.get_mut(handle)
    }

    fn link_or_err(&mut self, handle: u32) -> Result<&mut Link> {
        let session = self.id.0;
        self.links
            .get_mut(handle)
            .ok_or_else(|| EngineError::local(format!("no link {} on session {}", handle, session)))
    }

    /// Local handle for a handle the peer used.
    fn local_handle(&self, remote: u32) -> Result<u32> {
        self.remote_handles.get(remote).copied().ok_or_else(|| {
            EngineError::violation(format!(
                "frame on unattached handle {} of channel {}",
                remote, self.id.0
            ))
        })
    }

    /// Fail unless the session can still be used locally.
    fn check_usable(&self) -> Result<()> {
        if self.local_state == EndpointState::Closed {
            return Err(EngineError::ResourceClosed(format!(
                "session {} is ended",
                self.id.0
            )));
        }
        if self.remote_state == EndpointState::Closed {
            return Err(EngineError::ResourceClosed(format!(
                "session {} was ended by the peer",
                self.id.0
            )));
        }
        Ok(())
    }

    // ---- lifecycle ----

    pub(crate) fn open(&mut self) -> Result<()> {
        match self.local_state {
            EndpointState::Idle => {
                self.local_state = EndpointState::Active;
                Ok(())
            }
            EndpointState::Active => Err(EngineError::local(format!(
                "session {} is already open",
                self.id.0
            ))),
            EndpointState::Closed => Err(EngineError::ResourceClosed(format!(
                "session {} is ended",
                self.id.0
            ))),
        }
    }

    /// Locally end the session.
    pub(crate) fn end(&mut self, error: Option<ErrorCondition>, out: &mut Outbound) -> Result<()> {
        if self.local_state == EndpointState::Closed {
            return Err(EngineError::ResourceClosed(format!(
                "session {} is already ended",
                self.id.0
            )));
        }
        self.local_state = EndpointState::Closed;
        self.local_error = error.clone();
        let cause = EngineError::ResourceClosed(format!("session {} ended", self.id.0));
        self.fail_links(&cause, out);
        if self.begin_sent {
            out.write(self.channel(), &Performative::End(End { error }))?;
            out.emit(Event::LocalClose(Endpoint::Session(self.id)));
        }
        tracing::debug!("session {} ended locally", self.id.0);
        Ok(())
    }

    /// Both ends are done; the channel can be reused.
    pub(crate) fn is_finished(&self) -> bool {
        self.local_state == EndpointState::Closed
            && (self.remote_state == EndpointState::Closed
                || (!self.begin_sent && self.remote_state == EndpointState::Idle))
    }

    /// Fail pending work on every link.
    pub(crate) fn fail_links(&mut self, cause: &EngineError, out: &mut Outbound) {
        for (_, link) in self.links.iter_mut() {
            for timer in link.fail_pending(cause) {
                out.timers.cancel(Some(timer));
            }
        }
    }

    fn begin_frame(&mut self) -> Begin {
        let mut begin = Begin {
            remote_channel: self.remote_channel,
            handle_max: self.handle_max,
            offered_capabilities: self.offered_capabilities.clone(),
            desired_capabilities: self.desired_capabilities.clone(),
            properties: self.properties.clone(),
            ..Begin::default()
        };
        self.incoming.configure_begin(&mut begin);
        self.outgoing.configure_begin(&mut begin);
        begin
    }

    /// Write whatever local state changes are now allowed on the wire.
    pub(crate) fn sync(&mut self, out: &mut Outbound) -> Result<()> {
        let channel = self.channel();
        if self.local_state == EndpointState::Active && !self.begin_sent {
            let begin = self.begin_frame();
            out.write(channel, &Performative::Begin(begin))?;
            self.begin_sent = true;
            out.emit(Event::LocalOpen(Endpoint::Session(self.id)));
        }
        if !self.begin_sent || self.local_state != EndpointState::Active {
            return Ok(());
        }
        for handle in self.links.indices() {
            let Some(link) = self.links.get_mut(handle) else {
                continue;
            };
            if link.local_state() != EndpointState::Active || link.attach_sent {
                continue;
            }
            let attach = link.attach_frame();
            link.attach_sent = true;
            let id = link.id();
            let grant = !link.is_sender() && link.credit() > 0;
            out.write(channel, &Performative::Attach(attach))?;
            out.emit(Event::LocalOpen(Endpoint::Link(id)));
            if grant {
                self.write_flow(Some(handle), out)?;
            }
        }
        self.pump_all(out)
    }

    pub(crate) fn remote_begin(&mut self, channel: u16, begin: Begin, out: &mut Outbound) {
        tracing::debug!(
            "session {} begun by peer on channel {}",
            self.id.0,
            channel
        );
        self.remote_channel = Some(channel);
        self.remote_state = EndpointState::Active;
        self.incoming.remote_begin(&begin);
        self.outgoing.remote_begin(&begin);
        self.links
            .set_max_index(self.handle_max.min(begin.handle_max));
        self.remote_begin = Some(begin);
        out.emit(Event::RemoteOpen(Endpoint::Session(self.id)));
    }

    pub(crate) fn handle_end(&mut self, end: End, out: &mut Outbound) {
        tracing::debug!("session {} ended by peer", self.id.0);
        self.remote_state = EndpointState::Closed;
        self.remote_error = end.error.clone();
        let cause = EngineError::ResourceClosed(format!("session {} was ended by the peer", self.id.0));
        for (_, link) in self.links.iter_mut() {
            for timer in link.fail_pending(&cause) {
                out.timers.cancel(Some(timer));
            }
            if link.remote_state() != EndpointState::Closed {
                out.emit(Event::ParentClosed(Endpoint::Link(link.id())));
            }
        }
        out.emit(Event::RemoteClose {
            endpoint: Endpoint::Session(self.id),
            error: end.error,
        });
    }

    /// The connection was closed by the peer or the engine stopped.
    pub(crate) fn parent_closed(&mut self, cause: &EngineError, out: &mut Outbound) {
        self.fail_links(cause, out);
        if self.remote_state != EndpointState::Closed {
            self.remote_state = EndpointState::Closed;
            out.emit(Event::ParentClosed(Endpoint::Session(self.id)));
        }
    }

    // ---- links ----

    /// Allocate the lowest free handle for a new link.
    pub(crate) fn new_link(&mut self, make: impl FnOnce(LinkId) -> Link) -> Result<LinkId> {
        self.check_usable()?;
        let handle = self.links.next_free().ok_or_else(|| {
            EngineError::local(format!("session {} has no free link handle", self.id.0))
        })?;
        let id = LinkId {
            session: self.id,
            handle,
        };
        self.links
            .insert_at(handle, make(id))
            .map_err(|_| EngineError::local(format!("handle {} already in use", handle)))?;
        Ok(id)
    }

    pub(crate) fn open_link(&mut self, handle: u32) -> Result<()> {
        self.check_usable()?;
        self.link_or_err(handle)?.open()
    }

    /// Detach (or close) a link locally.
    pub(crate) fn detach_link(
        &mut self,
        handle: u32,
        close: bool,
        error: Option<ErrorCondition>,
        out: &mut Outbound,
    ) -> Result<()> {
        let channel = self.channel();
        let link = self.link_or_err(handle)?;
        link.close(close, error)?;
        let cause = EngineError::ResourceClosed(format!("link '{}' detached", link.name()));
        for timer in link.fail_pending(&cause) {
            out.timers.cancel(Some(timer));
        }
        if link.attach_sent {
            let detach = Detach {
                handle,
                closed: link.is_closing(),
                error: link.local_error().cloned(),
            };
            let id = link.id();
            out.write(channel, &Performative::Detach(detach))?;
            out.emit(Event::LocalClose(Endpoint::Link(id)));
        }
        self.free_link(handle);
        Ok(())
    }

    /// Release a link's handle once both ends are done with it.
    fn free_link(&mut self, handle: u32) {
        let done = match self.links.get(handle) {
            Some(link) => {
                link.is_finished()
                    || (link.local_state() == EndpointState::Closed
                        && !link.attach_sent
                        && link.remote_state() == EndpointState::Idle)
            }
            None => false,
        };
        if !done {
            return;
        }
        if let Some(link) = self.links.remove(handle) {
            if let Some(remote) = link.remote_handle() {
                self.remote_handles.remove(remote);
            }
            tracing::debug!("link '{}' released handle {}", link.name(), handle);
        }
        self.unsettled_out.retain(|_, h| *h != handle);
        self.unsettled_in.retain(|_, h| *h != handle);
    }

    pub(crate) fn handle_attach(&mut self, attach: Attach, out: &mut Outbound) -> Result<()> {
        if attach.handle > self.handle_max {
            return Err(EngineError::violation(format!(
                "Attach handle {} exceeds handle-max {}",
                attach.handle, self.handle_max
            )));
        }
        if self.remote_handles.contains(attach.handle) {
            return Err(EngineError::violation(format!(
                "Attach on handle {} which is already in use",
                attach.handle
            )));
        }
        let role = attach.role.opposite();
        let existing = self
            .links
            .iter()
            .find(|(_, link)| {
                link.name() == attach.name
                    && link.role() == role
                    && link.remote_state() == EndpointState::Idle
            })
            .map(|(handle, _)| handle);
        let handle = match existing {
            Some(handle) => handle,
            None => {
                let name = attach.name.clone();
                let id = self
                    .new_link(|id| Link::new(id, name, role))
                    .map_err(|e| EngineError::violation(e.to_string()))?;
                id.handle
            }
        };
        let remote = attach.handle;
        self.remote_handles
            .insert_at(remote, handle)
            .map_err(|_| EngineError::violation(format!("handle {} already in use", remote)))?;
        let link = self.link_or_err(handle)?;
        tracing::debug!("link '{}' attached by peer on handle {}", link.name(), remote);
        link.remote_attach(attach);
        let id = link.id();
        out.emit(Event::RemoteOpen(Endpoint::Link(id)));
        self.pump(handle, out)
    }

    pub(crate) fn handle_detach(&mut self, detach: Detach, out: &mut Outbound) -> Result<()> {
        let handle = self.local_handle(detach.handle)?;
        let link = self.link_or_err(handle)?;
        link.remote_detach(detach.error.clone());
        let cause = EngineError::ResourceClosed(format!("link '{}' detached by the peer", link.name()));
        for timer in link.fail_pending(&cause) {
            out.timers.cancel(Some(timer));
        }
        let id = link.id();
        if detach.closed {
            out.emit(Event::RemoteClose {
                endpoint: Endpoint::Link(id),
                error: detach.error,
            });
        } else {
            out.emit(Event::RemoteDetach {
                link: id,
                error: detach.error,
            });
        }
        self.free_link(handle);
        Ok(())
    }

    // ---- flow control ----

    fn flow_frame(&mut self, handle: Option<u32>) -> Flow {
        let mut flow = Flow {
            next_incoming_id: self
                .remote_begin
                .as_ref()
                .map(|_| self.incoming.next_incoming_id()),
            incoming_window: self.incoming.update(),
            next_outgoing_id: self.outgoing.next_outgoing_id(),
            outgoing_window: self.outgoing.outgoing_window(),
            ..Flow::default()
        };
        if let Some(link) = handle.and_then(|h| self.links.get(h)) {
            flow.handle = Some(link.id().handle);
            if link.is_sender() || link.link_credit().is_delivery_count_initialised() {
                flow.delivery_count = Some(link.delivery_count());
            }
            flow.link_credit = Some(link.credit());
            flow.drain = link.is_drain();
        }
        flow
    }

    /// Write a Flow, for the session alone or on behalf of a link.
    pub(crate) fn write_flow(&mut self, handle: Option<u32>, out: &mut Outbound) -> Result<()> {
        let flow = self.flow_frame(handle);
        out.write(self.channel(), &Performative::Flow(flow))
    }

    pub(crate) fn handle_flow(&mut self, flow: Flow, out: &mut Outbound) -> Result<()> {
        self.incoming.remote_flow(&flow);
        self.outgoing.remote_flow(&flow);
        let mut echo_handle = None;
        if let Some(remote) = flow.handle {
            let handle = self.local_handle(remote)?;
            let link = self.link_or_err(handle)?;
            let id = link.id();
            if link.is_sender() {
                link.credit.sender_flow(
                    flow.delivery_count,
                    flow.link_credit.unwrap_or(0),
                    flow.drain,
                );
                tracing::trace!(
                    "link '{}' credit {} drain {}",
                    link.name(),
                    link.credit(),
                    link.is_drain()
                );
            } else if link.credit.receiver_flow(flow.delivery_count, flow.link_credit) {
                if let Some((mut result, timer)) = link.drain.take() {
                    link.credit.set_drain(false);
                    out.timers.cancel(timer);
                    result.complete(());
                }
            }
            out.emit(Event::CreditUpdated(id));
            echo_handle = Some(handle);
        }
        if flow.echo {
            self.write_flow(echo_handle, out)?;
        }
        self.pump_all(out)
    }

    /// Grant more credit to a receiving link.
    pub(crate) fn grant(&mut self, handle: u32, credit: u32, out: &mut Outbound) -> Result<()> {
        self.check_usable()?;
        let link = self.link_or_err(handle)?;
        if link.is_sender() {
            return Err(EngineError::local("credit is granted by receivers"));
        }
        if link.local_state() == EndpointState::Closed {
            return Err(EngineError::ResourceClosed(format!(
                "link '{}' is detached",
                link.name()
            )));
        }
        link.credit.increment_credit(credit);
        if link.attach_sent && self.begin_sent {
            self.write_flow(Some(handle), out)?;
        }
        Ok(())
    }

    /// Ask the sender to use up or give back all outstanding credit.
    pub(crate) fn drain(&mut self, handle: u32, out: &mut Outbound) -> Result<AsyncResult<()>> {
        self.check_usable()?;
        let link = self.link_or_err(handle)?;
        if link.is_sender() {
            return Err(EngineError::local("only receivers can drain"));
        }
        if link.local_state() != EndpointState::Active {
            return Err(EngineError::local(format!("link '{}' is not open", link.name())));
        }
        if link.drain.is_some() {
            return Err(EngineError::local("a drain is already pending"));
        }
        if link.credit() == 0 {
            return Ok(AsyncResult::ready(Ok(())));
        }
        link.credit.set_drain(true);
        let timer = out
            .timers
            .schedule(TimerKind::Drain(link.id()), out.config.drain_timeout_ms);
        let (completer, result) = result::pending();
        link.drain = Some((completer, timer));
        if link.attach_sent && self.begin_sent {
            self.write_flow(Some(handle), out)?;
        }
        Ok(result)
    }

    pub(crate) fn drain_timed_out(&mut self, handle: u32) {
        if let Some(link) = self.links.get_mut(handle) {
            if let Some((mut result, _)) = link.drain.take() {
                tracing::warn!("drain on link '{}' timed out", link.name());
                link.credit.set_drain(false);
                result.fail(EngineError::Timeout("drain".into()));
            }
        }
    }

    // ---- sending ----

    fn can_transfer(&self) -> bool {
        self.local_state == EndpointState::Active
            && self.remote_state == EndpointState::Active
            && self.outgoing.available() > 0
    }

    /// Submit a send. It goes out now if the link can transfer, otherwise it
    /// waits behind earlier sends.
    pub(crate) fn send(
        &mut self,
        handle: u32,
        mut request: SendRequest,
        out: &mut Outbound,
    ) -> Result<AsyncResult<Option<DeliveryId>>> {
        self.check_usable()?;
        let link = self
            .links
            .get_mut(handle)
            .ok_or_else(|| EngineError::local(format!("no link {}", handle)))?;
        if !link.is_sender() {
            return Err(EngineError::local(format!(
                "link '{}' is not a sender",
                link.name()
            )));
        }
        match (link.local_state(), link.remote_state()) {
            (EndpointState::Idle, _) => {
                return Err(EngineError::local(format!(
                    "link '{}' is not open",
                    link.name()
                )))
            }
            (EndpointState::Closed, _) | (_, EndpointState::Closed) => {
                return Err(EngineError::ResourceClosed(format!(
                    "link '{}' is detached",
                    link.name()
                )))
            }
            _ => {}
        }
        let mode = link.snd_settle_mode();
        match mode {
            crate::types::SenderSettleMode::Settled => request.settled = true,
            crate::types::SenderSettleMode::Unsettled => request.settled = false,
            crate::types::SenderSettleMode::Mixed => {}
        }
        let send_id = link.blocked.next_id();
        let (completer, result) = result::pending_op(send_id);

        let can_start = link.blocked.is_empty()
            && link.in_flight.is_none()
            && link.is_sendable()
            && self.can_transfer();
        if can_start {
            self.start_send(handle, request, completer, out)?;
        } else {
            let link = self.link_or_err(handle)?;
            let timer = out.timers.schedule(
                TimerKind::Send {
                    link: link.id(),
                    send_id,
                },
                out.config.send_timeout_ms,
            );
            link.blocked.push_back(send_id, request, completer, timer);
            tracing::debug!(
                "send on link '{}' queued, {} waiting",
                link.name(),
                link.blocked.len()
            );
        }
        Ok(result)
    }

    /// Put a send on the wire, enlisting it in the session's transaction
    /// as it goes out.
    fn start_send(
        &mut self,
        handle: u32,
        mut request: SendRequest,
        mut result: Completer<Option<DeliveryId>>,
        out: &mut Outbound,
    ) -> Result<()> {
        let link = self
            .links
            .get_mut(handle)
            .ok_or_else(|| EngineError::local(format!("no link {}", handle)))?;
        if self.transaction.is_active() && !link.is_coordinator() {
            if self.transaction.is_in_doubt() {
                tracing::debug!(
                    "send on link '{}' ignored, transaction outcome in doubt",
                    link.name()
                );
                result.complete(None);
                return Ok(());
            }
            if let Some((state, settled)) = self.transaction.enlist(
                request.state.take(),
                request.settled,
                link.snd_settle_mode(),
            ) {
                request.state = Some(state);
                request.settled = settled;
            }
        }
        let delivery_id = self.next_delivery_id;
        self.next_delivery_id = self.next_delivery_id.wrapping_add(1);
        let tag = match request.tag {
            Some(tag) => tag,
            None => link.next_tag(),
        };
        link.credit.decrement_credit();
        link.credit.increment_delivery_count();
        if !request.settled {
            let mut delivery = Delivery::new(delivery_id, tag.clone(), request.message_format);
            delivery.set_local_state(request.state.clone());
            link.deliveries.insert(delivery_id, delivery);
            self.unsettled_out.insert(delivery_id, handle);
        }
        let transfer = Transfer {
            handle,
            delivery_id: Some(delivery_id),
            delivery_tag: Some(tag),
            message_format: Some(request.message_format),
            settled: Some(request.settled),
            state: request.state,
            ..Transfer::default()
        };
        self.write_in_flight(
            handle,
            InFlight {
                transfer,
                payload: request.payload,
                result,
            },
            out,
        )
    }

    /// Write as much of a delivery as the outgoing window allows.
    fn write_in_flight(
        &mut self,
        handle: u32,
        mut in_flight: InFlight,
        out: &mut Outbound,
    ) -> Result<()> {
        let frames = out.write_transfer(
            self.channel(),
            &in_flight.transfer,
            &mut in_flight.payload,
            self.outgoing.available(),
        )?;
        self.outgoing.on_frames_sent(frames);
        if frames > 0 && in_flight.payload.is_empty() {
            let id = in_flight.transfer.delivery_id.unwrap_or_default();
            in_flight.result.complete(Some(DeliveryId(id)));
        } else if let Some(link) = self.links.get_mut(handle) {
            tracing::trace!(
                "delivery on link '{}' paused, {} bytes unsent",
                link.name(),
                in_flight.payload.len()
            );
            link.in_flight = Some(in_flight);
        }
        Ok(())
    }

    /// Move a link's waiting sends onto the wire while it can transfer.
    pub(crate) fn pump(&mut self, handle: u32, out: &mut Outbound) -> Result<()> {
        while self.can_transfer() {
            let Some(link) = self.links.get_mut(handle) else {
                return Ok(());
            };
            if let Some(in_flight) = link.in_flight.take() {
                self.write_in_flight(handle, in_flight, out)?;
                if self.links.get(handle).is_some_and(|l| l.in_flight.is_some()) {
                    break;
                }
                continue;
            }
            let Some(send) = link.blocked.pop_front() else {
                break;
            };
            if !link.is_sendable() {
                link.blocked.push_front(send);
                break;
            }
            out.timers.cancel(send.timer);
            self.start_send(handle, send.request, send.result, out)?;
        }
        self.answer_drain(handle, out)
    }

    fn pump_all(&mut self, out: &mut Outbound) -> Result<()> {
        for handle in self.links.indices() {
            self.pump(handle, out)?;
        }
        Ok(())
    }

    /// A drained sender with nothing left to send gives up its credit.
    fn answer_drain(&mut self, handle: u32, out: &mut Outbound) -> Result<()> {
        let Some(link) = self.links.get_mut(handle) else {
            return Ok(());
        };
        if !link.is_sender()
            || !link.is_drain()
            || !link.attach_sent
            || link.queued_sends() > 0
            || link.local_state() != EndpointState::Active
        {
            return Ok(());
        }
        link.credit.drain_credit();
        let id = link.id();
        let mut flow = self.flow_frame(Some(handle));
        flow.drain = true;
        out.write(self.channel(), &Performative::Flow(flow))?;
        out.emit(Event::CreditUpdated(id));
        Ok(())
    }

    pub(crate) fn send_timed_out(&mut self, handle: u32, send_id: u64) {
        let Some(link) = self.links.get_mut(handle) else {
            return;
        };
        if let Some(mut send) = link.blocked.remove(send_id) {
            tracing::warn!("send on link '{}' timed out waiting for credit", link.name());
            let error = EngineError::Timeout("send".into());
            if let Some(op) = send.request.tag.as_ref().and_then(|t| link.txn_ops.remove(t)) {
                op.fail(error.clone());
                self.transaction.reset();
            }
            send.result.fail(error);
        }
    }

    /// Withdraw a send that is still waiting. Sends already on the wire stay.
    pub(crate) fn cancel_send(
        &mut self,
        handle: u32,
        result: &AsyncResult<Option<DeliveryId>>,
        out: &mut Outbound,
    ) -> bool {
        let Some(link) = self.links.get_mut(handle) else {
            return false;
        };
        let Some(mut send) = link.blocked.remove(result.op()) else {
            return false;
        };
        out.timers.cancel(send.timer);
        let error = EngineError::local("send cancelled");
        if let Some(op) = send.request.tag.as_ref().and_then(|t| link.txn_ops.remove(t)) {
            op.fail(error.clone());
            self.transaction.reset();
        }
        send.result.fail(error);
        true
    }

    // ---- receiving ----

    pub(crate) fn handle_transfer(
        &mut self,
        transfer: Transfer,
        payload: Option<Bytes>,
        out: &mut Outbound,
    ) -> Result<()> {
        let payload = payload.unwrap_or_default();
        let handle = self.local_handle(transfer.handle)?;
        self.incoming.on_transfer(payload.len(), transfer.aborted)?;
        let link = self
            .links
            .get_mut(handle)
            .ok_or_else(|| EngineError::violation("Transfer for a released link"))?;
        if link.is_sender() {
            return Err(EngineError::violation(format!(
                "Transfer received on sending link '{}'",
                link.name()
            )));
        }
        let id = match link.incoming {
            Some(current) => {
                if transfer.delivery_id.is_some_and(|id| id != current) {
                    return Err(EngineError::violation(format!(
                        "delivery-id changed from {} in the middle of a delivery",
                        current
                    )));
                }
                current
            }
            None => {
                let id = transfer.delivery_id.ok_or_else(|| {
                    EngineError::violation("first Transfer of a delivery has no delivery-id")
                })?;
                let tag = transfer.delivery_tag.clone().ok_or_else(|| {
                    EngineError::violation("first Transfer of a delivery has no delivery-tag")
                })?;
                if link.credit() == 0 {
                    return Err(EngineError::violation(format!(
                        "Transfer on link '{}' exceeds its link credit",
                        link.name()
                    )));
                }
                link.credit.decrement_credit();
                link.credit.increment_delivery_count();
                link.deliveries.insert(
                    id,
                    Delivery::new(id, tag, transfer.message_format.unwrap_or(0)),
                );
                self.unsettled_in.insert(id, handle);
                id
            }
        };
        let link_id = link.id();
        if transfer.aborted {
            // an aborted delivery is settled and gone on both ends
            link.incoming = None;
            let discarded = link
                .deliveries
                .remove(&id)
                .map_or(0, |mut delivery| delivery.abort());
            self.unsettled_in.remove(&id);
            tracing::debug!("delivery {} aborted by peer", id);
            if discarded > 0 {
                self.release(discarded, out)?;
            }
            out.emit(Event::DeliveryAborted {
                link: link_id,
                delivery: DeliveryId(id),
            });
            return Ok(());
        }
        let mut discarded = 0;
        match link.deliveries.get_mut(&id) {
            Some(delivery) => {
                delivery.set_remote_state(transfer.state);
                if transfer.settled == Some(true) {
                    delivery.remote_settle();
                }
                delivery.append(&payload);
                if !transfer.more {
                    delivery.finish();
                }
            }
            // settled locally before the last frame: drop the rest
            None => discarded = payload.len(),
        }
        link.incoming = transfer.more.then_some(id);
        if discarded > 0 {
            self.release(discarded, out)?;
        }
        out.emit(Event::Delivery {
            link: link_id,
            delivery: DeliveryId(id),
        });
        Ok(())
    }

    /// Return consumed bytes to the incoming window, sending a Flow if the
    /// peer may now send more.
    fn release(&mut self, bytes: usize, out: &mut Outbound) -> Result<()> {
        if self.incoming.release(bytes)
            && self.begin_sent
            && self.local_state == EndpointState::Active
            && self.remote_state == EndpointState::Active
        {
            self.write_flow(None, out)?;
        }
        Ok(())
    }

    /// Take the buffered payload of an incoming delivery.
    pub(crate) fn read(&mut self, handle: u32, id: u32, out: &mut Outbound) -> Result<Bytes> {
        let link = self.link_or_err(handle)?;
        let delivery = link
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| EngineError::local(format!("no delivery {} on link", id)))?;
        let payload = delivery.take_payload();
        self.release(payload.len(), out)?;
        Ok(payload)
    }

    // ---- settlement ----

    /// Update and optionally settle a delivery.
    pub(crate) fn disposition(
        &mut self,
        handle: u32,
        id: u32,
        state: Option<DeliveryState>,
        settle: bool,
        out: &mut Outbound,
    ) -> Result<()> {
        self.check_usable()?;
        let channel = self.channel();
        let link = self
            .links
            .get_mut(handle)
            .ok_or_else(|| EngineError::local(format!("no link {}", handle)))?;
        let role = link.role();
        let mode = link.snd_settle_mode();
        let enlist = !link.is_coordinator()
            && self.transaction.is_active()
            && !self.transaction.is_in_doubt();
        let delivery = link
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| EngineError::local(format!("no delivery {} on link", id)))?;
        if delivery.is_settled() {
            return Err(EngineError::local(format!("delivery {} is already settled", id)));
        }
        let state = state.or_else(|| delivery.local_state().cloned());
        let enlist = enlist && !matches!(state, Some(DeliveryState::Transactional(_)));
        let (state, settle) = match self.transaction.enlist(state.clone(), settle, mode) {
            Some((state, settled)) if enlist => (Some(state), settled),
            _ => (state, settle),
        };
        delivery.set_local_state(state.clone());
        let remotely_settled = delivery.is_remotely_settled();
        if settle {
            delivery.settle()?;
            link.deliveries.remove(&id);
            if role.is_sender() {
                self.unsettled_out.remove(&id);
            } else {
                self.unsettled_in.remove(&id);
            }
        }
        if settle && remotely_settled {
            return Ok(());
        }
        out.write(
            channel,
            &Performative::Disposition(Disposition {
                role,
                first: id,
                last: None,
                settled: settle,
                state,
                batchable: false,
            }),
        )
    }

    pub(crate) fn handle_disposition(
        &mut self,
        disposition: Disposition,
        out: &mut Outbound,
    ) -> Result<()> {
        let first = disposition.first;
        let last = disposition.last.unwrap_or(first);
        let ours = disposition.role == Role::Receiver;
        let map = if ours {
            &self.unsettled_out
        } else {
            &self.unsettled_in
        };
        let targets: Vec<(u32, u32)> = map
            .iter()
            .filter(|(id, _)| in_range(**id, first, last))
            .map(|(id, handle)| (*id, *handle))
            .collect();

        for (id, handle) in targets {
            let Some(link) = self.links.get_mut(handle) else {
                continue;
            };
            let link_id = link.id();
            let Some(delivery) = link.deliveries.get_mut(&id) else {
                continue;
            };
            delivery.set_remote_state(disposition.state.clone());
            if disposition.settled {
                delivery.remote_settle();
            }
            let tag = delivery.tag().clone();
            out.emit(Event::DeliveryUpdated {
                link: link_id,
                delivery: DeliveryId(id),
            });
            if ours {
                self.resolve_txn(handle, id, &tag, disposition.state.clone(), out)?;
            }
        }
        Ok(())
    }

    // ---- transactions ----

    /// Declare a transaction over a coordinator link.
    pub(crate) fn declare(&mut self, handle: u32, out: &mut Outbound) -> Result<AsyncResult<Bytes>> {
        self.check_coordinator(handle)?;
        if self.transaction.status() != TransactionStatus::Idle {
            return Err(EngineError::local("a transaction is already declared"));
        }
        let payload = encode_sections(&[Section::AmqpValue(Declare::default().to_value())])?;
        let (completer, result) = result::pending();
        self.coordinator_send(handle, payload, TxnOp::Declare(completer), out)?;
        self.transaction.declaring();
        Ok(result)
    }

    /// Commit (`fail == false`) or roll back the current transaction.
    pub(crate) fn discharge(
        &mut self,
        handle: u32,
        fail: bool,
        out: &mut Outbound,
    ) -> Result<AsyncResult<()>> {
        self.check_coordinator(handle)?;
        let txn_id = match (self.transaction.status(), self.transaction.txn_id()) {
            (TransactionStatus::Active, Some(id)) => id.clone(),
            _ => return Err(EngineError::local("no active transaction to discharge")),
        };
        let discharge = Discharge {
            txn_id,
            fail: Some(fail),
        };
        let payload = encode_sections(&[Section::AmqpValue(discharge.to_value())])?;
        let (completer, result) = result::pending();
        self.coordinator_send(handle, payload, TxnOp::Discharge(completer), out)?;
        self.transaction.discharging();
        Ok(result)
    }

    fn check_coordinator(&self, handle: u32) -> Result<()> {
        match self.links.get(handle) {
            Some(link) if link.is_sender() && link.is_coordinator() => Ok(()),
            Some(link) => Err(EngineError::local(format!(
                "link '{}' is not a coordinator link",
                link.name()
            ))),
            None => Err(EngineError::local(format!("no link {}", handle))),
        }
    }

    fn coordinator_send(
        &mut self,
        handle: u32,
        payload: Bytes,
        op: TxnOp,
        out: &mut Outbound,
    ) -> Result<()> {
        let tag = self.link_or_err(handle)?.next_tag();
        let mut sent = self.send(handle, SendRequest::new(payload).tag(tag.clone()), out)?;
        if let Some(Err(e)) = sent.try_take() {
            op.fail(e);
            return Ok(());
        }
        self.link_or_err(handle)?.txn_ops.insert(tag, op);
        Ok(())
    }

    /// Match a coordinator outcome to the request that caused it.
    fn resolve_txn(
        &mut self,
        handle: u32,
        id: u32,
        tag: &Bytes,
        state: Option<DeliveryState>,
        out: &mut Outbound,
    ) -> Result<()> {
        let Some(state) = state.filter(DeliveryState::is_outcome) else {
            return Ok(());
        };
        let Some(op) = self
            .links
            .get_mut(handle)
            .and_then(|link| link.txn_ops.remove(tag))
        else {
            return Ok(());
        };
        match (op, state) {
            (TxnOp::Declare(mut result), DeliveryState::Declared(declared)) => {
                self.transaction.declared(declared.txn_id.clone());
                result.complete(declared.txn_id);
            }
            (TxnOp::Discharge(mut result), DeliveryState::Accepted) => {
                tracing::debug!("transaction discharged");
                self.transaction.reset();
                result.complete(());
            }
            (op, DeliveryState::Rejected(rejected)) => {
                self.transaction.reset();
                op.fail(EngineError::Rejected(rejected.error));
            }
            (op, other) => {
                tracing::warn!("unexpected coordinator outcome {:?}", other);
                self.transaction.reset();
                op.fail(EngineError::Rejected(None));
            }
        }
        // requests to the coordinator are settled by the engine
        self.disposition(handle, id, None, true, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn session() -> (Session, Outbound) {
        let mut session = Session::new(SessionId(0), 0, 512, 255);
        session.open().unwrap();
        let mut out = Outbound::new(EngineConfig::default());
        session.sync(&mut out).unwrap();
        session.remote_begin(
            0,
            Begin {
                remote_channel: Some(0),
                incoming_window: 100,
                ..Begin::default()
            },
            &mut out,
        );
        (session, out)
    }

    fn sender(session: &mut Session, out: &mut Outbound) -> u32 {
        let id = session
            .new_link(|id| Link::new(id, "out", Role::Sender))
            .unwrap();
        session.open_link(id.handle).unwrap();
        session.sync(out).unwrap();
        session
            .handle_attach(Attach::new("out", 5, Role::Receiver), out)
            .unwrap();
        id.handle
    }

    fn receiver(session: &mut Session, out: &mut Outbound) -> u32 {
        let id = session
            .new_link(|id| Link::new(id, "in", Role::Receiver))
            .unwrap();
        session.open_link(id.handle).unwrap();
        session.sync(out).unwrap();
        session
            .handle_attach(Attach::new("in", 6, Role::Sender), out)
            .unwrap();
        session.grant(id.handle, 5, out).unwrap();
        id.handle
    }

    fn credit(handle: u32, delivery_count: u32, credit: u32) -> Flow {
        Flow {
            next_incoming_id: Some(0),
            incoming_window: 100,
            handle: Some(handle),
            delivery_count: Some(delivery_count),
            link_credit: Some(credit),
            ..Flow::default()
        }
    }

    #[test]
    fn test_in_range_wraps() {
        assert!(in_range(5, 5, 5));
        assert!(in_range(0, u32::MAX, 1));
        assert!(!in_range(2, u32::MAX, 1));
    }

    #[test]
    fn test_blocked_send_released_by_credit() {
        let (mut session, mut out) = session();
        let handle = sender(&mut session, &mut out);

        let mut result = session
            .send(handle, SendRequest::new("hello"), &mut out)
            .unwrap();
        assert!(!result.is_done());
        assert_eq!(session.link(handle).unwrap().queued_sends(), 1);

        session.handle_flow(credit(5, 0, 1), &mut out).unwrap();
        assert_eq!(result.try_take(), Some(Ok(Some(DeliveryId(0)))));
        let link = session.link(handle).unwrap();
        assert_eq!(link.credit(), 0);
        assert_eq!(link.delivery_count(), 1);
        assert_eq!(link.queued_sends(), 0);
    }

    #[test]
    fn test_send_timeout_fails_result() {
        let (mut session, mut out) = session();
        let handle = sender(&mut session, &mut out);
        let mut result = session.send(handle, SendRequest::new("x"), &mut out).unwrap();
        session.send_timed_out(handle, 1);
        assert!(matches!(result.try_take(), Some(Err(EngineError::Timeout(_)))));
    }

    #[test]
    fn test_cancel_only_affects_waiting_sends() {
        let (mut session, mut out) = session();
        let handle = sender(&mut session, &mut out);
        session.handle_flow(credit(5, 0, 1), &mut out).unwrap();
        let mut sent = session.send(handle, SendRequest::new("a"), &mut out).unwrap();
        let mut waiting = session.send(handle, SendRequest::new("b"), &mut out).unwrap();
        assert!(!session.cancel_send(handle, &sent, &mut out));
        assert!(session.cancel_send(handle, &waiting, &mut out));
        assert!(sent.try_take().unwrap().is_ok());
        assert!(matches!(waiting.try_take(), Some(Err(EngineError::LocalState(_)))));
    }

    #[test]
    fn test_drain_answered_when_idle() {
        let (mut session, mut out) = session();
        let handle = sender(&mut session, &mut out);
        let mut flow = credit(5, 0, 10);
        flow.drain = true;
        session.handle_flow(flow, &mut out).unwrap();
        let link = session.link(handle).unwrap();
        assert_eq!(link.credit(), 0);
        assert_eq!(link.delivery_count(), 10);
        assert!(!link.is_drain());
    }

    #[test]
    fn test_window_exhaustion_pauses_delivery() {
        let (mut session, mut out) = session();
        let handle = sender(&mut session, &mut out);
        session.handle_flow(credit(5, 0, 1), &mut out).unwrap();
        // peer accepts one more frame only
        session
            .handle_flow(
                Flow {
                    next_incoming_id: Some(0),
                    incoming_window: 1,
                    ..Flow::default()
                },
                &mut out,
            )
            .unwrap();
        let payload = Bytes::from(vec![7u8; 1500]);
        let mut result = session.send(handle, SendRequest::new(payload), &mut out).unwrap();
        assert!(!result.is_done());
        assert_eq!(session.outgoing().available(), 0);

        session
            .handle_flow(
                Flow {
                    next_incoming_id: Some(1),
                    incoming_window: 10,
                    ..Flow::default()
                },
                &mut out,
            )
            .unwrap();
        assert_eq!(result.try_take(), Some(Ok(Some(DeliveryId(0)))));
    }

    #[test]
    fn test_aborted_delivery_forgotten() {
        let (mut session, mut out) = session();
        let handle = receiver(&mut session, &mut out);
        session
            .handle_transfer(
                Transfer {
                    handle: 6,
                    delivery_id: Some(0),
                    delivery_tag: Some(Bytes::from_static(b"t")),
                    more: true,
                    ..Transfer::default()
                },
                Some(Bytes::from_static(b"abc")),
                &mut out,
            )
            .unwrap();
        assert_eq!(session.unsettled(), (0, 1));
        assert_eq!(session.incoming().buffered(), 3);

        session
            .handle_transfer(
                Transfer {
                    handle: 6,
                    aborted: true,
                    ..Transfer::default()
                },
                None,
                &mut out,
            )
            .unwrap();
        let link = session.link(handle).unwrap();
        assert!(link.delivery(0).is_none());
        assert!(link.incoming.is_none());
        assert_eq!(session.unsettled(), (0, 0));
        assert_eq!(session.incoming().buffered(), 0);
        assert!(out.events.contains(&Event::DeliveryAborted {
            link: link.id(),
            delivery: DeliveryId(0),
        }));

        // the next delivery starts fresh
        session
            .handle_transfer(
                Transfer {
                    handle: 6,
                    delivery_id: Some(1),
                    delivery_tag: Some(Bytes::from_static(b"u")),
                    ..Transfer::default()
                },
                Some(Bytes::from_static(b"x")),
                &mut out,
            )
            .unwrap();
        assert!(session.link(handle).unwrap().delivery(1).unwrap().is_complete());
    }

    #[test]
    fn test_transfer_on_unknown_handle_is_violation() {
        let (mut session, mut out) = session();
        let err = session
            .handle_transfer(
                Transfer {
                    handle: 9,
                    delivery_id: Some(0),
                    delivery_tag: Some(Bytes::from_static(b"t")),
                    ..Transfer::default()
                },
                None,
                &mut out,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }

    #[test]
    fn test_handle_reused_after_both_detach() {
        let (mut session, mut out) = session();
        let handle = sender(&mut session, &mut out);
        session.detach_link(handle, true, None, &mut out).unwrap();
        assert!(session.link(handle).is_some());
        session
            .handle_detach(
                Detach {
                    handle: 5,
                    closed: true,
                    error: None,
                },
                &mut out,
            )
            .unwrap();
        assert!(session.link(handle).is_none());
        let again = session
            .new_link(|id| Link::new(id, "next", Role::Receiver))
            .unwrap();
        assert_eq!(again.handle, handle);
    }
}
