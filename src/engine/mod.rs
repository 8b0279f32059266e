//! The protocol engine.
//!
//! [`Engine`] is sans-IO: the host feeds it received bytes with
//! [`ingest`](Engine::ingest), collects bytes to send with
//! [`take_output`](Engine::take_output), drains [`Event`]s with
//! [`poll_event`](Engine::poll_event) and arms the timers it asks for. The
//! engine never blocks and never touches a socket.
//!
//! Endpoints form a tree: the [`Connection`] owns [`Session`]s by local
//! channel, each session owns [`Link`]s by handle, and each link owns its
//! unsettled [`Delivery`]s. Callers address them by [`SessionId`],
//! [`LinkId`] and [`DeliveryId`].
//!
//! Errors come back two ways. Calls that are illegal for the current state
//! return a non-fatal error and change nothing. Anything the peer does wrong
//! fails the engine: a best-effort Close goes out, every pending result
//! fails with the cause, [`Event::EngineShutdown`] is emitted and every
//! later call returns the same cause.
//!
//! # Example
//!
//! ```
//! use amqp_engine::{Engine, EngineConfig};
//!
//! let mut client = Engine::new(EngineConfig::default()).unwrap();
//! let mut server = Engine::new(EngineConfig::default()).unwrap();
//!
//! let mut opened = client.open().unwrap();
//! server.open().unwrap();
//! for _ in 0..3 {
//!     server.ingest(&client.take_output()).unwrap();
//!     client.ingest(&server.take_output()).unwrap();
//! }
//! assert!(opened.is_done());
//! ```

pub mod builder;
pub mod connection;
pub mod credit;
pub mod delivery;
pub mod link;
pub(crate) mod outbound;
pub mod result;
pub mod session;
pub mod slots;
pub mod timer;
pub mod transaction;
pub mod window;

use bytes::Bytes;

pub use builder::EngineBuilder;
pub use connection::Connection;
pub use credit::LinkCredit;
pub use delivery::Delivery;
pub use link::{Link, SendRequest};
pub use result::AsyncResult;
pub use session::Session;
pub use slots::Slots;
pub use timer::{TimerId, TimerRequest};
pub use transaction::{TransactionContext, TransactionStatus};
pub use window::{incoming_window_for, IncomingWindow, OutgoingWindow, UNBOUNDED_WINDOW};

use self::outbound::Outbound;
use self::timer::TimerKind;
use crate::config::EngineConfig;
use crate::error::{ConfigError, EngineError, Result};
use crate::handler::{Event, EventKind, HandlerRegistry};
use crate::protocol::{FrameBody, FrameBuffer, Inbound, ProtocolHeader};
use crate::sasl::SaslGate;
use crate::types::{conditions, DeliveryState, ErrorCondition, Role, SaslCode};

/// Local channel of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u16);

/// A link, addressed by its session and local handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId {
    pub session: SessionId,
    pub handle: u32,
}

/// Session-scoped delivery-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeliveryId(pub u32);

/// Lifecycle of one side of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    #[default]
    Idle,
    Active,
    Closed,
}

/// Read and write times for idle-timeout checks.
#[derive(Debug, Default)]
struct IdleClock {
    started: bool,
    last_read: u64,
    last_write: u64,
    /// Bytes arrived since the last tick.
    read: bool,
}

/// A sans-IO AMQP 1.0 connection engine.
pub struct Engine {
    connection: Connection,
    out: Outbound,
    buffer: FrameBuffer,
    sasl: Option<SaslGate>,
    failure: Option<EngineError>,
    shutdown: bool,
    sasl_header_sent: bool,
    header_sent: bool,
    header_received: bool,
    idle: IdleClock,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create an engine without SASL.
    pub fn new(config: EngineConfig) -> std::result::Result<Self, ConfigError> {
        Self::from_parts(config, None, HandlerRegistry::new())
    }

    pub(crate) fn from_parts(
        config: EngineConfig,
        sasl: Option<SaslGate>,
        registry: HandlerRegistry,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let frame_limit = if sasl.is_some() {
            config.max_sasl_frame_size
        } else {
            config.max_frame_size
        };
        let mut out = Outbound::new(config);
        out.registry = registry;
        Ok(Self {
            connection: Connection::new(&out.config),
            out,
            buffer: FrameBuffer::with_max_frame_size(frame_limit),
            sasl,
            failure: None,
            shutdown: false,
            sasl_header_sent: false,
            header_sent: false,
            header_received: false,
            idle: IdleClock::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.out.config
    }

    // ---- endpoint access ----

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The connection, for setters that are legal before open.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.connection.session(id)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.connection.session_mut(id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.session(id.session)?.link(id.handle)
    }

    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.session_mut(id.session)?.link_mut(id.handle)
    }

    pub fn delivery(&self, link: LinkId, delivery: DeliveryId) -> Option<&Delivery> {
        self.link(link)?.delivery(delivery.0)
    }

    /// The cause of engine failure, if it failed.
    pub fn failure(&self) -> Option<&EngineError> {
        self.failure.as_ref()
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    #[inline]
    pub fn sasl_state(&self) -> Option<crate::sasl::SaslState> {
        self.sasl.as_ref().map(SaslGate::state)
    }

    // ---- host I/O ----

    /// Feed received bytes. Frames are handled in arrival order.
    pub fn ingest(&mut self, data: &[u8]) -> Result<()> {
        self.check_running()?;
        self.idle.read = true;
        self.buffer.extend(data);
        while !self.shutdown {
            let unit = match self.buffer.try_extract_one() {
                Ok(Some(unit)) => unit,
                Ok(None) => break,
                Err(e) => return Err(self.fail(e)),
            };
            if let Err(e) = self.process(unit) {
                return Err(self.fail(e));
            }
        }
        Ok(())
    }

    /// Bytes to hand to the transport.
    pub fn take_output(&mut self) -> Bytes {
        self.out.writer.take()
    }

    /// Next queued event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.out.events.pop_front()
    }

    /// Register a handler run synchronously for every event of `kind`.
    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&Event) + 'static,
    {
        self.out.registry.register(kind, handler);
    }

    /// Timers the host should arm since the last call.
    pub fn take_timer_requests(&mut self) -> Vec<TimerRequest> {
        self.out.timers.take_requests()
    }

    /// A timer armed from a [`TimerRequest`] expired. Timers whose operation
    /// already finished are ignored.
    pub fn fire_timer(&mut self, id: TimerId) -> Result<()> {
        let Some(kind) = self.out.timers.fire(id) else {
            tracing::trace!("timer {:?} fired after its operation finished", id);
            return Ok(());
        };
        match kind {
            TimerKind::Open => {
                if let Some((mut result, _)) = self.connection.open_result.take() {
                    tracing::warn!("open timed out");
                    result.fail(EngineError::Timeout("open".into()));
                }
            }
            TimerKind::Close => {
                if let Some((mut result, _)) = self.connection.close_result.take() {
                    tracing::warn!("close timed out waiting for the peer");
                    let error = EngineError::Timeout("close".into());
                    result.fail(error.clone());
                    self.finish(Some(error));
                }
            }
            TimerKind::Send { link, send_id } => {
                if let Some(session) = self.connection.session_mut(link.session) {
                    session.send_timed_out(link.handle, send_id);
                }
            }
            TimerKind::Drain(link) => {
                if let Some(session) = self.connection.session_mut(link.session) {
                    session.drain_timed_out(link.handle);
                }
            }
        }
        Ok(())
    }

    /// Check idle timeouts at `now_ms` on the host's clock.
    ///
    /// Fails the engine when nothing arrived within the local idle timeout
    /// and writes an empty frame when nothing was written for half the
    /// peer's. Returns when `tick` should next be called.
    pub fn tick(&mut self, now_ms: u64) -> Result<Option<u64>> {
        self.check_running()?;
        if !self.idle.started {
            self.idle = IdleClock {
                started: true,
                last_read: now_ms,
                last_write: now_ms,
                read: false,
            };
        }
        if std::mem::take(&mut self.idle.read) {
            self.idle.last_read = now_ms;
        }
        if std::mem::take(&mut self.out.wrote) {
            self.idle.last_write = now_ms;
        }

        let mut deadline = None;
        if let Some(local) = self.connection.idle_timeout() {
            if self.connection.is_open_sent() {
                let expires = self.idle.last_read + u64::from(local);
                if now_ms >= expires {
                    self.connection.set_local_error(ErrorCondition::new(
                        conditions::RESOURCE_LIMIT_EXCEEDED,
                        "local idle-timeout expired",
                    ));
                    return Err(self.fail(EngineError::Timeout("idle timeout".into())));
                }
                deadline = Some(expires);
            }
        }
        if let Some(remote) = self.connection.remote_idle_timeout().filter(|t| *t > 0) {
            let interval = u64::from((remote / 2).max(1));
            if now_ms >= self.idle.last_write + interval {
                self.out.write_heartbeat();
                self.out.wrote = false;
                self.idle.last_write = now_ms;
            }
            let next = self.idle.last_write + interval;
            deadline = Some(deadline.map_or(next, |d: u64| d.min(next)));
        }
        Ok(deadline)
    }

    // ---- connection ----

    /// Open the connection. The Open goes out once the protocol headers have
    /// been exchanged; the result resolves when the peer's Open arrives.
    pub fn open(&mut self) -> Result<AsyncResult<()>> {
        self.check_running()?;
        self.connection.open()?;
        let (completer, result) = result::pending();
        let timer = self
            .out
            .timers
            .schedule(TimerKind::Open, self.out.config.open_timeout_ms);
        self.connection.open_result = Some((completer, timer));
        self.run(|engine| {
            engine.ensure_header_sent()?;
            engine.sync()
        })?;
        Ok(result)
    }

    /// Close the connection.
    ///
    /// With the peer open, Close is written and the result resolves when the
    /// peer's Close arrives or the close timer fails it. Otherwise the
    /// engine shuts down at once.
    pub fn close(&mut self, error: Option<ErrorCondition>) -> Result<AsyncResult<()>> {
        self.check_running()?;
        if !self.connection.close(error) {
            return Err(EngineError::ResourceClosed("connection is already closed".into()));
        }
        tracing::debug!("closing connection");
        let (mut completer, result) = result::pending();
        self.run(|engine| engine.connection.write_close(&mut engine.out))?;
        if self.connection.remote_state() == EndpointState::Active {
            let timer = self
                .out
                .timers
                .schedule(TimerKind::Close, self.out.config.close_timeout_ms);
            self.connection.close_result = Some((completer, timer));
        } else {
            completer.complete(());
            self.finish(None);
        }
        Ok(result)
    }

    /// Stop the engine without a handshake, e.g. when the transport closed.
    pub fn shutdown(&mut self) {
        self.finish(None);
    }

    /// The transport failed underneath the engine.
    pub fn transport_failed(&mut self, reason: impl Into<String>) -> EngineError {
        self.fail(EngineError::EngineFailed(reason.into()))
    }

    // ---- sessions ----

    pub fn new_session(&mut self) -> Result<SessionId> {
        self.run(|engine| engine.connection.new_session())
    }

    pub fn open_session(&mut self, id: SessionId) -> Result<()> {
        self.run(|engine| {
            engine.connection.session_or_err(id)?.open()?;
            engine.sync()
        })
    }

    pub fn close_session(&mut self, id: SessionId, error: Option<ErrorCondition>) -> Result<()> {
        self.run(|engine| engine.connection.end_session(id, error, &mut engine.out))
    }

    // ---- links ----

    pub fn new_sender(&mut self, session: SessionId, name: impl Into<String>) -> Result<LinkId> {
        let name = name.into();
        self.run(|engine| {
            engine
                .connection
                .session_or_err(session)?
                .new_link(|id| Link::new(id, name, Role::Sender))
        })
    }

    pub fn new_receiver(&mut self, session: SessionId, name: impl Into<String>) -> Result<LinkId> {
        let name = name.into();
        self.run(|engine| {
            engine
                .connection
                .session_or_err(session)?
                .new_link(|id| Link::new(id, name, Role::Receiver))
        })
    }

    /// A sender whose target is the transaction coordinator.
    pub fn new_coordinator(&mut self, session: SessionId, name: impl Into<String>) -> Result<LinkId> {
        let name = name.into();
        self.run(|engine| {
            engine
                .connection
                .session_or_err(session)?
                .new_link(|id| Link::coordinator(id, name))
        })
    }

    pub fn open_link(&mut self, link: LinkId) -> Result<()> {
        self.run(|engine| {
            engine.connection.session_or_err(link.session)?.open_link(link.handle)?;
            engine.sync()
        })
    }

    /// Detach without closing; the link may be resumed later.
    pub fn detach_link(&mut self, link: LinkId, error: Option<ErrorCondition>) -> Result<()> {
        self.run(|engine| {
            engine.connection.session_or_err(link.session)?.detach_link(
                link.handle,
                false,
                error,
                &mut engine.out,
            )
        })
    }

    pub fn close_link(&mut self, link: LinkId, error: Option<ErrorCondition>) -> Result<()> {
        self.run(|engine| {
            engine.connection.session_or_err(link.session)?.detach_link(
                link.handle,
                true,
                error,
                &mut engine.out,
            )
        })
    }

    /// Grant `credit` more transfers to a receiving link.
    pub fn flow(&mut self, link: LinkId, credit: u32) -> Result<()> {
        self.run(|engine| {
            engine
                .connection
                .session_or_err(link.session)?
                .grant(link.handle, credit, &mut engine.out)
        })
    }

    /// Ask the sender to use or return all outstanding credit.
    pub fn drain(&mut self, link: LinkId) -> Result<AsyncResult<()>> {
        self.run(|engine| {
            engine
                .connection
                .session_or_err(link.session)?
                .drain(link.handle, &mut engine.out)
        })
    }

    /// Send a message. The result resolves with the delivery-id once the
    /// last frame is written, or with `None` if the send was dropped because
    /// the session's transaction outcome is in doubt.
    pub fn send(
        &mut self,
        link: LinkId,
        request: SendRequest,
    ) -> Result<AsyncResult<Option<DeliveryId>>> {
        self.run(|engine| {
            engine
                .connection
                .session_or_err(link.session)?
                .send(link.handle, request, &mut engine.out)
        })
    }

    /// Withdraw a send still waiting for credit. Returns false if it was
    /// already written.
    pub fn cancel_send(
        &mut self,
        link: LinkId,
        send: &AsyncResult<Option<DeliveryId>>,
    ) -> Result<bool> {
        self.run(|engine| {
            Ok(engine
                .connection
                .session_or_err(link.session)?
                .cancel_send(link.handle, send, &mut engine.out))
        })
    }

    /// Update a delivery's state and optionally settle it.
    pub fn disposition(
        &mut self,
        link: LinkId,
        delivery: DeliveryId,
        state: Option<DeliveryState>,
        settle: bool,
    ) -> Result<()> {
        self.run(|engine| {
            engine.connection.session_or_err(link.session)?.disposition(
                link.handle,
                delivery.0,
                state,
                settle,
                &mut engine.out,
            )
        })
    }

    /// Settle a delivery keeping its current local state.
    pub fn settle(&mut self, link: LinkId, delivery: DeliveryId) -> Result<()> {
        self.disposition(link, delivery, None, true)
    }

    /// Take the payload received so far, returning its bytes to the
    /// session's incoming window.
    pub fn read_delivery(&mut self, link: LinkId, delivery: DeliveryId) -> Result<Bytes> {
        self.run(|engine| {
            engine
                .connection
                .session_or_err(link.session)?
                .read(link.handle, delivery.0, &mut engine.out)
        })
    }

    /// Declare a transaction; resolves with the txn-id.
    pub fn declare(&mut self, coordinator: LinkId) -> Result<AsyncResult<Bytes>> {
        self.run(|engine| {
            engine
                .connection
                .session_or_err(coordinator.session)?
                .declare(coordinator.handle, &mut engine.out)
        })
    }

    /// Commit (`fail == false`) or roll back the session's transaction.
    pub fn discharge(&mut self, coordinator: LinkId, fail: bool) -> Result<AsyncResult<()>> {
        self.run(|engine| {
            engine
                .connection
                .session_or_err(coordinator.session)?
                .discharge(coordinator.handle, fail, &mut engine.out)
        })
    }

    // ---- internals ----

    fn check_running(&self) -> Result<()> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.shutdown {
            return Err(EngineError::ResourceClosed("remotely closed".into()));
        }
        Ok(())
    }

    /// Run a caller operation. Fatal errors fail the engine; local ones
    /// only go back to the caller.
    fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.check_running()?;
        match op(self) {
            Err(e) if e.is_fatal() => Err(self.fail(e)),
            other => other,
        }
    }

    fn ensure_header_sent(&mut self) -> Result<()> {
        match &mut self.sasl {
            Some(gate) if !gate.is_done() => {
                if !self.sasl_header_sent {
                    self.out.write_header(ProtocolHeader::SASL);
                    self.sasl_header_sent = true;
                    gate.on_header_sent(&mut self.out)?;
                }
            }
            _ => {
                if !self.header_sent {
                    self.out.write_header(ProtocolHeader::AMQP);
                    self.header_sent = true;
                }
            }
        }
        Ok(())
    }

    /// Write local state once both AMQP headers have crossed.
    fn sync(&mut self) -> Result<()> {
        if self.header_sent && self.header_received && !self.shutdown {
            self.connection.sync(&mut self.out)?;
        }
        Ok(())
    }

    fn process(&mut self, unit: Inbound) -> Result<()> {
        match unit {
            Inbound::Header(header) => self.handle_header(header),
            Inbound::Frame(frame) => match frame.body {
                FrameBody::Sasl(performative) => {
                    let gate = self
                        .sasl
                        .as_mut()
                        .filter(|gate| !gate.is_done())
                        .ok_or_else(|| {
                            EngineError::violation(format!(
                                "{} outside of SASL negotiation",
                                performative.name()
                            ))
                        })?;
                    match gate.handle_frame(performative, &mut self.out)? {
                        Some(code) => self.sasl_outcome(code),
                        None => Ok(()),
                    }
                }
                FrameBody::Amqp(performative) => {
                    if self.sasl.as_ref().is_some_and(|gate| !gate.is_done()) {
                        return Err(EngineError::violation(format!(
                            "{} before SASL negotiation finished",
                            performative.name()
                        )));
                    }
                    self.connection
                        .handle_frame(frame.channel, performative, frame.payload, &mut self.out)?;
                    self.after_remote_close();
                    Ok(())
                }
            },
        }
    }

    fn handle_header(&mut self, header: ProtocolHeader) -> Result<()> {
        match &mut self.sasl {
            Some(gate) if !gate.is_done() => gate.handle_header(header)?,
            _ => {
                if header.is_sasl() {
                    return Err(EngineError::violation("unexpected SASL protocol header"));
                }
                self.header_received = true;
            }
        }
        self.ensure_header_sent()?;
        self.sync()
    }

    fn sasl_outcome(&mut self, code: SaslCode) -> Result<()> {
        self.out.emit(Event::SaslOutcome(code));
        if !code.is_ok() {
            return Err(EngineError::SaslFailed(code));
        }
        self.buffer.expect_header();
        self.buffer
            .set_max_frame_size(self.connection.max_frame_size());
        if self.sasl.as_ref().is_some_and(SaslGate::is_client) {
            self.ensure_header_sent()?;
        }
        self.sync()
    }

    /// Finish the close handshake once both Closes have crossed.
    fn after_remote_close(&mut self) {
        if self.connection.remote_state() != EndpointState::Closed
            || self.connection.local_state() != EndpointState::Closed
        {
            return;
        }
        if let Some((mut result, timer)) = self.connection.close_result.take() {
            self.out.timers.cancel(timer);
            result.complete(());
        }
        self.finish(None);
    }

    /// Fail the engine with `error`, returning the recorded cause.
    fn fail(&mut self, error: EngineError) -> EngineError {
        if let Some(failure) = &self.failure {
            return failure.clone();
        }
        tracing::error!("engine failed: {}", error);
        self.failure = Some(error.clone());
        if self.connection.is_open_sent() && !self.out.close_sent {
            self.connection
                .set_local_error(ErrorCondition::new(error.condition(), error.to_string()));
            self.connection.close(None);
            if let Err(e) = self.connection.write_close(&mut self.out) {
                tracing::warn!("could not write Close after failure: {}", e);
            }
        }
        self.finish(Some(error.clone()));
        error
    }

    /// Stop the engine, resolving everything still pending.
    fn finish(&mut self, cause: Option<EngineError>) {
        if self.shutdown {
            return;
        }
        self.shutdown = true;
        let closed = cause
            .clone()
            .unwrap_or_else(|| EngineError::ResourceClosed("connection closed".into()));
        self.connection.cascade(&closed, &mut self.out);
        for (mut result, _) in [
            self.connection.open_result.take(),
            self.connection.close_result.take(),
        ]
        .into_iter()
        .flatten()
        {
            match &cause {
                Some(error) => result.fail(error.clone()),
                None => result.complete(()),
            };
        }
        self.out.timers.clear();
        tracing::debug!("engine shut down");
        self.out.emit(Event::EngineShutdown(cause));
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("connection", &self.connection)
            .field("sasl", &self.sasl)
            .field("failure", &self.failure)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Open, Performative};
    use crate::writer::FrameWriter;

    fn peer_bytes(build: impl FnOnce(&mut FrameWriter)) -> Bytes {
        let mut writer = FrameWriter::new(65536);
        writer.write_protocol_header(ProtocolHeader::AMQP);
        build(&mut writer);
        writer.take()
    }

    #[test]
    fn test_open_waits_for_peer_header() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        engine.open().unwrap();
        // header only
        assert_eq!(engine.take_output().len(), 8);

        engine.ingest(&peer_bytes(|_| {})).unwrap();
        assert!(engine.take_output().len() > 8);
        assert_eq!(engine.poll_event(), Some(Event::LocalOpen(crate::handler::Endpoint::Connection)));
    }

    #[test]
    fn test_calls_after_failure_return_cause() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        engine.open().unwrap();
        let bytes = peer_bytes(|w| {
            w.write_performative(0, &Performative::Open(Open::default())).unwrap();
            w.write_performative(0, &Performative::Open(Open::default())).unwrap();
        });
        let err = engine.ingest(&bytes).unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
        assert!(engine.is_shutdown());
        assert_eq!(engine.new_session().unwrap_err(), err);
        assert_eq!(engine.failure(), Some(&err));
    }

    #[test]
    fn test_sasl_header_without_sasl_is_violation() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let err = engine.ingest(&ProtocolHeader::SASL.encode()).unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }

    #[test]
    fn test_late_timer_is_ignored() {
        let mut engine = Engine::builder().open_timeout_ms(1000).build().unwrap();
        let mut opened = engine.open().unwrap();
        let timers = engine.take_timer_requests();
        assert_eq!(timers.len(), 1);
        engine
            .ingest(&peer_bytes(|w| {
                w.write_performative(0, &Performative::Open(Open::default())).unwrap();
            }))
            .unwrap();
        assert_eq!(opened.try_take(), Some(Ok(())));
        engine.fire_timer(timers[0].id).unwrap();
        assert!(engine.failure().is_none());
    }

    #[test]
    fn test_open_timeout_fails_result() {
        let mut engine = Engine::builder().open_timeout_ms(1000).build().unwrap();
        let mut opened = engine.open().unwrap();
        let timers = engine.take_timer_requests();
        engine.fire_timer(timers[0].id).unwrap();
        assert!(matches!(opened.try_take(), Some(Err(EngineError::Timeout(_)))));
        assert!(!engine.is_shutdown());
    }

    #[test]
    fn test_idle_timeout_fails_engine() {
        let mut engine = Engine::builder().idle_timeout_ms(100).build().unwrap();
        engine.open().unwrap();
        engine.ingest(&peer_bytes(|_| {})).unwrap();
        assert_eq!(engine.tick(0).unwrap(), Some(100));
        assert_eq!(engine.tick(50).unwrap(), Some(100));
        let err = engine.tick(100).unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
        assert_eq!(
            engine.connection().local_error().unwrap().condition.as_str(),
            conditions::RESOURCE_LIMIT_EXCEEDED
        );
    }
}
