//! Connection endpoint.
//!
//! The connection owns its sessions in a [`Slots`] arena indexed by local
//! channel, plus a second arena mapping the peer's channels onto ours. It
//! checks connection-level frame ordering (Open first and only once, Begin
//! channel rules) and hands everything else to the addressed session.

use bytes::Bytes;

use super::outbound::Outbound;
use super::session::Session;
use super::result::Completer;
use super::{EndpointState, SessionId, Slots, TimerId};
use crate::codec::{Fields, Symbol};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::handler::{Endpoint, Event};
use crate::protocol::MIN_MAX_FRAME_SIZE;
use crate::types::{conditions, Begin, Close, ErrorCondition, Open, Performative};

/// A pending open or close result and its timeout.
pub(crate) type Pending = (Completer<()>, Option<TimerId>);

/// The local end of an AMQP connection.
#[derive(Debug)]
pub struct Connection {
    local_state: EndpointState,
    remote_state: EndpointState,
    open_sent: bool,
    container_id: String,
    hostname: Option<String>,
    max_frame_size: u32,
    channel_max: u16,
    idle_timeout: Option<u32>,
    offered_capabilities: Option<Vec<Symbol>>,
    desired_capabilities: Option<Vec<Symbol>>,
    properties: Option<Fields>,
    remote_open: Option<Open>,
    local_error: Option<ErrorCondition>,
    remote_error: Option<ErrorCondition>,
    session_capacity: u32,
    handle_max: u32,
    sessions: Slots<Session>,
    /// Peer channel to local channel.
    remote_channels: Slots<u16>,
    pub(crate) open_result: Option<Pending>,
    pub(crate) close_result: Option<Pending>,
}

impl Connection {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            local_state: EndpointState::Idle,
            remote_state: EndpointState::Idle,
            open_sent: false,
            container_id: config.container_id.clone(),
            hostname: config.hostname.clone(),
            max_frame_size: config.max_frame_size,
            channel_max: config.channel_max,
            idle_timeout: (config.idle_timeout_ms > 0).then_some(config.idle_timeout_ms),
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
            remote_open: None,
            local_error: None,
            remote_error: None,
            session_capacity: config.session_capacity,
            handle_max: config.handle_max,
            sessions: Slots::new(u32::from(config.channel_max)),
            remote_channels: Slots::new(u32::from(u16::MAX)),
            open_result: None,
            close_result: None,
        }
    }

    #[inline]
    pub fn local_state(&self) -> EndpointState {
        self.local_state
    }

    #[inline]
    pub fn remote_state(&self) -> EndpointState {
        self.remote_state
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    #[inline]
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    #[inline]
    pub fn channel_max(&self) -> u16 {
        self.channel_max
    }

    pub fn idle_timeout(&self) -> Option<u32> {
        self.idle_timeout
    }

    pub fn offered_capabilities(&self) -> Option<&[Symbol]> {
        self.offered_capabilities.as_deref()
    }

    pub fn desired_capabilities(&self) -> Option<&[Symbol]> {
        self.desired_capabilities.as_deref()
    }

    pub fn properties(&self) -> Option<&Fields> {
        self.properties.as_ref()
    }

    pub fn remote_container_id(&self) -> Option<&str> {
        self.remote_open.as_ref().map(|o| o.container_id.as_str())
    }

    pub fn remote_hostname(&self) -> Option<&str> {
        self.remote_open.as_ref()?.hostname.as_deref()
    }

    pub fn remote_max_frame_size(&self) -> Option<u32> {
        self.remote_open.as_ref().map(|o| o.max_frame_size)
    }

    pub fn remote_channel_max(&self) -> Option<u16> {
        self.remote_open.as_ref().map(|o| o.channel_max)
    }

    pub fn remote_idle_timeout(&self) -> Option<u32> {
        self.remote_open.as_ref()?.idle_timeout
    }

    pub fn remote_offered_capabilities(&self) -> Option<&[Symbol]> {
        self.remote_open.as_ref()?.offered_capabilities.as_deref()
    }

    pub fn remote_desired_capabilities(&self) -> Option<&[Symbol]> {
        self.remote_open.as_ref()?.desired_capabilities.as_deref()
    }

    pub fn remote_properties(&self) -> Option<&Fields> {
        self.remote_open.as_ref()?.properties.as_ref()
    }

    pub fn local_error(&self) -> Option<&ErrorCondition> {
        self.local_error.as_ref()
    }

    pub fn remote_error(&self) -> Option<&ErrorCondition> {
        self.remote_error.as_ref()
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(u32::from(id.0))
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().map(|(_, session)| session)
    }

    pub(crate) fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(u32::from(id.0))
    }

    pub(crate) fn session_or_err(&mut self, id: SessionId) -> Result<&mut Session> {
        self.sessions
            .get_mut(u32::from(id.0))
            .ok_or_else(|| EngineError::local(format!("no session on channel {}", id.0)))
    }

    pub(crate) fn is_open_sent(&self) -> bool {
        self.open_sent
    }

    fn check_idle(&self, what: &str) -> Result<()> {
        if self.local_state != EndpointState::Idle {
            return Err(EngineError::local(format!(
                "cannot set {} after the connection was opened",
                what
            )));
        }
        Ok(())
    }

    pub fn set_container_id(&mut self, container_id: impl Into<String>) -> Result<()> {
        self.check_idle("container-id")?;
        self.container_id = container_id.into();
        Ok(())
    }

    pub fn set_hostname(&mut self, hostname: impl Into<String>) -> Result<()> {
        self.check_idle("hostname")?;
        self.hostname = Some(hostname.into());
        Ok(())
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: u32) -> Result<()> {
        self.check_idle("max-frame-size")?;
        if max_frame_size < MIN_MAX_FRAME_SIZE {
            return Err(EngineError::local(format!(
                "max-frame-size {} is below the minimum {}",
                max_frame_size, MIN_MAX_FRAME_SIZE
            )));
        }
        self.max_frame_size = max_frame_size;
        Ok(())
    }

    pub fn set_channel_max(&mut self, channel_max: u16) -> Result<()> {
        self.check_idle("channel-max")?;
        self.channel_max = channel_max;
        self.sessions.set_max_index(u32::from(channel_max));
        Ok(())
    }

    /// Local idle timeout in milliseconds; 0 disables it.
    pub fn set_idle_timeout(&mut self, idle_timeout_ms: u32) -> Result<()> {
        self.check_idle("idle-timeout")?;
        self.idle_timeout = (idle_timeout_ms > 0).then_some(idle_timeout_ms);
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

    /// Error condition to carry in our Close when none was given.
    pub(crate) fn set_local_error(&mut self, error: ErrorCondition) {
        if self.local_error.is_none() {
            self.local_error = Some(error);
        }
    }

    // ---- lifecycle ----

    pub(crate) fn open(&mut self) -> Result<()> {
        match self.local_state {
            EndpointState::Idle => {
                self.local_state = EndpointState::Active;
                tracing::debug!("connection '{}' opening", self.container_id);
                Ok(())
            }
            EndpointState::Active => Err(EngineError::local("connection is already open")),
            EndpointState::Closed => Err(EngineError::ResourceClosed("connection is closed".into())),
        }
    }

    /// Mark the local end closed. Returns false if it already was.
    pub(crate) fn close(&mut self, error: Option<ErrorCondition>) -> bool {
        if self.local_state == EndpointState::Closed {
            return false;
        }
        self.local_state = EndpointState::Closed;
        if error.is_some() {
            self.local_error = error;
        }
        true
    }

    fn open_frame(&self) -> Open {
        Open {
            container_id: self.container_id.clone(),
            hostname: self.hostname.clone(),
            max_frame_size: self.max_frame_size,
            channel_max: self.channel_max,
            idle_timeout: self.idle_timeout,
            offered_capabilities: self.offered_capabilities.clone(),
            desired_capabilities: self.desired_capabilities.clone(),
            properties: self.properties.clone(),
            ..Open::default()
        }
    }

    /// Write pending local state. Called once the protocol headers have been
    /// exchanged.
    pub(crate) fn sync(&mut self, out: &mut Outbound) -> Result<()> {
        if self.local_state == EndpointState::Active && !self.open_sent {
            out.write(0, &Performative::Open(self.open_frame()))?;
            self.open_sent = true;
            out.emit(Event::LocalOpen(Endpoint::Connection));
            self.resolve_open(out);
        }
        if !self.open_sent || self.local_state != EndpointState::Active {
            return Ok(());
        }
        for channel in self.sessions.indices() {
            if let Some(session) = self.sessions.get_mut(channel) {
                session.sync(out)?;
            }
        }
        Ok(())
    }

    /// Both Opens have crossed; the open result can resolve.
    fn resolve_open(&mut self, out: &mut Outbound) {
        if !(self.open_sent && self.remote_state != EndpointState::Idle) {
            return;
        }
        if let Some((mut result, timer)) = self.open_result.take() {
            out.timers.cancel(timer);
            result.complete(());
        }
    }

    /// Write our Close.
    pub(crate) fn write_close(&mut self, out: &mut Outbound) -> Result<()> {
        if !self.open_sent {
            return Ok(());
        }
        let close = Close {
            error: self.local_error.clone(),
        };
        out.write(0, &Performative::Close(close))?;
        out.emit(Event::LocalClose(Endpoint::Connection));
        Ok(())
    }

    /// Fail everything pending on every session.
    pub(crate) fn cascade(&mut self, cause: &EngineError, out: &mut Outbound) {
        for (_, session) in self.sessions.iter_mut() {
            session.parent_closed(cause, out);
        }
    }

    // ---- sessions ----

    pub(crate) fn new_session(&mut self) -> Result<SessionId> {
        if self.local_state == EndpointState::Closed || self.remote_state == EndpointState::Closed {
            return Err(EngineError::ResourceClosed("connection is closed".into()));
        }
        let channel = self
            .sessions
            .next_free()
            .ok_or_else(|| EngineError::local("no free channel for a new session"))?;
        let id = session_id(channel)?;
        let session = Session::new(id, self.session_capacity, self.max_frame_size, self.handle_max);
        self.sessions
            .insert_at(channel, session)
            .map_err(|_| EngineError::local(format!("channel {} already in use", channel)))?;
        Ok(id)
    }

    /// Locally end a session, releasing its channel if the peer already has.
    pub(crate) fn end_session(
        &mut self,
        id: SessionId,
        error: Option<ErrorCondition>,
        out: &mut Outbound,
    ) -> Result<()> {
        self.session_or_err(id)?.end(error, out)?;
        self.free_session(u32::from(id.0));
        Ok(())
    }

    fn free_session(&mut self, channel: u32) {
        if !self.sessions.get(channel).is_some_and(Session::is_finished) {
            return;
        }
        if let Some(session) = self.sessions.remove(channel) {
            if let Some(remote) = session.remote_channel() {
                self.remote_channels.remove(u32::from(remote));
            }
            tracing::debug!("channel {} released", channel);
        }
    }

    // ---- inbound ----

    /// Dispatch one AMQP frame.
    pub(crate) fn handle_frame(
        &mut self,
        channel: u16,
        performative: Performative,
        payload: Option<Bytes>,
        out: &mut Outbound,
    ) -> Result<()> {
        match performative {
            Performative::Open(open) => self.handle_open(open, out),
            _ if self.remote_open.is_none() => Err(EngineError::violation(format!(
                "{} received before Open",
                performative.name()
            ))),
            Performative::Close(close) => self.handle_close(channel, close, out),
            Performative::Begin(begin) => self.handle_begin(channel, begin, out),
            performative => {
                let local = self
                    .remote_channels
                    .get(u32::from(channel))
                    .copied()
                    .ok_or_else(|| {
                        EngineError::violation(format!(
                            "{} on unknown channel {}",
                            performative.name(),
                            channel
                        ))
                    })?;
                let session = self
                    .sessions
                    .get_mut(u32::from(local))
                    .ok_or_else(|| EngineError::violation(format!("channel {} is released", channel)))?;
                match performative {
                    Performative::Attach(attach) => session.handle_attach(attach, out),
                    Performative::Flow(flow) => session.handle_flow(flow, out),
                    Performative::Transfer(transfer) => {
                        session.handle_transfer(transfer, payload, out)
                    }
                    Performative::Disposition(disposition) => {
                        session.handle_disposition(disposition, out)
                    }
                    Performative::Detach(detach) => session.handle_detach(detach, out),
                    Performative::End(end) => {
                        session.handle_end(end, out);
                        self.free_session(u32::from(local));
                        Ok(())
                    }
                    other => Err(EngineError::violation(format!(
                        "unexpected {} on channel {}",
                        other.name(),
                        channel
                    ))),
                }
            }
        }
    }

    fn handle_open(&mut self, open: Open, out: &mut Outbound) -> Result<()> {
        if self.remote_open.is_some() {
            return Err(EngineError::violation("second Open received"));
        }
        tracing::debug!(
            "connection opened by '{}', max-frame-size {}",
            open.container_id,
            open.max_frame_size
        );
        out.writer
            .set_max_frame_size(open.max_frame_size.max(MIN_MAX_FRAME_SIZE));
        self.remote_state = EndpointState::Active;
        self.remote_open = Some(open);
        out.emit(Event::RemoteOpen(Endpoint::Connection));
        self.resolve_open(out);
        Ok(())
    }

    fn handle_begin(&mut self, channel: u16, begin: Begin, out: &mut Outbound) -> Result<()> {
        if channel > self.channel_max {
            self.set_local_error(ErrorCondition::new(
                conditions::FRAMING_ERROR,
                format!("channel {} exceeds channel-max {}", channel, self.channel_max),
            ));
            return Err(EngineError::violation(format!(
                "Begin on channel {} above channel-max {}",
                channel, self.channel_max
            )));
        }
        if self.remote_channels.contains(u32::from(channel)) {
            return Err(EngineError::violation(format!(
                "Begin on channel {} which is already in use",
                channel
            )));
        }
        let local = match begin.remote_channel {
            Some(local) => {
                let awaiting = self.sessions.get(u32::from(local)).is_some_and(|s| {
                    s.begin_sent() && s.remote_state() == EndpointState::Idle
                });
                if !awaiting {
                    self.set_local_error(ErrorCondition::new(
                        conditions::PRECONDITION_FAILED,
                        format!("Begin references unknown local channel {}", local),
                    ));
                    return Err(EngineError::violation(format!(
                        "Begin references local channel {} which is not awaiting one",
                        local
                    )));
                }
                local
            }
            None => self
                .new_session()
                .map_err(|e| EngineError::violation(e.to_string()))?
                .0,
        };
        self.remote_channels
            .insert_at(u32::from(channel), local)
            .map_err(|_| EngineError::violation(format!("channel {} already in use", channel)))?;
        let session = self.session_or_err(SessionId(local))?;
        session.remote_begin(channel, begin, out);
        session.sync(out)
    }

    fn handle_close(&mut self, channel: u16, close: Close, out: &mut Outbound) -> Result<()> {
        if channel != 0 {
            return Err(EngineError::violation(format!(
                "Close received on channel {}",
                channel
            )));
        }
        if self.remote_state == EndpointState::Closed {
            return Err(EngineError::violation("second Close received"));
        }
        tracing::debug!("connection closed by peer: {:?}", close.error);
        self.remote_state = EndpointState::Closed;
        self.remote_error = close.error.clone();
        let cause = EngineError::ResourceClosed("connection closed by the peer".into());
        for (_, session) in self.sessions.iter_mut() {
            session.parent_closed(&cause, out);
        }
        if let Some((mut result, timer)) = self.open_result.take() {
            out.timers.cancel(timer);
            result.fail(cause);
        }
        out.emit(Event::RemoteClose {
            endpoint: Endpoint::Connection,
            error: close.error,
        });
        Ok(())
    }
}

fn session_id(channel: u32) -> Result<SessionId> {
    u16::try_from(channel)
        .map(SessionId)
        .map_err(|_| EngineError::local(format!("channel {} out of range", channel)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::End;

    fn opened() -> (Connection, Outbound) {
        let config = EngineConfig::default();
        let mut connection = Connection::new(&config);
        let mut out = Outbound::new(config);
        connection.open().unwrap();
        connection.sync(&mut out).unwrap();
        connection
            .handle_frame(0, Performative::Open(Open::default()), None, &mut out)
            .unwrap();
        (connection, out)
    }

    #[test]
    fn test_setters_rejected_after_open() {
        let (mut connection, _) = opened();
        assert!(matches!(
            connection.set_container_id("late"),
            Err(EngineError::LocalState(_))
        ));
        assert!(matches!(
            connection.set_channel_max(3),
            Err(EngineError::LocalState(_))
        ));
    }

    #[test]
    fn test_second_open_is_violation() {
        let (mut connection, mut out) = opened();
        let err = connection
            .handle_frame(0, Performative::Open(Open::default()), None, &mut out)
            .unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }

    #[test]
    fn test_second_close_is_violation() {
        let (mut connection, mut out) = opened();
        connection
            .handle_frame(0, Performative::Close(Close::default()), None, &mut out)
            .unwrap();
        assert_eq!(connection.remote_state(), EndpointState::Closed);
        let err = connection
            .handle_frame(0, Performative::Close(Close::default()), None, &mut out)
            .unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }

    #[test]
    fn test_close_on_session_channel_is_violation() {
        let (mut connection, mut out) = opened();
        let err = connection
            .handle_frame(2, Performative::Close(Close::default()), None, &mut out)
            .unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
        assert_eq!(connection.remote_state(), EndpointState::Active);
    }

    #[test]
    fn test_remote_session_gets_lowest_channel() {
        let (mut connection, mut out) = opened();
        connection
            .handle_frame(3, Performative::Begin(Begin::default()), None, &mut out)
            .unwrap();
        let session = connection.session(SessionId(0)).unwrap();
        assert_eq!(session.remote_channel(), Some(3));
        assert_eq!(session.remote_state(), EndpointState::Active);
    }

    #[test]
    fn test_uncorrelated_begin_sets_precondition_failed() {
        let (mut connection, mut out) = opened();
        let begin = Begin {
            remote_channel: Some(7),
            ..Begin::default()
        };
        let err = connection
            .handle_frame(0, Performative::Begin(begin), None, &mut out)
            .unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
        assert_eq!(
            connection.local_error().unwrap().condition.as_str(),
            conditions::PRECONDITION_FAILED
        );
    }

    #[test]
    fn test_begin_above_channel_max_is_framing_error() {
        let config = EngineConfig {
            channel_max: 1,
            ..EngineConfig::default()
        };
        let mut connection = Connection::new(&config);
        let mut out = Outbound::new(config);
        connection.open().unwrap();
        connection.sync(&mut out).unwrap();
        connection
            .handle_frame(0, Performative::Open(Open::default()), None, &mut out)
            .unwrap();
        assert!(connection
            .handle_frame(2, Performative::Begin(Begin::default()), None, &mut out)
            .is_err());
        assert_eq!(
            connection.local_error().unwrap().condition.as_str(),
            conditions::FRAMING_ERROR
        );
    }

    #[test]
    fn test_channel_reused_after_both_ends() {
        let (mut connection, mut out) = opened();
        let id = connection.new_session().unwrap();
        connection.session_or_err(id).unwrap().open().unwrap();
        connection.sync(&mut out).unwrap();
        let begin = Begin {
            remote_channel: Some(id.0),
            ..Begin::default()
        };
        connection
            .handle_frame(4, Performative::Begin(begin), None, &mut out)
            .unwrap();
        connection.end_session(id, None, &mut out).unwrap();
        assert!(connection.session(id).is_some());
        connection
            .handle_frame(4, Performative::End(End::default()), None, &mut out)
            .unwrap();
        assert!(connection.session(id).is_none());
        assert_eq!(connection.new_session().unwrap(), id);
    }

    #[test]
    fn test_frame_on_unknown_channel() {
        let (mut connection, mut out) = opened();
        let err = connection
            .handle_frame(9, Performative::End(End::default()), None, &mut out)
            .unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }
}
