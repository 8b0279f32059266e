//! Everything an endpoint touches while handling a call: the frame writer,
//! the event queue, registered handlers, timers and the configuration.
//!
//! Endpoints receive `&mut Outbound` alongside `&mut self`, which keeps the
//! endpoint tree and the output side borrowable at the same time.

use std::collections::VecDeque;

use bytes::Bytes;

use super::timer::Timers;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::handler::{Event, HandlerRegistry};
use crate::protocol::ProtocolHeader;
use crate::types::{Performative, SaslPerformative, Transfer};
use crate::writer::FrameWriter;

pub(crate) struct Outbound {
    pub writer: FrameWriter,
    pub events: VecDeque<Event>,
    pub registry: HandlerRegistry,
    pub timers: Timers,
    pub config: EngineConfig,
    /// Our Close went out; nothing else may follow it.
    pub close_sent: bool,
    /// Something was written since the last idle check.
    pub wrote: bool,
}

impl Outbound {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            writer: FrameWriter::default(),
            events: VecDeque::new(),
            registry: HandlerRegistry::new(),
            timers: Timers::default(),
            config,
            close_sent: false,
            wrote: false,
        }
    }

    /// Run registered handlers and queue the event for polling.
    pub fn emit(&mut self, event: Event) {
        tracing::trace!("event {:?}", event.kind());
        self.registry.dispatch(&event);
        self.events.push_back(event);
    }

    pub fn write_header(&mut self, header: ProtocolHeader) {
        self.writer.write_protocol_header(header);
        self.wrote = true;
    }

    pub fn write(&mut self, channel: u16, performative: &Performative) -> Result<()> {
        if self.close_sent {
            tracing::trace!("dropping {} written after Close", performative.name());
            return Ok(());
        }
        self.writer.write_performative(channel, performative)?;
        if matches!(performative, Performative::Close(_)) {
            self.close_sent = true;
        }
        self.wrote = true;
        Ok(())
    }

    pub fn write_sasl(&mut self, performative: &SaslPerformative) -> Result<()> {
        self.writer.write_sasl(performative)?;
        self.wrote = true;
        Ok(())
    }

    /// Write up to `frame_limit` Transfer frames. See [`FrameWriter::write_transfer`].
    pub fn write_transfer(
        &mut self,
        channel: u16,
        transfer: &Transfer,
        payload: &mut Bytes,
        frame_limit: u32,
    ) -> Result<u32> {
        if self.close_sent {
            return Ok(0);
        }
        let frames = self
            .writer
            .write_transfer(channel, transfer, payload, frame_limit)?;
        if frames > 0 {
            self.wrote = true;
        }
        Ok(frames)
    }

    pub fn write_heartbeat(&mut self) {
        if !self.close_sent {
            self.writer.write_empty_frame();
            self.wrote = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Endpoint, EventKind};
    use crate::types::{Close, Open};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_nothing_written_after_close() {
        let mut out = Outbound::new(EngineConfig::default());
        out.write(0, &Performative::Close(Close::default())).unwrap();
        let len = out.writer.pending_bytes();
        out.write(0, &Performative::Open(Open::default())).unwrap();
        out.write_heartbeat();
        assert_eq!(out.writer.pending_bytes(), len);
        assert!(out.close_sent);
    }

    #[test]
    fn test_emit_runs_handlers_and_queues() {
        let mut out = Outbound::new(EngineConfig::default());
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        out.registry
            .register(EventKind::LocalOpen, move |_| seen.set(seen.get() + 1));
        out.emit(Event::LocalOpen(Endpoint::Connection));
        assert_eq!(calls.get(), 1);
        assert_eq!(out.events.len(), 1);
    }
}
