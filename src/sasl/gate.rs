//! SASL negotiation gate.
//!
//! Sits in front of the AMQP frame layer until the exchange ends. While it
//! is open only the SASL header and SASL frames are legal; the engine
//! rejects anything else. The gate sequences the exchange and leaves the
//! mechanism itself to the listener.

use super::context::{SaslClientContext, SaslServerContext};
use super::{SaslClientListener, SaslServerListener};
use crate::engine::outbound::Outbound;
use crate::error::{EngineError, Result};
use crate::protocol::ProtocolHeader;
use crate::types::{SaslCode, SaslPerformative};

/// Where the exchange stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslState {
    /// Waiting for the peer's SASL header.
    AwaitingHeader,
    /// Client: waiting for sasl-mechanisms. Server: waiting for sasl-init.
    Mechanisms,
    /// Challenge and response in progress.
    Exchange,
    /// Outcome ok; AMQP frames follow.
    Done,
    /// Outcome not ok.
    Failed,
}

enum Role {
    Client {
        listener: Box<dyn SaslClientListener>,
        context: SaslClientContext,
    },
    Server {
        listener: Box<dyn SaslServerListener>,
        context: SaslServerContext,
    },
}

/// Sequences one SASL exchange.
pub struct SaslGate {
    role: Role,
    state: SaslState,
    header_received: bool,
}

impl SaslGate {
    pub fn client(listener: Box<dyn SaslClientListener>, hostname: Option<String>) -> Self {
        Self {
            role: Role::Client {
                listener,
                context: SaslClientContext::new(hostname),
            },
            state: SaslState::AwaitingHeader,
            header_received: false,
        }
    }

    pub fn server(listener: Box<dyn SaslServerListener>) -> Self {
        Self {
            role: Role::Server {
                listener,
                context: SaslServerContext::new(),
            },
            state: SaslState::AwaitingHeader,
            header_received: false,
        }
    }

    #[inline]
    pub fn state(&self) -> SaslState {
        self.state
    }

    #[inline]
    pub fn is_client(&self) -> bool {
        matches!(self.role, Role::Client { .. })
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state == SaslState::Done
    }

    /// The peer's protocol header arrived.
    pub fn handle_header(&mut self, header: ProtocolHeader) -> Result<()> {
        if !header.is_sasl() {
            return Err(EngineError::violation(
                "expected the SASL protocol header, got AMQP",
            ));
        }
        if self.header_received {
            return Err(EngineError::violation("second SASL header received"));
        }
        self.header_received = true;
        if self.state == SaslState::AwaitingHeader {
            self.state = SaslState::Mechanisms;
        }
        Ok(())
    }

    /// Our SASL header went out. The listener is initialised and a server
    /// advertises its mechanisms.
    pub(crate) fn on_header_sent(&mut self, out: &mut Outbound) -> Result<()> {
        match &mut self.role {
            Role::Client { listener, context } => listener.initialize(context),
            Role::Server { listener, context } => {
                listener.initialize(context);
                let mechanisms = context.mechanisms_frame();
                tracing::debug!("SASL server offering {:?}", context.offered_mechanisms());
                out.write_sasl(&mechanisms)?;
            }
        }
        Ok(())
    }

    /// Handle one SASL frame. Returns the outcome once the exchange ends.
    pub(crate) fn handle_frame(
        &mut self,
        performative: SaslPerformative,
        out: &mut Outbound,
    ) -> Result<Option<SaslCode>> {
        if matches!(self.state, SaslState::Done | SaslState::Failed) {
            return Err(EngineError::violation(format!(
                "{} after the SASL outcome",
                performative.name()
            )));
        }
        if !self.header_received {
            return Err(EngineError::violation(format!(
                "{} before the SASL header",
                performative.name()
            )));
        }
        let outcome = match (&mut self.role, performative) {
            (Role::Client { listener, context }, SaslPerformative::Mechanisms(m))
                if self.state == SaslState::Mechanisms =>
            {
                tracing::debug!("SASL server offers {:?}", m.mechanisms);
                context.set_server_mechanisms(m.mechanisms);
                listener.handle_mechanisms(context);
                if context.chosen_mechanism().is_none() {
                    return Err(EngineError::EngineFailed(
                        "SASL listener chose no mechanism".into(),
                    ));
                }
                self.state = SaslState::Exchange;
                flush(context.take_pending(), out)?;
                None
            }
            (Role::Client { listener, context }, SaslPerformative::Challenge(c))
                if self.state == SaslState::Exchange =>
            {
                listener.handle_challenge(context, &c.challenge);
                flush(context.take_pending(), out)?;
                None
            }
            (Role::Client { listener, context }, SaslPerformative::Outcome(o))
                if self.state == SaslState::Exchange =>
            {
                context.set_outcome(o.code, o.additional_data);
                listener.handle_outcome(context);
                Some(o.code)
            }
            (Role::Server { listener, context }, SaslPerformative::Init(init))
                if self.state == SaslState::Mechanisms =>
            {
                tracing::debug!("SASL client chose {}", init.mechanism);
                if !context.offered_mechanisms().contains(&init.mechanism) {
                    return Err(EngineError::violation(format!(
                        "SASL mechanism {} was not offered",
                        init.mechanism
                    )));
                }
                context.set_init(init.mechanism.clone(), init.hostname.clone());
                self.state = SaslState::Exchange;
                listener.handle_init(context, &init.mechanism, init.initial_response.as_ref());
                flush(context.take_pending(), out)?;
                context.outcome()
            }
            (Role::Server { listener, context }, SaslPerformative::Response(r))
                if self.state == SaslState::Exchange =>
            {
                listener.handle_response(context, &r.response);
                flush(context.take_pending(), out)?;
                context.outcome()
            }
            (_, performative) => {
                return Err(EngineError::violation(format!(
                    "unexpected {} during SASL negotiation",
                    performative.name()
                )))
            }
        };
        if let Some(code) = outcome {
            self.state = if code.is_ok() {
                SaslState::Done
            } else {
                SaslState::Failed
            };
            tracing::debug!("SASL outcome {:?}", code);
        }
        Ok(outcome)
    }
}

fn flush(pending: Vec<SaslPerformative>, out: &mut Outbound) -> Result<()> {
    for performative in &pending {
        out.write_sasl(performative)?;
    }
    Ok(())
}

impl std::fmt::Debug for SaslGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslGate")
            .field("client", &self.is_client())
            .field("state", &self.state)
            .finish()
    }
}
