//! Contexts handed to SASL listeners.
//!
//! A listener never writes frames itself. It calls into its context, which
//! checks the call is legal at this point of the exchange and queues the
//! SASL performative for the gate to write.

use bytes::Bytes;

use crate::codec::Symbol;
use crate::error::{EngineError, Result};
use crate::types::{
    SaslChallenge, SaslCode, SaslInit, SaslMechanisms, SaslOutcome, SaslPerformative,
    SaslResponse,
};

/// Client side of a SASL exchange.
#[derive(Debug, Default)]
pub struct SaslClientContext {
    hostname: Option<String>,
    server_mechanisms: Vec<Symbol>,
    chosen_mechanism: Option<Symbol>,
    outcome: Option<SaslCode>,
    additional_data: Option<Bytes>,
    pending: Vec<SaslPerformative>,
}

impl SaslClientContext {
    pub(crate) fn new(hostname: Option<String>) -> Self {
        Self {
            hostname,
            ..Self::default()
        }
    }

    /// Mechanisms the server offered.
    pub fn server_mechanisms(&self) -> &[Symbol] {
        &self.server_mechanisms
    }

    pub fn chosen_mechanism(&self) -> Option<&Symbol> {
        self.chosen_mechanism.as_ref()
    }

    pub fn outcome(&self) -> Option<SaslCode> {
        self.outcome
    }

    pub fn additional_data(&self) -> Option<&Bytes> {
        self.additional_data.as_ref()
    }

    /// Choose a mechanism and send sasl-init.
    pub fn init(&mut self, mechanism: impl Into<Symbol>, initial_response: Option<Bytes>) -> Result<()> {
        let mechanism = mechanism.into();
        if self.chosen_mechanism.is_some() {
            return Err(EngineError::local("a SASL mechanism was already chosen"));
        }
        if !self.server_mechanisms.contains(&mechanism) {
            return Err(EngineError::local(format!(
                "mechanism {} was not offered by the server",
                mechanism.as_str()
            )));
        }
        self.chosen_mechanism = Some(mechanism.clone());
        self.pending.push(SaslPerformative::Init(SaslInit {
            mechanism,
            initial_response,
            hostname: self.hostname.clone(),
        }));
        Ok(())
    }

    /// Answer the last challenge.
    pub fn respond(&mut self, response: impl Into<Bytes>) -> Result<()> {
        if self.chosen_mechanism.is_none() || self.outcome.is_some() {
            return Err(EngineError::local("no SASL challenge to respond to"));
        }
        self.pending.push(SaslPerformative::Response(SaslResponse {
            response: response.into(),
        }));
        Ok(())
    }

    pub(crate) fn set_server_mechanisms(&mut self, mechanisms: Vec<Symbol>) {
        self.server_mechanisms = mechanisms;
    }

    pub(crate) fn set_outcome(&mut self, code: SaslCode, additional_data: Option<Bytes>) {
        self.outcome = Some(code);
        self.additional_data = additional_data;
    }

    pub(crate) fn take_pending(&mut self) -> Vec<SaslPerformative> {
        std::mem::take(&mut self.pending)
    }
}

/// Server side of a SASL exchange.
#[derive(Debug, Default)]
pub struct SaslServerContext {
    offered: Vec<Symbol>,
    mechanisms_sent: bool,
    chosen_mechanism: Option<Symbol>,
    client_hostname: Option<String>,
    outcome: Option<SaslCode>,
    pending: Vec<SaslPerformative>,
}

impl SaslServerContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Set the mechanisms advertised in sasl-mechanisms.
    pub fn offer_mechanisms(&mut self, mechanisms: Vec<Symbol>) -> Result<()> {
        if self.mechanisms_sent {
            return Err(EngineError::local("SASL mechanisms were already sent"));
        }
        self.offered = mechanisms;
        Ok(())
    }

    pub fn offered_mechanisms(&self) -> &[Symbol] {
        &self.offered
    }

    pub fn chosen_mechanism(&self) -> Option<&Symbol> {
        self.chosen_mechanism.as_ref()
    }

    /// Hostname the client sent in sasl-init.
    pub fn client_hostname(&self) -> Option<&str> {
        self.client_hostname.as_deref()
    }

    pub fn outcome(&self) -> Option<SaslCode> {
        self.outcome
    }

    /// Send a challenge to the client.
    pub fn challenge(&mut self, challenge: impl Into<Bytes>) -> Result<()> {
        if self.chosen_mechanism.is_none() || self.outcome.is_some() {
            return Err(EngineError::local("SASL challenge outside of the exchange"));
        }
        self.pending.push(SaslPerformative::Challenge(SaslChallenge {
            challenge: challenge.into(),
        }));
        Ok(())
    }

    /// End the exchange.
    pub fn outcome_with(&mut self, code: SaslCode, additional_data: Option<Bytes>) -> Result<()> {
        if self.chosen_mechanism.is_none() {
            return Err(EngineError::local("SASL outcome before sasl-init"));
        }
        if self.outcome.is_some() {
            return Err(EngineError::local("SASL outcome already sent"));
        }
        self.outcome = Some(code);
        self.pending.push(SaslPerformative::Outcome(SaslOutcome {
            code,
            additional_data,
        }));
        Ok(())
    }

    /// The sasl-mechanisms frame; usable once.
    pub(crate) fn mechanisms_frame(&mut self) -> SaslPerformative {
        self.mechanisms_sent = true;
        SaslPerformative::Mechanisms(SaslMechanisms {
            mechanisms: self.offered.clone(),
        })
    }

    pub(crate) fn set_init(&mut self, mechanism: Symbol, hostname: Option<String>) {
        self.chosen_mechanism = Some(mechanism);
        self.client_hostname = hostname;
    }

    pub(crate) fn take_pending(&mut self) -> Vec<SaslPerformative> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_init_requires_offered_mechanism() {
        let mut context = SaslClientContext::new(Some("broker".into()));
        context.set_server_mechanisms(vec![Symbol::from("PLAIN")]);
        assert!(context.init("EXTERNAL", None).is_err());
        context
            .init("PLAIN", Some(Bytes::from_static(b"\0user\0pass")))
            .unwrap();
        assert!(context.init("PLAIN", None).is_err());

        let pending = context.take_pending();
        assert_eq!(pending.len(), 1);
        match &pending[0] {
            SaslPerformative::Init(init) => {
                assert_eq!(init.mechanism.as_str(), "PLAIN");
                assert_eq!(init.hostname.as_deref(), Some("broker"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_server_outcome_once() {
        let mut context = SaslServerContext::new();
        context.offer_mechanisms(vec![Symbol::from("ANONYMOUS")]).unwrap();
        let _ = context.mechanisms_frame();
        assert!(context.offer_mechanisms(Vec::new()).is_err());
        assert!(context.outcome_with(SaslCode::Ok, None).is_err());

        context.set_init(Symbol::from("ANONYMOUS"), None);
        context.outcome_with(SaslCode::Ok, None).unwrap();
        assert!(context.outcome_with(SaslCode::Auth, None).is_err());
        assert!(context.challenge(Bytes::new()).is_err());
        assert_eq!(context.take_pending().len(), 1);
    }
}
