//! SASL negotiation.
//!
//! The engine sequences the exchange; mechanisms live behind the listener
//! traits. A client listener picks a mechanism from the server's list and
//! answers challenges. A server listener offers mechanisms, checks the
//! client's init and responses, and decides the outcome.
//!
//! # Example
//!
//! ```
//! use amqp_engine::sasl::{SaslClientContext, SaslClientListener};
//!
//! struct Anonymous;
//!
//! impl SaslClientListener for Anonymous {
//!     fn handle_mechanisms(&mut self, context: &mut SaslClientContext) {
//!         if let Err(e) = context.init("ANONYMOUS", None) {
//!             eprintln!("cannot authenticate: {}", e);
//!         }
//!     }
//! }
//! ```

mod context;
mod gate;

use bytes::Bytes;

use crate::codec::Symbol;

pub use context::{SaslClientContext, SaslServerContext};
pub use gate::{SaslGate, SaslState};

/// Mechanism logic for the client role.
pub trait SaslClientListener {
    /// Called once our SASL header is written.
    fn initialize(&mut self, _context: &mut SaslClientContext) {}

    /// The server listed its mechanisms. Must call
    /// [`SaslClientContext::init`].
    fn handle_mechanisms(&mut self, context: &mut SaslClientContext);

    /// The server sent a challenge; answer with
    /// [`SaslClientContext::respond`].
    fn handle_challenge(&mut self, _context: &mut SaslClientContext, _challenge: &Bytes) {}

    /// The exchange ended; the code is in [`SaslClientContext::outcome`].
    fn handle_outcome(&mut self, _context: &mut SaslClientContext) {}
}

/// Mechanism logic for the server role.
pub trait SaslServerListener {
    /// Called before sasl-mechanisms is written. Offer mechanisms here.
    fn initialize(&mut self, context: &mut SaslServerContext);

    /// The client chose a mechanism.
    fn handle_init(
        &mut self,
        context: &mut SaslServerContext,
        mechanism: &Symbol,
        initial_response: Option<&Bytes>,
    );

    /// The client answered a challenge.
    fn handle_response(&mut self, _context: &mut SaslServerContext, _response: &Bytes) {}
}
