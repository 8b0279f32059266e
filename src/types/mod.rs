//! AMQP composite types: performatives, termini, delivery states,
//! message sections, transactions and SASL bodies.
//!
//! Every type here implements [`DescribedType`](crate::codec::DescribedType)
//! or wraps a set of them in a dispatch enum
//! ([`Performative`], [`SaslPerformative`], [`DeliveryState`], [`Section`]).

mod definitions;
mod messaging;
mod sasl;
pub mod transactions;
mod transport;

pub use crate::codec::{Fields, Symbol};
pub use definitions::{conditions, ErrorCondition, ReceiverSettleMode, Role, SenderSettleMode};
pub use messaging::{
    decode_sections, encode_sections, DeliveryState, Header, Modified, Properties, Received,
    Rejected, Section, Source, Target, TargetKind, TerminusDurability, TerminusExpiryPolicy,
};
pub use sasl::{
    SaslChallenge, SaslCode, SaslInit, SaslMechanisms, SaslOutcome, SaslPerformative,
    SaslResponse,
};
pub use transactions::{Coordinator, Declare, Declared, Discharge, TransactionalState};
pub use transport::{
    Attach, Begin, Close, Detach, Disposition, End, Flow, Open, Performative, Transfer,
};
