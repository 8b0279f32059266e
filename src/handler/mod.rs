//! Engine events and handler dispatch.
//!
//! Provides:
//! - [`Event`] - what happened, and to which endpoint
//! - [`EventKind`] - the fieldless discriminant used as a registry key
//! - [`HandlerRegistry`] - closures registered per event kind
//!
//! Every event the engine raises is queued for
//! [`Engine::poll_event`](crate::Engine::poll_event) and, before that, handed
//! to any handler registered for its kind. Handlers run synchronously inside
//! the engine call that raised the event and must not block.
//!
//! # Example
//!
//! ```
//! use amqp_engine::handler::{Event, EventKind, HandlerRegistry};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(EventKind::EngineShutdown, |event| {
//!     if let Event::EngineShutdown(Some(cause)) = event {
//!         eprintln!("engine failed: {}", cause);
//!     }
//! });
//! assert_eq!(registry.len(EventKind::EngineShutdown), 1);
//! ```

mod registry;

pub use registry::{Handler, HandlerRegistry};

use crate::engine::{DeliveryId, LinkId, SessionId};
use crate::error::EngineError;
use crate::types::{ErrorCondition, SaslCode};

/// The endpoint an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Connection,
    Session(SessionId),
    Link(LinkId),
}

/// Something the engine wants the application to know.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Our Open, Begin or Attach went out.
    LocalOpen(Endpoint),
    /// Our Close, End or Detach went out.
    LocalClose(Endpoint),
    /// The peer opened the endpoint, or answered our open.
    RemoteOpen(Endpoint),
    /// The peer closed the endpoint.
    RemoteClose {
        endpoint: Endpoint,
        error: Option<ErrorCondition>,
    },
    /// The peer detached a link without closing it.
    RemoteDetach {
        link: LinkId,
        error: Option<ErrorCondition>,
    },
    /// The endpoint's parent was closed by the peer.
    ParentClosed(Endpoint),
    /// Link credit or drain state changed.
    CreditUpdated(LinkId),
    /// A Transfer frame for an incoming delivery arrived.
    Delivery { link: LinkId, delivery: DeliveryId },
    /// The peer aborted an incoming delivery. It is already forgotten.
    DeliveryAborted { link: LinkId, delivery: DeliveryId },
    /// The peer updated state or settlement of a delivery.
    DeliveryUpdated { link: LinkId, delivery: DeliveryId },
    /// SASL negotiation finished.
    SaslOutcome(SaslCode),
    /// The engine stopped, with the failure cause if it failed.
    EngineShutdown(Option<EngineError>),
}

/// Fieldless discriminant of [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LocalOpen,
    LocalClose,
    RemoteOpen,
    RemoteClose,
    RemoteDetach,
    ParentClosed,
    CreditUpdated,
    Delivery,
    DeliveryAborted,
    DeliveryUpdated,
    SaslOutcome,
    EngineShutdown,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::LocalOpen(_) => EventKind::LocalOpen,
            Event::LocalClose(_) => EventKind::LocalClose,
            Event::RemoteOpen(_) => EventKind::RemoteOpen,
            Event::RemoteClose { .. } => EventKind::RemoteClose,
            Event::RemoteDetach { .. } => EventKind::RemoteDetach,
            Event::ParentClosed(_) => EventKind::ParentClosed,
            Event::CreditUpdated(_) => EventKind::CreditUpdated,
            Event::Delivery { .. } => EventKind::Delivery,
            Event::DeliveryAborted { .. } => EventKind::DeliveryAborted,
            Event::DeliveryUpdated { .. } => EventKind::DeliveryUpdated,
            Event::SaslOutcome(_) => EventKind::SaslOutcome,
            Event::EngineShutdown(_) => EventKind::EngineShutdown,
        }
    }

    /// The endpoint concerned, if the event is about one.
    pub fn endpoint(&self) -> Option<Endpoint> {
        match self {
            Event::LocalOpen(e)
            | Event::LocalClose(e)
            | Event::RemoteOpen(e)
            | Event::ParentClosed(e) => Some(*e),
            Event::RemoteClose { endpoint, .. } => Some(*endpoint),
            Event::RemoteDetach { link, .. }
            | Event::Delivery { link, .. }
            | Event::DeliveryAborted { link, .. }
            | Event::DeliveryUpdated { link, .. } => Some(Endpoint::Link(*link)),
            Event::CreditUpdated(link) => Some(Endpoint::Link(*link)),
            Event::SaslOutcome(_) | Event::EngineShutdown(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_endpoint() {
        let link = LinkId {
            session: SessionId(1),
            handle: 2,
        };
        let event = Event::Delivery {
            link,
            delivery: DeliveryId(9),
        };
        assert_eq!(event.kind(), EventKind::Delivery);
        assert_eq!(event.endpoint(), Some(Endpoint::Link(link)));
        assert_eq!(Event::EngineShutdown(None).endpoint(), None);
    }
}
