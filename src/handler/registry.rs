//! Handler registry keyed by event kind.
//!
//! Handlers for one kind run in registration order. The registry does not
//! consume events; the engine still queues every event for polling.

use std::collections::HashMap;
use std::fmt;

use super::{Event, EventKind};

/// A registered event handler.
pub type Handler = Box<dyn FnMut(&Event)>;

/// Maps event kinds to the handlers interested in them.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every event of `kind`.
    pub fn register<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&Event) + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Drop every handler registered for `kind`.
    pub fn clear(&mut self, kind: EventKind) {
        self.handlers.remove(&kind);
    }

    /// Number of handlers registered for `kind`.
    pub fn len(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.values().all(Vec::is_empty)
    }

    /// Run the handlers registered for the event's kind.
    pub fn dispatch(&mut self, event: &Event) {
        if let Some(handlers) = self.handlers.get_mut(&event.kind()) {
            for handler in handlers.iter_mut() {
                handler(event);
            }
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<_> = self.handlers.keys().collect();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Endpoint;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_dispatch_by_kind() {
        let mut registry = HandlerRegistry::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = seen.clone();
        registry.register(EventKind::RemoteOpen, move |event| {
            log.borrow_mut().push(event.clone());
        });

        registry.dispatch(&Event::LocalOpen(Endpoint::Connection));
        registry.dispatch(&Event::RemoteOpen(Endpoint::Connection));

        assert_eq!(
            *seen.borrow(),
            vec![Event::RemoteOpen(Endpoint::Connection)]
        );
    }

    #[test]
    fn test_registration_order() {
        let mut registry = HandlerRegistry::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            registry.register(EventKind::EngineShutdown, move |_| order.borrow_mut().push(n));
        }
        registry.dispatch(&Event::EngineShutdown(None));
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_clear() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        registry.register(EventKind::CreditUpdated, |_| {});
        assert_eq!(registry.len(EventKind::CreditUpdated), 1);
        registry.clear(EventKind::CreditUpdated);
        assert_eq!(registry.len(EventKind::CreditUpdated), 0);
        assert!(registry.is_empty());
    }
}
