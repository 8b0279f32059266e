//! Fluent construction of an [`Engine`].
//!
//! # Example
//!
//! ```
//! use amqp_engine::handler::EventKind;
//! use amqp_engine::Engine;
//!
//! let engine = Engine::builder()
//!     .container_id("orders-worker")
//!     .max_frame_size(16 * 1024)
//!     .session_capacity(1024 * 1024)
//!     .send_timeout_ms(5_000)
//!     .on(EventKind::RemoteClose, |event| println!("peer closed: {:?}", event))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(engine.connection().container_id(), "orders-worker");
//! ```

use super::Engine;
use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::handler::{Event, EventKind, HandlerRegistry};
use crate::sasl::{SaslClientListener, SaslGate, SaslServerListener};

enum Sasl {
    Client(Box<dyn SaslClientListener>),
    Server(Box<dyn SaslServerListener>),
}

/// Builder for configuring and creating an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    registry: HandlerRegistry,
    sasl: Option<Sasl>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: HandlerRegistry::new(),
            sasl: None,
        }
    }

    /// Replace the whole configuration, e.g. one loaded from JSON.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn container_id(mut self, container_id: impl Into<String>) -> Self {
        self.config.container_id = container_id.into();
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = Some(hostname.into());
        self
    }

    /// Largest frame we accept. Default: 65536
    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.config.max_frame_size = max_frame_size;
        self
    }

    pub fn channel_max(mut self, channel_max: u16) -> Self {
        self.config.channel_max = channel_max;
        self
    }

    /// Local idle timeout advertised in Open. Default: disabled
    pub fn idle_timeout_ms(mut self, idle_timeout_ms: u32) -> Self {
        self.config.idle_timeout_ms = idle_timeout_ms;
        self
    }

    /// Incoming byte capacity of new sessions. Default: unbounded
    pub fn session_capacity(mut self, capacity: u32) -> Self {
        self.config.session_capacity = capacity;
        self
    }

    pub fn handle_max(mut self, handle_max: u32) -> Self {
        self.config.handle_max = handle_max;
        self
    }

    pub fn open_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.open_timeout_ms = timeout_ms;
        self
    }

    pub fn close_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.close_timeout_ms = timeout_ms;
        self
    }

    /// How long a send may wait for credit before it fails.
    pub fn send_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.send_timeout_ms = timeout_ms;
        self
    }

    pub fn drain_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.drain_timeout_ms = timeout_ms;
        self
    }

    /// Authenticate as a SASL client before the AMQP exchange.
    pub fn sasl_client(mut self, listener: impl SaslClientListener + 'static) -> Self {
        self.sasl = Some(Sasl::Client(Box::new(listener)));
        self
    }

    /// Act as the SASL server before the AMQP exchange.
    pub fn sasl_server(mut self, listener: impl SaslServerListener + 'static) -> Self {
        self.sasl = Some(Sasl::Server(Box::new(listener)));
        self
    }

    /// Register an event handler.
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: FnMut(&Event) + 'static,
    {
        self.registry.register(kind, handler);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<Engine, ConfigError> {
        let gate = self.sasl.map(|sasl| match sasl {
            Sasl::Client(listener) => SaslGate::client(listener, self.config.hostname.clone()),
            Sasl::Server(listener) => SaslGate::server(listener),
        });
        Engine::from_parts(self.config, gate, self.registry)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let engine = EngineBuilder::default().build().unwrap();
        assert_eq!(engine.config(), &EngineConfig::default());
        assert!(engine.sasl_state().is_none());
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Engine::builder()
            .container_id("c1")
            .hostname("broker.local")
            .channel_max(7)
            .handle_max(31)
            .close_timeout_ms(2_000)
            .drain_timeout_ms(500);

        assert_eq!(builder.config.container_id, "c1");
        assert_eq!(builder.config.channel_max, 7);
        assert_eq!(builder.config.handle_max, 31);
        assert_eq!(builder.config.close_timeout_ms, 2_000);
        assert_eq!(builder.config.drain_timeout_ms, 500);

        let engine = builder.build().unwrap();
        assert_eq!(engine.connection().hostname(), Some("broker.local"));
        assert_eq!(engine.connection().channel_max(), 7);
    }

    #[test]
    fn test_builder_handlers_registered() {
        let builder = Engine::builder()
            .on(EventKind::LocalOpen, |_| {})
            .on(EventKind::LocalOpen, |_| {});
        assert_eq!(builder.registry.len(EventKind::LocalOpen), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Engine::builder().max_frame_size(100).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
