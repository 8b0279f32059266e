//! # amqp-engine
//!
//! A sans-IO AMQP 1.0 protocol engine.
//!
//! The crate turns bytes into protocol state and protocol state into bytes.
//! It never opens a socket, spawns a task or reads a clock: the host moves
//! bytes between the [`Engine`] and its transport, arms the timers the
//! engine requests, and reacts to [`Event`]s.
//!
//! ## Layers
//!
//! - **Codec** ([`codec`], [`types`]): the AMQP type system, performatives,
//!   message sections, delivery states, transactions and SASL bodies
//! - **Frames** ([`protocol`], [`writer`]): protocol headers, frame
//!   extraction with a size limit, Transfer splitting on output
//! - **SASL** ([`sasl`]): the negotiation gate in front of the AMQP layer
//! - **Endpoints** ([`engine`]): connection, session, link and delivery
//!   state machines with session windows, link credit and transactions
//!
//! ## Example
//!
//! ```
//! use amqp_engine::{Engine, EngineConfig, Event, SendRequest};
//!
//! let mut client = Engine::builder().container_id("client").build().unwrap();
//! let mut server = Engine::new(EngineConfig::default()).unwrap();
//!
//! client.open().unwrap();
//! let session = client.new_session().unwrap();
//! client.open_session(session).unwrap();
//! let sender = client.new_sender(session, "orders").unwrap();
//! client.open_link(sender).unwrap();
//! let mut sent = client.send(sender, SendRequest::new("hello")).unwrap();
//!
//! server.open().unwrap();
//! for _ in 0..4 {
//!     server.ingest(&client.take_output()).unwrap();
//!     while let Some(event) = server.poll_event() {
//!         match event {
//!             Event::RemoteOpen(amqp_engine::Endpoint::Session(id)) => {
//!                 server.open_session(id).unwrap();
//!             }
//!             Event::RemoteOpen(amqp_engine::Endpoint::Link(link)) => {
//!                 server.open_link(link).unwrap();
//!                 server.flow(link, 10).unwrap();
//!             }
//!             _ => {}
//!         }
//!     }
//!     client.ingest(&server.take_output()).unwrap();
//! }
//! assert!(sent.is_done());
//! ```

pub mod backpressure;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod sasl;
pub mod types;
pub mod writer;

pub use config::EngineConfig;
pub use engine::{
    AsyncResult, Connection, Delivery, DeliveryId, EndpointState, Engine, EngineBuilder, Link,
    LinkId, SendRequest, Session, SessionId, TimerId, TimerRequest,
};
pub use error::{CodecError, ConfigError, EngineError, Result};
pub use handler::{Endpoint, Event, EventKind, HandlerRegistry};
