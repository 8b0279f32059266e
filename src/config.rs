//! Engine configuration.
//!
//! [`EngineConfig`] holds the local values advertised in Open and Begin and
//! the timeouts applied to pending operations. It can be built in code, via
//! [`EngineBuilder`](crate::EngineBuilder), or loaded from JSON:
//!
//! ```
//! use amqp_engine::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{
//!     "container_id": "worker-1",
//!     "max_frame_size": 16384,
//!     "session_capacity": 1048576,
//!     "send_timeout_ms": 5000
//! }"#).unwrap();
//!
//! assert_eq!(config.container_id, "worker-1");
//! assert_eq!(config.channel_max, u16::MAX);
//! ```
//!
//! Every timeout is in milliseconds; 0 disables it.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::MIN_MAX_FRAME_SIZE;

/// Default max-frame-size advertised in Open.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 65536;

/// Largest SASL frame either side must accept.
pub const DEFAULT_MAX_SASL_FRAME_SIZE: u32 = MIN_MAX_FRAME_SIZE;

/// Local engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub container_id: String,
    pub hostname: Option<String>,
    pub max_frame_size: u32,
    pub channel_max: u16,
    /// Local idle timeout advertised in Open.
    pub idle_timeout_ms: u32,
    /// Incoming byte capacity per session; 0 leaves the window unbounded.
    pub session_capacity: u32,
    pub handle_max: u32,
    pub max_sasl_frame_size: u32,
    pub open_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub drain_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            container_id: String::new(),
            hostname: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_max: u16::MAX,
            idle_timeout_ms: 0,
            session_capacity: 0,
            handle_max: u32::MAX,
            max_sasl_frame_size: DEFAULT_MAX_SASL_FRAME_SIZE,
            open_timeout_ms: 0,
            close_timeout_ms: 0,
            send_timeout_ms: 0,
            drain_timeout_ms: 0,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is within its permitted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_size < MIN_MAX_FRAME_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size {} is below the minimum {}",
                self.max_frame_size, MIN_MAX_FRAME_SIZE
            )));
        }
        if self.max_sasl_frame_size < MIN_MAX_FRAME_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_sasl_frame_size {} is below the minimum {}",
                self.max_sasl_frame_size, MIN_MAX_FRAME_SIZE
            )));
        }
        Ok(())
    }
}
