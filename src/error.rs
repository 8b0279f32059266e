//! Error types for amqp-engine.
//!
//! Two channels are kept apart: [`EngineError`] values returned from a call
//! are either local (the caller did something illegal for the current state)
//! or fatal (the engine has failed and every later call will see the same
//! cause). [`EngineError::is_fatal`] tells them apart.

use thiserror::Error;

use crate::types::{ErrorCondition, SaslCode, Symbol};

/// Errors raised while encoding or decoding the AMQP type system.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// Not enough bytes left to finish the value.
    #[error("Insufficient data: need {needed} bytes, {available} available")]
    Underflow { needed: usize, available: usize },

    /// The constructor byte is not a known AMQP type code.
    #[error("Unknown type code: 0x{0:02x}")]
    UnknownTypeCode(u8),

    /// A value of one type was found where another was required.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    /// A described list carried more elements than the type defines.
    #[error("Described type {name} allows at most {max} fields, got {actual}")]
    TooManyFields {
        name: &'static str,
        max: usize,
        actual: usize,
    },

    /// The descriptor does not belong to any type expected at this position.
    #[error("Unexpected descriptor: {0}")]
    UnexpectedDescriptor(String),

    /// Array elements do not all share the array constructor.
    #[error("Array element does not match shared constructor 0x{0:02x}")]
    InconsistentArray(u8),

    /// String or symbol bytes are not valid UTF-8.
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A char code point outside the Unicode scalar range.
    #[error("Invalid char code point: 0x{0:x}")]
    InvalidChar(u32),

    /// The size prefix of a compound value disagrees with its content.
    #[error("Declared size {declared} but consumed {consumed} bytes")]
    SizeMismatch { declared: usize, consumed: usize },

    /// Value is too large for the widest encoding of its type.
    #[error("Value too large to encode: {0}")]
    Overflow(&'static str),

    /// Described or compound values nested deeper than the decoder allows.
    #[error("Values nested deeper than {0} levels")]
    NestingTooDeep(usize),

    /// A field held a value outside its defined range.
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Main error type for engine operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The remote peer sent something structurally or sequentially illegal.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Unexpected internal or transport-reported failure.
    #[error("Engine failed: {0}")]
    EngineFailed(String),

    /// Encode or decode failure.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// An outbound frame would not fit the negotiated maximum frame size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameSizeExceeded { size: usize, max: u32 },

    /// SASL negotiation ended with a non-ok outcome.
    #[error("SASL authentication failed: {0:?}")]
    SaslFailed(SaslCode),

    /// The caller invoked an operation illegal for the current local state.
    #[error("Illegal state: {0}")]
    LocalState(String),

    /// A pending operation exceeded its configured duration.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The operation targeted an endpoint that is closed.
    #[error("Resource closed: {0}")]
    ResourceClosed(String),

    /// The peer refused a transaction request.
    #[error("Rejected by peer: {0:?}")]
    Rejected(Option<ErrorCondition>),
}

impl EngineError {
    /// Shorthand for building a [`EngineError::ProtocolViolation`].
    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Shorthand for building a [`EngineError::LocalState`].
    pub(crate) fn local(msg: impl Into<String>) -> Self {
        Self::LocalState(msg.into())
    }

    /// Returns true for errors that terminate the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation(_)
                | Self::EngineFailed(_)
                | Self::Codec(_)
                | Self::FrameSizeExceeded { .. }
                | Self::SaslFailed(_)
        )
    }

    /// The AMQP error condition written in a best-effort Close for this error.
    pub fn condition(&self) -> Symbol {
        let name = match self {
            Self::ProtocolViolation(_) => "amqp:not-allowed",
            Self::Codec(_) => "amqp:decode-error",
            Self::FrameSizeExceeded { .. } => "amqp:frame-size-too-small",
            Self::Timeout(_) => "amqp:resource-limit-exceeded",
            Self::SaslFailed(_) => "amqp:unauthorized-access",
            _ => "amqp:internal-error",
        };
        Symbol::from(name)
    }
}

/// Errors raised while loading or validating an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A setting is outside its permitted range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;
