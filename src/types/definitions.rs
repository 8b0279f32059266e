//! Shared transport definitions: roles, settle modes and error conditions.

use crate::codec::{field, DescribedType, FieldReader, Fields, Symbol, Value};
use crate::error::CodecError;

/// Link role. Encoded as a boolean: `false` sender, `true` receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    #[inline]
    pub fn is_sender(self) -> bool {
        self == Role::Sender
    }

    /// The role the peer takes on the same link.
    #[inline]
    pub fn opposite(self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }

    pub(crate) fn to_value(self) -> Value {
        Value::Bool(self == Role::Receiver)
    }

    pub(crate) fn from_wire(receiver: bool) -> Self {
        if receiver {
            Role::Receiver
        } else {
            Role::Sender
        }
    }
}

/// Settlement policy of the sending side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderSettleMode {
    Unsettled,
    Settled,
    #[default]
    Mixed,
}

impl SenderSettleMode {
    pub(crate) fn to_value(self) -> Value {
        match self {
            Self::Mixed => Value::Null,
            other => Value::Ubyte(other.code()),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Unsettled => 0,
            Self::Settled => 1,
            Self::Mixed => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            0 => Ok(Self::Unsettled),
            1 => Ok(Self::Settled),
            2 => Ok(Self::Mixed),
            other => Err(CodecError::InvalidValue {
                field: "snd-settle-mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Settlement policy of the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverSettleMode {
    #[default]
    First,
    Second,
}

impl ReceiverSettleMode {
    pub(crate) fn to_value(self) -> Value {
        match self {
            Self::First => Value::Null,
            Self::Second => Value::Ubyte(1),
        }
    }

    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            0 => Ok(Self::First),
            1 => Ok(Self::Second),
            other => Err(CodecError::InvalidValue {
                field: "rcv-settle-mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Standard error condition symbols.
pub mod conditions {
    pub const INTERNAL_ERROR: &str = "amqp:internal-error";
    pub const NOT_FOUND: &str = "amqp:not-found";
    pub const UNAUTHORIZED_ACCESS: &str = "amqp:unauthorized-access";
    pub const DECODE_ERROR: &str = "amqp:decode-error";
    pub const RESOURCE_LIMIT_EXCEEDED: &str = "amqp:resource-limit-exceeded";
    pub const NOT_ALLOWED: &str = "amqp:not-allowed";
    pub const INVALID_FIELD: &str = "amqp:invalid-field";
    pub const NOT_IMPLEMENTED: &str = "amqp:not-implemented";
    pub const PRECONDITION_FAILED: &str = "amqp:precondition-failed";
    pub const CONNECTION_FORCED: &str = "amqp:connection:forced";
    pub const FRAMING_ERROR: &str = "amqp:connection:framing-error";
    pub const WINDOW_VIOLATION: &str = "amqp:session:window-violation";
    pub const UNATTACHED_HANDLE: &str = "amqp:session:unattached-handle";
    pub const HANDLE_IN_USE: &str = "amqp:session:handle-in-use";
    pub const DETACH_FORCED: &str = "amqp:link:detach-forced";
    pub const TRANSFER_LIMIT_EXCEEDED: &str = "amqp:link:transfer-limit-exceeded";
}

/// Error details attached to Close, End, Detach and Rejected.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorCondition {
    pub condition: Symbol,
    pub description: Option<String>,
    pub info: Option<Fields>,
}

impl ErrorCondition {
    pub fn new(condition: impl Into<Symbol>, description: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            description: Some(description.into()),
            info: None,
        }
    }
}

impl DescribedType for ErrorCondition {
    const CODE: u64 = 0x1d;
    const NAME: &'static str = "amqp:error:list";
    const FIELD_COUNT: usize = 3;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::Symbol(self.condition.clone()),
            field::opt(self.description.clone()),
            field::fields(&self.info),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            condition: fields.symbol()?.unwrap_or_default(),
            description: fields.string()?,
            info: fields.fields()?,
        })
    }
}
