//! SASL frame bodies.

use bytes::Bytes;

use crate::codec::{descriptor_of, field, DescribedType, Descriptor, FieldReader, Symbol, Value};
use crate::error::CodecError;

/// Outcome code of a SASL exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslCode {
    Ok = 0,
    Auth = 1,
    Sys = 2,
    SysPerm = 3,
    SysTemp = 4,
}

impl SaslCode {
    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Auth),
            2 => Ok(Self::Sys),
            3 => Ok(Self::SysPerm),
            4 => Ok(Self::SysTemp),
            other => Err(CodecError::InvalidValue {
                field: "sasl-code",
                value: other.to_string(),
            }),
        }
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SaslMechanisms {
    pub mechanisms: Vec<Symbol>,
}

impl DescribedType for SaslMechanisms {
    const CODE: u64 = 0x40;
    const NAME: &'static str = "amqp:sasl-mechanisms:list";
    const FIELD_COUNT: usize = 1;

    fn to_fields(&self) -> Vec<Value> {
        vec![Value::symbol_array(&self.mechanisms)]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            mechanisms: fields.symbols()?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SaslInit {
    pub mechanism: Symbol,
    pub initial_response: Option<Bytes>,
    pub hostname: Option<String>,
}

impl DescribedType for SaslInit {
    const CODE: u64 = 0x41;
    const NAME: &'static str = "amqp:sasl-init:list";
    const FIELD_COUNT: usize = 3;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::Symbol(self.mechanism.clone()),
            field::opt(self.initial_response.clone()),
            field::opt(self.hostname.clone()),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            mechanism: fields.symbol()?.unwrap_or_default(),
            initial_response: fields.binary()?,
            hostname: fields.string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SaslChallenge {
    pub challenge: Bytes,
}

impl DescribedType for SaslChallenge {
    const CODE: u64 = 0x42;
    const NAME: &'static str = "amqp:sasl-challenge:list";
    const FIELD_COUNT: usize = 1;

    fn to_fields(&self) -> Vec<Value> {
        vec![Value::Binary(self.challenge.clone())]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            challenge: fields.binary()?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SaslResponse {
    pub response: Bytes,
}

impl DescribedType for SaslResponse {
    const CODE: u64 = 0x43;
    const NAME: &'static str = "amqp:sasl-response:list";
    const FIELD_COUNT: usize = 1;

    fn to_fields(&self) -> Vec<Value> {
        vec![Value::Binary(self.response.clone())]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            response: fields.binary()?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaslOutcome {
    pub code: SaslCode,
    pub additional_data: Option<Bytes>,
}

impl DescribedType for SaslOutcome {
    const CODE: u64 = 0x44;
    const NAME: &'static str = "amqp:sasl-outcome:list";
    const FIELD_COUNT: usize = 2;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::Ubyte(self.code as u8),
            field::opt(self.additional_data.clone()),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        let code = match fields.ubyte()? {
            Some(code) => SaslCode::from_code(code)?,
            None => {
                return Err(CodecError::InvalidValue {
                    field: "sasl-code",
                    value: "null".into(),
                })
            }
        };
        Ok(Self {
            code,
            additional_data: fields.binary()?,
        })
    }
}

/// Any SASL frame body.
#[derive(Debug, Clone, PartialEq)]
pub enum SaslPerformative {
    Mechanisms(SaslMechanisms),
    Init(SaslInit),
    Challenge(SaslChallenge),
    Response(SaslResponse),
    Outcome(SaslOutcome),
}

impl SaslPerformative {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mechanisms(_) => "SaslMechanisms",
            Self::Init(_) => "SaslInit",
            Self::Challenge(_) => "SaslChallenge",
            Self::Response(_) => "SaslResponse",
            Self::Outcome(_) => "SaslOutcome",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Mechanisms(p) => p.to_value(),
            Self::Init(p) => p.to_value(),
            Self::Challenge(p) => p.to_value(),
            Self::Response(p) => p.to_value(),
            Self::Outcome(p) => p.to_value(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let Some(d) = descriptor_of(&value) else {
            return Err(CodecError::TypeMismatch {
                expected: "sasl performative",
                found: value.type_name().to_string(),
            });
        };
        let d: Descriptor = d.clone();
        if d.matches(SaslMechanisms::CODE, SaslMechanisms::NAME) {
            SaslMechanisms::from_value(value).map(Self::Mechanisms)
        } else if d.matches(SaslInit::CODE, SaslInit::NAME) {
            SaslInit::from_value(value).map(Self::Init)
        } else if d.matches(SaslChallenge::CODE, SaslChallenge::NAME) {
            SaslChallenge::from_value(value).map(Self::Challenge)
        } else if d.matches(SaslResponse::CODE, SaslResponse::NAME) {
            SaslResponse::from_value(value).map(Self::Response)
        } else if d.matches(SaslOutcome::CODE, SaslOutcome::NAME) {
            SaslOutcome::from_value(value).map(Self::Outcome)
        } else {
            Err(CodecError::UnexpectedDescriptor(format!(
                "{} is not a SASL performative",
                d
            )))
        }
    }
}
