//! Messaging layer types: termini, delivery states and message sections.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use super::definitions::ErrorCondition;
use super::transactions::{Coordinator, Declared, TransactionalState};
use crate::codec::{
    descriptor_of, expect_described, field, Decoder, DescribedType, Encoder, FieldReader, Fields,
    Symbol, Value,
};
use crate::error::CodecError;

/// How much terminus state survives a detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminusDurability {
    #[default]
    None,
    Configuration,
    UnsettledState,
}

impl TerminusDurability {
    fn to_value(self) -> Value {
        match self {
            Self::None => Value::Null,
            Self::Configuration => Value::Uint(1),
            Self::UnsettledState => Value::Uint(2),
        }
    }

    fn from_code(code: Option<u32>) -> Result<Self, CodecError> {
        match code {
            None | Some(0) => Ok(Self::None),
            Some(1) => Ok(Self::Configuration),
            Some(2) => Ok(Self::UnsettledState),
            Some(other) => Err(CodecError::InvalidValue {
                field: "terminus-durability",
                value: other.to_string(),
            }),
        }
    }
}

/// When the expiry timer of a terminus starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminusExpiryPolicy {
    LinkDetach,
    #[default]
    SessionEnd,
    ConnectionClose,
    Never,
}

impl TerminusExpiryPolicy {
    fn as_str(self) -> &'static str {
        match self {
            Self::LinkDetach => "link-detach",
            Self::SessionEnd => "session-end",
            Self::ConnectionClose => "connection-close",
            Self::Never => "never",
        }
    }

    fn to_value(self) -> Value {
        match self {
            Self::SessionEnd => Value::Null,
            other => Value::Symbol(other.as_str().into()),
        }
    }

    fn from_symbol(symbol: Option<Symbol>) -> Result<Self, CodecError> {
        let Some(symbol) = symbol else {
            return Ok(Self::SessionEnd);
        };
        match symbol.as_str() {
            "link-detach" => Ok(Self::LinkDetach),
            "session-end" => Ok(Self::SessionEnd),
            "connection-close" => Ok(Self::ConnectionClose),
            "never" => Ok(Self::Never),
            other => Err(CodecError::InvalidValue {
                field: "terminus-expiry-policy",
                value: other.to_string(),
            }),
        }
    }
}

/// The origin of messages on a link.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Source {
    pub address: Option<String>,
    pub durable: TerminusDurability,
    pub expiry_policy: TerminusExpiryPolicy,
    pub timeout: u32,
    pub dynamic: bool,
    pub dynamic_node_properties: Option<Fields>,
    pub distribution_mode: Option<Symbol>,
    pub filter: Option<Fields>,
    pub default_outcome: Option<DeliveryState>,
    pub outcomes: Option<Vec<Symbol>>,
    pub capabilities: Option<Vec<Symbol>>,
}

impl Source {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }
}

impl DescribedType for Source {
    const CODE: u64 = 0x28;
    const NAME: &'static str = "amqp:source:list";
    const FIELD_COUNT: usize = 11;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            field::opt(self.address.clone()),
            self.durable.to_value(),
            self.expiry_policy.to_value(),
            if self.timeout == 0 { Value::Null } else { Value::Uint(self.timeout) },
            field::flag(self.dynamic, false),
            field::fields(&self.dynamic_node_properties),
            field::opt(self.distribution_mode.clone()),
            field::fields(&self.filter),
            self.default_outcome.as_ref().map(DeliveryState::to_value).unwrap_or(Value::Null),
            field::symbols(&self.outcomes),
            field::symbols(&self.capabilities),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            address: fields.string()?,
            durable: TerminusDurability::from_code(fields.uint()?)?,
            expiry_policy: TerminusExpiryPolicy::from_symbol(fields.symbol()?)?,
            timeout: fields.uint()?.unwrap_or(0),
            dynamic: fields.boolean()?.unwrap_or(false),
            dynamic_node_properties: fields.fields()?,
            distribution_mode: fields.symbol()?,
            filter: fields.fields()?,
            default_outcome: fields.value().map(DeliveryState::from_value).transpose()?,
            outcomes: fields.symbols()?,
            capabilities: fields.symbols()?,
        })
    }
}

/// The destination of messages on a link.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Target {
    pub address: Option<String>,
    pub durable: TerminusDurability,
    pub expiry_policy: TerminusExpiryPolicy,
    pub timeout: u32,
    pub dynamic: bool,
    pub dynamic_node_properties: Option<Fields>,
    pub capabilities: Option<Vec<Symbol>>,
}

impl Target {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }
}

impl DescribedType for Target {
    const CODE: u64 = 0x29;
    const NAME: &'static str = "amqp:target:list";
    const FIELD_COUNT: usize = 7;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            field::opt(self.address.clone()),
            self.durable.to_value(),
            self.expiry_policy.to_value(),
            if self.timeout == 0 { Value::Null } else { Value::Uint(self.timeout) },
            field::flag(self.dynamic, false),
            field::fields(&self.dynamic_node_properties),
            field::symbols(&self.capabilities),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            address: fields.string()?,
            durable: TerminusDurability::from_code(fields.uint()?)?,
            expiry_policy: TerminusExpiryPolicy::from_symbol(fields.symbol()?)?,
            timeout: fields.uint()?.unwrap_or(0),
            dynamic: fields.boolean()?.unwrap_or(false),
            dynamic_node_properties: fields.fields()?,
            capabilities: fields.symbols()?,
        })
    }
}

/// The target slot of an Attach: an ordinary target or a transaction coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetKind {
    Target(Target),
    Coordinator(Coordinator),
}

impl TargetKind {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Target(t) => t.to_value(),
            Self::Coordinator(c) => c.to_value(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        match descriptor_of(&value) {
            Some(d) if d.matches(Coordinator::CODE, Coordinator::NAME) => {
                Ok(Self::Coordinator(Coordinator::from_value(value)?))
            }
            _ => Ok(Self::Target(Target::from_value(value)?)),
        }
    }

    #[inline]
    pub fn is_coordinator(&self) -> bool {
        matches!(self, Self::Coordinator(_))
    }
}

/// Partial receipt position, used when resuming a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Received {
    pub section_number: u32,
    pub section_offset: u64,
}

impl DescribedType for Received {
    const CODE: u64 = 0x23;
    const NAME: &'static str = "amqp:received:list";
    const FIELD_COUNT: usize = 2;

    fn to_fields(&self) -> Vec<Value> {
        vec![Value::Uint(self.section_number), Value::Ulong(self.section_offset)]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            section_number: fields.uint()?.unwrap_or(0),
            section_offset: fields.ulong()?.unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rejected {
    pub error: Option<ErrorCondition>,
}

impl DescribedType for Rejected {
    const CODE: u64 = 0x25;
    const NAME: &'static str = "amqp:rejected:list";
    const FIELD_COUNT: usize = 1;

    fn to_fields(&self) -> Vec<Value> {
        vec![field::described(&self.error)]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            error: fields.described()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Modified {
    pub delivery_failed: Option<bool>,
    pub undeliverable_here: Option<bool>,
    pub message_annotations: Option<Fields>,
}

impl DescribedType for Modified {
    const CODE: u64 = 0x27;
    const NAME: &'static str = "amqp:modified:list";
    const FIELD_COUNT: usize = 3;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            field::opt(self.delivery_failed),
            field::opt(self.undeliverable_here),
            field::fields(&self.message_annotations),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            delivery_failed: fields.boolean()?,
            undeliverable_here: fields.boolean()?,
            message_annotations: fields.fields()?,
        })
    }
}

const ACCEPTED: (u64, &str) = (0x24, "amqp:accepted:list");
const RELEASED: (u64, &str) = (0x26, "amqp:released:list");

/// State of a delivery as carried in Transfer and Disposition.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    Received(Received),
    Accepted,
    Rejected(Rejected),
    Released,
    Modified(Modified),
    Declared(Declared),
    Transactional(TransactionalState),
}

impl DeliveryState {
    /// True for outcomes, the states that end a delivery's life.
    pub fn is_outcome(&self) -> bool {
        !matches!(self, Self::Received(_) | Self::Transactional(_))
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Received(s) => s.to_value(),
            Self::Accepted => Value::described(ACCEPTED.0, Value::List(vec![])),
            Self::Rejected(s) => s.to_value(),
            Self::Released => Value::described(RELEASED.0, Value::List(vec![])),
            Self::Modified(s) => s.to_value(),
            Self::Declared(s) => s.to_value(),
            Self::Transactional(s) => s.to_value(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let Some(d) = descriptor_of(&value) else {
            return Err(CodecError::TypeMismatch {
                expected: "delivery-state",
                found: value.type_name().to_string(),
            });
        };
        if d.matches(ACCEPTED.0, ACCEPTED.1) {
            return empty_list(value, ACCEPTED.1).map(|_| Self::Accepted);
        }
        if d.matches(RELEASED.0, RELEASED.1) {
            return empty_list(value, RELEASED.1).map(|_| Self::Released);
        }
        if d.matches(Received::CODE, Received::NAME) {
            return Received::from_value(value).map(Self::Received);
        }
        if d.matches(Rejected::CODE, Rejected::NAME) {
            return Rejected::from_value(value).map(Self::Rejected);
        }
        if d.matches(Modified::CODE, Modified::NAME) {
            return Modified::from_value(value).map(Self::Modified);
        }
        if d.matches(Declared::CODE, Declared::NAME) {
            return Declared::from_value(value).map(Self::Declared);
        }
        if d.matches(TransactionalState::CODE, TransactionalState::NAME) {
            return TransactionalState::from_value(value).map(Self::Transactional);
        }
        Err(CodecError::UnexpectedDescriptor(format!(
            "{} is not a delivery state",
            d
        )))
    }
}

/// Accepted and Released carry an empty list.
fn empty_list(value: Value, name: &'static str) -> Result<(), CodecError> {
    match expect_described(value, name)?.value {
        Value::List(items) if items.is_empty() => Ok(()),
        Value::List(items) => Err(CodecError::TooManyFields {
            name,
            max: 0,
            actual: items.len(),
        }),
        other => Err(CodecError::TypeMismatch {
            expected: "list",
            found: other.type_name().to_string(),
        }),
    }
}

/// Standard message header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    pub durable: bool,
    pub priority: Option<u8>,
    pub ttl: Option<u32>,
    pub first_acquirer: bool,
    pub delivery_count: u32,
}

impl DescribedType for Header {
    const CODE: u64 = 0x70;
    const NAME: &'static str = "amqp:header:list";
    const FIELD_COUNT: usize = 5;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            field::flag(self.durable, false),
            field::opt(self.priority),
            field::opt(self.ttl),
            field::flag(self.first_acquirer, false),
            if self.delivery_count == 0 { Value::Null } else { Value::Uint(self.delivery_count) },
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            durable: fields.boolean()?.unwrap_or(false),
            priority: fields.ubyte()?,
            ttl: fields.uint()?,
            first_acquirer: fields.boolean()?.unwrap_or(false),
            delivery_count: fields.uint()?.unwrap_or(0),
        })
    }
}

/// Immutable properties of a message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Properties {
    pub message_id: Option<Value>,
    pub user_id: Option<Bytes>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<Value>,
    pub content_type: Option<Symbol>,
    pub content_encoding: Option<Symbol>,
    pub absolute_expiry_time: Option<i64>,
    pub creation_time: Option<i64>,
    pub group_id: Option<String>,
    pub group_sequence: Option<u32>,
    pub reply_to_group_id: Option<String>,
}

impl DescribedType for Properties {
    const CODE: u64 = 0x73;
    const NAME: &'static str = "amqp:properties:list";
    const FIELD_COUNT: usize = 13;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            self.message_id.clone().unwrap_or(Value::Null),
            field::opt(self.user_id.clone()),
            field::opt(self.to.clone()),
            field::opt(self.subject.clone()),
            field::opt(self.reply_to.clone()),
            self.correlation_id.clone().unwrap_or(Value::Null),
            field::opt(self.content_type.clone()),
            field::opt(self.content_encoding.clone()),
            self.absolute_expiry_time.map(Value::Timestamp).unwrap_or(Value::Null),
            self.creation_time.map(Value::Timestamp).unwrap_or(Value::Null),
            field::opt(self.group_id.clone()),
            field::opt(self.group_sequence),
            field::opt(self.reply_to_group_id.clone()),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            message_id: fields.value(),
            user_id: fields.binary()?,
            to: fields.string()?,
            subject: fields.string()?,
            reply_to: fields.string()?,
            correlation_id: fields.value(),
            content_type: fields.symbol()?,
            content_encoding: fields.symbol()?,
            absolute_expiry_time: fields.timestamp()?,
            creation_time: fields.timestamp()?,
            group_id: fields.string()?,
            group_sequence: fields.uint()?,
            reply_to_group_id: fields.string()?,
        })
    }
}

/// One section of a bare or annotated message.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Header(Header),
    DeliveryAnnotations(Fields),
    MessageAnnotations(Fields),
    Properties(Properties),
    ApplicationProperties(BTreeMap<String, Value>),
    Data(Bytes),
    AmqpSequence(Vec<Value>),
    AmqpValue(Value),
    Footer(Fields),
}

const DELIVERY_ANNOTATIONS: (u64, &str) = (0x71, "amqp:delivery-annotations:map");
const MESSAGE_ANNOTATIONS: (u64, &str) = (0x72, "amqp:message-annotations:map");
const APPLICATION_PROPERTIES: (u64, &str) = (0x74, "amqp:application-properties:map");
const DATA: (u64, &str) = (0x75, "amqp:data:binary");
const AMQP_SEQUENCE: (u64, &str) = (0x76, "amqp:amqp-sequence:list");
const AMQP_VALUE: (u64, &str) = (0x77, "amqp:value:*");
const FOOTER: (u64, &str) = (0x78, "amqp:footer:map");

impl Section {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Header(h) => h.to_value(),
            Self::DeliveryAnnotations(f) => Value::described(DELIVERY_ANNOTATIONS.0, Value::from_fields(f)),
            Self::MessageAnnotations(f) => Value::described(MESSAGE_ANNOTATIONS.0, Value::from_fields(f)),
            Self::Properties(p) => p.to_value(),
            Self::ApplicationProperties(props) => Value::described(
                APPLICATION_PROPERTIES.0,
                Value::Map(
                    props
                        .iter()
                        .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                        .collect(),
                ),
            ),
            Self::Data(b) => Value::described(DATA.0, Value::Binary(b.clone())),
            Self::AmqpSequence(items) => Value::described(AMQP_SEQUENCE.0, Value::List(items.clone())),
            Self::AmqpValue(v) => Value::described(AMQP_VALUE.0, v.clone()),
            Self::Footer(f) => Value::described(FOOTER.0, Value::from_fields(f)),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let Some(d) = descriptor_of(&value) else {
            return Err(CodecError::TypeMismatch {
                expected: "message section",
                found: value.type_name().to_string(),
            });
        };
        if d.matches(Header::CODE, Header::NAME) {
            return Header::from_value(value).map(Self::Header);
        }
        if d.matches(Properties::CODE, Properties::NAME) {
            return Properties::from_value(value).map(Self::Properties);
        }
        let matches = |(code, name): (u64, &str)| d.matches(code, name);
        if matches(DELIVERY_ANNOTATIONS) {
            return symbol_map(value, DELIVERY_ANNOTATIONS.1).map(Self::DeliveryAnnotations);
        }
        if matches(MESSAGE_ANNOTATIONS) {
            return symbol_map(value, MESSAGE_ANNOTATIONS.1).map(Self::MessageAnnotations);
        }
        if matches(FOOTER) {
            return symbol_map(value, FOOTER.1).map(Self::Footer);
        }
        if matches(APPLICATION_PROPERTIES) {
            let mut props = BTreeMap::new();
            for (k, v) in map_body(value, APPLICATION_PROPERTIES.1)? {
                match k {
                    Value::String(key) => {
                        props.insert(key, v);
                    }
                    other => {
                        return Err(CodecError::TypeMismatch {
                            expected: "string key",
                            found: other.type_name().to_string(),
                        })
                    }
                }
            }
            return Ok(Self::ApplicationProperties(props));
        }
        if matches(DATA) {
            return match expect_described(value, DATA.1)?.value {
                Value::Binary(b) => Ok(Self::Data(b)),
                other => Err(CodecError::TypeMismatch {
                    expected: "binary",
                    found: other.type_name().to_string(),
                }),
            };
        }
        if matches(AMQP_SEQUENCE) {
            return match expect_described(value, AMQP_SEQUENCE.1)?.value {
                Value::List(items) => Ok(Self::AmqpSequence(items)),
                other => Err(CodecError::TypeMismatch {
                    expected: "list",
                    found: other.type_name().to_string(),
                }),
            };
        }
        if matches(AMQP_VALUE) {
            return Ok(Self::AmqpValue(expect_described(value, AMQP_VALUE.1)?.value));
        }
        Err(CodecError::UnexpectedDescriptor(format!(
            "{} is not a message section",
            d
        )))
    }
}

fn map_body(value: Value, name: &'static str) -> Result<Vec<(Value, Value)>, CodecError> {
    match expect_described(value, name)?.value {
        Value::Map(pairs) => Ok(pairs),
        other => Err(CodecError::TypeMismatch {
            expected: "map",
            found: other.type_name().to_string(),
        }),
    }
}

fn symbol_map(value: Value, name: &'static str) -> Result<Fields, CodecError> {
    let mut out = Fields::new();
    for (k, v) in map_body(value, name)? {
        match k {
            Value::Symbol(key) => {
                out.insert(key, v);
            }
            other => {
                return Err(CodecError::TypeMismatch {
                    expected: "symbol key",
                    found: other.type_name().to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// Encode message sections back to back into a transfer payload.
pub fn encode_sections(sections: &[Section]) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    let mut encoder = Encoder::new(&mut buf);
    for section in sections {
        encoder.write(&section.to_value())?;
    }
    Ok(buf.freeze())
}

/// Decode every section in a complete message payload.
pub fn decode_sections(payload: Bytes) -> Result<Vec<Section>, CodecError> {
    let mut decoder = Decoder::new(payload);
    let mut sections = Vec::new();
    while !decoder.is_empty() {
        sections.push(Section::from_value(decoder.read_value()?)?);
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_value, encode_value};

    #[test]
    fn test_source_defaults_are_trimmed() {
        let source = Source::new("queue");
        match source.to_value() {
            Value::Described(d) => assert_eq!(d.value, Value::List(vec!["queue".into()])),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_source_full_wire() {
        let source = Source {
            address: Some("q".into()),
            durable: TerminusDurability::UnsettledState,
            expiry_policy: TerminusExpiryPolicy::Never,
            timeout: 30,
            dynamic: true,
            default_outcome: Some(DeliveryState::Released),
            outcomes: Some(vec!["amqp:accepted:list".into()]),
            capabilities: Some(vec!["queue".into()]),
            ..Source::default()
        };
        let bytes = encode_value(&source.to_value()).unwrap();
        assert_eq!(Source::from_value(decode_value(bytes).unwrap()).unwrap(), source);
    }

    #[test]
    fn test_delivery_state_dispatch() {
        let states = [
            DeliveryState::Accepted,
            DeliveryState::Released,
            DeliveryState::Received(Received { section_number: 1, section_offset: 20 }),
            DeliveryState::Modified(Modified {
                delivery_failed: Some(true),
                ..Modified::default()
            }),
        ];
        for state in states {
            let bytes = encode_value(&state.to_value()).unwrap();
            assert_eq!(DeliveryState::from_value(decode_value(bytes).unwrap()).unwrap(), state);
        }
    }

    #[test]
    fn test_accepted_with_fields_rejected() {
        let value = Value::described(0x24, Value::List(vec![Value::Null]));
        assert!(matches!(
            DeliveryState::from_value(value),
            Err(CodecError::TooManyFields { .. })
        ));
    }

    #[test]
    fn test_map_section_given_list_is_mismatch() {
        let value = Value::described(0x74, Value::List(vec![]));
        let err = Section::from_value(value).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { expected: "map", .. }));
    }

    #[test]
    fn test_message_sections() {
        let mut props = BTreeMap::new();
        props.insert("count".to_string(), Value::Int(3));
        let sections = vec![
            Section::Header(Header {
                durable: true,
                ..Header::default()
            }),
            Section::Properties(Properties {
                message_id: Some(Value::String("id-1".into())),
                creation_time: Some(1_700_000_000_000),
                ..Properties::default()
            }),
            Section::ApplicationProperties(props),
            Section::Data(Bytes::from_static(b"body")),
        ];
        let payload = encode_sections(&sections).unwrap();
        assert_eq!(decode_sections(payload).unwrap(), sections);
    }

    #[test]
    fn test_coordinator_target_kind() {
        let kind = TargetKind::Coordinator(Coordinator::default());
        let decoded = TargetKind::from_value(decode_value(encode_value(&kind.to_value()).unwrap()).unwrap())
            .unwrap();
        assert!(decoded.is_coordinator());
    }
}
