//! Transport performatives.
//!
//! Each performative is a described list with a fixed field order. Fields
//! that hold their default are written as null and trimmed from the tail,
//! so a minimal Begin is only a handful of bytes on the wire.

use bytes::Bytes;

use super::definitions::{ErrorCondition, ReceiverSettleMode, Role, SenderSettleMode};
use super::messaging::{DeliveryState, Source, TargetKind};
use crate::codec::{descriptor_of, field, DescribedType, FieldReader, Fields, Symbol, Value};
use crate::error::CodecError;

/// Negotiates connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    pub container_id: String,
    pub hostname: Option<String>,
    pub max_frame_size: u32,
    pub channel_max: u16,
    /// Milliseconds.
    pub idle_timeout: Option<u32>,
    pub outgoing_locales: Option<Vec<Symbol>>,
    pub incoming_locales: Option<Vec<Symbol>>,
    pub offered_capabilities: Option<Vec<Symbol>>,
    pub desired_capabilities: Option<Vec<Symbol>>,
    pub properties: Option<Fields>,
}

impl Default for Open {
    fn default() -> Self {
        Self {
            container_id: String::new(),
            hostname: None,
            max_frame_size: u32::MAX,
            channel_max: u16::MAX,
            idle_timeout: None,
            outgoing_locales: None,
            incoming_locales: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }
}

impl DescribedType for Open {
    const CODE: u64 = 0x10;
    const NAME: &'static str = "amqp:open:list";
    const FIELD_COUNT: usize = 10;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::String(self.container_id.clone()),
            field::opt(self.hostname.clone()),
            if self.max_frame_size == u32::MAX { Value::Null } else { Value::Uint(self.max_frame_size) },
            if self.channel_max == u16::MAX { Value::Null } else { Value::Ushort(self.channel_max) },
            field::opt(self.idle_timeout),
            field::symbols(&self.outgoing_locales),
            field::symbols(&self.incoming_locales),
            field::symbols(&self.offered_capabilities),
            field::symbols(&self.desired_capabilities),
            field::fields(&self.properties),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            container_id: fields.string()?.unwrap_or_default(),
            hostname: fields.string()?,
            max_frame_size: fields.uint()?.unwrap_or(u32::MAX),
            channel_max: fields.ushort()?.unwrap_or(u16::MAX),
            idle_timeout: fields.uint()?,
            outgoing_locales: fields.symbols()?,
            incoming_locales: fields.symbols()?,
            offered_capabilities: fields.symbols()?,
            desired_capabilities: fields.symbols()?,
            properties: fields.fields()?,
        })
    }
}

/// Begins a session on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Begin {
    pub remote_channel: Option<u16>,
    pub next_outgoing_id: u32,
    pub incoming_window: u32,
    pub outgoing_window: u32,
    pub handle_max: u32,
    pub offered_capabilities: Option<Vec<Symbol>>,
    pub desired_capabilities: Option<Vec<Symbol>>,
    pub properties: Option<Fields>,
}

impl Default for Begin {
    fn default() -> Self {
        Self {
            remote_channel: None,
            next_outgoing_id: 0,
            incoming_window: 0,
            outgoing_window: 0,
            handle_max: u32::MAX,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }
}

impl DescribedType for Begin {
    const CODE: u64 = 0x11;
    const NAME: &'static str = "amqp:begin:list";
    const FIELD_COUNT: usize = 8;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            field::opt(self.remote_channel),
            Value::Uint(self.next_outgoing_id),
            Value::Uint(self.incoming_window),
            Value::Uint(self.outgoing_window),
            if self.handle_max == u32::MAX { Value::Null } else { Value::Uint(self.handle_max) },
            field::symbols(&self.offered_capabilities),
            field::symbols(&self.desired_capabilities),
            field::fields(&self.properties),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            remote_channel: fields.ushort()?,
            next_outgoing_id: fields.uint()?.unwrap_or(0),
            incoming_window: fields.uint()?.unwrap_or(0),
            outgoing_window: fields.uint()?.unwrap_or(0),
            handle_max: fields.uint()?.unwrap_or(u32::MAX),
            offered_capabilities: fields.symbols()?,
            desired_capabilities: fields.symbols()?,
            properties: fields.fields()?,
        })
    }
}

/// Attaches a link to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Attach {
    pub name: String,
    pub handle: u32,
    pub role: Role,
    pub snd_settle_mode: SenderSettleMode,
    pub rcv_settle_mode: ReceiverSettleMode,
    pub source: Option<Source>,
    pub target: Option<TargetKind>,
    pub unsettled: Option<Vec<(Value, Value)>>,
    pub incomplete_unsettled: bool,
    pub initial_delivery_count: Option<u32>,
    pub max_message_size: Option<u64>,
    pub offered_capabilities: Option<Vec<Symbol>>,
    pub desired_capabilities: Option<Vec<Symbol>>,
    pub properties: Option<Fields>,
}

impl Attach {
    pub fn new(name: impl Into<String>, handle: u32, role: Role) -> Self {
        Self {
            name: name.into(),
            handle,
            role,
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            source: None,
            target: None,
            unsettled: None,
            incomplete_unsettled: false,
            initial_delivery_count: None,
            max_message_size: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }
}

impl DescribedType for Attach {
    const CODE: u64 = 0x12;
    const NAME: &'static str = "amqp:attach:list";
    const FIELD_COUNT: usize = 14;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::String(self.name.clone()),
            Value::Uint(self.handle),
            self.role.to_value(),
            self.snd_settle_mode.to_value(),
            self.rcv_settle_mode.to_value(),
            field::described(&self.source),
            self.target.as_ref().map(TargetKind::to_value).unwrap_or(Value::Null),
            self.unsettled.clone().map(Value::Map).unwrap_or(Value::Null),
            field::flag(self.incomplete_unsettled, false),
            field::opt(self.initial_delivery_count),
            field::opt(self.max_message_size),
            field::symbols(&self.offered_capabilities),
            field::symbols(&self.desired_capabilities),
            field::fields(&self.properties),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            name: fields.string()?.unwrap_or_default(),
            handle: fields.uint()?.unwrap_or(0),
            role: Role::from_wire(fields.boolean()?.unwrap_or(false)),
            snd_settle_mode: fields
                .ubyte()?
                .map(SenderSettleMode::from_code)
                .transpose()?
                .unwrap_or_default(),
            rcv_settle_mode: fields
                .ubyte()?
                .map(ReceiverSettleMode::from_code)
                .transpose()?
                .unwrap_or_default(),
            source: fields.described()?,
            target: fields.value().map(TargetKind::from_value).transpose()?,
            unsettled: fields.map()?,
            incomplete_unsettled: fields.boolean()?.unwrap_or(false),
            initial_delivery_count: fields.uint()?,
            max_message_size: fields.ulong()?,
            offered_capabilities: fields.symbols()?,
            desired_capabilities: fields.symbols()?,
            properties: fields.fields()?,
        })
    }
}

/// Updates session windows and, with a handle, link credit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Flow {
    pub next_incoming_id: Option<u32>,
    pub incoming_window: u32,
    pub next_outgoing_id: u32,
    pub outgoing_window: u32,
    pub handle: Option<u32>,
    pub delivery_count: Option<u32>,
    pub link_credit: Option<u32>,
    pub available: Option<u32>,
    pub drain: bool,
    pub echo: bool,
    pub properties: Option<Fields>,
}

impl DescribedType for Flow {
    const CODE: u64 = 0x13;
    const NAME: &'static str = "amqp:flow:list";
    const FIELD_COUNT: usize = 11;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            field::opt(self.next_incoming_id),
            Value::Uint(self.incoming_window),
            Value::Uint(self.next_outgoing_id),
            Value::Uint(self.outgoing_window),
            field::opt(self.handle),
            field::opt(self.delivery_count),
            field::opt(self.link_credit),
            field::opt(self.available),
            field::flag(self.drain, false),
            field::flag(self.echo, false),
            field::fields(&self.properties),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            next_incoming_id: fields.uint()?,
            incoming_window: fields.uint()?.unwrap_or(0),
            next_outgoing_id: fields.uint()?.unwrap_or(0),
            outgoing_window: fields.uint()?.unwrap_or(0),
            handle: fields.uint()?,
            delivery_count: fields.uint()?,
            link_credit: fields.uint()?,
            available: fields.uint()?,
            drain: fields.boolean()?.unwrap_or(false),
            echo: fields.boolean()?.unwrap_or(false),
            properties: fields.fields()?,
        })
    }
}

/// Carries (part of) a message on a link.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transfer {
    pub handle: u32,
    pub delivery_id: Option<u32>,
    pub delivery_tag: Option<Bytes>,
    pub message_format: Option<u32>,
    pub settled: Option<bool>,
    pub more: bool,
    pub rcv_settle_mode: Option<ReceiverSettleMode>,
    pub state: Option<DeliveryState>,
    pub resume: bool,
    pub aborted: bool,
    pub batchable: bool,
}

impl DescribedType for Transfer {
    const CODE: u64 = 0x14;
    const NAME: &'static str = "amqp:transfer:list";
    const FIELD_COUNT: usize = 11;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::Uint(self.handle),
            field::opt(self.delivery_id),
            field::opt(self.delivery_tag.clone()),
            field::opt(self.message_format),
            field::opt(self.settled),
            field::flag(self.more, false),
            match self.rcv_settle_mode {
                Some(ReceiverSettleMode::First) => Value::Ubyte(0),
                Some(ReceiverSettleMode::Second) => Value::Ubyte(1),
                None => Value::Null,
            },
            self.state.as_ref().map(DeliveryState::to_value).unwrap_or(Value::Null),
            field::flag(self.resume, false),
            field::flag(self.aborted, false),
            field::flag(self.batchable, false),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            handle: fields.uint()?.unwrap_or(0),
            delivery_id: fields.uint()?,
            delivery_tag: fields.binary()?,
            message_format: fields.uint()?,
            settled: fields.boolean()?,
            more: fields.boolean()?.unwrap_or(false),
            rcv_settle_mode: fields.ubyte()?.map(ReceiverSettleMode::from_code).transpose()?,
            state: fields.value().map(DeliveryState::from_value).transpose()?,
            resume: fields.boolean()?.unwrap_or(false),
            aborted: fields.boolean()?.unwrap_or(false),
            batchable: fields.boolean()?.unwrap_or(false),
        })
    }
}

/// Updates state or settlement of a range of deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct Disposition {
    pub role: Role,
    pub first: u32,
    pub last: Option<u32>,
    pub settled: bool,
    pub state: Option<DeliveryState>,
    pub batchable: bool,
}

impl DescribedType for Disposition {
    const CODE: u64 = 0x15;
    const NAME: &'static str = "amqp:disposition:list";
    const FIELD_COUNT: usize = 6;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            self.role.to_value(),
            Value::Uint(self.first),
            field::opt(self.last),
            field::flag(self.settled, false),
            self.state.as_ref().map(DeliveryState::to_value).unwrap_or(Value::Null),
            field::flag(self.batchable, false),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            role: Role::from_wire(fields.boolean()?.unwrap_or(false)),
            first: fields.uint()?.unwrap_or(0),
            last: fields.uint()?,
            settled: fields.boolean()?.unwrap_or(false),
            state: fields.value().map(DeliveryState::from_value).transpose()?,
            batchable: fields.boolean()?.unwrap_or(false),
        })
    }
}

/// Detaches (or with `closed`, closes) a link.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detach {
    pub handle: u32,
    pub closed: bool,
    pub error: Option<ErrorCondition>,
}

impl DescribedType for Detach {
    const CODE: u64 = 0x16;
    const NAME: &'static str = "amqp:detach:list";
    const FIELD_COUNT: usize = 3;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::Uint(self.handle),
            field::flag(self.closed, false),
            field::described(&self.error),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            handle: fields.uint()?.unwrap_or(0),
            closed: fields.boolean()?.unwrap_or(false),
            error: fields.described()?,
        })
    }
}

/// Ends a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct End {
    pub error: Option<ErrorCondition>,
}

impl DescribedType for End {
    const CODE: u64 = 0x17;
    const NAME: &'static str = "amqp:end:list";
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

/// Closes the connection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Close {
    pub error: Option<ErrorCondition>,
}

impl DescribedType for Close {
    const CODE: u64 = 0x18;
    const NAME: &'static str = "amqp:close:list";
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

/// Any AMQP frame body.
#[derive(Debug, Clone, PartialEq)]
pub enum Performative {
    Open(Open),
    Begin(Begin),
    Attach(Attach),
    Flow(Flow),
    Transfer(Transfer),
    Disposition(Disposition),
    Detach(Detach),
    End(End),
    Close(Close),
}

impl Performative {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open(_) => "Open",
            Self::Begin(_) => "Begin",
            Self::Attach(_) => "Attach",
            Self::Flow(_) => "Flow",
            Self::Transfer(_) => "Transfer",
            Self::Disposition(_) => "Disposition",
            Self::Detach(_) => "Detach",
            Self::End(_) => "End",
            Self::Close(_) => "Close",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Open(p) => p.to_value(),
            Self::Begin(p) => p.to_value(),
            Self::Attach(p) => p.to_value(),
            Self::Flow(p) => p.to_value(),
            Self::Transfer(p) => p.to_value(),
            Self::Disposition(p) => p.to_value(),
            Self::Detach(p) => p.to_value(),
            Self::End(p) => p.to_value(),
            Self::Close(p) => p.to_value(),
        }
    }

    /// Dispatch on the descriptor; numeric descriptors take the fast path.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let code = match descriptor_of(&value) {
            Some(crate::codec::Descriptor::Code(code)) => *code,
            Some(crate::codec::Descriptor::Symbol(name)) => symbol_code(name.as_str())?,
            None => {
                return Err(CodecError::TypeMismatch {
                    expected: "performative",
                    found: value.type_name().to_string(),
                })
            }
        };
        let performative = match code {
            Open::CODE => Self::Open(Open::from_value(value)?),
            Begin::CODE => Self::Begin(Begin::from_value(value)?),
            Attach::CODE => Self::Attach(Attach::from_value(value)?),
            Flow::CODE => Self::Flow(Flow::from_value(value)?),
            Transfer::CODE => Self::Transfer(Transfer::from_value(value)?),
            Disposition::CODE => Self::Disposition(Disposition::from_value(value)?),
            Detach::CODE => Self::Detach(Detach::from_value(value)?),
            End::CODE => Self::End(End::from_value(value)?),
            Close::CODE => Self::Close(Close::from_value(value)?),
            other => {
                return Err(CodecError::UnexpectedDescriptor(format!(
                    "0x{:x} is not a performative",
                    other
                )))
            }
        };
        Ok(performative)
    }
}

fn symbol_code(name: &str) -> Result<u64, CodecError> {
    let code = match name {
        Open::NAME => Open::CODE,
        Begin::NAME => Begin::CODE,
        Attach::NAME => Attach::CODE,
        Flow::NAME => Flow::CODE,
        Transfer::NAME => Transfer::CODE,
        Disposition::NAME => Disposition::CODE,
        Detach::NAME => Detach::CODE,
        End::NAME => End::CODE,
        Close::NAME => Close::CODE,
        other => return Err(CodecError::UnexpectedDescriptor(other.to_string())),
    };
    Ok(code)
}
