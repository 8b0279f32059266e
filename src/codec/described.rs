//! Described list types.
//!
//! Performatives, termini, delivery states and most other composite AMQP
//! types are a descriptor followed by a list whose positions are fields.
//! Trailing fields that hold their default are omitted on the wire; a list
//! shorter than the field count decodes with the missing fields defaulted,
//! while a longer one is rejected.

use bytes::Bytes;

use super::value::{Described, Descriptor, Fields, Symbol, Value};
use crate::error::CodecError;

/// A composite type encoded as a described list.
pub trait DescribedType: Sized {
    /// Numeric descriptor (domain 0x00000000).
    const CODE: u64;
    /// Symbolic descriptor, e.g. `amqp:open:list`.
    const NAME: &'static str;
    /// Number of fields the type defines.
    const FIELD_COUNT: usize;

    /// Field values in positional order; defaults are `Value::Null`.
    fn to_fields(&self) -> Vec<Value>;

    /// Build the type from positional fields.
    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError>;

    /// Encode as a described list, trimming trailing null fields.
    fn to_value(&self) -> Value {
        let mut fields = self.to_fields();
        while matches!(fields.last(), Some(Value::Null)) {
            fields.pop();
        }
        Value::described(Self::CODE, Value::List(fields))
    }

    /// Decode from a described value carrying this type's descriptor.
    fn from_value(value: Value) -> Result<Self, CodecError> {
        let described = expect_described(value, Self::NAME)?;
        if !described.descriptor.matches(Self::CODE, Self::NAME) {
            return Err(CodecError::UnexpectedDescriptor(format!(
                "{} where {} was expected",
                described.descriptor,
                Self::NAME
            )));
        }
        Self::from_body(described.value)
    }

    /// Decode from the list body that followed the descriptor.
    fn from_body(body: Value) -> Result<Self, CodecError> {
        let items = match body {
            Value::List(items) => items,
            other => {
                return Err(CodecError::TypeMismatch {
                    expected: "list",
                    found: other.type_name().to_string(),
                })
            }
        };
        if items.len() > Self::FIELD_COUNT {
            return Err(CodecError::TooManyFields {
                name: Self::NAME,
                max: Self::FIELD_COUNT,
                actual: items.len(),
            });
        }
        Self::from_fields(&mut FieldReader::new(Self::NAME, items))
    }
}

/// Unwrap a `Value::Described`, reporting `expected` on mismatch.
pub fn expect_described(value: Value, expected: &'static str) -> Result<Described, CodecError> {
    match value {
        Value::Described(described) => Ok(*described),
        other => Err(CodecError::TypeMismatch {
            expected,
            found: other.type_name().to_string(),
        }),
    }
}

/// The descriptor of a described value, if any.
pub fn descriptor_of(value: &Value) -> Option<&Descriptor> {
    match value {
        Value::Described(described) => Some(&described.descriptor),
        _ => None,
    }
}

/// Positional reader over the fields of a described list.
///
/// Exhausted positions and explicit nulls both read as `None`.
pub struct FieldReader {
    name: &'static str,
    fields: std::vec::IntoIter<Value>,
}

impl FieldReader {
    pub fn new(name: &'static str, fields: Vec<Value>) -> Self {
        Self {
            name,
            fields: fields.into_iter(),
        }
    }

    /// Next raw field, `None` when absent or null.
    pub fn value(&mut self) -> Option<Value> {
        match self.fields.next() {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    fn mismatch(&self, expected: &'static str, found: &Value) -> CodecError {
        CodecError::TypeMismatch {
            expected,
            found: format!("{} in {}", found.type_name(), self.name),
        }
    }

    pub fn boolean(&mut self) -> Result<Option<bool>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(other) => Err(self.mismatch("boolean", &other)),
        }
    }

    pub fn ubyte(&mut self) -> Result<Option<u8>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Ubyte(v)) => Ok(Some(v)),
            Some(other) => Err(self.mismatch("ubyte", &other)),
        }
    }

    pub fn ushort(&mut self) -> Result<Option<u16>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Ubyte(v)) => Ok(Some(u16::from(v))),
            Some(Value::Ushort(v)) => Ok(Some(v)),
            Some(other) => Err(self.mismatch("ushort", &other)),
        }
    }

    pub fn uint(&mut self) -> Result<Option<u32>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Ubyte(v)) => Ok(Some(u32::from(v))),
            Some(Value::Ushort(v)) => Ok(Some(u32::from(v))),
            Some(Value::Uint(v)) => Ok(Some(v)),
            Some(other) => Err(self.mismatch("uint", &other)),
        }
    }

    pub fn ulong(&mut self) -> Result<Option<u64>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Ubyte(v)) => Ok(Some(u64::from(v))),
            Some(Value::Ushort(v)) => Ok(Some(u64::from(v))),
            Some(Value::Uint(v)) => Ok(Some(u64::from(v))),
            Some(Value::Ulong(v)) => Ok(Some(v)),
            Some(other) => Err(self.mismatch("ulong", &other)),
        }
    }

    pub fn timestamp(&mut self) -> Result<Option<i64>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Timestamp(t)) => Ok(Some(t)),
            Some(other) => Err(self.mismatch("timestamp", &other)),
        }
    }

    pub fn string(&mut self) -> Result<Option<String>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(self.mismatch("string", &other)),
        }
    }

    pub fn symbol(&mut self) -> Result<Option<Symbol>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Symbol(s)) => Ok(Some(s)),
            Some(other) => Err(self.mismatch("symbol", &other)),
        }
    }

    pub fn binary(&mut self) -> Result<Option<Bytes>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Binary(b)) => Ok(Some(b)),
            Some(other) => Err(self.mismatch("binary", &other)),
        }
    }

    /// A multiple-valued symbol field: an array, or a lone symbol.
    pub fn symbols(&mut self) -> Result<Option<Vec<Symbol>>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Symbol(s)) => Ok(Some(vec![s])),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Symbol(s) => out.push(s),
                        other => return Err(self.mismatch("symbol", &other)),
                    }
                }
                Ok(Some(out))
            }
            Some(other) => Err(self.mismatch("symbol array", &other)),
        }
    }

    /// A symbol-keyed map.
    pub fn fields(&mut self) -> Result<Option<Fields>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Map(pairs)) => {
                let mut out = Fields::new();
                for (k, v) in pairs {
                    match k {
                        Value::Symbol(key) => {
                            out.insert(key, v);
                        }
                        other => return Err(self.mismatch("symbol key", &other)),
                    }
                }
                Ok(Some(out))
            }
            Some(other) => Err(self.mismatch("map", &other)),
        }
    }

    /// A map with arbitrary keys.
    pub fn map(&mut self) -> Result<Option<Vec<(Value, Value)>>, CodecError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Map(pairs)) => Ok(Some(pairs)),
            Some(other) => Err(self.mismatch("map", &other)),
        }
    }

    /// A nested described list of type `T`.
    pub fn described<T: DescribedType>(&mut self) -> Result<Option<T>, CodecError> {
        self.value().map(T::from_value).transpose()
    }
}

/// Helpers for writing fields in `to_fields` implementations.
pub(crate) mod field {
    use super::*;

    /// Optional value; `None` becomes null.
    pub fn opt<T: Into<Value>>(v: Option<T>) -> Value {
        v.map(Into::into).unwrap_or(Value::Null)
    }

    /// Boolean with a default; the default encodes as null so it can be trimmed.
    pub fn flag(v: bool, default: bool) -> Value {
        if v == default {
            Value::Null
        } else {
            Value::Bool(v)
        }
    }

    pub fn symbols(v: &Option<Vec<Symbol>>) -> Value {
        match v {
            Some(symbols) => Value::symbol_array(symbols),
            None => Value::Null,
        }
    }

    pub fn fields(v: &Option<Fields>) -> Value {
        match v {
            Some(fields) => Value::from_fields(fields),
            None => Value::Null,
        }
    }

    pub fn described<T: DescribedType>(v: &Option<T>) -> Value {
        match v {
            Some(t) => t.to_value(),
            None => Value::Null,
        }
    }
}
