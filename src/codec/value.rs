//! In-memory representation of AMQP values.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// An AMQP symbol: a short ASCII string used for names and conditions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The symbol text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Symbol-keyed map used for properties and annotations.
pub type Fields = BTreeMap<Symbol, Value>;

/// Descriptor of a described type: numeric code or symbolic name.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Code(u64),
    Symbol(Symbol),
}

impl Descriptor {
    /// True when this descriptor names the type with the given code or symbol.
    pub fn matches(&self, code: u64, name: &str) -> bool {
        match self {
            Self::Code(c) => *c == code,
            Self::Symbol(s) => s.as_str() == name,
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(c) => write!(f, "0x{:08x}:0x{:08x}", c >> 32, c & 0xffff_ffff),
            Self::Symbol(s) => write!(f, "{}", s),
        }
    }
}

/// A described value: descriptor plus the underlying encoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct Described {
    pub descriptor: Descriptor,
    pub value: Value,
}

impl Described {
    pub fn new(descriptor: Descriptor, value: Value) -> Self {
        Self { descriptor, value }
    }
}

/// Any AMQP value.
///
/// Maps keep their wire order. Arrays hold values of a single variant; the
/// encoder rejects mixed arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Ubyte(u8),
    Ushort(u16),
    Uint(u32),
    Ulong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal32([u8; 4]),
    Decimal64([u8; 8]),
    Decimal128([u8; 16]),
    Char(char),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Uuid([u8; 16]),
    Binary(Bytes),
    String(String),
    Symbol(Symbol),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Array(Vec<Value>),
    Described(Box<Described>),
}

impl Value {
    /// Type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Ubyte(_) => "ubyte",
            Self::Ushort(_) => "ushort",
            Self::Uint(_) => "uint",
            Self::Ulong(_) => "ulong",
            Self::Byte(_) => "byte",
            Self::Short(_) => "short",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Decimal32(_) => "decimal32",
            Self::Decimal64(_) => "decimal64",
            Self::Decimal128(_) => "decimal128",
            Self::Char(_) => "char",
            Self::Timestamp(_) => "timestamp",
            Self::Uuid(_) => "uuid",
            Self::Binary(_) => "binary",
            Self::String(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Array(_) => "array",
            Self::Described(_) => "described",
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Build a described value with a numeric descriptor.
    pub fn described(code: u64, value: Value) -> Self {
        Self::Described(Box::new(Described::new(Descriptor::Code(code), value)))
    }

    /// Build a map value from symbol-keyed fields.
    pub fn from_fields(fields: &Fields) -> Self {
        Self::Map(
            fields
                .iter()
                .map(|(k, v)| (Value::Symbol(k.clone()), v.clone()))
                .collect(),
        )
    }

    /// Build an array of symbols.
    pub fn symbol_array(symbols: &[Symbol]) -> Self {
        Self::Array(symbols.iter().cloned().map(Value::Symbol).collect())
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    u8 => Ubyte,
    u16 => Ushort,
    u32 => Uint,
    u64 => Ulong,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    char => Char,
    Bytes => Binary,
    String => String,
    Symbol => Symbol,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_matches_code_or_symbol() {
        assert!(Descriptor::Code(0x10).matches(0x10, "amqp:open:list"));
        assert!(Descriptor::Symbol("amqp:open:list".into()).matches(0x10, "amqp:open:list"));
        assert!(!Descriptor::Code(0x11).matches(0x10, "amqp:open:list"));
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<u32> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(7u32)), Value::Uint(7));
    }

    #[test]
    fn test_descriptor_display() {
        assert_eq!(Descriptor::Code(0x10).to_string(), "0x00000000:0x00000010");
    }
}
