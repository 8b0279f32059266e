//! Value encoder.
//!
//! Every value is written with the narrowest constructor able to hold it:
//! `uint 0` is the single byte `0x43`, `uint 1..=255` is `0x52 nn`, larger
//! values use the 4-byte `0x70` form. Lists, maps and arrays pick their
//! 8-bit size/count form whenever the encoded body allows.
//!
//! # Example
//!
//! ```
//! use amqp_engine::codec::{encode_value, Value};
//!
//! assert_eq!(&encode_value(&Value::Uint(0)).unwrap()[..], &[0x43]);
//! assert_eq!(&encode_value(&Value::Uint(255)).unwrap()[..], &[0x52, 0xff]);
//! assert_eq!(encode_value(&Value::Uint(256)).unwrap().len(), 5);
//! ```

use std::mem::discriminant;

use bytes::{BufMut, Bytes, BytesMut};

use super::type_code::*;
use super::value::{Descriptor, Symbol, Value};
use crate::error::CodecError;

/// Writes AMQP encoded values into a `BytesMut`.
pub struct Encoder<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> Encoder<'a> {
    /// Create an encoder appending to `buf`.
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    /// Encode one value including its constructor.
    pub fn write(&mut self, value: &Value) -> Result<(), CodecError> {
        match value {
            Value::Described(described) => {
                self.write_descriptor(&described.descriptor)?;
                self.write(&described.value)
            }
            Value::List(items) => self.write_list(items),
            Value::Map(pairs) => self.write_map(pairs),
            Value::Array(items) => self.write_array(items),
            other => {
                let code = constructor(other)?;
                self.buf.put_u8(code);
                self.write_body(code, other)
            }
        }
    }

    fn write_descriptor(&mut self, descriptor: &Descriptor) -> Result<(), CodecError> {
        self.buf.put_u8(DESCRIBED);
        match descriptor {
            Descriptor::Code(code) => self.write(&Value::Ulong(*code)),
            Descriptor::Symbol(name) => self.write_symbol(name),
        }
    }

    fn write_symbol(&mut self, symbol: &Symbol) -> Result<(), CodecError> {
        let value = Value::Symbol(symbol.clone());
        let code = constructor(&value)?;
        self.buf.put_u8(code);
        self.write_body(code, &value)
    }

    /// Write the body of `value` laid out as `code` (no constructor byte).
    ///
    /// Fails when the value cannot be represented by that constructor, which
    /// is how mixed arrays are detected.
    fn write_body(&mut self, code: u8, value: &Value) -> Result<(), CodecError> {
        match (code, value) {
            (NULL, Value::Null)
            | (TRUE, Value::Bool(true))
            | (FALSE, Value::Bool(false))
            | (UINT0, Value::Uint(0))
            | (ULONG0, Value::Ulong(0)) => {}
            (BOOLEAN, Value::Bool(b)) => self.buf.put_u8(u8::from(*b)),
            (UBYTE, Value::Ubyte(v)) => self.buf.put_u8(*v),
            (USHORT, Value::Ushort(v)) => self.buf.put_u16(*v),
            (SMALLUINT, Value::Uint(v)) => self.buf.put_u8(narrow(code, *v)?),
            (UINT, Value::Uint(v)) => self.buf.put_u32(*v),
            (SMALLULONG, Value::Ulong(v)) => self.buf.put_u8(narrow(code, *v)?),
            (ULONG, Value::Ulong(v)) => self.buf.put_u64(*v),
            (BYTE, Value::Byte(v)) => self.buf.put_i8(*v),
            (SHORT, Value::Short(v)) => self.buf.put_i16(*v),
            (SMALLINT, Value::Int(v)) => self.buf.put_i8(narrow(code, *v)?),
            (INT, Value::Int(v)) => self.buf.put_i32(*v),
            (SMALLLONG, Value::Long(v)) => self.buf.put_i8(narrow(code, *v)?),
            (LONG, Value::Long(v)) => self.buf.put_i64(*v),
            (FLOAT, Value::Float(v)) => self.buf.put_f32(*v),
            (DOUBLE, Value::Double(v)) => self.buf.put_f64(*v),
            (DECIMAL32, Value::Decimal32(v)) => self.buf.put_slice(v),
            (DECIMAL64, Value::Decimal64(v)) => self.buf.put_slice(v),
            (DECIMAL128, Value::Decimal128(v)) => self.buf.put_slice(v),
            (CHAR, Value::Char(c)) => self.buf.put_u32(u32::from(*c)),
            (TIMESTAMP, Value::Timestamp(v)) => self.buf.put_i64(*v),
            (UUID, Value::Uuid(v)) => self.buf.put_slice(v),
            (VBIN8 | VBIN32, Value::Binary(b)) => self.put_variable(code, b)?,
            (STR8 | STR32, Value::String(s)) => self.put_variable(code, s.as_bytes())?,
            (SYM8 | SYM32, Value::Symbol(s)) => self.put_variable(code, s.as_str().as_bytes())?,
            (LIST0, Value::List(items)) if items.is_empty() => {}
            (LIST8 | LIST32, Value::List(items)) => {
                let body = encode_sequence(items.iter())?;
                self.put_compound(code, items.len(), &body)?;
            }
            (MAP8 | MAP32, Value::Map(pairs)) => {
                let body = encode_sequence(pairs.iter().flat_map(|(k, v)| [k, v]))?;
                self.put_compound(code, pairs.len() * 2, &body)?;
            }
            (ARRAY8 | ARRAY32, Value::Array(items)) => {
                let body = encode_array_elements(items)?;
                self.put_compound(code, items.len(), &body)?;
            }
            _ => return Err(CodecError::InconsistentArray(code)),
        }
        Ok(())
    }

    fn write_list(&mut self, items: &[Value]) -> Result<(), CodecError> {
        if items.is_empty() {
            self.buf.put_u8(LIST0);
            return Ok(());
        }
        let body = encode_sequence(items.iter())?;
        let code = pick_compound(LIST8, LIST32, items.len(), body.len());
        self.buf.put_u8(code);
        self.put_compound(code, items.len(), &body)
    }

    fn write_map(&mut self, pairs: &[(Value, Value)]) -> Result<(), CodecError> {
        let body = encode_sequence(pairs.iter().flat_map(|(k, v)| [k, v]))?;
        let count = pairs.len() * 2;
        let code = pick_compound(MAP8, MAP32, count, body.len());
        self.buf.put_u8(code);
        self.put_compound(code, count, &body)
    }

    fn write_array(&mut self, items: &[Value]) -> Result<(), CodecError> {
        let body = encode_array_elements(items)?;
        let code = pick_compound(ARRAY8, ARRAY32, items.len(), body.len());
        self.buf.put_u8(code);
        self.put_compound(code, items.len(), &body)
    }

    fn put_variable(&mut self, code: u8, data: &[u8]) -> Result<(), CodecError> {
        if matches!(code, VBIN8 | STR8 | SYM8) {
            self.buf.put_u8(narrow(code, data.len())?);
        } else {
            let len = u32::try_from(data.len()).map_err(|_| CodecError::Overflow(name(code)))?;
            self.buf.put_u32(len);
        }
        self.buf.put_slice(data);
        Ok(())
    }

    /// Size and count prefixes followed by the already encoded body.
    fn put_compound(&mut self, code: u8, count: usize, body: &[u8]) -> Result<(), CodecError> {
        if matches!(code, LIST8 | MAP8 | ARRAY8) {
            self.buf.put_u8(narrow(code, body.len() + 1)?);
            self.buf.put_u8(narrow(code, count)?);
        } else {
            let size = u32::try_from(body.len() + 4).map_err(|_| CodecError::Overflow(name(code)))?;
            let count = u32::try_from(count).map_err(|_| CodecError::Overflow(name(code)))?;
            self.buf.put_u32(size);
            self.buf.put_u32(count);
        }
        self.buf.put_slice(body);
        Ok(())
    }
}

/// Encode a single value into a fresh buffer.
pub fn encode_value(value: &Value) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    Encoder::new(&mut buf).write(value)?;
    Ok(buf.freeze())
}

/// Narrowest constructor for a non-compound value.
fn constructor(value: &Value) -> Result<u8, CodecError> {
    let code = match value {
        Value::Null => NULL,
        Value::Bool(true) => TRUE,
        Value::Bool(false) => FALSE,
        Value::Ubyte(_) => UBYTE,
        Value::Ushort(_) => USHORT,
        Value::Uint(0) => UINT0,
        Value::Uint(v) if *v <= 0xff => SMALLUINT,
        Value::Uint(_) => UINT,
        Value::Ulong(0) => ULONG0,
        Value::Ulong(v) if *v <= 0xff => SMALLULONG,
        Value::Ulong(_) => ULONG,
        Value::Byte(_) => BYTE,
        Value::Short(_) => SHORT,
        Value::Int(v) if i8::try_from(*v).is_ok() => SMALLINT,
        Value::Int(_) => INT,
        Value::Long(v) if i8::try_from(*v).is_ok() => SMALLLONG,
        Value::Long(_) => LONG,
        Value::Float(_) => FLOAT,
        Value::Double(_) => DOUBLE,
        Value::Decimal32(_) => DECIMAL32,
        Value::Decimal64(_) => DECIMAL64,
        Value::Decimal128(_) => DECIMAL128,
        Value::Char(_) => CHAR,
        Value::Timestamp(_) => TIMESTAMP,
        Value::Uuid(_) => UUID,
        Value::Binary(b) => short_or_long(b.len(), VBIN8, VBIN32),
        Value::String(s) => short_or_long(s.len(), STR8, STR32),
        Value::Symbol(s) => short_or_long(s.as_str().len(), SYM8, SYM32),
        other => {
            return Err(CodecError::TypeMismatch {
                expected: "primitive",
                found: other.type_name().to_string(),
            })
        }
    };
    Ok(code)
}

/// Shared constructor for all elements of an array.
fn array_constructor(items: &[&Value]) -> Result<u8, CodecError> {
    let Some(&first) = items.first() else {
        return Ok(NULL);
    };
    let all = |pred: fn(&Value) -> bool| items.iter().all(|v| pred(v));
    let code = match first {
        Value::Null => NULL,
        Value::Bool(_) => BOOLEAN,
        Value::Ubyte(_) => UBYTE,
        Value::Ushort(_) => USHORT,
        Value::Uint(_) if all(|v| matches!(v, Value::Uint(n) if *n <= 0xff)) => SMALLUINT,
        Value::Uint(_) => UINT,
        Value::Ulong(_) if all(|v| matches!(v, Value::Ulong(n) if *n <= 0xff)) => SMALLULONG,
        Value::Ulong(_) => ULONG,
        Value::Byte(_) => BYTE,
        Value::Short(_) => SHORT,
        Value::Int(_) if all(|v| matches!(v, Value::Int(n) if i8::try_from(*n).is_ok())) => SMALLINT,
        Value::Int(_) => INT,
        Value::Long(_) if all(|v| matches!(v, Value::Long(n) if i8::try_from(*n).is_ok())) => {
            SMALLLONG
        }
        Value::Long(_) => LONG,
        Value::Float(_) => FLOAT,
        Value::Double(_) => DOUBLE,
        Value::Decimal32(_) => DECIMAL32,
        Value::Decimal64(_) => DECIMAL64,
        Value::Decimal128(_) => DECIMAL128,
        Value::Char(_) => CHAR,
        Value::Timestamp(_) => TIMESTAMP,
        Value::Uuid(_) => UUID,
        Value::Binary(_) if all(|v| matches!(v, Value::Binary(b) if b.len() <= 0xff)) => VBIN8,
        Value::Binary(_) => VBIN32,
        Value::String(_) if all(|v| matches!(v, Value::String(s) if s.len() <= 0xff)) => STR8,
        Value::String(_) => STR32,
        Value::Symbol(_) if all(|v| matches!(v, Value::Symbol(s) if s.as_str().len() <= 0xff)) => {
            SYM8
        }
        Value::Symbol(_) => SYM32,
        Value::List(_) => LIST32,
        Value::Map(_) => MAP32,
        Value::Array(_) => ARRAY32,
        Value::Described(_) => {
            return Err(CodecError::TypeMismatch {
                expected: "singly described array element",
                found: "described".to_string(),
            })
        }
    };
    if items.iter().any(|v| discriminant(*v) != discriminant(first)) {
        return Err(CodecError::InconsistentArray(code));
    }
    Ok(code)
}

/// Shared constructor followed by every element body.
///
/// Described elements must all carry the same descriptor, which is written
/// once ahead of the shared constructor.
fn encode_array_elements(items: &[Value]) -> Result<BytesMut, CodecError> {
    let mut body = BytesMut::new();
    let mut encoder = Encoder::new(&mut body);
    let values: Vec<&Value> = match items.first() {
        Some(Value::Described(first)) => {
            let values = items
                .iter()
                .map(|item| match item {
                    Value::Described(d) if d.descriptor == first.descriptor => Ok(&d.value),
                    _ => Err(CodecError::InconsistentArray(DESCRIBED)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            encoder.write_descriptor(&first.descriptor)?;
            values
        }
        _ => items.iter().collect(),
    };
    let code = array_constructor(&values)?;
    encoder.buf.put_u8(code);
    for value in values {
        encoder.write_body(code, value)?;
    }
    Ok(body)
}

fn encode_sequence<'v>(values: impl Iterator<Item = &'v Value>) -> Result<BytesMut, CodecError> {
    let mut body = BytesMut::new();
    let mut encoder = Encoder::new(&mut body);
    for value in values {
        encoder.write(value)?;
    }
    Ok(body)
}

fn pick_compound(short: u8, long: u8, count: usize, body_len: usize) -> u8 {
    if count <= 0xff && body_len < 0xff {
        short
    } else {
        long
    }
}

fn short_or_long(len: usize, short: u8, long: u8) -> u8 {
    if len <= 0xff {
        short
    } else {
        long
    }
}

fn narrow<T, U>(code: u8, value: U) -> Result<T, CodecError>
where
    T: TryFrom<U>,
{
    T::try_from(value).map_err(|_| CodecError::InconsistentArray(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decoder;

    fn encode(value: Value) -> Vec<u8> {
        encode_value(&value).unwrap().to_vec()
    }

    #[test]
    fn test_uint_narrowing_lengths() {
        assert_eq!(encode(Value::Uint(0)).len(), 1);
        assert_eq!(encode(Value::Uint(1)).len(), 2);
        assert_eq!(encode(Value::Uint(255)).len(), 2);
        assert_eq!(encode(Value::Uint(256)).len(), 5);
    }

    #[test]
    fn test_uint_constructors() {
        assert_eq!(encode(Value::Uint(0)), vec![UINT0]);
        assert_eq!(encode(Value::Uint(7)), vec![SMALLUINT, 7]);
        assert_eq!(encode(Value::Uint(u32::MAX)), vec![UINT, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_ulong_and_int_narrowing() {
        assert_eq!(encode(Value::Ulong(0)), vec![ULONG0]);
        assert_eq!(encode(Value::Ulong(0x10)), vec![SMALLULONG, 0x10]);
        assert_eq!(encode(Value::Int(-1)), vec![SMALLINT, 0xff]);
        assert_eq!(encode(Value::Int(128)), vec![INT, 0, 0, 0, 128]);
        assert_eq!(encode(Value::Long(-128)), vec![SMALLLONG, 0x80]);
    }

    #[test]
    fn test_boolean_constants() {
        assert_eq!(encode(Value::Bool(true)), vec![TRUE]);
        assert_eq!(encode(Value::Bool(false)), vec![FALSE]);
    }

    #[test]
    fn test_string_width_switch() {
        let short = encode(Value::String("a".repeat(255)));
        assert_eq!(short[0], STR8);
        assert_eq!(short.len(), 257);

        let long = encode(Value::String("a".repeat(256)));
        assert_eq!(long[0], STR32);
        assert_eq!(long.len(), 261);
    }

    #[test]
    fn test_list_layout() {
        assert_eq!(encode(Value::List(vec![])), vec![LIST0]);
        // size counts the count byte plus elements
        assert_eq!(
            encode(Value::List(vec![Value::Uint(0), Value::Null])),
            vec![LIST8, 3, 2, UINT0, NULL]
        );
    }

    #[test]
    fn test_described_performative_prefix() {
        let bytes = encode(Value::described(0x10, Value::List(vec![])));
        assert_eq!(bytes, vec![DESCRIBED, SMALLULONG, 0x10, LIST0]);
    }

    #[test]
    fn test_symbol_array_shares_constructor() {
        let bytes = encode(Value::symbol_array(&["a".into(), "bc".into()]));
        assert_eq!(bytes, vec![ARRAY8, 7, 2, SYM8, 1, b'a', 2, b'b', b'c']);
    }

    #[test]
    fn test_array_widens_for_large_uint() {
        let bytes = encode(Value::Array(vec![Value::Uint(1), Value::Uint(300)]));
        assert_eq!(bytes[3], UINT);
    }

    #[test]
    fn test_described_array_writes_descriptor_once() {
        let items = vec![
            Value::described(0x23, Value::Uint(1)),
            Value::described(0x23, Value::Uint(2)),
        ];
        let bytes = encode(Value::Array(items.clone()));
        assert_eq!(
            bytes,
            vec![ARRAY8, 7, 2, DESCRIBED, SMALLULONG, 0x23, SMALLUINT, 1, 2]
        );
        let decoded = Decoder::new(Bytes::from(bytes)).read_value().unwrap();
        assert_eq!(decoded, Value::Array(items));
    }

    #[test]
    fn test_described_array_needs_one_descriptor() {
        let err = encode_value(&Value::Array(vec![
            Value::described(0x23, Value::Uint(1)),
            Value::described(0x24, Value::Uint(2)),
        ]));
        assert!(matches!(err, Err(CodecError::InconsistentArray(DESCRIBED))));
        let err = encode_value(&Value::Array(vec![
            Value::described(0x23, Value::Uint(1)),
            Value::Uint(2),
        ]));
        assert!(matches!(err, Err(CodecError::InconsistentArray(_))));
    }

    #[test]
    fn test_mixed_array_rejected() {
        let err = encode_value(&Value::Array(vec![Value::Uint(1), Value::String("x".into())]));
        assert!(matches!(err, Err(CodecError::InconsistentArray(_))));
    }
}
