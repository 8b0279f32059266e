//! Value decoder.
//!
//! Decoding is driven by the constructor byte read from the stream. Every
//! read and skip advances the position by exactly the bytes the value
//! occupies, so callers can find the payload that follows a performative.
//!
//! The decoder works on `Bytes`: binary values are zero-copy slices of the
//! input and never borrow caller-owned storage.

use bytes::Bytes;

use super::type_code::{self, *};
use super::value::{Described, Descriptor, Symbol, Value};
use crate::error::CodecError;

/// Deepest nesting of described and compound values accepted.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Cursor over an encoded buffer.
pub struct Decoder {
    buf: Bytes,
    pos: usize,
    depth: usize,
}

impl Decoder {
    /// Create a decoder positioned at the start of `buf`.
    pub fn new(buf: Bytes) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
        }
    }

    /// Current read position.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Everything after the current position, without advancing.
    pub fn rest(&self) -> Bytes {
        self.buf.slice(self.pos..)
    }

    /// Look at the next constructor byte without consuming it.
    pub fn peek_constructor(&self) -> Result<u8, CodecError> {
        self.buf.get(self.pos).copied().ok_or(CodecError::Underflow {
            needed: 1,
            available: 0,
        })
    }

    /// Decode the next value.
    pub fn read_value(&mut self) -> Result<Value, CodecError> {
        self.nested(|d| {
            let code = d.read_u8()?;
            if code == DESCRIBED {
                let descriptor = d.read_descriptor()?;
                let value = d.read_value()?;
                return Ok(Value::Described(Box::new(Described::new(descriptor, value))));
            }
            d.read_body(code)
        })
    }

    /// Advance past the next value without building it.
    pub fn skip_value(&mut self) -> Result<(), CodecError> {
        self.nested(|d| {
            let code = d.read_u8()?;
            if code == DESCRIBED {
                d.skip_value()?;
                return d.skip_value();
            }
            d.skip_body(code)
        })
    }

    /// Run `f` one nesting level deeper, failing past [`MAX_NESTING_DEPTH`].
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CodecError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn read_descriptor(&mut self) -> Result<Descriptor, CodecError> {
        match self.read_value()? {
            Value::Ulong(code) => Ok(Descriptor::Code(code)),
            Value::Symbol(name) => Ok(Descriptor::Symbol(name)),
            other => Err(CodecError::UnexpectedDescriptor(format!(
                "descriptor of type {}",
                other.type_name()
            ))),
        }
    }

    fn skip_body(&mut self, code: u8) -> Result<(), CodecError> {
        let len = match type_code::width(code) {
            Some(Width::Fixed(n)) => n,
            Some(Width::Variable8) => usize::from(self.read_u8()?),
            Some(Width::Variable32) => self.read_u32()? as usize,
            None => return Err(CodecError::UnknownTypeCode(code)),
        };
        self.take(len).map(|_| ())
    }

    fn read_body(&mut self, code: u8) -> Result<Value, CodecError> {
        let value = match code {
            NULL => Value::Null,
            TRUE => Value::Bool(true),
            FALSE => Value::Bool(false),
            BOOLEAN => match self.read_u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(CodecError::InvalidValue {
                        field: "boolean",
                        value: other.to_string(),
                    })
                }
            },
            UBYTE => Value::Ubyte(self.read_u8()?),
            USHORT => Value::Ushort(u16::from_be_bytes(self.read_array()?)),
            UINT0 => Value::Uint(0),
            SMALLUINT => Value::Uint(u32::from(self.read_u8()?)),
            UINT => Value::Uint(self.read_u32()?),
            ULONG0 => Value::Ulong(0),
            SMALLULONG => Value::Ulong(u64::from(self.read_u8()?)),
            ULONG => Value::Ulong(u64::from_be_bytes(self.read_array()?)),
            BYTE => Value::Byte(self.read_u8()? as i8),
            SHORT => Value::Short(i16::from_be_bytes(self.read_array()?)),
            SMALLINT => Value::Int(i32::from(self.read_u8()? as i8)),
            INT => Value::Int(i32::from_be_bytes(self.read_array()?)),
            SMALLLONG => Value::Long(i64::from(self.read_u8()? as i8)),
            LONG => Value::Long(i64::from_be_bytes(self.read_array()?)),
            FLOAT => Value::Float(f32::from_be_bytes(self.read_array()?)),
            DOUBLE => Value::Double(f64::from_be_bytes(self.read_array()?)),
            DECIMAL32 => Value::Decimal32(self.read_array()?),
            DECIMAL64 => Value::Decimal64(self.read_array()?),
            DECIMAL128 => Value::Decimal128(self.read_array()?),
            CHAR => {
                let raw = self.read_u32()?;
                Value::Char(char::from_u32(raw).ok_or(CodecError::InvalidChar(raw))?)
            }
            TIMESTAMP => Value::Timestamp(i64::from_be_bytes(self.read_array()?)),
            UUID => Value::Uuid(self.read_array()?),
            VBIN8 | VBIN32 => Value::Binary(self.read_variable(code)?),
            STR8 | STR32 => {
                let raw = self.read_variable(code)?;
                let text = std::str::from_utf8(&raw).map_err(|_| CodecError::InvalidUtf8("string"))?;
                Value::String(text.to_string())
            }
            SYM8 | SYM32 => {
                let raw = self.read_variable(code)?;
                let text = std::str::from_utf8(&raw).map_err(|_| CodecError::InvalidUtf8("symbol"))?;
                Value::Symbol(Symbol::from(text))
            }
            LIST0 => Value::List(Vec::new()),
            LIST8 | LIST32 => Value::List(self.read_sequence(code)?),
            MAP8 | MAP32 => {
                let items = self.read_sequence(code)?;
                if items.len() % 2 != 0 {
                    return Err(CodecError::InvalidValue {
                        field: "map count",
                        value: items.len().to_string(),
                    });
                }
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    pairs.push((k, v));
                }
                Value::Map(pairs)
            }
            ARRAY8 | ARRAY32 => Value::Array(self.nested(|d| d.read_array_body(code))?),
            other => return Err(CodecError::UnknownTypeCode(other)),
        };
        Ok(value)
    }

    fn read_size(&mut self, code: u8) -> Result<usize, CodecError> {
        let size = if matches!(code, LIST8 | MAP8 | ARRAY8) {
            usize::from(self.read_u8()?)
        } else {
            self.read_u32()? as usize
        };
        self.ensure(size)?;
        Ok(size)
    }

    fn read_count(&mut self, code: u8) -> Result<usize, CodecError> {
        if matches!(code, LIST8 | MAP8 | ARRAY8) {
            Ok(usize::from(self.read_u8()?))
        } else {
            Ok(self.read_u32()? as usize)
        }
    }

    fn check_consumed(&self, declared: usize, start: usize) -> Result<(), CodecError> {
        let consumed = self.pos - start;
        if consumed != declared {
            return Err(CodecError::SizeMismatch { declared, consumed });
        }
        Ok(())
    }

    /// Elements of a list or map, checked against the declared size.
    fn read_sequence(&mut self, code: u8) -> Result<Vec<Value>, CodecError> {
        let size = self.read_size(code)?;
        let start = self.pos;
        let count = self.read_count(code)?;
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(self.read_value()?);
        }
        self.check_consumed(size, start)?;
        Ok(items)
    }

    /// Array elements all share the single constructor that follows the
    /// count; any element that does not fit it breaks the size check.
    fn read_array_body(&mut self, code: u8) -> Result<Vec<Value>, CodecError> {
        let size = self.read_size(code)?;
        let start = self.pos;
        let count = self.read_count(code)?;
        let mut element = self.read_u8()?;
        let mut descriptor = None;
        if element == DESCRIBED {
            descriptor = Some(self.read_descriptor()?);
            element = self.read_u8()?;
        }
        // zero-width elements are bounded by the input, others by the size
        let bound = match type_code::width(element) {
            Some(Width::Fixed(0)) => self.buf.len(),
            Some(_) => size.saturating_sub(self.pos - start),
            None => return Err(CodecError::UnknownTypeCode(element)),
        };
        if count > bound {
            return Err(CodecError::InvalidValue {
                field: "array count",
                value: count.to_string(),
            });
        }
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            let value = self.read_body(element)?;
            items.push(match &descriptor {
                Some(d) => Value::Described(Box::new(Described::new(d.clone(), value))),
                None => value,
            });
        }
        self.check_consumed(size, start)?;
        Ok(items)
    }

    fn read_variable(&mut self, code: u8) -> Result<Bytes, CodecError> {
        let len = if matches!(code, VBIN8 | STR8 | SYM8) {
            usize::from(self.read_u8()?)
        } else {
            self.read_u32()? as usize
        };
        self.take(len)
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        if self.remaining() < needed {
            return Err(CodecError::Underflow {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<Bytes, CodecError> {
        self.ensure(len)?;
        let out = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }
}

/// Decode a single value from `buf`, ignoring trailing bytes.
pub fn decode_value(buf: Bytes) -> Result<Value, CodecError> {
    Decoder::new(buf).read_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_value;

    fn decoder(bytes: &[u8]) -> Decoder {
        Decoder::new(Bytes::copy_from_slice(bytes))
    }

    #[test]
    fn test_boundary_uints() {
        for v in [0u32, 1, 255, 256, u32::MAX] {
            let encoded = encode_value(&Value::Uint(v)).unwrap();
            assert_eq!(decode_value(encoded).unwrap(), Value::Uint(v));
        }
    }

    #[test]
    fn test_nested_compound_values() {
        let value = Value::Map(vec![
            (Value::Symbol("k".into()), Value::List(vec![Value::Long(-5), Value::Null])),
            (Value::String("big".into()), Value::Binary(Bytes::from(vec![7u8; 300]))),
        ]);
        let encoded = encode_value(&value).unwrap();
        assert_eq!(decode_value(encoded).unwrap(), value);
    }

    #[test]
    fn test_skip_advances_exactly() {
        let mut buf = bytes::BytesMut::new();
        let mut enc = crate::codec::Encoder::new(&mut buf);
        enc.write(&Value::List(vec![Value::String("abc".into()), Value::Uint(9)]))
            .unwrap();
        enc.write(&Value::described(0x24, Value::List(vec![]))).unwrap();
        enc.write(&Value::Uint(42)).unwrap();

        let mut d = Decoder::new(buf.freeze());
        d.skip_value().unwrap();
        d.skip_value().unwrap();
        assert_eq!(d.read_value().unwrap(), Value::Uint(42));
        assert!(d.is_empty());
    }

    #[test]
    fn test_unknown_type_code() {
        let err = decoder(&[0x01]).read_value().unwrap_err();
        assert_eq!(err, CodecError::UnknownTypeCode(0x01));
    }

    #[test]
    fn test_underflow_reported() {
        let err = decoder(&[UINT, 0, 0]).read_value().unwrap_err();
        assert!(matches!(err, CodecError::Underflow { needed: 4, .. }));
    }

    #[test]
    fn test_list_size_mismatch() {
        // size claims 3 bytes but the single element only uses 1 plus count
        let err = decoder(&[LIST8, 3, 1, UINT0, NULL]).read_value().unwrap_err();
        assert!(matches!(err, CodecError::SizeMismatch { declared: 3, consumed: 2 }));
    }

    #[test]
    fn test_array_elements_inconsistent_with_size() {
        // smalluint constructor, two elements but size covers only one
        let err = decoder(&[ARRAY8, 3, 2, SMALLUINT, 1, 2]).read_value().unwrap_err();
        assert!(matches!(err, CodecError::SizeMismatch { .. }));
    }

    #[test]
    fn test_array_decode() {
        let value = decoder(&[ARRAY8, 4, 2, SMALLUINT, 1, 2]).read_value().unwrap();
        assert_eq!(value, Value::Array(vec![Value::Uint(1), Value::Uint(2)]));
    }

    #[test]
    fn test_symbolic_descriptor() {
        let mut bytes = vec![DESCRIBED, SYM8, 3, b'a', b':', b'b', LIST0];
        bytes.push(NULL);
        let mut d = decoder(&bytes);
        let value = d.read_value().unwrap();
        match value {
            Value::Described(described) => {
                assert_eq!(described.descriptor, Descriptor::Symbol("a:b".into()));
                assert_eq!(described.value, Value::List(vec![]));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(d.remaining(), 1);
    }

    #[test]
    fn test_array_count_beyond_size_rejected() {
        let err = decoder(&[ARRAY32, 0, 0, 0, 5, 0xff, 0xff, 0xff, 0xff, SMALLUINT])
            .read_value()
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue { field: "array count", .. }));
    }

    #[test]
    fn test_zero_width_array_count_bounded_by_input() {
        let err = decoder(&[ARRAY32, 0, 0, 0, 5, 0xff, 0xff, 0xff, 0xff, NULL])
            .read_value()
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue { field: "array count", .. }));

        // a short run of nulls is still fine
        let value = decoder(&[ARRAY8, 2, 3, NULL]).read_value().unwrap();
        assert_eq!(value, Value::Array(vec![Value::Null; 3]));
    }

    #[test]
    fn test_truncated_list_is_underflow() {
        let err = decoder(&[LIST32, 0, 0, 0, 20, 0, 0, 0, 2, UINT0])
            .read_value()
            .unwrap_err();
        assert!(matches!(err, CodecError::Underflow { needed: 20, .. }));
    }

    #[test]
    fn test_repeated_described_constructors_rejected() {
        let err = decode_value(Bytes::from(vec![DESCRIBED; 60_000])).unwrap_err();
        assert_eq!(err, CodecError::NestingTooDeep(MAX_NESTING_DEPTH));

        let err = Decoder::new(Bytes::from(vec![DESCRIBED; 60_000]))
            .skip_value()
            .unwrap_err();
        assert_eq!(err, CodecError::NestingTooDeep(MAX_NESTING_DEPTH));
    }

    #[test]
    fn test_deeply_nested_lists_rejected() {
        // each level: list8, size, count 1, then the next list
        let levels = 10_000;
        let mut bytes = Vec::with_capacity(levels * 3 + 1);
        for i in 0..levels {
            let size = ((levels - i - 1) * 3 + 2).min(255) as u8;
            bytes.extend_from_slice(&[LIST8, size, 1]);
        }
        bytes.push(LIST0);
        let err = decode_value(Bytes::from(bytes)).unwrap_err();
        assert_eq!(err, CodecError::NestingTooDeep(MAX_NESTING_DEPTH));
    }

    #[test]
    fn test_nested_arrays_rejected() {
        let mut bytes = Vec::new();
        for _ in 0..10_000 {
            bytes.extend_from_slice(&[ARRAY8, 255, 1]);
        }
        let err = decode_value(Bytes::from(bytes)).unwrap_err();
        assert_eq!(err, CodecError::NestingTooDeep(MAX_NESTING_DEPTH));
    }

    #[test]
    fn test_moderate_nesting_accepted() {
        let mut value = Value::Null;
        for _ in 0..20 {
            value = Value::List(vec![value]);
        }
        let encoded = encode_value(&value).unwrap();
        assert_eq!(decode_value(encoded).unwrap(), value);
    }

    #[test]
    fn test_invalid_utf8() {
        let err = decoder(&[STR8, 1, 0xff]).read_value().unwrap_err();
        assert_eq!(err, CodecError::InvalidUtf8("string"));
    }
}
