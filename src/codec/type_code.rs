//! AMQP 1.0 type constructor codes.
//!
//! One byte per primitive encoding. Several types have more than one width;
//! the encoder always picks the narrowest that can hold the value.

/// Marker introducing a described type (descriptor follows, then the value).
pub const DESCRIBED: u8 = 0x00;

pub const NULL: u8 = 0x40;
pub const BOOLEAN: u8 = 0x56;
pub const TRUE: u8 = 0x41;
pub const FALSE: u8 = 0x42;
pub const UBYTE: u8 = 0x50;
pub const USHORT: u8 = 0x60;
pub const UINT: u8 = 0x70;
pub const SMALLUINT: u8 = 0x52;
pub const UINT0: u8 = 0x43;
pub const ULONG: u8 = 0x80;
pub const SMALLULONG: u8 = 0x53;
pub const ULONG0: u8 = 0x44;
pub const BYTE: u8 = 0x51;
pub const SHORT: u8 = 0x61;
pub const INT: u8 = 0x71;
pub const SMALLINT: u8 = 0x54;
pub const LONG: u8 = 0x81;
pub const SMALLLONG: u8 = 0x55;
pub const FLOAT: u8 = 0x72;
pub const DOUBLE: u8 = 0x82;
pub const DECIMAL32: u8 = 0x74;
pub const DECIMAL64: u8 = 0x84;
pub const DECIMAL128: u8 = 0x94;
pub const CHAR: u8 = 0x73;
pub const TIMESTAMP: u8 = 0x83;
pub const UUID: u8 = 0x98;
pub const VBIN8: u8 = 0xa0;
pub const VBIN32: u8 = 0xb0;
pub const STR8: u8 = 0xa1;
pub const STR32: u8 = 0xb1;
pub const SYM8: u8 = 0xa3;
pub const SYM32: u8 = 0xb3;
pub const LIST0: u8 = 0x45;
pub const LIST8: u8 = 0xc0;
pub const LIST32: u8 = 0xd0;
pub const MAP8: u8 = 0xc1;
pub const MAP32: u8 = 0xd1;
pub const ARRAY8: u8 = 0xe0;
pub const ARRAY32: u8 = 0xf0;

/// How the body following a constructor is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// Fixed number of bytes (0 for constants like `true` or `uint0`).
    Fixed(usize),
    /// A 1-byte size prefix followed by that many bytes.
    Variable8,
    /// A 4-byte big-endian size prefix followed by that many bytes.
    Variable32,
}

/// Body layout for a constructor, or `None` for an unknown code.
pub fn width(code: u8) -> Option<Width> {
    let width = match code {
        NULL | TRUE | FALSE | UINT0 | ULONG0 | LIST0 => Width::Fixed(0),
        BOOLEAN | UBYTE | BYTE | SMALLUINT | SMALLULONG | SMALLINT | SMALLLONG => Width::Fixed(1),
        USHORT | SHORT => Width::Fixed(2),
        UINT | INT | FLOAT | CHAR | DECIMAL32 => Width::Fixed(4),
        ULONG | LONG | DOUBLE | TIMESTAMP | DECIMAL64 => Width::Fixed(8),
        UUID | DECIMAL128 => Width::Fixed(16),
        VBIN8 | STR8 | SYM8 | LIST8 | MAP8 | ARRAY8 => Width::Variable8,
        VBIN32 | STR32 | SYM32 | LIST32 | MAP32 | ARRAY32 => Width::Variable32,
        _ => return None,
    };
    Some(width)
}

/// Human readable name for diagnostics.
pub fn name(code: u8) -> &'static str {
    match code {
        DESCRIBED => "described",
        NULL => "null",
        BOOLEAN | TRUE | FALSE => "boolean",
        UBYTE => "ubyte",
        USHORT => "ushort",
        UINT | SMALLUINT | UINT0 => "uint",
        ULONG | SMALLULONG | ULONG0 => "ulong",
        BYTE => "byte",
        SHORT => "short",
        INT | SMALLINT => "int",
        LONG | SMALLLONG => "long",
        FLOAT => "float",
        DOUBLE => "double",
        DECIMAL32 => "decimal32",
        DECIMAL64 => "decimal64",
        DECIMAL128 => "decimal128",
        CHAR => "char",
        TIMESTAMP => "timestamp",
        UUID => "uuid",
        VBIN8 | VBIN32 => "binary",
        STR8 | STR32 => "string",
        SYM8 | SYM32 => "symbol",
        LIST0 | LIST8 | LIST32 => "list",
        MAP8 | MAP32 => "map",
        ARRAY8 | ARRAY32 => "array",
        _ => "unknown",
    }
}
