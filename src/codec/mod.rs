//! Codec module - the AMQP 1.0 type system.
//!
//! - [`Value`] - any primitive, compound or described value
//! - [`Encoder`] - writes values with the narrowest constructor
//! - [`Decoder`] - reads (or skips) values by constructor byte
//! - [`DescribedType`] - composite types carried as described lists
//!
//! # Example
//!
//! ```
//! use amqp_engine::codec::{decode_value, encode_value, Value};
//!
//! let value = Value::List(vec![Value::Uint(256), Value::String("hi".into())]);
//! let bytes = encode_value(&value).unwrap();
//! assert_eq!(decode_value(bytes).unwrap(), value);
//! ```

mod decoder;
mod described;
mod encoder;
pub mod type_code;
mod value;

pub use decoder::{decode_value, Decoder};
pub(crate) use described::field;
pub use described::{descriptor_of, expect_described, DescribedType, FieldReader};
pub use encoder::{encode_value, Encoder};
pub use value::{Described, Descriptor, Fields, Symbol, Value};
