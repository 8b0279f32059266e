//! Transaction coordination types.

use bytes::Bytes;

use super::messaging::DeliveryState;
use crate::codec::{field, DescribedType, FieldReader, Symbol, Value};
use crate::error::CodecError;

/// Transaction error conditions.
pub mod conditions {
    pub const UNKNOWN_ID: &str = "amqp:transaction:unknown-id";
    pub const ROLLBACK: &str = "amqp:transaction:rollback";
    pub const TIMEOUT: &str = "amqp:transaction:timeout";
}

/// Coordinator capabilities.
pub mod capabilities {
    pub const LOCAL_TRANSACTIONS: &str = "amqp:local-transactions";
    pub const DISTRIBUTED_TRANSACTIONS: &str = "amqp:distributed-transactions";
    pub const PROMOTABLE_TRANSACTIONS: &str = "amqp:promotable-transactions";
    pub const MULTI_TXNS_PER_SSN: &str = "amqp:multi-txns-per-ssn";
    pub const MULTI_SSNS_PER_TXN: &str = "amqp:multi-ssns-per-txn";
}

/// Target of a link to a transaction coordinator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Coordinator {
    pub capabilities: Option<Vec<Symbol>>,
}

impl DescribedType for Coordinator {
    const CODE: u64 = 0x30;
    const NAME: &'static str = "amqp:coordinator:list";
    const FIELD_COUNT: usize = 1;

    fn to_fields(&self) -> Vec<Value> {
        vec![field::symbols(&self.capabilities)]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            capabilities: fields.symbols()?,
        })
    }
}

/// Request to start a transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Declare {
    pub global_id: Option<Value>,
}

impl DescribedType for Declare {
    const CODE: u64 = 0x31;
    const NAME: &'static str = "amqp:declare:list";
    const FIELD_COUNT: usize = 1;

    fn to_fields(&self) -> Vec<Value> {
        vec![self.global_id.clone().unwrap_or(Value::Null)]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            global_id: fields.value(),
        })
    }
}

/// Request to end a transaction, committing unless `fail` is set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Discharge {
    pub txn_id: Bytes,
    pub fail: Option<bool>,
}

impl DescribedType for Discharge {
    const CODE: u64 = 0x32;
    const NAME: &'static str = "amqp:discharge:list";
    const FIELD_COUNT: usize = 2;

    fn to_fields(&self) -> Vec<Value> {
        vec![Value::Binary(self.txn_id.clone()), field::opt(self.fail)]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            txn_id: fields.binary()?.unwrap_or_default(),
            fail: fields.boolean()?,
        })
    }
}

/// Outcome of a successful Declare, carrying the new transaction id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Declared {
    pub txn_id: Bytes,
}

impl DescribedType for Declared {
    const CODE: u64 = 0x33;
    const NAME: &'static str = "amqp:declared:list";
    const FIELD_COUNT: usize = 1;

    fn to_fields(&self) -> Vec<Value> {
        vec![Value::Binary(self.txn_id.clone())]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            txn_id: fields.binary()?.unwrap_or_default(),
        })
    }
}

/// Delivery state of work enlisted in a transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionalState {
    pub txn_id: Bytes,
    pub outcome: Option<Box<DeliveryState>>,
}

impl DescribedType for TransactionalState {
    const CODE: u64 = 0x34;
    const NAME: &'static str = "amqp:transactional-state:list";
    const FIELD_COUNT: usize = 2;

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::Binary(self.txn_id.clone()),
            self.outcome.as_ref().map(|o| o.to_value()).unwrap_or(Value::Null),
        ]
    }

    fn from_fields(fields: &mut FieldReader) -> Result<Self, CodecError> {
        let txn_id = fields.binary()?.unwrap_or_default();
        let outcome = fields
            .value()
            .map(DeliveryState::from_value)
            .transpose()?
            .map(Box::new);
        Ok(Self { txn_id, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_value, encode_value};

    #[test]
    fn test_transactional_state_with_outcome() {
        let state = TransactionalState {
            txn_id: Bytes::from_static(b"tx1"),
            outcome: Some(Box::new(DeliveryState::Accepted)),
        };
        let bytes = encode_value(&state.to_value()).unwrap();
        let decoded = TransactionalState::from_value(decode_value(bytes).unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_discharge_fail_flag() {
        let discharge = Discharge {
            txn_id: Bytes::from_static(b"\x00\x01"),
            fail: Some(true),
        };
        let bytes = encode_value(&discharge.to_value()).unwrap();
        assert_eq!(
            Discharge::from_value(decode_value(bytes).unwrap()).unwrap(),
            discharge
        );
    }

    #[test]
    fn test_declare_empty_encoding() {
        let bytes = encode_value(&Declare::default().to_value()).unwrap();
        // described, smallulong 0x31, list0
        assert_eq!(&bytes[..], &[0x00, 0x53, 0x31, 0x45]);
    }
}
