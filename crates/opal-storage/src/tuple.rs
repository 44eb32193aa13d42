//! Tuple representation and serialisation.
//!
//! A tuple is an immutable byte image laid out by its schema: fixed-size
//! columns inline at their declared offsets, variable-length columns as a
//! 4-byte offset into the tuple pointing at a `{len: u32, payload}` blob
//! packed after the inlined section. The wire form used by heap pages and
//! spill files prefixes the image with its 4-byte length.

use bytes::Bytes;
use opal_common::{OpalError, Result, Rid, Schema, TypeId, Value};

/// One row: a byte image plus the heap slot it came from (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    rid: Rid,
    data: Bytes,
}

impl Tuple {
    /// Builds a tuple image from `values` laid out per `schema`.
    pub fn from_values(values: &[Value], schema: &Schema) -> Result<Tuple> {
        if values.len() != schema.num_columns() {
            return Err(OpalError::Execution(format!(
                "tuple arity {} does not match schema arity {}",
                values.len(),
                schema.num_columns()
            )));
        }

        let mut size = schema.inline_size();
        for (value, column) in values.iter().zip(schema.columns()) {
            if !column.is_inlined() && !value.is_null() {
                if let Value::Varchar(s) = value {
                    size += 4 + s.len();
                }
            }
        }

        let mut data = vec![0u8; size];
        let mut var_offset = schema.inline_size();
        for (value, column) in values.iter().zip(schema.columns()) {
            let slot = &mut data[column.offset()..column.offset() + column.inline_size()];
            match value {
                Value::Varchar(s) => {
                    slot.copy_from_slice(&(var_offset as u32).to_le_bytes());
                    data[var_offset..var_offset + 4].copy_from_slice(&(s.len() as u32).to_le_bytes());
                    data[var_offset + 4..var_offset + 4 + s.len()].copy_from_slice(s.as_bytes());
                    var_offset += 4 + s.len();
                }
                Value::Null(TypeId::Varchar) => {
                    slot.copy_from_slice(&Value::varchar_null_marker().to_le_bytes());
                }
                other => {
                    if other.type_id() != column.type_id() {
                        return Err(OpalError::TypeMismatch {
                            expected: column.type_id().to_string(),
                            actual: other.type_id().to_string(),
                        });
                    }
                    other.write_inline(slot);
                }
            }
        }

        Ok(Tuple {
            rid: Rid::INVALID,
            data: Bytes::from(data),
        })
    }

    /// Wraps an existing byte image.
    pub fn from_bytes(rid: Rid, data: Bytes) -> Tuple {
        Tuple { rid, data }
    }

    /// Reads the value of column `idx` under `schema`.
    pub fn value(&self, schema: &Schema, idx: usize) -> Value {
        let column = schema.column(idx);
        let slot = &self.data[column.offset()..column.offset() + column.inline_size()];
        if column.is_inlined() {
            return Value::read_inline(column.type_id(), slot);
        }

        let offset = u32::from_le_bytes(slot.try_into().expect("inline slot is 4 bytes"));
        if offset == Value::varchar_null_marker() {
            return Value::Null(TypeId::Varchar);
        }
        let offset = offset as usize;
        let len =
            u32::from_le_bytes(self.data[offset..offset + 4].try_into().expect("length prefix"))
                as usize;
        let payload = &self.data[offset + 4..offset + 4 + len];
        Value::Varchar(String::from_utf8_lossy(payload).into_owned())
    }

    /// All column values in schema order.
    pub fn values(&self, schema: &Schema) -> Vec<Value> {
        (0..schema.num_columns()).map(|i| self.value(schema, i)).collect()
    }

    /// Projects the columns named by `attrs` into a tuple shaped by
    /// `key_schema`.
    pub fn key_from(&self, schema: &Schema, attrs: &[usize], key_schema: &Schema) -> Result<Tuple> {
        let values: Vec<Value> = attrs.iter().map(|&i| self.value(schema, i)).collect();
        Tuple::from_values(&values, key_schema)
    }

    /// The heap slot this tuple came from; invalid for derived rows.
    pub fn rid(&self) -> Rid {
        self.rid
    }

    pub fn set_rid(&mut self, rid: Rid) {
        self.rid = rid;
    }

    /// The raw image.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Wire size: 4-byte length prefix plus the image.
    pub fn serialized_size(&self) -> usize {
        4 + self.data.len()
    }

    /// Writes `{len: i32, image}` into `buf`, which must be at least
    /// [`Self::serialized_size`] bytes.
    pub fn serialize_to(&self, buf: &mut [u8]) {
        let len = self.data.len() as i32;
        buf[..4].copy_from_slice(&len.to_le_bytes());
        buf[4..4 + self.data.len()].copy_from_slice(&self.data);
    }

    /// Reads a `{len: i32, image}` record from `buf`. Returns `None` on a
    /// negative or out-of-range length.
    pub fn deserialize_from(buf: &[u8]) -> Option<Tuple> {
        if buf.len() < 4 {
            return None;
        }
        let len = i32::from_le_bytes(buf[..4].try_into().expect("length prefix"));
        if len < 0 || buf.len() < 4 + len as usize {
            return None;
        }
        Some(Tuple {
            rid: Rid::INVALID,
            data: Bytes::copy_from_slice(&buf[4..4 + len as usize]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_common::{Column, PageId};

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::BigInt),
            Column::new("name", TypeId::Varchar),
            Column::new("score", TypeId::Int),
        ])
    }

    fn sample_tuple() -> Tuple {
        Tuple::from_values(
            &[
                Value::BigInt(42),
                Value::Varchar("opal".into()),
                Value::Int(-3),
            ],
            &sample_schema(),
        )
        .unwrap()
    }

    #[test]
    fn test_values_roundtrip() {
        let schema = sample_schema();
        let tuple = sample_tuple();
        assert_eq!(tuple.value(&schema, 0), Value::BigInt(42));
        assert_eq!(tuple.value(&schema, 1), Value::Varchar("opal".into()));
        assert_eq!(tuple.value(&schema, 2), Value::Int(-3));
    }

    #[test]
    fn test_null_handling() {
        let schema = sample_schema();
        let tuple = Tuple::from_values(
            &[
                Value::Null(TypeId::BigInt),
                Value::Null(TypeId::Varchar),
                Value::Int(1),
            ],
            &schema,
        )
        .unwrap();
        assert!(tuple.value(&schema, 0).is_null());
        assert!(tuple.value(&schema, 1).is_null());
        assert_eq!(tuple.value(&schema, 2), Value::Int(1));
        // A null varchar stores no payload.
        assert_eq!(tuple.len(), schema.inline_size());
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let schema = sample_schema();
        assert!(Tuple::from_values(&[Value::BigInt(1)], &schema).is_err());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let schema = sample_schema();
        let result = Tuple::from_values(
            &[
                Value::Int(1),
                Value::Varchar("x".into()),
                Value::Int(2),
            ],
            &schema,
        );
        assert!(matches!(result, Err(OpalError::TypeMismatch { .. })));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let tuple = sample_tuple();
        let mut buf = vec![0u8; tuple.serialized_size()];
        tuple.serialize_to(&mut buf);

        let back = Tuple::deserialize_from(&buf).unwrap();
        assert_eq!(back.data(), tuple.data());
        assert_eq!(
            back.value(&sample_schema(), 1),
            Value::Varchar("opal".into())
        );
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(Tuple::deserialize_from(&[1, 2]).is_none());
        // Length prefix larger than the buffer.
        let mut buf = vec![0u8; 8];
        buf[..4].copy_from_slice(&100i32.to_le_bytes());
        assert!(Tuple::deserialize_from(&buf).is_none());
        // Negative length.
        buf[..4].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(Tuple::deserialize_from(&buf).is_none());
    }

    #[test]
    fn test_key_projection() {
        let schema = sample_schema();
        let key_schema = Schema::new(vec![Column::new("id", TypeId::BigInt)]);
        let key = sample_tuple().key_from(&schema, &[0], &key_schema).unwrap();
        assert_eq!(key.value(&key_schema, 0), Value::BigInt(42));
    }

    #[test]
    fn test_rid_tracking() {
        let mut tuple = sample_tuple();
        assert!(!tuple.rid().is_valid());
        tuple.set_rid(Rid::new(PageId(3), 7));
        assert_eq!(tuple.rid(), Rid::new(PageId(3), 7));
    }
}
