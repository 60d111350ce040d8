//! Serialized layout of spilled tuple batches.
//!
//! Layout (little endian):
//!
//! ```text
//! batch  := count:u32 tuple*
//! tuple  := arity:u16 value*
//! value  := tag:u8 payload
//! ```
//!
//! Fixed-size payloads are written as-is; strings, binaries and LOB ids are
//! prefixed with a u32 length. LOBs are written id-only: their content is
//! put back by the owner's LOB tracker on read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Write;
use strata_common::{LobKind, LobValue, Result, StrataError, Tuple, TypeId, Value};

/// Size of the batch header in bytes.
pub const BATCH_HEADER_SIZE: usize = 4;

/// Encodes and decodes tuples of one schema.
#[derive(Debug, Clone, Default)]
pub struct TupleCodec {
    /// Column types, or empty to skip schema checks.
    types: Vec<TypeId>,
}

impl TupleCodec {
    pub fn new(types: Vec<TypeId>) -> Self {
        Self { types }
    }

    pub fn types(&self) -> &[TypeId] {
        &self.types
    }

    fn check_schema(&self, tuple: &Tuple) -> Result<()> {
        if self.types.is_empty() {
            return Ok(());
        }
        if tuple.len() != self.types.len() {
            return Err(StrataError::InvalidArgument(format!(
                "tuple has {} columns, schema has {}",
                tuple.len(),
                self.types.len()
            )));
        }
        for (i, (value, ty)) in tuple.values().iter().zip(&self.types).enumerate() {
            if !value.is_null() && value.type_id() != *ty {
                return Err(StrataError::InvalidArgument(format!(
                    "column {} expects {}, got {}",
                    i,
                    ty,
                    value.type_id()
                )));
            }
        }
        Ok(())
    }

    /// Appends one encoded tuple to `buf`.
    pub fn encode_tuple(&self, tuple: &Tuple, buf: &mut BytesMut) -> Result<()> {
        self.check_schema(tuple)?;
        buf.put_u16_le(fit_len(tuple.len(), "tuple arity")?);
        for value in tuple.values() {
            encode_value(value, buf)?;
        }
        Ok(())
    }

    /// Encodes a whole batch into one buffer.
    pub fn encode_batch(&self, tuples: &[Tuple]) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(BATCH_HEADER_SIZE + tuples.len() * 16);
        buf.put_u32_le(fit_len(tuples.len(), "batch row count")?);
        for tuple in tuples {
            self.encode_tuple(tuple, &mut buf)?;
        }
        Ok(buf.freeze())
    }

    /// Streams a batch to `out` one tuple at a time. Returns bytes written.
    pub fn write_batch<W: Write>(&self, tuples: &[Tuple], out: &mut W) -> Result<usize> {
        let count: u32 = fit_len(tuples.len(), "batch row count")?;
        out.write_all(&count.to_le_bytes())?;
        let mut written = BATCH_HEADER_SIZE;
        let mut buf = BytesMut::new();
        for tuple in tuples {
            buf.clear();
            self.encode_tuple(tuple, &mut buf)?;
            out.write_all(&buf)?;
            written += buf.len();
        }
        Ok(written)
    }

    /// Decodes a batch produced by `encode_batch` or `write_batch`.
    pub fn decode_batch(&self, data: &[u8]) -> Result<Vec<Tuple>> {
        let mut buf = data;
        ensure(&buf, BATCH_HEADER_SIZE)?;
        let count = buf.get_u32_le() as usize;
        let mut tuples = Vec::with_capacity(count);
        for _ in 0..count {
            ensure(&buf, 2)?;
            let arity = buf.get_u16_le() as usize;
            let mut values = Vec::with_capacity(arity);
            for _ in 0..arity {
                values.push(decode_value(&mut buf)?);
            }
            tuples.push(Tuple::new(values));
        }
        if buf.has_remaining() {
            return Err(malformed("trailing bytes after last tuple"));
        }
        Ok(tuples)
    }
}

fn encode_value(value: &Value, buf: &mut BytesMut) -> Result<()> {
    buf.put_u8(value.type_id() as u8);
    match value {
        Value::Null => {}
        Value::Boolean(b) => buf.put_u8(*b as u8),
        Value::Int32(v) => buf.put_i32_le(*v),
        Value::Int64(v) | Value::Timestamp(v) => buf.put_i64_le(*v),
        Value::Float64(v) => buf.put_f64_le(*v),
        Value::Varchar(s) => put_len_prefixed(buf, s.as_bytes())?,
        Value::Varbinary(b) => put_len_prefixed(buf, b)?,
        Value::Lob(lob) => put_len_prefixed(buf, lob.id().as_bytes())?,
    }
    Ok(())
}

fn decode_value(buf: &mut &[u8]) -> Result<Value> {
    ensure(buf, 1)?;
    let tag = buf.get_u8();
    let ty = TypeId::from_u8(tag).ok_or_else(|| malformed(&format!("unknown type tag {}", tag)))?;
    let value = match ty {
        TypeId::Null => Value::Null,
        TypeId::Boolean => {
            ensure(buf, 1)?;
            Value::Boolean(buf.get_u8() != 0)
        }
        TypeId::Int32 => {
            ensure(buf, 4)?;
            Value::Int32(buf.get_i32_le())
        }
        TypeId::Int64 => {
            ensure(buf, 8)?;
            Value::Int64(buf.get_i64_le())
        }
        TypeId::Timestamp => {
            ensure(buf, 8)?;
            Value::Timestamp(buf.get_i64_le())
        }
        TypeId::Float64 => {
            ensure(buf, 8)?;
            Value::Float64(buf.get_f64_le())
        }
        TypeId::Varchar => {
            let raw = get_len_prefixed(buf)?;
            let s = String::from_utf8(raw.to_vec()).map_err(|_| malformed("invalid utf-8 in varchar"))?;
            Value::Varchar(s)
        }
        TypeId::Varbinary => Value::Varbinary(Bytes::copy_from_slice(get_len_prefixed(buf)?)),
        TypeId::Blob | TypeId::Clob => {
            let raw = get_len_prefixed(buf)?;
            let id = std::str::from_utf8(raw).map_err(|_| malformed("invalid utf-8 in lob id"))?;
            let kind = if ty == TypeId::Blob {
                LobKind::Blob
            } else {
                LobKind::Clob
            };
            Value::Lob(LobValue::reference(id, kind))
        }
    };
    Ok(value)
}

fn put_len_prefixed(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    buf.put_u32_le(fit_len(data.len(), "value length")?);
    buf.put_slice(data);
    Ok(())
}

/// Narrows a length to its on-disk width.
fn fit_len<T: TryFrom<usize>>(len: usize, what: &str) -> Result<T> {
    T::try_from(len).map_err(|_| {
        StrataError::InvalidArgument(format!("{} {} does not fit the batch layout", what, len))
    })
}

fn get_len_prefixed<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    ensure(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    ensure(buf, len)?;
    let data: &'a [u8] = *buf;
    let (head, tail) = data.split_at(len);
    *buf = tail;
    Ok(head)
}

#[inline]
fn ensure(buf: &&[u8], n: usize) -> Result<()> {
    if buf.len() < n {
        return Err(StrataError::not_enough_bytes());
    }
    Ok(())
}

fn malformed(msg: &str) -> StrataError {
    StrataError::IoError(format!("malformed batch: {}", msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_tuples() -> Vec<Tuple> {
        vec![
            Tuple::new(vec![
                Value::Int32(1),
                Value::Varchar("alpha".to_string()),
                Value::Float64(1.5),
                Value::Boolean(true),
            ]),
            Tuple::new(vec![
                Value::Int32(-7),
                Value::Null,
                Value::Float64(f64::MAX),
                Value::Boolean(false),
            ]),
        ]
    }

    fn create_test_codec() -> TupleCodec {
        TupleCodec::new(vec![
            TypeId::Int32,
            TypeId::Varchar,
            TypeId::Float64,
            TypeId::Boolean,
        ])
    }

    #[test]
    fn test_batch_roundtrip() {
        let codec = create_test_codec();
        let tuples = create_test_tuples();
        let bytes = codec.encode_batch(&tuples).unwrap();
        assert_eq!(codec.decode_batch(&bytes).unwrap(), tuples);
    }

    #[test]
    fn test_streamed_and_buffered_encodings_match() {
        let codec = create_test_codec();
        let tuples = create_test_tuples();
        let mut streamed = Vec::new();
        let n = codec.write_batch(&tuples, &mut streamed).unwrap();
        assert_eq!(n, streamed.len());
        assert_eq!(&streamed[..], &codec.encode_batch(&tuples).unwrap()[..]);
    }

    #[test]
    fn test_lob_written_id_only() {
        let codec = TupleCodec::new(vec![TypeId::Int64, TypeId::Blob]);
        let lob = LobValue::new(LobKind::Blob, vec![9u8; 1000]);
        let id = lob.id().to_string();
        let tuples = vec![Tuple::new(vec![Value::Int64(1), Value::Lob(lob)])];

        let bytes = codec.encode_batch(&tuples).unwrap();
        assert!(bytes.len() < 100);

        let decoded = codec.decode_batch(&bytes).unwrap();
        let restored = decoded[0].get(1).and_then(Value::as_lob).unwrap();
        assert_eq!(restored.id(), id);
        assert_eq!(restored.kind(), LobKind::Blob);
        assert!(!restored.is_resolved());
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let codec = TupleCodec::new(vec![TypeId::Int32]);
        let wrong_type = Tuple::new(vec![Value::Varchar("x".to_string())]);
        assert!(matches!(
            codec.encode_batch(&[wrong_type]),
            Err(StrataError::InvalidArgument(_))
        ));
        let wrong_arity = Tuple::new(vec![Value::Int32(1), Value::Int32(2)]);
        assert!(codec.encode_batch(&[wrong_arity]).is_err());
    }

    #[test]
    fn test_oversized_arity_rejected() {
        let codec = TupleCodec::default();
        let wide = Tuple::new(vec![Value::Null; u16::MAX as usize + 1]);
        assert!(matches!(
            codec.encode_batch(&[wide.clone()]),
            Err(StrataError::InvalidArgument(_))
        ));
        assert!(matches!(
            codec.write_batch(&[wide], &mut Vec::new()),
            Err(StrataError::InvalidArgument(_))
        ));

        let widest = Tuple::new(vec![Value::Null; u16::MAX as usize]);
        let bytes = codec.encode_batch(&[widest]).unwrap();
        assert_eq!(codec.decode_batch(&bytes).unwrap()[0].len(), u16::MAX as usize);
    }

    #[test]
    fn test_truncated_input_fails() {
        let codec = create_test_codec();
        let bytes = codec.encode_batch(&create_test_tuples()).unwrap();
        let err = codec.decode_batch(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.to_string(), "I/O error: not enough bytes available");
    }
}
