//! Tuple and value representation.

use crate::types::TypeId;
use bytes::{Buf, Bytes};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Source of fresh LOB reference ids.
static NEXT_LOB_ID: AtomicU64 = AtomicU64::new(1);

/// Kind of a large object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LobKind {
    /// Binary large object.
    Blob,
    /// Character large object (UTF-8 content).
    Clob,
}

impl LobKind {
    /// Returns the column type tag for this kind.
    pub fn type_id(&self) -> TypeId {
        match self {
            LobKind::Blob => TypeId::Blob,
            LobKind::Clob => TypeId::Clob,
        }
    }
}

/// A large-object value carried by reference.
///
/// A LOB either carries its streamable content, or only the reference id it
/// was registered under. Serialized batches keep only the id; the owning
/// buffer's LOB tracker puts the content back when rows are read.
#[derive(Debug, Clone, PartialEq)]
pub struct LobValue {
    id: String,
    kind: LobKind,
    content: Option<Bytes>,
}

impl LobValue {
    /// Creates a LOB carrying live content under a fresh reference id.
    pub fn new(kind: LobKind, content: impl Into<Bytes>) -> Self {
        let n = NEXT_LOB_ID.fetch_add(1, AtomicOrdering::Relaxed);
        Self {
            id: format!("lob-{}", n),
            kind,
            content: Some(content.into()),
        }
    }

    /// Creates a LOB that only carries its reference id.
    pub fn reference(id: impl Into<String>, kind: LobKind) -> Self {
        Self {
            id: id.into(),
            kind,
            content: None,
        }
    }

    /// Returns the reference id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the LOB kind.
    pub fn kind(&self) -> LobKind {
        self.kind
    }

    /// Returns the content if this value carries it.
    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    /// Returns true if the content is attached.
    pub fn is_resolved(&self) -> bool {
        self.content.is_some()
    }

    /// Attaches content to an id-only reference.
    pub fn set_content(&mut self, content: Bytes) {
        self.content = Some(content);
    }

    /// Returns a copy of this value without its content.
    pub fn to_reference(&self) -> Self {
        Self::reference(self.id.clone(), self.kind)
    }

    /// Opens a reader over the content.
    pub fn stream(&self) -> Option<impl std::io::Read> {
        self.content.clone().map(|c| c.reader())
    }
}

/// A single typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Varchar(String),
    Varbinary(Bytes),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
    Lob(LobValue),
}

impl Value {
    /// Returns the type tag of this value.
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Null => TypeId::Null,
            Value::Boolean(_) => TypeId::Boolean,
            Value::Int32(_) => TypeId::Int32,
            Value::Int64(_) => TypeId::Int64,
            Value::Float64(_) => TypeId::Float64,
            Value::Varchar(_) => TypeId::Varchar,
            Value::Varbinary(_) => TypeId::Varbinary,
            Value::Timestamp(_) => TypeId::Timestamp,
            Value::Lob(lob) => lob.kind().type_id(),
        }
    }

    /// Returns true for SQL null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the LOB payload, if this is a LOB value.
    pub fn as_lob(&self) -> Option<&LobValue> {
        match self {
            Value::Lob(lob) => Some(lob),
            _ => None,
        }
    }

    /// Returns the integer payload widened to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }
}

/// Total order over values. Nulls sort first; integers of different widths
/// compare numerically; values of unrelated types order by type tag.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Int32(x), Value::Int32(y)) => x.cmp(y),
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::Int32(x), Value::Int64(y)) => (*x as i64).cmp(y),
        (Value::Int64(x), Value::Int32(y)) => x.cmp(&(*y as i64)),
        (Value::Float64(x), Value::Float64(y)) => x.total_cmp(y),
        (Value::Varchar(x), Value::Varchar(y)) => x.cmp(y),
        (Value::Varbinary(x), Value::Varbinary(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Lob(x), Value::Lob(y)) => x.id().cmp(y.id()),
        _ => (a.type_id() as u8).cmp(&(b.type_id() as u8)),
    }
}

/// One row: an ordered, fixed-arity sequence of values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tuple(Vec<Value>);

impl Tuple {
    /// Creates a tuple from its values.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Returns the number of columns.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for a zero-column tuple.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the column values.
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Returns the column values mutably.
    #[inline]
    pub fn values_mut(&mut self) -> &mut [Value] {
        &mut self.0
    }

    /// Returns the value at a column position.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Returns the leading `key_length` values.
    #[inline]
    pub fn key(&self, key_length: usize) -> &[Value] {
        &self.0[..key_length.min(self.0.len())]
    }

    /// Consumes the tuple and returns its values.
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}
