//! Value type tags for tuple columns.

use serde::{Deserialize, Serialize};

/// Type tag of a tuple column.
///
/// The schema handed to buffers and trees is an ordered list of these tags.
/// Tags are also written in front of each serialized value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeId {
    // Null type
    Null = 0,

    // Boolean
    Boolean = 1,

    // Integer types
    Int32 = 12,
    Int64 = 13,

    // Floating point
    Float64 = 31,

    // String and binary types
    Varchar = 51,
    Varbinary = 61,

    // Date/Time
    Timestamp = 72,

    // Large objects, carried by reference
    Blob = 120,
    Clob = 121,
}

impl TypeId {
    /// Returns the fixed byte size for this type, or None for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            TypeId::Null => Some(0),
            TypeId::Boolean => Some(1),
            TypeId::Int32 => Some(4),
            TypeId::Int64 | TypeId::Float64 | TypeId::Timestamp => Some(8),
            TypeId::Varchar | TypeId::Varbinary | TypeId::Blob | TypeId::Clob => None,
        }
    }

    /// Returns true if this type has a fixed byte size.
    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size().is_some()
    }

    /// Returns true for large-object types.
    pub fn is_lob(&self) -> bool {
        matches!(self, TypeId::Blob | TypeId::Clob)
    }

    /// Decodes a serialized tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        let ty = match tag {
            0 => TypeId::Null,
            1 => TypeId::Boolean,
            12 => TypeId::Int32,
            13 => TypeId::Int64,
            31 => TypeId::Float64,
            51 => TypeId::Varchar,
            61 => TypeId::Varbinary,
            72 => TypeId::Timestamp,
            120 => TypeId::Blob,
            121 => TypeId::Clob,
            _ => return None,
        };
        Some(ty)
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeId::Null => "NULL",
            TypeId::Boolean => "BOOLEAN",
            TypeId::Int32 => "INT32",
            TypeId::Int64 => "INT64",
            TypeId::Float64 => "FLOAT64",
            TypeId::Varchar => "VARCHAR",
            TypeId::Varbinary => "VARBINARY",
            TypeId::Timestamp => "TIMESTAMP",
            TypeId::Blob => "BLOB",
            TypeId::Clob => "CLOB",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_size() {
        assert_eq!(TypeId::Null.fixed_size(), Some(0));
        assert_eq!(TypeId::Boolean.fixed_size(), Some(1));
        assert_eq!(TypeId::Int32.fixed_size(), Some(4));
        assert_eq!(TypeId::Int64.fixed_size(), Some(8));
        assert_eq!(TypeId::Timestamp.fixed_size(), Some(8));
        assert_eq!(TypeId::Varchar.fixed_size(), None);
        assert_eq!(TypeId::Blob.fixed_size(), None);
        assert!(TypeId::Float64.is_fixed_size());
        assert!(!TypeId::Varbinary.is_fixed_size());
    }

    #[test]
    fn test_is_lob() {
        assert!(TypeId::Blob.is_lob());
        assert!(TypeId::Clob.is_lob());
        assert!(!TypeId::Varchar.is_lob());
        assert!(!TypeId::Varbinary.is_lob());
    }

    #[test]
    fn test_tag_roundtrip() {
        for ty in [
            TypeId::Null,
            TypeId::Boolean,
            TypeId::Int32,
            TypeId::Int64,
            TypeId::Float64,
            TypeId::Varchar,
            TypeId::Varbinary,
            TypeId::Timestamp,
            TypeId::Blob,
            TypeId::Clob,
        ] {
            assert_eq!(TypeId::from_u8(ty as u8), Some(ty));
        }
        assert_eq!(TypeId::from_u8(250), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(TypeId::Int64.to_string(), "INT64");
        assert_eq!(TypeId::Clob.to_string(), "CLOB");
    }
}
