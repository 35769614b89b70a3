//! The AMQP 1.0 value union and constructor byte table.
//!
//! Every wire value begins with a one-byte *constructor* selecting the type
//! and encoding width (OASIS AMQP 1.0 Part 1, Section 1.6). The constants
//! here are the complete primitive table; composite (described) types reuse
//! them behind the 0x00 descriptor marker.

use bytes::Bytes;
use uuid::Uuid;

// ============================================================================
// Constructor bytes (AMQP 1.0 Part 1, Section 1.6)
// ============================================================================

pub const CTOR_DESCRIBED: u8 = 0x00;
pub const CTOR_NULL: u8 = 0x40;
pub const CTOR_BOOL: u8 = 0x56;
pub const CTOR_BOOL_TRUE: u8 = 0x41;
pub const CTOR_BOOL_FALSE: u8 = 0x42;
pub const CTOR_UBYTE: u8 = 0x50;
pub const CTOR_USHORT: u8 = 0x60;
pub const CTOR_UINT_0: u8 = 0x43;
pub const CTOR_UINT_SMALL: u8 = 0x52;
pub const CTOR_UINT: u8 = 0x70;
pub const CTOR_ULONG_0: u8 = 0x44;
pub const CTOR_ULONG_SMALL: u8 = 0x53;
pub const CTOR_ULONG: u8 = 0x80;
pub const CTOR_BYTE: u8 = 0x51;
pub const CTOR_SHORT: u8 = 0x61;
pub const CTOR_INT_SMALL: u8 = 0x54;
pub const CTOR_INT: u8 = 0x71;
pub const CTOR_LONG_SMALL: u8 = 0x55;
pub const CTOR_LONG: u8 = 0x81;
pub const CTOR_FLOAT: u8 = 0x72;
pub const CTOR_DOUBLE: u8 = 0x82;
pub const CTOR_TIMESTAMP: u8 = 0x83;
pub const CTOR_UUID: u8 = 0x98;
pub const CTOR_BINARY_SMALL: u8 = 0xa0;
pub const CTOR_BINARY: u8 = 0xb0;
pub const CTOR_STRING_SMALL: u8 = 0xa1;
pub const CTOR_STRING: u8 = 0xb1;
pub const CTOR_SYMBOL_SMALL: u8 = 0xa3;
pub const CTOR_SYMBOL: u8 = 0xb3;
pub const CTOR_LIST_0: u8 = 0x45;
pub const CTOR_LIST_SMALL: u8 = 0xc0;
pub const CTOR_LIST: u8 = 0xd0;
pub const CTOR_MAP_SMALL: u8 = 0xc1;
pub const CTOR_MAP: u8 = 0xd1;
pub const CTOR_ARRAY_SMALL: u8 = 0xe0;
pub const CTOR_ARRAY: u8 = 0xf0;

// ============================================================================
// Value union
// ============================================================================

/// A decoded AMQP 1.0 value.
///
/// Maps are kept as ordered pair vectors, not hash maps: AMQP maps are
/// ordered on the wire and the CBS / management envelopes are written and
/// compared in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
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
    /// Milliseconds since the Unix epoch, signed.
    Timestamp(i64),
    Uuid(Uuid),
    Binary(Bytes),
    String(String),
    /// ASCII symbolic constant. Kept as raw bytes; the protocol layer
    /// compares symbols bytewise.
    Symbol(Bytes),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// Homogeneous sequence sharing a single element constructor.
    Array(Vec<Value>),
    /// Described value: descriptor + payload. Composite types the codec
    /// recognizes are lifted into typed structs at the layer above;
    /// unrecognized descriptors pass through as this variant.
    Described(Box<Value>, Box<Value>),
}

impl Value {
    /// Symbol from a static string.
    pub fn symbol(s: &'static str) -> Value {
        Value::Symbol(Bytes::from_static(s.as_bytes()))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    /// True for `Value::Null`. Used when trimming trailing optional fields
    /// from composite lists.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Ushort(v) => Some(u32::from(*v)),
            Value::Ubyte(v) => Some(u32::from(*v)),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Ulong(v) => Some(*v),
            Value::Uint(v) => Some(u64::from(*v)),
            Value::Ushort(v) => Some(u64::from(*v)),
            Value::Ubyte(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Bytes> {
        match self {
            Value::Symbol(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a map entry whose key is the given symbol or string.
    ///
    /// Application-property maps mix symbol and string keys in the wild
    /// (the CBS status fields have two historical spellings), so both key
    /// types match.
    pub fn map_get(&self, key: &[u8]) -> Option<&Value> {
        let entries = match self {
            Value::Map(entries) => entries,
            _ => return None,
        };
        entries.iter().find_map(|(k, v)| match k {
            Value::Symbol(s) if s.as_ref() == key => Some(v),
            Value::String(s) if s.as_bytes() == key => Some(v),
            Value::Binary(b) if b.as_ref() == key => Some(v),
            _ => None,
        })
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Ulong(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Binary(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_get_matches_symbol_and_string_keys() {
        let map = Value::Map(vec![
            (Value::symbol("status-code"), Value::Int(200)),
            (Value::string("statusDescription"), Value::string("OK")),
        ]);
        assert_eq!(map.map_get(b"status-code"), Some(&Value::Int(200)));
        assert_eq!(
            map.map_get(b"statusDescription"),
            Some(&Value::string("OK"))
        );
        assert_eq!(map.map_get(b"missing"), None);
    }

    #[test]
    fn numeric_widening() {
        assert_eq!(Value::Ubyte(7).as_u32(), Some(7));
        assert_eq!(Value::Ushort(300).as_u64(), Some(300));
        assert_eq!(Value::String("x".into()).as_u32(), None);
    }
}
