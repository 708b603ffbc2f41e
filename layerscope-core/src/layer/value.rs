//! Typed attribute values.
//!
//! Byte values are `Bytes` slices of the owning frame's raw buffer, so
//! attaching them never copies packet data.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use compact_str::CompactString;

/// Value carried by an [`Attribute`](super::Attribute).
#[derive(Debug, Clone)]
pub enum AttrValue {
    /// Boolean value
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// Unsigned 64-bit integer
    UInt(u64),
    /// Double precision float
    Float(f64),
    /// UTF-8 text (inline up to 24 bytes)
    Str(CompactString),
    /// Byte slice shared with the frame's raw buffer
    Bytes(Bytes),
    /// The underlying bytes could not be read
    Null,
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::UInt(v) => Some(*v),
            AttrValue::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AttrValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Short type name, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Bool(_) => "bool",
            AttrValue::Int(_) => "int",
            AttrValue::UInt(_) => "uint",
            AttrValue::Float(_) => "float",
            AttrValue::Str(_) => "string",
            AttrValue::Bytes(_) => "bytes",
            AttrValue::Null => "null",
        }
    }

    /// Order two values of compatible type.
    ///
    /// Integers compare exactly across signedness, mixed integer/float
    /// compares as `f64`. Returns `None` for incompatible types, `Null`
    /// and NaN.
    pub fn compare(&self, other: &AttrValue) -> Option<Ordering> {
        use AttrValue::*;

        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (UInt(a), UInt(b)) => Some(a.cmp(b)),
            (Int(a), UInt(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (UInt(a), Int(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Float(a), UInt(b)) => a.partial_cmp(&(*b as f64)),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (UInt(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Str(a), Str(b)) => Some(a.as_str().cmp(b.as_str())),
            (Bytes(a), Bytes(b)) => Some(a.as_ref().cmp(b.as_ref())),
            _ => None,
        }
    }
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttrValue::Null, AttrValue::Null) => true,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<u8> for AttrValue {
    fn from(v: u8) -> Self {
        AttrValue::UInt(v.into())
    }
}

impl From<u16> for AttrValue {
    fn from(v: u16) -> Self {
        AttrValue::UInt(v.into())
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::UInt(v.into())
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        AttrValue::UInt(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(CompactString::new(v))
    }
}

impl From<CompactString> for AttrValue {
    fn from(v: CompactString) -> Self {
        AttrValue::Str(v)
    }
}

impl From<Bytes> for AttrValue {
    fn from(v: Bytes) -> Self {
        AttrValue::Bytes(v)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(v) => write!(f, "{v}"),
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::UInt(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Str(s) => write!(f, "{s:?}"),
            AttrValue::Bytes(b) => {
                for (i, byte) in b.iter().enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            AttrValue::Null => write!(f, "NULL"),
        }
    }
}
