//! The dynamic value model: a tagged variant over every shape the
//! signature grammar can describe.
//!
//! Rather than unpacking method arguments through reflection (as the
//! system this crate's wire format originates from does), values are
//! either built explicitly through [`Value`]'s constructors or produced by
//! the codec when decoding an incoming message body.

use std::fmt;

use crate::error::{Error, ErrorKind, Result};
use crate::signature::{self, OwnedSignature, Signature};

/// A value of a D-Bus-shaped type.
///
/// Each variant corresponds to exactly one atom or container form in the
/// signature grammar (§3 of the shape this type implements).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    ObjectPath(String),
    Signature(OwnedSignature),
    Array {
        element_signature: OwnedSignature,
        items: Vec<Value>,
    },
    Struct(Vec<Value>),
    DictEntry(Box<Value>, Box<Value>),
    Variant(OwnedSignature, Box<Value>),
}

impl Value {
    /// Construct an empty array of the given element signature.
    pub fn array(element_signature: &Signature, items: Vec<Value>) -> Self {
        Self::Array {
            element_signature: element_signature.to_owned(),
            items,
        }
    }

    /// Construct a variant wrapping `value`, self-describing it with
    /// `value`'s own signature.
    pub fn variant(value: Value) -> Self {
        let sig = value.signature();
        Value::Variant(sig, Box::new(value))
    }

    /// Compute the signature denoted by this value's shape.
    pub fn signature(&self) -> OwnedSignature {
        let s = self.signature_str();
        // The shape invariant (§3) guarantees this always parses.
        Signature::new(&s).expect("value shapes always denote a valid signature").to_owned()
    }

    fn signature_str(&self) -> String {
        match self {
            Value::Byte(_) => "y".to_owned(),
            Value::Bool(_) => "b".to_owned(),
            Value::Int16(_) => "n".to_owned(),
            Value::UInt16(_) => "q".to_owned(),
            Value::Int32(_) => "i".to_owned(),
            Value::UInt32(_) => "u".to_owned(),
            Value::Int64(_) => "x".to_owned(),
            Value::UInt64(_) => "t".to_owned(),
            Value::Double(_) => "d".to_owned(),
            Value::String(_) => "s".to_owned(),
            Value::ObjectPath(_) => "o".to_owned(),
            Value::Signature(_) => "g".to_owned(),
            Value::Array {
                element_signature, ..
            } => format!("a{element_signature}"),
            Value::Struct(items) => {
                let inner: String = items.iter().map(|v| v.signature_str()).collect();
                format!("({inner})")
            }
            Value::DictEntry(k, v) => format!("{{{}{}}}", k.signature_str(), v.signature_str()),
            Value::Variant(..) => "v".to_owned(),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Byte(_) => "byte",
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int16",
            Value::UInt16(_) => "uint16",
            Value::Int32(_) => "int32",
            Value::UInt32(_) => "uint32",
            Value::Int64(_) => "int64",
            Value::UInt64(_) => "uint64",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::ObjectPath(_) => "object-path",
            Value::Signature(_) => "signature",
            Value::Array { .. } => "array",
            Value::Struct(_) => "struct",
            Value::DictEntry(..) => "dict-entry",
            Value::Variant(..) => "variant",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Byte(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) | Value::ObjectPath(v) => write!(f, "{v:?}"),
            Value::Signature(v) => write!(f, "{v}"),
            Value::Array { items, .. } => f.debug_list().entries(items).finish(),
            Value::Struct(items) => f.debug_list().entries(items).finish(),
            Value::DictEntry(k, v) => write!(f, "{k}: {v}"),
            Value::Variant(_, v) => write!(f, "{v}"),
        }
    }
}

/// Compute the concatenated signature of an ordered list of values, as
/// required by the `Message.body`/`Message.signature` invariant.
pub fn body_signature(values: &[Value]) -> OwnedSignature {
    let inner: String = values.iter().map(|v| v.signature_str()).collect();
    Signature::new(&inner)
        .expect("concatenation of value signatures is always valid")
        .to_owned()
}

pub(crate) fn type_mismatch(expected: &Signature, found: &Value) -> Error {
    Error::new(ErrorKind::TypeMismatch {
        expected: expected.as_str().to_owned(),
        found: found.type_name().to_owned(),
    })
}

pub(crate) fn mismatch_blocks(expected: &str, found: &str) -> Error {
    Error::new(ErrorKind::TypeMismatch {
        expected: expected.to_owned(),
        found: found.to_owned(),
    })
}

#[allow(unused)]
pub(crate) fn validate_signature(sig: &str) -> Result<()> {
    signature::validate(sig)
}
