//! Operation attributes and their symbolic payloads.

use serde::{Deserialize, Serialize};

/// Symbolic value stored in an operation attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A single tensor shape; -1 marks an unknown dimension.
    Shape(Vec<i64>),
    /// One shape per result tensor of a transfer operation.
    ShapeArray(Vec<Vec<i64>>),
}

impl AttrValue {
    pub fn is_shape_array(&self) -> bool {
        matches!(self, AttrValue::ShapeArray(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// One named key/value pair in an operation's ordered attribute list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
}

impl Attribute {
    pub fn new<N: Into<String>>(name: N, value: AttrValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
