//! Tagged scalar values and tuples.
//!
//! Every command argument and every tuple field is a [`Value`]: a tagged
//! scalar carrying one of the supported primitive kinds. Accessors are
//! fallible: asking a value for the wrong kind is a
//! [`GridError::Config`], never a panic. A [`Tuple`] is an ordered sequence
//! of values; field names live in the unit declaration, not in the tuple.

use crate::error::GridError;
use std::fmt;

/// A tagged scalar value.
///
/// The kind is fixed at construction; each `as_*` accessor succeeds only for
/// its own kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
  /// Boolean value.
  Boolean(bool),
  /// Single character.
  Char(char),
  /// 8-bit signed integer.
  Int8(i8),
  /// 16-bit signed integer.
  Int16(i16),
  /// 32-bit signed integer.
  Int32(i32),
  /// 64-bit signed integer.
  Int64(i64),
  /// 32-bit float.
  Float32(f32),
  /// 64-bit float.
  Float64(f64),
  /// UTF-8 string.
  String(String),
}

impl Value {
  /// Name of the kind, used in mismatch errors.
  pub fn kind(&self) -> &'static str {
    match self {
      Value::Boolean(_) => "boolean",
      Value::Char(_) => "char",
      Value::Int8(_) => "int8",
      Value::Int16(_) => "int16",
      Value::Int32(_) => "int32",
      Value::Int64(_) => "int64",
      Value::Float32(_) => "float32",
      Value::Float64(_) => "float64",
      Value::String(_) => "string",
    }
  }

  fn mismatch(&self, wanted: &str) -> GridError {
    GridError::config(format!("value is {}, not {}", self.kind(), wanted))
  }

  /// Returns the boolean payload, or a config error on kind mismatch.
  pub fn as_bool(&self) -> Result<bool, GridError> {
    match self {
      Value::Boolean(v) => Ok(*v),
      other => Err(other.mismatch("boolean")),
    }
  }

  /// Returns the char payload, or a config error on kind mismatch.
  pub fn as_char(&self) -> Result<char, GridError> {
    match self {
      Value::Char(v) => Ok(*v),
      other => Err(other.mismatch("char")),
    }
  }

  /// Returns the i32 payload, or a config error on kind mismatch.
  pub fn as_i32(&self) -> Result<i32, GridError> {
    match self {
      Value::Int32(v) => Ok(*v),
      other => Err(other.mismatch("int32")),
    }
  }

  /// Returns the i64 payload, or a config error on kind mismatch.
  pub fn as_i64(&self) -> Result<i64, GridError> {
    match self {
      Value::Int64(v) => Ok(*v),
      other => Err(other.mismatch("int64")),
    }
  }

  /// Returns the f64 payload, or a config error on kind mismatch.
  pub fn as_f64(&self) -> Result<f64, GridError> {
    match self {
      Value::Float64(v) => Ok(*v),
      other => Err(other.mismatch("float64")),
    }
  }

  /// Returns the string payload, or a config error on kind mismatch.
  pub fn as_str(&self) -> Result<&str, GridError> {
    match self {
      Value::String(v) => Ok(v),
      other => Err(other.mismatch("string")),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Boolean(v) => write!(f, "{}", v),
      Value::Char(v) => write!(f, "{}", v),
      Value::Int8(v) => write!(f, "{}", v),
      Value::Int16(v) => write!(f, "{}", v),
      Value::Int32(v) => write!(f, "{}", v),
      Value::Int64(v) => write!(f, "{}", v),
      Value::Float32(v) => write!(f, "{}", v),
      Value::Float64(v) => write!(f, "{}", v),
      Value::String(v) => write!(f, "{}", v),
    }
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Boolean(v)
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Int32(v)
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Int64(v)
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Float64(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::String(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::String(v)
  }
}

/// An ordered sequence of values emitted by a unit.
///
/// Positions correspond to the field names declared on the emitting unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tuple(Vec<Value>);

impl Tuple {
  /// Creates a tuple from the given values.
  pub fn new(values: Vec<Value>) -> Self {
    Tuple(values)
  }

  /// Number of fields.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// True if the tuple carries no fields.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Field at `index`, or a config error past the end.
  pub fn get(&self, index: usize) -> Result<&Value, GridError> {
    self
      .0
      .get(index)
      .ok_or_else(|| GridError::config(format!("tuple has {} fields, no index {}", self.0.len(), index)))
  }

  /// Iterates the fields in order.
  pub fn iter(&self) -> std::slice::Iter<'_, Value> {
    self.0.iter()
  }

  /// Consumes the tuple, returning its values.
  pub fn into_values(self) -> Vec<Value> {
    self.0
  }
}

impl From<Vec<Value>> for Tuple {
  fn from(values: Vec<Value>) -> Self {
    Tuple(values)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accessor_returns_payload_for_matching_kind() {
    assert_eq!(Value::Int32(7).as_i32().unwrap(), 7);
    assert_eq!(Value::String("s1".into()).as_str().unwrap(), "s1");
    assert!(Value::Boolean(true).as_bool().unwrap());
  }

  #[test]
  fn accessor_mismatch_is_config_error() {
    let err = Value::String("x".into()).as_i32().unwrap_err();
    assert!(matches!(err, GridError::Config(_)));
    let err = Value::Int64(1).as_str().unwrap_err();
    assert!(matches!(err, GridError::Config(_)));
  }

  #[test]
  fn tuple_get_past_end_is_config_error() {
    let t = Tuple::new(vec![Value::Int32(1)]);
    assert_eq!(t.get(0).unwrap().as_i32().unwrap(), 1);
    assert!(matches!(t.get(1), Err(GridError::Config(_))));
  }
}
