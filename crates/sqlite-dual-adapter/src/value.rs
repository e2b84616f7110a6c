//! The five-value cell model shared by both backends.

use base64::Engine as _;
use indexmap::IndexMap;
use serde::ser::{Serialize, Serializer};

use crate::{Error, Result};

/// A single SQLite cell, normalized to one of the five storage classes.
///
/// JSON stored in TEXT columns stays `Text`; parsing it is up to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
   Null,
   Integer(i64),
   Real(f64),
   Text(String),
   Blob(Vec<u8>),
}

impl Value {
   /// Returns true if this value is null.
   pub fn is_null(&self) -> bool {
      matches!(self, Value::Null)
   }

   /// Attempts to get this value as an integer.
   pub fn as_integer(&self) -> Option<i64> {
      match self {
         Value::Integer(i) => Some(*i),
         _ => None,
      }
   }

   /// Attempts to get this value as a float.
   pub fn as_real(&self) -> Option<f64> {
      match self {
         Value::Real(r) => Some(*r),
         _ => None,
      }
   }

   /// Attempts to get this value as a string reference.
   pub fn as_text(&self) -> Option<&str> {
      match self {
         Value::Text(s) => Some(s),
         _ => None,
      }
   }

   /// Attempts to get this value as a blob reference.
   pub fn as_blob(&self) -> Option<&[u8]> {
      match self {
         Value::Blob(b) => Some(b),
         _ => None,
      }
   }

   /// Name of the SQLite storage class this value belongs to.
   pub fn type_name(&self) -> &'static str {
      match self {
         Value::Null => "NULL",
         Value::Integer(_) => "INTEGER",
         Value::Real(_) => "REAL",
         Value::Text(_) => "TEXT",
         Value::Blob(_) => "BLOB",
      }
   }
}

/// Blobs serialize as base64 strings.
impl Serialize for Value {
   fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
      match self {
         Value::Null => serializer.serialize_none(),
         Value::Integer(i) => serializer.serialize_i64(*i),
         Value::Real(r) => serializer.serialize_f64(*r),
         Value::Text(s) => serializer.serialize_str(s),
         Value::Blob(b) => {
            serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(b))
         }
      }
   }
}

impl From<i64> for Value {
   fn from(value: i64) -> Self {
      Value::Integer(value)
   }
}

impl From<i32> for Value {
   fn from(value: i32) -> Self {
      Value::Integer(i64::from(value))
   }
}

impl From<u32> for Value {
   fn from(value: u32) -> Self {
      Value::Integer(i64::from(value))
   }
}

impl From<bool> for Value {
   fn from(value: bool) -> Self {
      Value::Integer(i64::from(value))
   }
}

impl From<f64> for Value {
   fn from(value: f64) -> Self {
      Value::Real(value)
   }
}

impl From<String> for Value {
   fn from(value: String) -> Self {
      Value::Text(value)
   }
}

impl From<&str> for Value {
   fn from(value: &str) -> Self {
      Value::Text(value.to_owned())
   }
}

impl From<&String> for Value {
   fn from(value: &String) -> Self {
      Value::Text(value.clone())
   }
}

impl From<Vec<u8>> for Value {
   fn from(value: Vec<u8>) -> Self {
      Value::Blob(value)
   }
}

impl From<&[u8]> for Value {
   fn from(value: &[u8]) -> Self {
      Value::Blob(value.to_vec())
   }
}

impl<T: Into<Value>> From<Option<T>> for Value {
   fn from(value: Option<T>) -> Self {
      value.map_or(Value::Null, Into::into)
   }
}

/// One result row: column name to value, in result-set column order.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct Row(IndexMap<String, Value>);

impl Row {
   pub(crate) fn with_capacity(columns: usize) -> Self {
      Self(IndexMap::with_capacity(columns))
   }

   pub(crate) fn insert(&mut self, column: String, value: Value) {
      self.0.insert(column, value);
   }

   /// Value of the named column, if present.
   pub fn get(&self, column: &str) -> Option<&Value> {
      self.0.get(column)
   }

   /// Value at a column position.
   pub fn get_index(&self, index: usize) -> Option<(&str, &Value)> {
      self.0.get_index(index).map(|(k, v)| (k.as_str(), v))
   }

   /// Integer value of the named column; `None` for missing or non-integer cells.
   pub fn get_i64(&self, column: &str) -> Option<i64> {
      self.get(column).and_then(Value::as_integer)
   }

   /// Text value of the named column; `None` for missing or non-text cells.
   pub fn get_str(&self, column: &str) -> Option<&str> {
      self.get(column).and_then(Value::as_text)
   }

   /// Column names in result-set order.
   pub fn columns(&self) -> impl Iterator<Item = &str> {
      self.0.keys().map(String::as_str)
   }

   pub fn values(&self) -> impl Iterator<Item = &Value> {
      self.0.values()
   }

   pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
      self.0.iter().map(|(k, v)| (k.as_str(), v))
   }

   pub fn len(&self) -> usize {
      self.0.len()
   }

   pub fn is_empty(&self) -> bool {
      self.0.is_empty()
   }

   pub fn into_inner(self) -> IndexMap<String, Value> {
      self.0
   }
}

impl FromIterator<(String, Value)> for Row {
   fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
      Self(iter.into_iter().collect())
   }
}

impl IntoIterator for Row {
   type Item = (String, Value);
   type IntoIter = indexmap::map::IntoIter<String, Value>;

   fn into_iter(self) -> Self::IntoIter {
      self.0.into_iter()
   }
}

/// Rows produced by a single execution of [`crate::Statement::all`].
///
/// The sequence is finite. Executing the statement again, with the same or
/// different parameters, yields a fresh sequence.
#[derive(Debug)]
pub struct Rows {
   inner: std::vec::IntoIter<Row>,
}

impl Rows {
   pub(crate) fn new(rows: Vec<Row>) -> Self {
      Self {
         inner: rows.into_iter(),
      }
   }

   /// Collects the remaining rows.
   pub fn into_vec(self) -> Vec<Row> {
      self.inner.collect()
   }
}

impl Iterator for Rows {
   type Item = Row;

   fn next(&mut self) -> Option<Self::Item> {
      self.inner.next()
   }

   fn size_hint(&self) -> (usize, Option<usize>) {
      self.inner.size_hint()
   }
}

impl ExactSizeIterator for Rows {}

/// Positional parameters bound to a statement execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<Value>);

impl Params {
   pub fn new() -> Self {
      Self::default()
   }

   /// Append a positional value.
   pub fn push(mut self, value: impl Into<Value>) -> Self {
      self.0.push(value.into());
      self
   }

   pub fn len(&self) -> usize {
      self.0.len()
   }

   pub fn is_empty(&self) -> bool {
      self.0.is_empty()
   }

   pub fn into_inner(self) -> Vec<Value> {
      self.0
   }
}

impl From<()> for Params {
   fn from(_: ()) -> Self {
      Self::default()
   }
}

impl From<Vec<Value>> for Params {
   fn from(values: Vec<Value>) -> Self {
      Self(values)
   }
}

impl From<&[Value]> for Params {
   fn from(values: &[Value]) -> Self {
      Self(values.to_vec())
   }
}

impl<V: Into<Value>, const N: usize> From<[V; N]> for Params {
   fn from(values: [V; N]) -> Self {
      Self(values.into_iter().map(Into::into).collect())
   }
}

/// Builds [`Params`] from heterogeneous values.
///
/// ```
/// use sqlite_dual_adapter::params;
///
/// let params = params!["nodes-base.httpRequest", 3, None::<i64>];
/// assert_eq!(params.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
   () => {
      $crate::Params::new()
   };
   ($($value:expr),+ $(,)?) => {
      $crate::Params::from(vec![$($crate::Value::from($value)),+])
   };
}

/// Rejects a binding whose arity differs from the statement's placeholders.
pub(crate) fn check_parameter_count(expected: usize, actual: usize) -> Result<()> {
   if expected != actual {
      return Err(Error::ParameterCountMismatch { expected, actual });
   }
   Ok(())
}
