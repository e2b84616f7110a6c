use sqlx::sqlite::{Sqlite, SqliteRow, SqliteValueRef};
use sqlx::{Column, Decode, Row as _, TypeInfo, ValueRef};

use crate::{Error, Result, Row, Value};

/// Convert a row into column-ordered values, keyed by column name.
pub(super) fn decode_row(row: &SqliteRow) -> Result<Row> {
   let columns = row.columns();
   let mut decoded = Row::with_capacity(columns.len());

   for (i, column) in columns.iter().enumerate() {
      let raw = row.try_get_raw(i)?;
      decoded.insert(column.name().to_string(), decode_value(raw)?);
   }

   Ok(decoded)
}

/// Map a cell onto [`Value`] by its runtime storage class.
fn decode_value(raw: SqliteValueRef<'_>) -> Result<Value> {
   if raw.is_null() {
      return Ok(Value::Null);
   }

   let type_name = raw.type_info().name().to_uppercase();
   match type_name.as_str() {
      "NULL" => Ok(Value::Null),
      "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" | "BOOLEAN" => {
         decode::<i64>(raw).map(Value::Integer)
      }
      "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => decode::<f64>(raw).map(Value::Real),
      "TEXT" | "DATE" | "TIME" | "DATETIME" => decode::<String>(raw).map(Value::Text),
      "BLOB" => decode::<Vec<u8>>(raw).map(Value::Blob),
      _ => Err(Error::UnsupportedDatatype(type_name)),
   }
}

fn decode<'r, T: Decode<'r, Sqlite>>(raw: SqliteValueRef<'r>) -> Result<T> {
   T::decode(raw).map_err(|e| Error::Decode(e.to_string()))
}
