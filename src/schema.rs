//! Dataset layout.

use sqlite_dual_adapter::{Adapter, Value};
use tracing::debug;

use crate::Result;

/// DDL for the node and task-template tables. Safe to run repeatedly.
pub const SCHEMA: &str = include_str!("schema.sql");

/// Stored in `PRAGMA user_version` once the schema is in place.
pub const SCHEMA_VERSION: i64 = 1;

/// Create any missing tables and indexes.
pub async fn initialize(adapter: &Adapter) -> Result<()> {
   adapter.exec_batch(SCHEMA).await?;

   let current = schema_version(adapter).await?;
   if current < SCHEMA_VERSION {
      adapter
         .pragma("user_version", Some(Value::Integer(SCHEMA_VERSION)))
         .await?;
   }

   debug!(
      adapter_id = %adapter.id(),
      from = current,
      to = SCHEMA_VERSION,
      "Node catalog schema initialized"
   );
   Ok(())
}

/// The dataset's recorded schema version; `0` for a fresh file.
pub async fn schema_version(adapter: &Adapter) -> Result<i64> {
   let rows = adapter.pragma("user_version", None).await?;
   Ok(rows
      .first()
      .and_then(|row| row.get_i64("user_version"))
      .unwrap_or(0))
}
