//! Backend-agnostic prepared statements.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::value::check_parameter_count;
use crate::{Error, Params, Result, Row, Rows, Value};

/// How many rows a query should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
   /// Stop after the first row.
   One,
   All,
}

/// Result of a mutating execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
   /// Rows inserted, updated or deleted by the statement.
   pub changes: u64,
   /// The connection's last inserted ROWID, `None` while no row has been
   /// inserted through it.
   pub last_insert_id: Option<i64>,
}

impl RunResult {
   pub(crate) fn new(changes: u64, last_insert_rowid: i64) -> Self {
      Self {
         changes,
         last_insert_id: (last_insert_rowid != 0).then_some(last_insert_rowid),
      }
   }
}

/// Lifecycle of a [`Statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatementState {
   /// Parsed, nothing bound yet.
   Prepared,
   /// Parameters bound, execution pending or in flight.
   Bound,
   /// Last execution finished; the statement can be bound again.
   Executed,
   /// The owning adapter was closed.
   Disposed,
}

/// A prepared statement bound to one SQL text and one backend.
///
/// The SQL is parsed once by [`crate::Adapter::prepare`]; later executions
/// reuse the engine's cached statement. Each execution rebinds the
/// parameter slots.
pub struct Statement {
   sql: Arc<str>,
   parameter_count: usize,
   backend: Backend,
   closed: Arc<AtomicBool>,
   slots: Mutex<Vec<Value>>,
   state: Mutex<StatementState>,
}

impl Statement {
   pub(crate) fn new(
      sql: Arc<str>,
      parameter_count: usize,
      backend: Backend,
      closed: Arc<AtomicBool>,
   ) -> Self {
      Self {
         sql,
         parameter_count,
         backend,
         closed,
         slots: Mutex::new(Vec::with_capacity(parameter_count)),
         state: Mutex::new(StatementState::Prepared),
      }
   }

   pub fn sql(&self) -> &str {
      &self.sql
   }

   /// Number of placeholders in the SQL text.
   pub fn parameter_count(&self) -> usize {
      self.parameter_count
   }

   pub fn state(&self) -> StatementState {
      if self.closed.load(Ordering::Acquire) {
         return StatementState::Disposed;
      }
      *self.state.lock()
   }

   /// Execute and return the first row, or `None` when there is none.
   pub async fn get(&self, params: impl Into<Params>) -> Result<Option<Row>> {
      let bound = self.bind(params.into())?;
      let rows = self.backend.query(&self.sql, bound, FetchMode::One).await;
      self.finish(rows).map(|rows| rows.into_iter().next())
   }

   /// Execute and return every row.
   pub async fn all(&self, params: impl Into<Params>) -> Result<Rows> {
      let bound = self.bind(params.into())?;
      let rows = self.backend.query(&self.sql, bound, FetchMode::All).await;
      self.finish(rows).map(Rows::new)
   }

   /// Execute for side effects.
   pub async fn run(&self, params: impl Into<Params>) -> Result<RunResult> {
      let bound = self.bind(params.into())?;
      let result = self.backend.run(&self.sql, bound).await;
      self.finish(result)
   }

   fn bind(&self, params: Params) -> Result<Vec<Value>> {
      if self.closed.load(Ordering::Acquire) {
         return Err(Error::StatementAfterClose);
      }
      check_parameter_count(self.parameter_count, params.len())?;

      let mut slots = self.slots.lock();
      slots.clear();
      slots.extend(params.into_inner());
      *self.state.lock() = StatementState::Bound;
      Ok(slots.clone())
   }

   fn finish<T>(&self, result: Result<T>) -> Result<T> {
      if result.is_ok() {
         *self.state.lock() = StatementState::Executed;
      }
      result
   }
}

impl std::fmt::Debug for Statement {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Statement")
         .field("sql", &self.sql)
         .field("parameter_count", &self.parameter_count)
         .field("backend", &self.backend.variant())
         .field("state", &self.state())
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_run_result_maps_zero_rowid_to_none() {
      assert_eq!(RunResult::new(0, 0).last_insert_id, None);
      assert_eq!(RunResult::new(1, 42).last_insert_id, Some(42));
   }

   #[test]
   fn test_run_result_serializes_camel_case() {
      let json = serde_json::to_value(RunResult::new(2, 9)).unwrap();
      assert_eq!(json, serde_json::json!({ "changes": 2, "lastInsertId": 9 }));
   }
}
