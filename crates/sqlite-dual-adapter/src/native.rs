//! Native backend: a `rusqlite` connection working directly on the dataset file.
//!
//! Every call runs to completion on the calling thread. The connection sits
//! behind a mutex so the backend can be shared, and is taken out of it on
//! close.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{CachedStatement, Connection, OpenFlags, params_from_iter};
use tracing::{debug, warn};

use crate::statement::FetchMode;
use crate::value::check_parameter_count;
use crate::{AdapterConfig, Error, Result, Row, RunResult, Value};

impl ToSql for Value {
   fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
      Ok(ToSqlOutput::Borrowed(match self {
         Value::Null => ValueRef::Null,
         Value::Integer(i) => ValueRef::Integer(*i),
         Value::Real(r) => ValueRef::Real(*r),
         Value::Text(s) => ValueRef::Text(s.as_bytes()),
         Value::Blob(b) => ValueRef::Blob(b),
      }))
   }
}

impl TryFrom<ValueRef<'_>> for Value {
   type Error = Error;

   fn try_from(value: ValueRef<'_>) -> Result<Self> {
      Ok(match value {
         ValueRef::Null => Value::Null,
         ValueRef::Integer(i) => Value::Integer(i),
         ValueRef::Real(r) => Value::Real(r),
         ValueRef::Text(t) => Value::Text(
            std::str::from_utf8(t)
               .map_err(|e| Error::Decode(e.to_string()))?
               .to_owned(),
         ),
         ValueRef::Blob(b) => Value::Blob(b.to_vec()),
      })
   }
}

/// Synchronous backend over an on-disk SQLite file.
#[derive(Debug)]
pub struct NativeBackend {
   conn: Mutex<Option<Connection>>,
   path: PathBuf,
}

impl NativeBackend {
   /// Open the dataset at `path`.
   ///
   /// The file is read once before returning so that a corrupt or foreign
   /// file fails here rather than on the first query.
   pub fn open(path: impl AsRef<Path>, config: &AdapterConfig) -> Result<Self> {
      let path = path.as_ref();

      let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
         | OpenFlags::SQLITE_OPEN_URI
         | OpenFlags::SQLITE_OPEN_NO_MUTEX;
      if config.create_if_missing {
         flags |= OpenFlags::SQLITE_OPEN_CREATE;
      }

      let conn = Connection::open_with_flags(path, flags)?;
      conn.busy_timeout(config.busy_timeout)?;
      conn.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
      conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
      conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))?;

      debug!(path = %path.display(), "Native backend opened");

      Ok(Self {
         conn: Mutex::new(Some(conn)),
         path: path.to_path_buf(),
      })
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn is_closed(&self) -> bool {
      self.conn.lock().is_none()
   }

   fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
      let guard = self.conn.lock();
      let conn = guard.as_ref().ok_or(Error::StatementAfterClose)?;
      f(conn)
   }

   /// Parse `sql` (caching it) and return its placeholder count.
   pub fn prepare(&self, sql: &str) -> Result<usize> {
      self.with_conn(|conn| Ok(conn.prepare_cached(sql)?.parameter_count()))
   }

   /// Run a row-returning statement.
   pub fn query(&self, sql: &str, params: &[Value], mode: FetchMode) -> Result<Vec<Row>> {
      self.with_conn(|conn| {
         let mut stmt = conn.prepare_cached(sql)?;
         query_rows(&mut stmt, params, mode)
      })
   }

   /// Run a statement for its side effects.
   pub fn run(&self, sql: &str, params: &[Value]) -> Result<RunResult> {
      self.with_conn(|conn| run_statement(conn, sql, params))
   }

   /// Execute one or more `;`-separated statements without parameters.
   pub fn exec_batch(&self, sql: &str) -> Result<()> {
      self.with_conn(|conn| Ok(conn.execute_batch(sql)?))
   }

   /// Execute every statement inside one `BEGIN IMMEDIATE` transaction.
   pub fn transaction(&self, statements: &[(String, Vec<Value>)]) -> Result<Vec<RunResult>> {
      self.with_conn(|conn| {
         conn.execute_batch("BEGIN IMMEDIATE")?;

         let result = statements
            .iter()
            .map(|(sql, params)| run_statement(conn, sql, params))
            .collect::<Result<Vec<_>>>()
            .and_then(|results| {
               conn.execute_batch("COMMIT")?;
               Ok(results)
            });

         match result {
            Ok(results) => Ok(results),
            Err(e) => rollback(conn, e),
         }
      })
   }

   pub fn in_transaction(&self) -> Result<bool> {
      self.with_conn(|conn| Ok(!conn.is_autocommit()))
   }

   /// Release the connection. Calling this again is a no-op.
   pub fn close(&self) -> Result<()> {
      let Some(conn) = self.conn.lock().take() else {
         return Ok(());
      };

      if let Err((_conn, e)) = conn.close() {
         // The connection is dropped either way; dropping finalizes it.
         warn!(path = %self.path.display(), error = %e, "Native connection did not close cleanly");
         return Err(e.into());
      }

      debug!(path = %self.path.display(), "Native backend closed");
      Ok(())
   }
}

fn query_rows(stmt: &mut CachedStatement<'_>, params: &[Value], mode: FetchMode) -> Result<Vec<Row>> {
   check_parameter_count(stmt.parameter_count(), params.len())?;

   let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
   let mut rows = stmt.query(params_from_iter(params.iter()))?;

   let mut out = Vec::new();
   while let Some(row) = rows.next()? {
      let mut decoded = Row::with_capacity(columns.len());
      for (i, column) in columns.iter().enumerate() {
         decoded.insert(column.clone(), Value::try_from(row.get_ref(i)?)?);
      }
      out.push(decoded);

      if mode == FetchMode::One {
         break;
      }
   }

   Ok(out)
}

/// Abandon the open transaction after `error`. A failed `COMMIT` may already
/// have ended it, in which case there is nothing to roll back.
fn rollback<T>(conn: &Connection, error: Error) -> Result<T> {
   if conn.is_autocommit() {
      return Err(error);
   }

   match conn.execute_batch("ROLLBACK") {
      Ok(()) => Err(error),
      Err(rollback_err) => Err(Error::TransactionRollbackFailed {
         transaction_error: error.to_string(),
         rollback_error: rollback_err.to_string(),
      }),
   }
}

fn run_statement(conn: &Connection, sql: &str, params: &[Value]) -> Result<RunResult> {
   let mut stmt = conn.prepare_cached(sql)?;
   check_parameter_count(stmt.parameter_count(), params.len())?;

   let readonly = stmt.readonly();

   // Stepping through `query` also covers `INSERT ... RETURNING`, which
   // `execute` rejects.
   let mut rows = stmt.query(params_from_iter(params.iter()))?;
   while rows.next()?.is_some() {}
   drop(rows);

   if readonly {
      // Reads executed through `run` report no changes.
      return Ok(RunResult::default());
   }
   Ok(RunResult::new(conn.changes(), conn.last_insert_rowid()))
}
