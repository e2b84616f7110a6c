//! Adapter factory and the adapter handle callers hold.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, BackendVariant};
use crate::native::NativeBackend;
use crate::portable::PortableBackend;
use crate::probe::{EngineProbe, NativeProbe, ProbeResult};
use crate::statement::{FetchMode, Statement};
use crate::{AdapterConfig, EnginePreference, Error, Params, Result, Row, RunResult, Value};

/// Open `path` with the default configuration and the production probe.
pub async fn create_adapter(path: impl AsRef<Path>) -> Result<Adapter> {
   AdapterFactory::new(AdapterConfig::default()).open(path).await
}

/// Chooses an engine and opens datasets with it.
pub struct AdapterFactory {
   config: AdapterConfig,
   probe: Arc<dyn EngineProbe>,
}

impl AdapterFactory {
   pub fn new(config: AdapterConfig) -> Self {
      Self {
         config,
         probe: Arc::new(NativeProbe::new()),
      }
   }

   /// Replace the capability probe.
   pub fn with_probe(mut self, probe: Arc<dyn EngineProbe>) -> Self {
      self.probe = probe;
      self
   }

   pub fn config(&self) -> &AdapterConfig {
      &self.config
   }

   /// Open the dataset at `path`.
   ///
   /// Unless the configuration pins an engine, the native engine is tried
   /// first and the portable engine is used when the probe reports the native
   /// one unavailable or it fails to open the file. A portable adapter is only
   /// returned once its image is loaded.
   ///
   /// # Errors
   ///
   /// [`Error::AdapterInit`] naming each attempted engine's failure.
   pub async fn open(&self, path: impl AsRef<Path>) -> Result<Adapter> {
      let path = path.as_ref();
      let mut failures = Vec::new();

      if self.config.engine != EnginePreference::Portable {
         match self.probe.probe() {
            ProbeResult::Available => match NativeBackend::open(path, &self.config) {
               Ok(native) => return Ok(Adapter::new(path, Backend::Native(Arc::new(native)))),
               Err(e) => {
                  warn!(path = %path.display(), error = %e, "Native backend failed to open");
                  failures.push(format!("native: {e}"));
               }
            },
            ProbeResult::Unavailable(reason) => {
               debug!(path = %path.display(), reason = %reason, "Native engine unavailable");
               failures.push(format!("native: {reason}"));
            }
         }

         if self.config.engine == EnginePreference::Native {
            return Err(init_error(&failures));
         }
      }

      match open_portable(path, &self.config).await {
         Ok(portable) => Ok(Adapter::new(path, Backend::Portable(portable))),
         Err(e) => {
            failures.push(format!("portable: {e}"));
            Err(init_error(&failures))
         }
      }
   }
}

impl std::fmt::Debug for AdapterFactory {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("AdapterFactory")
         .field("config", &self.config)
         .finish_non_exhaustive()
   }
}

async fn open_portable(path: &Path, config: &AdapterConfig) -> Result<PortableBackend> {
   let portable = PortableBackend::start(path, config)?;
   match portable.ready().await {
      Ok(()) => Ok(portable),
      // Unwrap the worker's reason; the caller adds its own context.
      Err(Error::AdapterInit { reason }) => Err(Error::Engine(reason)),
      Err(e) => Err(e),
   }
}

fn init_error(failures: &[String]) -> Error {
   Error::AdapterInit {
      reason: failures.join("; "),
   }
}

struct AdapterInner {
   id: Uuid,
   path: PathBuf,
   backend: Backend,
   closed: Arc<AtomicBool>,
}

/// An open dataset. Clones share the same backend.
#[derive(Clone)]
pub struct Adapter {
   inner: Arc<AdapterInner>,
}

impl Adapter {
   fn new(path: &Path, backend: Backend) -> Self {
      let adapter = Self {
         inner: Arc::new(AdapterInner {
            id: Uuid::new_v4(),
            path: path.to_path_buf(),
            backend,
            closed: Arc::new(AtomicBool::new(false)),
         }),
      };
      info!(
         adapter_id = %adapter.inner.id,
         path = %path.display(),
         variant = %adapter.backend_variant(),
         "Adapter opened"
      );
      adapter
   }

   /// Unique identifier for this adapter, used in log fields.
   pub fn id(&self) -> Uuid {
      self.inner.id
   }

   pub fn path(&self) -> &Path {
      &self.inner.path
   }

   /// The engine chosen when the adapter was opened.
   pub fn backend_variant(&self) -> BackendVariant {
      self.inner.backend.variant()
   }

   pub fn is_closed(&self) -> bool {
      self.inner.closed.load(Ordering::Acquire)
   }

   fn ensure_open(&self) -> Result<()> {
      if self.is_closed() {
         return Err(Error::StatementAfterClose);
      }
      Ok(())
   }

   /// Parse `sql` into a reusable [`Statement`].
   pub async fn prepare(&self, sql: &str) -> Result<Statement> {
      self.ensure_open()?;
      let parameter_count = self.inner.backend.prepare(sql).await?;
      Ok(Statement::new(
         Arc::from(sql),
         parameter_count,
         self.inner.backend.clone(),
         Arc::clone(&self.inner.closed),
      ))
   }

   /// Execute a schema or migration batch.
   ///
   /// SQL the engine cannot parse is reported as [`Error::Schema`].
   pub async fn exec_batch(&self, sql: &str) -> Result<()> {
      self.ensure_open()?;
      self
         .inner
         .backend
         .exec_batch(sql)
         .await
         .map_err(Error::into_schema_error)
   }

   /// Read or set a pragma.
   ///
   /// `name` must be a plain identifier since it is interpolated into the SQL.
   pub async fn pragma(&self, name: &str, value: Option<Value>) -> Result<Vec<Row>> {
      self.ensure_open()?;
      validate_pragma_name(name)?;

      let sql = match value {
         None => format!("PRAGMA {name}"),
         Some(value) => format!("PRAGMA {name} = {}", pragma_literal(&value)?),
      };
      self
         .inner
         .backend
         .query(&Arc::from(sql), Vec::new(), FetchMode::All)
         .await
   }

   /// Run every statement in one `BEGIN IMMEDIATE` transaction.
   ///
   /// On the first failure the transaction is rolled back and that error is
   /// returned.
   pub async fn transaction<I, S, P>(&self, statements: I) -> Result<Vec<RunResult>>
   where
      I: IntoIterator<Item = (S, P)>,
      S: Into<String>,
      P: Into<Params>,
   {
      self.ensure_open()?;
      let statements = statements
         .into_iter()
         .map(|(sql, params)| (sql.into(), params.into().into_inner()))
         .collect();
      self.inner.backend.transaction(statements).await
   }

   pub async fn in_transaction(&self) -> Result<bool> {
      self.ensure_open()?;
      self.inner.backend.in_transaction().await
   }

   /// Whether the loaded engine was built with FTS5.
   pub async fn has_fts5(&self) -> Result<bool> {
      self.ensure_open()?;
      let rows = self
         .inner
         .backend
         .query(
            &Arc::from("SELECT sqlite_compileoption_used('ENABLE_FTS5') AS fts5"),
            Vec::new(),
            FetchMode::One,
         )
         .await?;
      Ok(rows.first().and_then(|row| row.get_i64("fts5")) == Some(1))
   }

   /// Persist pending changes. Only the portable engine buffers writes.
   pub async fn flush(&self) -> Result<()> {
      self.ensure_open()?;
      self.inner.backend.flush().await
   }

   /// Close the backend. Later calls are no-ops.
   ///
   /// Statements prepared from this adapter fail with
   /// [`Error::StatementAfterClose`] from here on.
   pub async fn close(&self) -> Result<()> {
      if self.inner.closed.swap(true, Ordering::AcqRel) {
         return Ok(());
      }

      self.inner.backend.close().await?;
      info!(adapter_id = %self.inner.id, path = %self.inner.path.display(), "Adapter closed");
      Ok(())
   }
}

impl std::fmt::Debug for Adapter {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Adapter")
         .field("id", &self.inner.id)
         .field("path", &self.inner.path)
         .field("variant", &self.backend_variant())
         .field("closed", &self.is_closed())
         .finish()
   }
}

fn validate_pragma_name(name: &str) -> Result<()> {
   static PRAGMA_NAME: OnceLock<Regex> = OnceLock::new();
   let pattern =
      PRAGMA_NAME.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("invalid regex"));

   if pattern.is_match(name) {
      Ok(())
   } else {
      Err(Error::InvalidPragmaName(name.to_string()))
   }
}

fn pragma_literal(value: &Value) -> Result<String> {
   match value {
      Value::Null => Ok("NULL".to_string()),
      Value::Integer(i) => Ok(i.to_string()),
      Value::Real(r) => Ok(r.to_string()),
      Value::Text(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
      Value::Blob(_) => Err(Error::UnsupportedDatatype(
         "blob values cannot be assigned to a pragma".to_string(),
      )),
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_pragma_name_validation() {
      assert!(validate_pragma_name("user_version").is_ok());
      assert!(validate_pragma_name("_x9").is_ok());

      for bad in ["", "9lives", "user_version; DROP TABLE nodes", "a-b", "a b"] {
         assert!(
            matches!(validate_pragma_name(bad), Err(Error::InvalidPragmaName(_))),
            "{bad:?} should be rejected"
         );
      }
   }

   #[test]
   fn test_pragma_literal_quotes_text() {
      assert_eq!(pragma_literal(&Value::from("it's")).unwrap(), "'it''s'");
      assert_eq!(pragma_literal(&Value::Integer(7)).unwrap(), "7");
      assert_eq!(pragma_literal(&Value::Null).unwrap(), "NULL");
      assert!(pragma_literal(&Value::Blob(vec![1])).is_err());
   }
}
