use std::ffi::OsString;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Executor, Statement as _};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{Command, EngineState, Reply, WorkerOptions, decode, image};
use crate::statement::FetchMode;
use crate::value::check_parameter_count;
use crate::{Error, Result, Row, RunResult, Value};

/// Worker task body: load the image, then serve commands until closed.
pub(super) async fn run(
   path: PathBuf,
   options: WorkerOptions,
   mut commands: mpsc::Receiver<Command>,
   state: watch::Sender<EngineState>,
) {
   state.send_replace(EngineState::Loading);

   let mut engine = match Engine::load(path.clone(), &options).await {
      Ok(engine) => engine,
      Err(e) => {
         let reason = e.to_string();
         warn!(path = %path.display(), error = %reason, "Portable engine failed to load");
         state.send_replace(EngineState::Failed(reason.clone()));
         reject_pending(&mut commands, || Error::AdapterInit {
            reason: reason.clone(),
         })
         .await;
         return;
      }
   };

   state.send_replace(EngineState::Ready);
   info!(path = %path.display(), "Portable engine ready");

   loop {
      let command = match engine.autosave_deadline {
         Some(deadline) => tokio::select! {
            command = commands.recv() => command,
            () = tokio::time::sleep_until(deadline) => {
               engine.autosave().await;
               continue;
            }
         },
         None => commands.recv().await,
      };

      let Some(command) = command else {
         debug!(path = %path.display(), "All portable handles dropped, shutting down");
         if let Err(e) = engine.shutdown().await {
            warn!(path = %path.display(), error = %e, "Portable engine shutdown failed");
         }
         state.send_replace(EngineState::Closed);
         return;
      };

      trace!(command = command.name(), "Dispatching portable command");

      if let ControlFlow::Break(reply) = engine.handle(command).await {
         let result = engine.shutdown().await;
         state.send_replace(EngineState::Closed);
         let _ = reply.send(result);
         reject_pending(&mut commands, || Error::StatementAfterClose).await;
         debug!(path = %path.display(), "Portable engine closed");
         return;
      }
   }
}

/// Stop accepting commands and fail everything still queued.
async fn reject_pending(commands: &mut mpsc::Receiver<Command>, error: impl Fn() -> Error) {
   commands.close();
   while let Some(command) = commands.recv().await {
      command.reject(error());
   }
}

struct Engine {
   conn: SqliteConnection,
   path: PathBuf,
   dirty: bool,
   autosave_delay: Option<Duration>,
   autosave_deadline: Option<Instant>,
}

impl Engine {
   async fn load(path: PathBuf, options: &WorkerOptions) -> Result<Self> {
      let bytes = match tokio::fs::read(&path).await {
         Ok(bytes) => Some(bytes),
         Err(e) if e.kind() == std::io::ErrorKind::NotFound && options.create_if_missing => None,
         Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::StorageIo(format!(
               "dataset file not found: {}",
               path.display()
            )));
         }
         Err(e) => return Err(e.into()),
      };
      let created = bytes.is_none();

      let mut conn = SqliteConnectOptions::from_str("sqlite::memory:")?
         .shared_cache(false)
         .foreign_keys(options.foreign_keys)
         .disable_statement_logging()
         .connect()
         .await?;

      if let Some(bytes) = bytes {
         let image = image::normalize(bytes)?;
         if !image.is_empty() {
            image::load(&mut conn, &image).await?;
         }
      }

      // The image is only parsed once a page is read.
      sqlx::query("SELECT count(*) FROM sqlite_master")
         .fetch_one(&mut conn)
         .await?;

      let mut engine = Self {
         conn,
         path,
         dirty: created,
         autosave_delay: options.autosave_delay,
         autosave_deadline: None,
      };

      if created {
         engine.persist().await?;
      }

      Ok(engine)
   }

   /// Run one command. Returns `Break` with the reply channel on close.
   async fn handle(&mut self, command: Command) -> ControlFlow<Reply<()>> {
      match command {
         Command::Prepare { sql, reply } => {
            let result = self.describe(&sql).await.map(|d| d.parameters);
            let _ = reply.send(result);
         }
         Command::Query {
            sql,
            params,
            mode,
            reply,
         } => {
            let result = self.query(&sql, &params, mode).await;
            let _ = reply.send(result);
         }
         Command::Run { sql, params, reply } => {
            let result = self.run(&sql, &params).await;
            let _ = reply.send(result);
         }
         Command::ExecBatch { sql, reply } => {
            let result = sqlx::raw_sql(&sql)
               .execute(&mut self.conn)
               .await
               .map(|_| ())
               .map_err(Error::from);
            self.mark_dirty();
            let _ = reply.send(result);
         }
         Command::Transaction { statements, reply } => {
            let result = self.transaction(statements).await;
            self.mark_dirty();
            let _ = reply.send(result);
         }
         Command::InTransaction { reply } => {
            let result = image::is_autocommit(&mut self.conn).await.map(|auto| !auto);
            let _ = reply.send(result);
         }
         Command::Flush { reply } => {
            let result = self.persist().await;
            let _ = reply.send(result);
         }
         Command::Close { reply } => return ControlFlow::Break(reply),
      }
      ControlFlow::Continue(())
   }

   async fn describe(&mut self, sql: &str) -> Result<Description> {
      let statement = (&mut self.conn).prepare(sql).await?;
      Ok(Description {
         parameters: statement
            .parameters()
            .map_or(0, |p| p.either(|types| types.len(), |count| count)),
         returns_rows: !statement.columns().is_empty(),
      })
   }

   async fn query(&mut self, sql: &str, params: &[Value], mode: FetchMode) -> Result<Vec<Row>> {
      let description = self.describe(sql).await?;
      check_parameter_count(description.parameters, params.len())?;

      let changes_before = image::total_changes(&mut self.conn).await?;
      let query = bind_values(sqlx::query(sql), params);
      let rows = match mode {
         FetchMode::One => query.fetch_optional(&mut self.conn).await?.into_iter().collect(),
         FetchMode::All => query.fetch_all(&mut self.conn).await?,
      };

      // Writes can arrive here too: `INSERT ... RETURNING`, or a pragma
      // assignment, which yields no columns and counts no changes.
      let wrote = image::total_changes(&mut self.conn).await? != changes_before;
      if wrote || !description.returns_rows {
         self.mark_dirty();
      }

      rows.iter().map(decode::decode_row).collect()
   }

   async fn run(&mut self, sql: &str, params: &[Value]) -> Result<RunResult> {
      let description = self.describe(sql).await?;
      check_parameter_count(description.parameters, params.len())?;

      let changes_before = image::total_changes(&mut self.conn).await?;
      let result = bind_values(sqlx::query(sql), params)
         .execute(&mut self.conn)
         .await?;

      let wrote = image::total_changes(&mut self.conn).await? != changes_before;
      if wrote || !description.returns_rows {
         self.mark_dirty();
      }
      if description.returns_rows && !wrote {
         // Reads executed through `run` report no changes.
         return Ok(RunResult::default());
      }

      Ok(RunResult::new(result.rows_affected(), result.last_insert_rowid()))
   }

   async fn transaction(&mut self, statements: Vec<(String, Vec<Value>)>) -> Result<Vec<RunResult>> {
      sqlx::query("BEGIN IMMEDIATE").execute(&mut self.conn).await?;

      let mut results = Vec::with_capacity(statements.len());
      let mut failure = None;
      for (sql, params) in &statements {
         match self.run(sql, params).await {
            Ok(result) => results.push(result),
            Err(e) => {
               failure = Some(e);
               break;
            }
         }
      }

      let error = match failure {
         Some(e) => e,
         None => match sqlx::query("COMMIT").execute(&mut self.conn).await {
            Ok(_) => return Ok(results),
            Err(e) => e.into(),
         },
      };
      self.rollback(error).await
   }

   /// Abandon the open transaction after `error`. A failed `COMMIT` may
   /// already have ended it, in which case there is nothing to roll back.
   async fn rollback<T>(&mut self, error: Error) -> Result<T> {
      if image::is_autocommit(&mut self.conn).await? {
         return Err(error);
      }

      match sqlx::query("ROLLBACK").execute(&mut self.conn).await {
         Ok(_) => Err(error),
         Err(rollback_err) => Err(Error::TransactionRollbackFailed {
            transaction_error: error.to_string(),
            rollback_error: rollback_err.to_string(),
         }),
      }
   }

   fn mark_dirty(&mut self) {
      self.dirty = true;
      if let Some(delay) = self.autosave_delay {
         self.autosave_deadline = Some(Instant::now() + delay);
      }
   }

   /// Write the image to the dataset file if anything changed since the last write.
   async fn persist(&mut self) -> Result<()> {
      if !self.dirty {
         return Ok(());
      }

      let bytes = image::store(&mut self.conn).await?;
      write_atomically(&self.path, &bytes).await?;

      self.dirty = false;
      self.autosave_deadline = None;
      debug!(path = %self.path.display(), bytes = bytes.len(), "Portable image written");
      Ok(())
   }

   async fn autosave(&mut self) {
      if let Err(e) = self.persist().await {
         // Stay dirty; close or the next flush retries.
         warn!(path = %self.path.display(), error = %e, "Portable autosave failed");
         self.autosave_deadline = None;
      }
   }

   async fn shutdown(mut self) -> Result<()> {
      let persisted = self.persist().await;
      let closed = self.conn.close().await.map_err(Error::from);
      persisted.and(closed)
   }
}

struct Description {
   parameters: usize,
   returns_rows: bool,
}

fn bind_values<'q>(
   mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
   params: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
   for value in params {
      query = match value.clone() {
         Value::Null => query.bind(None::<i64>),
         Value::Integer(i) => query.bind(i),
         Value::Real(r) => query.bind(r),
         Value::Text(s) => query.bind(s),
         Value::Blob(b) => query.bind(b),
      };
   }
   query
}

/// Replace `path` with `bytes` via a sibling temp file and a rename.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
   let mut temp: OsString = path.as_os_str().to_owned();
   temp.push(".portable-tmp");
   let temp = PathBuf::from(temp);

   tokio::fs::write(&temp, bytes).await?;
   tokio::fs::rename(&temp, path).await?;
   Ok(())
}
