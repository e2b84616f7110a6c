//! Portable backend: an isolated engine worker holding the dataset in memory.
//!
//! The worker task owns an in-memory `sqlx` SQLite connection. On start it
//! reads the dataset file and loads the bytes into the connection, so nothing
//! touches the file again until the image is flushed back. Callers talk to the
//! worker through a single-slot command queue:
//!
//! ```text
//! caller ──send──▶ [ mpsc(1) ] ──▶ worker ──▶ in-memory engine
//!   ▲                                  │
//!   └──────────── oneshot reply ◀──────┘
//! ```
//!
//! Waiting senders are admitted in arrival order, and the worker runs one
//! command at a time, so commands execute strictly FIFO and never
//! concurrently. Commands sent while the image is still loading wait in the
//! queue and run once it is ready (or all receive the initialization error).

mod decode;
mod image;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::statement::FetchMode;
use crate::{AdapterConfig, Error, Result, Row, RunResult, Value};

/// Capacity of the dispatch queue. One slot: a caller's command is only
/// accepted once the worker has taken the previous one.
const DISPATCH_QUEUE_DEPTH: usize = 1;

/// Lifecycle of the portable engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
   /// Worker spawned, not yet running.
   Uninitialized,
   /// Reading the dataset file and loading it into the engine.
   Loading,
   Ready,
   Closed,
   /// Loading failed; the engine never became ready.
   Failed(String),
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Command {
   Prepare {
      sql: String,
      reply: Reply<usize>,
   },
   Query {
      sql: Arc<str>,
      params: Vec<Value>,
      mode: FetchMode,
      reply: Reply<Vec<Row>>,
   },
   Run {
      sql: Arc<str>,
      params: Vec<Value>,
      reply: Reply<RunResult>,
   },
   ExecBatch {
      sql: String,
      reply: Reply<()>,
   },
   Transaction {
      statements: Vec<(String, Vec<Value>)>,
      reply: Reply<Vec<RunResult>>,
   },
   InTransaction {
      reply: Reply<bool>,
   },
   Flush {
      reply: Reply<()>,
   },
   Close {
      reply: Reply<()>,
   },
}

impl Command {
   /// Answer the command with `error` without running it.
   ///
   /// A caller that stopped waiting has dropped its receiver; the failed send
   /// is ignored.
   fn reject(self, error: Error) {
      match self {
         Command::Prepare { reply, .. } => {
            let _ = reply.send(Err(error));
         }
         Command::Query { reply, .. } => {
            let _ = reply.send(Err(error));
         }
         Command::Run { reply, .. } => {
            let _ = reply.send(Err(error));
         }
         Command::ExecBatch { reply, .. }
         | Command::Flush { reply }
         | Command::Close { reply } => {
            let _ = reply.send(Err(error));
         }
         Command::Transaction { reply, .. } => {
            let _ = reply.send(Err(error));
         }
         Command::InTransaction { reply } => {
            let _ = reply.send(Err(error));
         }
      }
   }

   fn name(&self) -> &'static str {
      match self {
         Command::Prepare { .. } => "prepare",
         Command::Query { .. } => "query",
         Command::Run { .. } => "run",
         Command::ExecBatch { .. } => "exec_batch",
         Command::Transaction { .. } => "transaction",
         Command::InTransaction { .. } => "in_transaction",
         Command::Flush { .. } => "flush",
         Command::Close { .. } => "close",
      }
   }
}

/// Settings the worker needs, copied out of [`AdapterConfig`].
#[derive(Debug, Clone)]
pub(crate) struct WorkerOptions {
   pub create_if_missing: bool,
   pub foreign_keys: bool,
   pub autosave_delay: Option<Duration>,
}

impl From<&AdapterConfig> for WorkerOptions {
   fn from(config: &AdapterConfig) -> Self {
      Self {
         create_if_missing: config.create_if_missing,
         foreign_keys: config.foreign_keys,
         autosave_delay: config.portable.autosave_delay,
      }
   }
}

struct Shared {
   commands: mpsc::Sender<Command>,
   state: watch::Receiver<EngineState>,
   path: PathBuf,
}

/// Handle to a portable engine worker. Clones share the same worker.
#[derive(Clone)]
pub struct PortableBackend {
   inner: Arc<Shared>,
}

impl PortableBackend {
   /// Spawn the engine worker for the dataset at `path`.
   ///
   /// Returns immediately with the engine in [`EngineState::Loading`] (or
   /// about to enter it). The worker runs on its own thread with a
   /// single-threaded runtime, so the engine connection never moves between
   /// threads and the caller's runtime flavour does not matter.
   pub fn start(path: impl AsRef<Path>, config: &AdapterConfig) -> Result<Self> {
      let runtime = tokio::runtime::Builder::new_current_thread()
         .enable_all()
         .build()?;

      let path = path.as_ref().to_path_buf();
      let (commands, receiver) = mpsc::channel(DISPATCH_QUEUE_DEPTH);
      let (state_tx, state) = watch::channel(EngineState::Uninitialized);

      let worker_path = path.clone();
      let options = WorkerOptions::from(config);
      std::thread::Builder::new()
         .name("portable-engine".to_string())
         .spawn(move || runtime.block_on(worker::run(worker_path, options, receiver, state_tx)))?;
      debug!(path = %path.display(), "Portable engine worker spawned");

      Ok(Self {
         inner: Arc::new(Shared {
            commands,
            state,
            path,
         }),
      })
   }

   pub fn path(&self) -> &Path {
      &self.inner.path
   }

   /// Current lifecycle state.
   pub fn state(&self) -> EngineState {
      self.inner.state.borrow().clone()
   }

   /// Wait until the engine is ready.
   ///
   /// Fails with [`Error::AdapterInit`] if loading failed and with
   /// [`Error::StatementAfterClose`] if the engine was closed.
   pub async fn ready(&self) -> Result<()> {
      let mut state = self.inner.state.clone();
      let settled = state
         .wait_for(|s| !matches!(s, EngineState::Uninitialized | EngineState::Loading))
         .await
         .map(|s| s.clone());

      match settled {
         Ok(EngineState::Ready) => Ok(()),
         Ok(EngineState::Failed(reason)) => Err(Error::AdapterInit { reason }),
         Ok(_) => Err(Error::StatementAfterClose),
         Err(_) => Err(self.unavailable()),
      }
   }

   /// Parse `sql` inside the engine and return its placeholder count.
   pub async fn prepare(&self, sql: &str) -> Result<usize> {
      let sql = sql.to_string();
      self
         .dispatch(|reply| Command::Prepare { sql, reply })
         .await
   }

   /// Run a row-returning statement.
   pub async fn query(&self, sql: Arc<str>, params: Vec<Value>, mode: FetchMode) -> Result<Vec<Row>> {
      self
         .dispatch(|reply| Command::Query {
            sql,
            params,
            mode,
            reply,
         })
         .await
   }

   /// Run a statement for its side effects. Marks the image dirty.
   pub async fn run(&self, sql: Arc<str>, params: Vec<Value>) -> Result<RunResult> {
      self
         .dispatch(|reply| Command::Run { sql, params, reply })
         .await
   }

   /// Execute one or more `;`-separated statements without parameters.
   pub async fn exec_batch(&self, sql: &str) -> Result<()> {
      let sql = sql.to_string();
      self
         .dispatch(|reply| Command::ExecBatch { sql, reply })
         .await
   }

   /// Execute every statement inside one `BEGIN IMMEDIATE` transaction.
   ///
   /// The whole transaction is a single command, so no other caller's
   /// command can interleave with it.
   pub async fn transaction(&self, statements: Vec<(String, Vec<Value>)>) -> Result<Vec<RunResult>> {
      self
         .dispatch(|reply| Command::Transaction { statements, reply })
         .await
   }

   pub async fn in_transaction(&self) -> Result<bool> {
      self
         .dispatch(|reply| Command::InTransaction { reply })
         .await
   }

   /// Write the in-memory image back to the dataset file if it changed.
   pub async fn flush(&self) -> Result<()> {
      self.dispatch(|reply| Command::Flush { reply }).await
   }

   /// Drain queued commands, flush, and release the engine.
   ///
   /// Calling this again, or on an engine that failed to load, is a no-op.
   pub async fn close(&self) -> Result<()> {
      if matches!(self.state(), EngineState::Closed | EngineState::Failed(_)) {
         return Ok(());
      }

      match self.dispatch(|reply| Command::Close { reply }).await {
         Err(Error::StatementAfterClose | Error::AdapterInit { .. }) => Ok(()),
         other => other,
      }
   }

   async fn dispatch<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
      let (reply, response) = oneshot::channel();

      if self.inner.commands.send(command(reply)).await.is_err() {
         return Err(self.unavailable());
      }

      match response.await {
         Ok(result) => result,
         Err(_) => Err(self.unavailable()),
      }
   }

   /// Error for a command the worker can no longer accept.
   fn unavailable(&self) -> Error {
      match &*self.inner.state.borrow() {
         EngineState::Failed(reason) => Error::AdapterInit {
            reason: reason.clone(),
         },
         _ => Error::StatementAfterClose,
      }
   }
}

impl std::fmt::Debug for PortableBackend {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("PortableBackend")
         .field("path", &self.inner.path)
         .field("state", &self.state())
         .finish()
   }
}
