//! Dispatch over the two engines.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::native::NativeBackend;
use crate::portable::PortableBackend;
use crate::statement::FetchMode;
use crate::{Result, Row, RunResult, Value};

/// Which engine serves an adapter. Fixed for the adapter's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendVariant {
   Native,
   Portable,
}

impl fmt::Display for BackendVariant {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(match self {
         BackendVariant::Native => "native",
         BackendVariant::Portable => "portable",
      })
   }
}

#[derive(Clone)]
pub(crate) enum Backend {
   Native(Arc<NativeBackend>),
   Portable(PortableBackend),
}

impl Backend {
   pub(crate) fn variant(&self) -> BackendVariant {
      match self {
         Backend::Native(_) => BackendVariant::Native,
         Backend::Portable(_) => BackendVariant::Portable,
      }
   }

   pub(crate) async fn prepare(&self, sql: &str) -> Result<usize> {
      match self {
         Backend::Native(native) => native.prepare(sql),
         Backend::Portable(portable) => portable.prepare(sql).await,
      }
   }

   pub(crate) async fn query(
      &self,
      sql: &Arc<str>,
      params: Vec<Value>,
      mode: FetchMode,
   ) -> Result<Vec<Row>> {
      match self {
         Backend::Native(native) => native.query(sql, &params, mode),
         Backend::Portable(portable) => portable.query(Arc::clone(sql), params, mode).await,
      }
   }

   pub(crate) async fn run(&self, sql: &Arc<str>, params: Vec<Value>) -> Result<RunResult> {
      match self {
         Backend::Native(native) => native.run(sql, &params),
         Backend::Portable(portable) => portable.run(Arc::clone(sql), params).await,
      }
   }

   pub(crate) async fn exec_batch(&self, sql: &str) -> Result<()> {
      match self {
         Backend::Native(native) => native.exec_batch(sql),
         Backend::Portable(portable) => portable.exec_batch(sql).await,
      }
   }

   pub(crate) async fn transaction(
      &self,
      statements: Vec<(String, Vec<Value>)>,
   ) -> Result<Vec<RunResult>> {
      match self {
         Backend::Native(native) => native.transaction(&statements),
         Backend::Portable(portable) => portable.transaction(statements).await,
      }
   }

   pub(crate) async fn in_transaction(&self) -> Result<bool> {
      match self {
         Backend::Native(native) => native.in_transaction(),
         Backend::Portable(portable) => portable.in_transaction().await,
      }
   }

   pub(crate) async fn flush(&self) -> Result<()> {
      match self {
         Backend::Native(_) => Ok(()),
         Backend::Portable(portable) => portable.flush().await,
      }
   }

   pub(crate) async fn close(&self) -> Result<()> {
      match self {
         Backend::Native(native) => native.close(),
         Backend::Portable(portable) => portable.close().await,
      }
   }
}
