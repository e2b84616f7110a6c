//! # sqlite-dual-adapter
//!
//! One query contract over two SQLite engines.
//!
//! ## Core Types
//!
//! - **[`AdapterFactory`]**: Probes the native engine and opens a dataset with whichever engine is usable
//! - **[`Adapter`]**: Handle to an open dataset (`prepare`, `exec_batch`, `close`)
//! - **[`Statement`]**: Reusable prepared statement (`get`, `all`, `run`)
//! - **[`Row`]** / **[`Value`]**: Ordered column map over the five SQLite storage classes
//! - **[`Error`]**: Error type shared by both engines
//!
//! ## Engines
//!
//! - **Native**: `rusqlite` working directly on the dataset file. Calls complete synchronously
//! - **Portable**: An isolated engine worker holding the dataset as an in-memory image, fed
//!   through a FIFO dispatch queue and flushed back to the file on demand, on close, or after
//!   an optional autosave delay
//!
//! The engine is chosen once, when the adapter is opened, and never changes afterwards.
//!
//! ## Example
//!
//! ```no_run
//! use sqlite_dual_adapter::{create_adapter, params};
//!
//! # async fn example() -> sqlite_dual_adapter::Result<()> {
//! let adapter = create_adapter("nodes.db").await?;
//! let stmt = adapter.prepare("SELECT * FROM nodes WHERE node_type = ?").await?;
//! if let Some(row) = stmt.get(params!["nodes-base.httpRequest"]).await? {
//!    println!("{:?}", row.get_str("display_name"));
//! }
//! adapter.close().await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod backend;
mod config;
mod error;
mod native;
mod portable;
mod probe;
mod statement;
mod value;

pub use adapter::{Adapter, AdapterFactory, create_adapter};
pub use backend::BackendVariant;
pub use config::{AdapterConfig, ENGINE_ENV_VAR, EnginePreference, PortableConfig};
pub use error::{Error, Result};
pub use native::NativeBackend;
pub use portable::{EngineState, PortableBackend};
pub use probe::{
   EngineProbe, FixedProbe, MIN_NATIVE_SQLITE_VERSION, NativeProbe, ProbeResult, UnavailableReason,
};
pub use statement::{FetchMode, RunResult, Statement, StatementState};
pub use value::{Params, Row, Rows, Value};
