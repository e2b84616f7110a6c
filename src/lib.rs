//! # node-catalog-store
//!
//! The persisted node catalog: node descriptors and task templates in a
//! single SQLite dataset file, read and written through
//! [`sqlite_dual_adapter`]. Whether the native or the portable engine serves
//! the file is decided when the store is opened.
//!
//! ```no_run
//! use node_catalog_store::{NodeFilter, NodeRepository};
//! use sqlite_dual_adapter::AdapterConfig;
//!
//! # async fn example() -> node_catalog_store::Result<()> {
//! let store = NodeRepository::open("nodes.db", AdapterConfig::from_env()?).await?;
//! let triggers = store.list_nodes(&NodeFilter::new().triggers_only()).await?;
//! println!("{} trigger nodes", triggers.len());
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod models;
mod repository;
pub mod schema;

pub use error::{Error, Result};
pub use models::{DevelopmentStyle, NodeDescriptor, NodeFilter, TaskTemplate};
pub use repository::NodeRepository;

pub use sqlite_dual_adapter;
