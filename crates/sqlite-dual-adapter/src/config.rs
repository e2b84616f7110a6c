//! Configuration for opening a dataset through the adapter

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Environment variable consulted by [`AdapterConfig::from_env`].
pub const ENGINE_ENV_VAR: &str = "NODE_CATALOG_SQLITE_ENGINE";

/// Which engine the factory should try.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnginePreference {
   /// Probe the native engine and fall back to the portable one.
   #[default]
   Auto,
   /// Native engine only. Opening fails instead of falling back.
   Native,
   /// Skip the probe and always use the portable engine.
   Portable,
}

impl FromStr for EnginePreference {
   type Err = Error;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s.trim().to_ascii_lowercase().as_str() {
         "" | "auto" => Ok(EnginePreference::Auto),
         "native" => Ok(EnginePreference::Native),
         "portable" => Ok(EnginePreference::Portable),
         other => Err(Error::Config(format!(
            "unknown engine '{other}', expected auto, native or portable"
         ))),
      }
   }
}

impl fmt::Display for EnginePreference {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(match self {
         EnginePreference::Auto => "auto",
         EnginePreference::Native => "native",
         EnginePreference::Portable => "portable",
      })
   }
}

/// Settings specific to the portable engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortableConfig {
   /// Write the in-memory image back to disk this long after the last
   /// mutation.
   ///
   /// `None` means the image is only written by an explicit flush, on close,
   /// or when the last handle is dropped.
   ///
   /// Default: None
   pub autosave_delay: Option<Duration>,
}

/// Configuration for [`crate::AdapterFactory`]
///
/// # Examples
///
/// ```
/// use sqlite_dual_adapter::{AdapterConfig, EnginePreference};
///
/// // Use defaults
/// let config = AdapterConfig::default();
///
/// // Override just one field
/// let config = AdapterConfig {
///     engine: EnginePreference::Portable,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterConfig {
   /// Engine selection policy.
   ///
   /// Default: [`EnginePreference::Auto`]
   pub engine: EnginePreference,

   /// Create an empty dataset when the file does not exist.
   ///
   /// Default: false
   pub create_if_missing: bool,

   /// How long the native engine waits on a locked file before failing.
   ///
   /// Default: 5 seconds
   pub busy_timeout: Duration,

   /// Number of parsed statements the native engine keeps cached.
   ///
   /// Default: 64
   pub statement_cache_capacity: usize,

   /// Enforce foreign keys on both engines.
   ///
   /// Default: true
   pub foreign_keys: bool,

   pub portable: PortableConfig,
}

impl Default for AdapterConfig {
   fn default() -> Self {
      Self {
         engine: EnginePreference::Auto,
         create_if_missing: false,
         busy_timeout: Duration::from_secs(5),
         statement_cache_capacity: 64,
         foreign_keys: true,
         portable: PortableConfig::default(),
      }
   }
}

impl AdapterConfig {
   /// Defaults, with the engine preference taken from
   /// [`ENGINE_ENV_VAR`] when it is set.
   pub fn from_env() -> Result<Self, Error> {
      let mut config = Self::default();
      if let Ok(value) = std::env::var(ENGINE_ENV_VAR) {
         config.engine = value.parse()?;
      }
      Ok(config)
   }
}
