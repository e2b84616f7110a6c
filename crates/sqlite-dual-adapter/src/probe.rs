//! Native engine capability probe.
//!
//! The probe only reports whether the native engine can be used. Choosing a
//! fallback is the factory's job.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use rusqlite::Connection;
use tracing::debug;

/// Oldest SQLite library the native backend accepts (3.35.0).
pub const MIN_NATIVE_SQLITE_VERSION: i32 = 3_035_000;

/// Why the native engine cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
   /// The linked SQLite library is older than the adapter requires.
   VersionMismatch { found: i32, required: i32 },
   /// Opening a connection failed or panicked.
   LoadFailed(String),
   /// Disabled by the host (configuration, test harness, restricted environment).
   Disabled(String),
}

impl fmt::Display for UnavailableReason {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         UnavailableReason::VersionMismatch { found, required } => {
            write!(f, "sqlite library version {found} is older than required {required}")
         }
         UnavailableReason::LoadFailed(message) => write!(f, "native engine failed to load: {message}"),
         UnavailableReason::Disabled(message) => write!(f, "native engine disabled: {message}"),
      }
   }
}

/// Outcome of a capability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
   Available,
   Unavailable(UnavailableReason),
}

impl ProbeResult {
   pub fn is_available(&self) -> bool {
      matches!(self, ProbeResult::Available)
   }
}

/// Reports whether the native engine can be used in this process.
///
/// Implementations must not panic or touch global state beyond the load
/// attempt itself.
pub trait EngineProbe: Send + Sync {
   fn probe(&self) -> ProbeResult;
}

/// Production probe: checks the linked library version, then opens and
/// queries a throwaway in-memory connection.
#[derive(Debug, Clone)]
pub struct NativeProbe {
   min_version: i32,
}

impl NativeProbe {
   pub fn new() -> Self {
      Self {
         min_version: MIN_NATIVE_SQLITE_VERSION,
      }
   }

   /// Require at least this `sqlite3_libversion_number()`.
   pub fn with_min_version(mut self, min_version: i32) -> Self {
      self.min_version = min_version;
      self
   }
}

impl Default for NativeProbe {
   fn default() -> Self {
      Self::new()
   }
}

impl EngineProbe for NativeProbe {
   fn probe(&self) -> ProbeResult {
      let found = rusqlite::version_number();
      if found < self.min_version {
         return ProbeResult::Unavailable(UnavailableReason::VersionMismatch {
            found,
            required: self.min_version,
         });
      }

      let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
         let conn = Connection::open_in_memory()?;
         conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
      }));

      match attempt {
         Ok(Ok(version)) => {
            debug!(version = %version, "Native sqlite engine available");
            ProbeResult::Available
         }
         Ok(Err(e)) => ProbeResult::Unavailable(UnavailableReason::LoadFailed(e.to_string())),
         Err(_) => ProbeResult::Unavailable(UnavailableReason::LoadFailed(
            "panicked while opening a connection".to_string(),
         )),
      }
   }
}

/// Probe that always reports a preset result.
///
/// Lets a host pin the portable engine, and lets tests simulate a missing
/// native build without intercepting anything global.
#[derive(Debug, Clone)]
pub struct FixedProbe(ProbeResult);

impl FixedProbe {
   pub fn new(result: ProbeResult) -> Self {
      Self(result)
   }

   pub fn available() -> Self {
      Self(ProbeResult::Available)
   }

   pub fn unavailable(reason: impl Into<String>) -> Self {
      Self(ProbeResult::Unavailable(UnavailableReason::Disabled(reason.into())))
   }
}

impl EngineProbe for FixedProbe {
   fn probe(&self) -> ProbeResult {
      self.0.clone()
   }
}
