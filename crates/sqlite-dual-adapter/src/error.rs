//! Error types for sqlite-dual-adapter
//!
//! Both engines report failures as SQLite result codes. They are funnelled
//! through [`classify`] so a given failure maps to the same variant no matter
//! which backend produced it.

/// Result type alias for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;

const SQLITE_ERROR: i32 = 1;
const SQLITE_PERM: i32 = 3;
const SQLITE_READONLY: i32 = 8;
const SQLITE_IOERR: i32 = 10;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_FULL: i32 = 13;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_CONSTRAINT: i32 = 19;
const SQLITE_NOTADB: i32 = 26;

/// Errors that may occur when opening or querying a dataset.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Neither backend could open the dataset.
   #[error("adapter initialization failed: {reason}")]
   AdapterInit { reason: String },

   /// SQL text rejected by the engine (malformed SQL, unknown table or column).
   #[error("query syntax error: {0}")]
   QuerySyntax(String),

   /// Unique, foreign key, not-null or check constraint failed.
   #[error("constraint violation: {0}")]
   ConstraintViolation(String),

   /// Number of bound values does not match the statement's placeholders.
   #[error("statement expects {expected} parameters but {actual} were bound")]
   ParameterCountMismatch { expected: usize, actual: usize },

   /// The owning adapter has been closed.
   #[error("statement used after its adapter was closed")]
   StatementAfterClose,

   /// Disk, permission or file-format failure reported by the engine.
   #[error("storage io error: {0}")]
   StorageIo(String),

   /// Standard library IO errors while reading or writing the dataset file.
   #[error("io error: {0}")]
   Io(#[from] std::io::Error),

   /// Malformed schema or migration batch.
   #[error("schema error: {0}")]
   Schema(String),

   /// SQLite storage class outside the five supported value types.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// A result cell could not be converted into a [`crate::Value`].
   #[error("decode error: {0}")]
   Decode(String),

   /// Pragma names are interpolated into SQL and must be plain identifiers.
   #[error("invalid pragma name '{0}': must match [a-zA-Z_][a-zA-Z0-9_]*")]
   InvalidPragmaName(String),

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// Invalid adapter configuration value.
   #[error("invalid configuration: {0}")]
   Config(String),

   /// Engine failure that does not fit another category.
   #[error("engine error: {0}")]
   Engine(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> &'static str {
      match self {
         Error::AdapterInit { .. } => "ADAPTER_INIT_ERROR",
         Error::QuerySyntax(_) => "QUERY_SYNTAX_ERROR",
         Error::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
         Error::ParameterCountMismatch { .. } => "PARAMETER_COUNT_MISMATCH",
         Error::StatementAfterClose => "STATEMENT_AFTER_CLOSE",
         Error::StorageIo(_) | Error::Io(_) => "STORAGE_IO_ERROR",
         Error::Schema(_) => "SCHEMA_ERROR",
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE",
         Error::Decode(_) => "DECODE_ERROR",
         Error::InvalidPragmaName(_) => "INVALID_PRAGMA_NAME",
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED",
         Error::Config(_) => "CONFIG_ERROR",
         Error::Engine(_) => "ENGINE_ERROR",
      }
   }

   /// Re-labels a syntax failure raised while executing a schema batch.
   pub(crate) fn into_schema_error(self) -> Self {
      match self {
         Error::QuerySyntax(message) => Error::Schema(message),
         other => other,
      }
   }
}

/// Maps an (extended) SQLite result code onto the adapter taxonomy.
pub(crate) fn classify(extended_code: i32, message: String) -> Error {
   match extended_code & 0xff {
      SQLITE_ERROR => Error::QuerySyntax(message),
      SQLITE_CONSTRAINT => Error::ConstraintViolation(message),
      SQLITE_PERM | SQLITE_READONLY | SQLITE_IOERR | SQLITE_CORRUPT | SQLITE_FULL
      | SQLITE_CANTOPEN | SQLITE_NOTADB => Error::StorageIo(message),
      _ => Error::Engine(format!("{message} (code {extended_code})")),
   }
}

impl From<rusqlite::Error> for Error {
   fn from(err: rusqlite::Error) -> Self {
      match err {
         rusqlite::Error::SqliteFailure(failure, message) => {
            let message = message.unwrap_or_else(|| failure.to_string());
            classify(failure.extended_code, message)
         }
         // Parse errors from `prepare` carry the offending SQL and offset.
         rusqlite::Error::SqlInputError { error, msg, .. } => classify(error.extended_code, msg),
         rusqlite::Error::InvalidParameterCount(actual, expected) => {
            Error::ParameterCountMismatch { expected, actual }
         }
         rusqlite::Error::Utf8Error(e) => Error::Decode(e.to_string()),
         other => Error::Engine(other.to_string()),
      }
   }
}

impl From<sqlx::Error> for Error {
   fn from(err: sqlx::Error) -> Self {
      match &err {
         sqlx::Error::Database(db_err) => {
            let code = db_err
               .code()
               .and_then(|code| code.parse::<i32>().ok())
               .unwrap_or(SQLITE_ERROR);
            classify(code, db_err.message().to_string())
         }
         sqlx::Error::Io(e) => Error::StorageIo(e.to_string()),
         sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => Error::Decode(err.to_string()),
         _ => Error::Engine(err.to_string()),
      }
   }
}
