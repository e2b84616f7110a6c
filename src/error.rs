use serde::{Serialize, Serializer};

/// Result type alias for catalog store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing the node catalog.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from the storage adapter.
   #[error(transparent)]
   Adapter(#[from] sqlite_dual_adapter::Error),

   /// A value could not be encoded as JSON for storage.
   #[error(transparent)]
   Json(#[from] serde_json::Error),
}

impl Error {
   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> &'static str {
      match self {
         Error::Adapter(e) => e.error_code(),
         Error::Json(_) => "JSON_ERROR",
      }
   }
}

impl Serialize for Error {
   fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
   where
      S: Serializer,
   {
      use serde::ser::SerializeStruct;
      let mut state = serializer.serialize_struct("Error", 2)?;
      state.serialize_field("code", self.error_code())?;
      state.serialize_field("message", &self.to_string())?;
      state.end()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_adapter_error_code_passes_through() {
      let err = Error::from(sqlite_dual_adapter::Error::StatementAfterClose);
      assert_eq!(err.error_code(), "STATEMENT_AFTER_CLOSE");
   }

   #[test]
   fn test_error_serializes_code_and_message() {
      let err = Error::from(sqlite_dual_adapter::Error::Schema("near \",\"".into()));
      let json = serde_json::to_value(&err).unwrap();
      assert_eq!(json["code"], "SCHEMA_ERROR");
      assert!(json["message"].as_str().unwrap().contains("schema error"));
   }
}
