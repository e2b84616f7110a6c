//! Integration tests for the adapter facade over both engines.
//!
//! Most tests run once per engine through [`both_engines`] so that any
//! divergence between the native and portable backends shows up as a failure
//! in the same test.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sqlite_dual_adapter::{
   Adapter, AdapterConfig, AdapterFactory, BackendVariant, EnginePreference, Error, FixedProbe,
   PortableConfig, Row, RunResult, StatementState, Value, params,
};
use tempfile::TempDir;

const ENGINES: [EnginePreference; 2] = [EnginePreference::Native, EnginePreference::Portable];

const NODES_SCHEMA: &str = r#"
   CREATE TABLE nodes (
      node_type TEXT PRIMARY KEY,
      display_name TEXT NOT NULL,
      category TEXT,
      is_trigger INTEGER NOT NULL DEFAULT 0,
      weight REAL,
      icon BLOB
   );
   INSERT INTO nodes VALUES ('nodes-base.httpRequest', 'HTTP Request', 'core', 0, 1.5, x'89504e47');
   INSERT INTO nodes VALUES ('nodes-base.webhook', 'Webhook', 'trigger', 1, NULL, NULL);
   INSERT INTO nodes VALUES ('nodes-base.slack', 'Slack', 'communication', 0, 0.25, NULL);
"#;

fn config(engine: EnginePreference) -> AdapterConfig {
   AdapterConfig {
      engine,
      create_if_missing: true,
      ..Default::default()
   }
}

async fn open(path: &Path, engine: EnginePreference) -> Adapter {
   AdapterFactory::new(config(engine))
      .open(path)
      .await
      .unwrap_or_else(|e| panic!("Failed to open {engine} adapter: {e}"))
}

/// Writes the nodes fixture through the native engine.
async fn seed_nodes(dir: &TempDir) -> PathBuf {
   let path = dir.path().join("nodes.db");
   let adapter = open(&path, EnginePreference::Native).await;
   adapter.exec_batch(NODES_SCHEMA).await.unwrap();
   adapter.close().await.unwrap();
   path
}

async fn both_engines(path: &Path) -> Vec<Adapter> {
   let mut adapters = Vec::new();
   for engine in ENGINES {
      adapters.push(open(path, engine).await);
   }
   adapters
}

// ============================================================================
// Engine Selection
// ============================================================================

#[tokio::test]
async fn test_auto_prefers_native_when_available() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   let adapter = AdapterFactory::new(config(EnginePreference::Auto))
      .with_probe(Arc::new(FixedProbe::available()))
      .open(&path)
      .await
      .unwrap();

   assert_eq!(adapter.backend_variant(), BackendVariant::Native);
   adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_unavailable_native_falls_back_to_portable() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   let adapter = AdapterFactory::new(AdapterConfig::default())
      .with_probe(Arc::new(FixedProbe::unavailable("simulated missing build")))
      .open(&path)
      .await
      .unwrap();

   assert_eq!(adapter.backend_variant(), BackendVariant::Portable);

   let stmt = adapter.prepare("SELECT COUNT(*) AS count FROM nodes").await.unwrap();
   let row = stmt.get(()).await.unwrap().unwrap();
   assert_eq!(row.get_i64("count"), Some(3));

   adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_native_open_failure_falls_back_to_portable() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   // An exclusive lock keeps the native engine from reading the file; the
   // portable engine reads the committed bytes directly.
   let holder = rusqlite::Connection::open(&path).unwrap();
   holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

   let adapter = AdapterFactory::new(AdapterConfig {
      busy_timeout: Duration::from_millis(50),
      ..config(EnginePreference::Auto)
   })
   .with_probe(Arc::new(FixedProbe::available()))
   .open(&path)
   .await
   .unwrap();

   assert_eq!(adapter.backend_variant(), BackendVariant::Portable);

   let stmt = adapter.prepare("SELECT COUNT(*) AS count FROM nodes").await.unwrap();
   let row = stmt.get(()).await.unwrap().unwrap();
   assert_eq!(row.get_i64("count"), Some(3));

   adapter.close().await.unwrap();
   holder.execute_batch("ROLLBACK").unwrap();
}

#[tokio::test]
async fn test_native_preference_never_falls_back() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   let err = AdapterFactory::new(config(EnginePreference::Native))
      .with_probe(Arc::new(FixedProbe::unavailable("pinned off")))
      .open(&path)
      .await
      .unwrap_err();

   assert_eq!(err.error_code(), "ADAPTER_INIT_ERROR");
   assert!(err.to_string().contains("pinned off"));
   assert!(!err.to_string().contains("portable"));
}

#[tokio::test]
async fn test_portable_preference_skips_probe() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   let adapter = AdapterFactory::new(config(EnginePreference::Portable))
      .with_probe(Arc::new(FixedProbe::available()))
      .open(&path)
      .await
      .unwrap();

   assert_eq!(adapter.backend_variant(), BackendVariant::Portable);
   adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_file_fails_for_both_engines() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("absent.db");

   let err = AdapterFactory::new(AdapterConfig::default())
      .open(&path)
      .await
      .unwrap_err();

   let message = err.to_string();
   assert_eq!(err.error_code(), "ADAPTER_INIT_ERROR");
   assert!(message.contains("native:"), "{message}");
   assert!(message.contains("portable:"), "{message}");
   assert!(!path.exists());
}

#[tokio::test]
async fn test_corrupt_file_fails_for_both_engines() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("corrupt.db");
   std::fs::write(&path, vec![0x42; 8192]).unwrap();

   let err = AdapterFactory::new(config(EnginePreference::Auto))
      .open(&path)
      .await
      .unwrap_err();

   assert!(matches!(err, Error::AdapterInit { .. }));
   assert!(err.to_string().contains("portable:"));
}

// ============================================================================
// Query Contract
// ============================================================================

#[tokio::test]
async fn test_get_returns_row_or_none() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      let stmt = adapter
         .prepare("SELECT node_type AS nodeType, display_name AS displayName FROM nodes WHERE node_type = ?")
         .await
         .unwrap();

      let row = stmt.get(params!["nodes-base.httpRequest"]).await.unwrap().unwrap();
      assert_eq!(row.columns().collect::<Vec<_>>(), ["nodeType", "displayName"]);
      assert_eq!(row.get_str("nodeType"), Some("nodes-base.httpRequest"));
      assert_eq!(row.get_str("displayName"), Some("HTTP Request"));

      assert!(stmt.get(params!["nonexistent"]).await.unwrap().is_none());
      adapter.close().await.unwrap();
   }
}

#[tokio::test]
async fn test_backends_return_identical_rows() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;
   let sql = "SELECT * FROM nodes ORDER BY node_type";

   let mut results: Vec<Vec<Row>> = Vec::new();
   for adapter in both_engines(&path).await {
      let stmt = adapter.prepare(sql).await.unwrap();
      results.push(stmt.all(()).await.unwrap().collect());
      adapter.close().await.unwrap();
   }

   assert_eq!(results[0].len(), 3);
   assert_eq!(results[0], results[1]);

   let http = &results[1][0];
   assert_eq!(http.get("weight"), Some(&Value::Real(1.5)));
   assert_eq!(http.get("icon"), Some(&Value::Blob(vec![0x89, 0x50, 0x4e, 0x47])));
   assert_eq!(results[1][2].get("weight"), Some(&Value::Null));
}

#[tokio::test]
async fn test_parameter_count_mismatch() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      let stmt = adapter
         .prepare("SELECT * FROM nodes WHERE node_type = ? AND category = ?")
         .await
         .unwrap();
      assert_eq!(stmt.parameter_count(), 2);

      let err = stmt.all(params!["nodes-base.slack"]).await.unwrap_err();
      assert!(matches!(
         err,
         Error::ParameterCountMismatch {
            expected: 2,
            actual: 1
         }
      ));
      assert_eq!(stmt.state(), StatementState::Prepared);
      adapter.close().await.unwrap();
   }
}

#[tokio::test]
async fn test_statement_reuse_with_new_parameters() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      let stmt = adapter
         .prepare("SELECT display_name FROM nodes WHERE category = ?")
         .await
         .unwrap();

      let core: Vec<Row> = stmt.all(params!["core"]).await.unwrap().collect();
      let trigger: Vec<Row> = stmt.all(params!["trigger"]).await.unwrap().collect();
      let empty = stmt.all(params!["nothing"]).await.unwrap();

      assert_eq!(core[0].get_str("display_name"), Some("HTTP Request"));
      assert_eq!(trigger[0].get_str("display_name"), Some("Webhook"));
      assert_eq!(empty.len(), 0);
      assert_eq!(stmt.state(), StatementState::Executed);
      adapter.close().await.unwrap();
   }
}

#[tokio::test]
async fn test_run_reports_changes_and_constraint_violations() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      let insert = adapter
         .prepare("INSERT INTO nodes (node_type, display_name) VALUES (?, ?)")
         .await
         .unwrap();
      let result = insert
         .run(params![format!("custom.{}", adapter.backend_variant()), "Custom"])
         .await
         .unwrap();
      assert_eq!(result.changes, 1);
      assert!(result.last_insert_id.is_some());

      let err = insert
         .run(params!["nodes-base.slack", "Duplicate"])
         .await
         .unwrap_err();
      assert_eq!(err.error_code(), "CONSTRAINT_VIOLATION");

      let update = adapter
         .prepare("UPDATE nodes SET category = 'misc' WHERE node_type LIKE 'nodes-base.%'")
         .await
         .unwrap();
      assert_eq!(update.run(()).await.unwrap().changes, 3);

      let select = adapter.prepare("SELECT 1").await.unwrap();
      assert_eq!(select.run(()).await.unwrap(), RunResult::default());

      adapter.close().await.unwrap();
   }
}

#[tokio::test]
async fn test_malformed_sql_is_syntax_error() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      let err = adapter.prepare("SELEC * FROM nodes").await.unwrap_err();
      assert_eq!(err.error_code(), "QUERY_SYNTAX_ERROR");

      let err = adapter.prepare("SELECT * FROM missing_table").await.unwrap_err();
      assert_eq!(err.error_code(), "QUERY_SYNTAX_ERROR");
      adapter.close().await.unwrap();
   }
}

#[tokio::test]
async fn test_malformed_batch_is_schema_error() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      let err = adapter
         .exec_batch("CREATE TABLE broken (id INTEGER PRIMARY KEY,, name TEXT)")
         .await
         .unwrap_err();
      assert_eq!(err.error_code(), "SCHEMA_ERROR");
      adapter.close().await.unwrap();
   }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_close_is_idempotent() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      adapter.close().await.unwrap();
      adapter.close().await.unwrap();
      assert!(adapter.is_closed());
   }
}

#[tokio::test]
async fn test_statement_after_close() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      let stmt = adapter.prepare("SELECT * FROM nodes").await.unwrap();
      adapter.close().await.unwrap();

      assert_eq!(stmt.state(), StatementState::Disposed);
      assert!(matches!(stmt.all(()).await, Err(Error::StatementAfterClose)));
      assert!(matches!(stmt.run(()).await, Err(Error::StatementAfterClose)));
      assert!(matches!(
         adapter.prepare("SELECT 1").await,
         Err(Error::StatementAfterClose)
      ));
      assert!(matches!(
         adapter.exec_batch("SELECT 1").await,
         Err(Error::StatementAfterClose)
      ));
   }
}

#[tokio::test]
async fn test_clones_share_close() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      let clone = adapter.clone();
      assert_eq!(clone.id(), adapter.id());
      clone.close().await.unwrap();
      assert!(adapter.is_closed());
   }
}

// ============================================================================
// Portable Persistence
// ============================================================================

#[tokio::test]
async fn test_portable_flush_is_visible_to_native() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   let portable = open(&path, EnginePreference::Portable).await;
   portable
      .prepare("DELETE FROM nodes WHERE node_type = ?")
      .await
      .unwrap()
      .run(params!["nodes-base.webhook"])
      .await
      .unwrap();
   portable.flush().await.unwrap();

   let native = open(&path, EnginePreference::Native).await;
   let row = native
      .prepare("SELECT COUNT(*) AS count FROM nodes")
      .await
      .unwrap()
      .get(())
      .await
      .unwrap()
      .unwrap();
   assert_eq!(row.get_i64("count"), Some(2));

   native.close().await.unwrap();
   portable.close().await.unwrap();
}

#[tokio::test]
async fn test_portable_close_persists_pending_writes() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   let portable = open(&path, EnginePreference::Portable).await;
   portable
      .exec_batch("CREATE TABLE task_templates (id INTEGER PRIMARY KEY, name TEXT)")
      .await
      .unwrap();
   portable.close().await.unwrap();

   let native = open(&path, EnginePreference::Native).await;
   let tables: Vec<Row> = native
      .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
      .await
      .unwrap()
      .all(())
      .await
      .unwrap()
      .collect();
   let names: Vec<_> = tables.iter().filter_map(|row| row.get_str("name")).collect();
   assert_eq!(names, ["nodes", "task_templates"]);
   native.close().await.unwrap();
}

#[tokio::test]
async fn test_portable_autosave_after_delay() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   let portable = AdapterFactory::new(AdapterConfig {
      engine: EnginePreference::Portable,
      portable: PortableConfig {
         autosave_delay: Some(Duration::from_millis(50)),
      },
      ..Default::default()
   })
   .open(&path)
   .await
   .unwrap();

   portable
      .prepare("UPDATE nodes SET display_name = 'HTTP' WHERE node_type = 'nodes-base.httpRequest'")
      .await
      .unwrap()
      .run(())
      .await
      .unwrap();

   tokio::time::sleep(Duration::from_millis(400)).await;

   let native = open(&path, EnginePreference::Native).await;
   let row = native
      .prepare("SELECT display_name FROM nodes WHERE node_type = 'nodes-base.httpRequest'")
      .await
      .unwrap()
      .get(())
      .await
      .unwrap()
      .unwrap();
   assert_eq!(row.get_str("display_name"), Some("HTTP"));

   native.close().await.unwrap();
   portable.close().await.unwrap();
}

#[tokio::test]
async fn test_portable_creates_missing_dataset() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("fresh.db");

   let portable = open(&path, EnginePreference::Portable).await;
   assert!(path.exists());
   portable
      .exec_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (7);")
      .await
      .unwrap();
   portable.close().await.unwrap();

   let native = open(&path, EnginePreference::Native).await;
   let row = native
      .prepare("SELECT id FROM t")
      .await
      .unwrap()
      .get(())
      .await
      .unwrap()
      .unwrap();
   assert_eq!(row.get_i64("id"), Some(7));
   native.close().await.unwrap();
}

// ============================================================================
// Supplementary Operations
// ============================================================================

#[tokio::test]
async fn test_transaction_commits_or_rolls_back() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      let results = adapter
         .transaction([
            ("UPDATE nodes SET category = ? WHERE node_type = ?", params!["a", "nodes-base.slack"]),
            ("UPDATE nodes SET category = ? WHERE node_type = ?", params!["b", "nodes-base.webhook"]),
         ])
         .await
         .unwrap();
      assert_eq!(results.len(), 2);
      assert!(results.iter().all(|r| r.changes == 1));

      let err = adapter
         .transaction([
            ("DELETE FROM nodes", params![]),
            ("INSERT INTO nodes (node_type) VALUES (?)", params!["no.display.name"]),
         ])
         .await
         .unwrap_err();
      assert_eq!(err.error_code(), "CONSTRAINT_VIOLATION");
      assert!(!adapter.in_transaction().await.unwrap());

      let row = adapter
         .prepare("SELECT COUNT(*) AS count FROM nodes")
         .await
         .unwrap()
         .get(())
         .await
         .unwrap()
         .unwrap();
      assert_eq!(row.get_i64("count"), Some(3));
      adapter.close().await.unwrap();
   }
}

#[tokio::test]
async fn test_failed_commit_rolls_back() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      adapter
         .exec_batch(
            "CREATE TABLE IF NOT EXISTS packages (name TEXT PRIMARY KEY);
             CREATE TABLE IF NOT EXISTS members (
                node_type TEXT PRIMARY KEY,
                package TEXT NOT NULL REFERENCES packages (name) DEFERRABLE INITIALLY DEFERRED
             );",
         )
         .await
         .unwrap();

      // The deferred foreign key is only checked by COMMIT.
      let err = adapter
         .transaction([(
            "INSERT INTO members (node_type, package) VALUES (?, ?)",
            params!["nodes-base.slack", "missing-package"],
         )])
         .await
         .unwrap_err();
      assert_eq!(err.error_code(), "CONSTRAINT_VIOLATION");
      assert!(!adapter.in_transaction().await.unwrap());

      let row = adapter
         .prepare("SELECT COUNT(*) AS count FROM members")
         .await
         .unwrap()
         .get(())
         .await
         .unwrap()
         .unwrap();
      assert_eq!(row.get_i64("count"), Some(0));
      adapter.close().await.unwrap();
   }
}

#[tokio::test]
async fn test_pragma_read_write_and_validation() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   for adapter in both_engines(&path).await {
      adapter.pragma("user_version", Some(Value::Integer(12))).await.unwrap();
      let rows = adapter.pragma("user_version", None).await.unwrap();
      assert_eq!(rows[0].get_i64("user_version"), Some(12));

      let err = adapter
         .pragma("user_version; DROP TABLE nodes", None)
         .await
         .unwrap_err();
      assert_eq!(err.error_code(), "INVALID_PRAGMA_NAME");
      adapter.close().await.unwrap();
   }
}

#[tokio::test]
async fn test_fts5_capability_matches_across_engines() {
   let temp_dir = TempDir::new().unwrap();
   let path = seed_nodes(&temp_dir).await;

   let mut answers = Vec::new();
   for adapter in both_engines(&path).await {
      answers.push(adapter.has_fts5().await.unwrap());
      adapter.close().await.unwrap();
   }
   assert_eq!(answers[0], answers[1]);
}
