use std::path::Path;

use serde_json::Value as JsonValue;
use sqlite_dual_adapter::{Adapter, AdapterConfig, AdapterFactory, Params, Row, params};
use tracing::{debug, warn};

use crate::models::{DevelopmentStyle, NodeDescriptor, NodeFilter, TaskTemplate};
use crate::{Error, Result, schema};

const UPSERT_NODE: &str = r#"
   INSERT INTO nodes (
      node_type, package_name, display_name, description, category,
      development_style, is_ai_tool, is_trigger, is_webhook, is_versioned,
      version, documentation, properties_schema, operations, credentials_required,
      updated_at
   ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
   ON CONFLICT(node_type) DO UPDATE SET
      package_name = excluded.package_name,
      display_name = excluded.display_name,
      description = excluded.description,
      category = excluded.category,
      development_style = excluded.development_style,
      is_ai_tool = excluded.is_ai_tool,
      is_trigger = excluded.is_trigger,
      is_webhook = excluded.is_webhook,
      is_versioned = excluded.is_versioned,
      version = excluded.version,
      documentation = excluded.documentation,
      properties_schema = excluded.properties_schema,
      operations = excluded.operations,
      credentials_required = excluded.credentials_required,
      updated_at = CURRENT_TIMESTAMP
"#;

const UPSERT_TEMPLATE: &str = r#"
   INSERT INTO task_templates (name, category, description, node_type, configuration)
   VALUES (?, ?, ?, ?, ?)
   ON CONFLICT(name) DO UPDATE SET
      category = excluded.category,
      description = excluded.description,
      node_type = excluded.node_type,
      configuration = excluded.configuration
   RETURNING id
"#;

const SEARCH_NODES: &str = r#"
   SELECT * FROM nodes
   WHERE node_type LIKE ?1 ESCAPE '\'
      OR display_name LIKE ?1 ESCAPE '\'
      OR description LIKE ?1 ESCAPE '\'
   ORDER BY
      CASE WHEN display_name LIKE ?1 ESCAPE '\' THEN 0 ELSE 1 END,
      display_name,
      node_type
   LIMIT ?2
"#;

/// Typed access to the node catalog dataset.
///
/// Works the same on either engine; the adapter decides which one is used.
#[derive(Debug, Clone)]
pub struct NodeRepository {
   adapter: Adapter,
}

impl NodeRepository {
   /// Wrap an already opened adapter. The schema is assumed to exist.
   pub fn new(adapter: Adapter) -> Self {
      Self { adapter }
   }

   /// Open the dataset at `path` and make sure the schema is in place.
   pub async fn open(path: impl AsRef<Path>, config: AdapterConfig) -> Result<Self> {
      let adapter = AdapterFactory::new(config).open(path).await?;
      schema::initialize(&adapter).await?;
      Ok(Self::new(adapter))
   }

   pub fn adapter(&self) -> &Adapter {
      &self.adapter
   }

   /// Insert or replace a node descriptor.
   pub async fn save_node(&self, node: &NodeDescriptor) -> Result<()> {
      let params = params![
         node.node_type.as_str(),
         node.package_name.as_str(),
         node.display_name.as_str(),
         node.description.as_deref(),
         node.category.as_deref(),
         node.development_style.map(|style| style.as_str()),
         node.is_ai_tool,
         node.is_trigger,
         node.is_webhook,
         node.is_versioned,
         node.version.as_deref(),
         node.documentation.as_deref(),
         serde_json::to_string(&node.properties_schema)?,
         serde_json::to_string(&node.operations)?,
         serde_json::to_string(&node.credentials_required)?,
      ];

      self.adapter.prepare(UPSERT_NODE).await?.run(params).await?;
      debug!(node_type = %node.node_type, "Node saved");
      Ok(())
   }

   pub async fn get_node(&self, node_type: &str) -> Result<Option<NodeDescriptor>> {
      let row = self
         .adapter
         .prepare("SELECT * FROM nodes WHERE node_type = ?")
         .await?
         .get(params![node_type])
         .await?;
      Ok(row.as_ref().map(node_from_row))
   }

   /// Nodes matching `filter`, ordered by display name.
   pub async fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<NodeDescriptor>> {
      let mut sql = String::from("SELECT * FROM nodes WHERE 1 = 1");
      let mut params = Params::new();

      if let Some(package_name) = &filter.package_name {
         sql.push_str(" AND package_name = ?");
         params = params.push(package_name.as_str());
      }
      if let Some(category) = &filter.category {
         sql.push_str(" AND category = ?");
         params = params.push(category.as_str());
      }
      if filter.ai_tools_only {
         sql.push_str(" AND is_ai_tool = 1");
      }
      if filter.triggers_only {
         sql.push_str(" AND is_trigger = 1");
      }
      sql.push_str(" ORDER BY display_name, node_type");
      if let Some(limit) = filter.limit {
         sql.push_str(" LIMIT ?");
         params = params.push(limit);
      }

      let rows = self.adapter.prepare(&sql).await?.all(params).await?;
      Ok(rows.map(|row| node_from_row(&row)).collect())
   }

   /// Case-insensitive substring search over type, display name and
   /// description. Display-name matches come first.
   pub async fn search_nodes(&self, query: &str, limit: u32) -> Result<Vec<NodeDescriptor>> {
      let pattern = format!("%{}%", escape_like(query.trim()));
      let rows = self
         .adapter
         .prepare(SEARCH_NODES)
         .await?
         .all(params![pattern, limit])
         .await?;
      Ok(rows.map(|row| node_from_row(&row)).collect())
   }

   pub async fn count_nodes(&self) -> Result<u64> {
      let row = self
         .adapter
         .prepare("SELECT COUNT(*) AS count FROM nodes")
         .await?
         .get(())
         .await?;
      let count = row.and_then(|row| row.get_i64("count")).unwrap_or(0);
      Ok(u64::try_from(count).unwrap_or(0))
   }

   /// Insert or update a template by name. Returns its id.
   pub async fn save_template(&self, template: &TaskTemplate) -> Result<i64> {
      let params = params![
         template.name.as_str(),
         template.category.as_deref(),
         template.description.as_deref(),
         template.node_type.as_str(),
         serde_json::to_string(&template.configuration)?,
      ];

      let row = self.adapter.prepare(UPSERT_TEMPLATE).await?.get(params).await?;
      let id = row.and_then(|row| row.get_i64("id")).ok_or_else(|| {
         Error::Adapter(sqlite_dual_adapter::Error::Engine(format!(
            "template '{}' was saved without returning an id",
            template.name
         )))
      })?;

      debug!(template = %template.name, id, "Task template saved");
      Ok(id)
   }

   pub async fn templates_for_node(&self, node_type: &str) -> Result<Vec<TaskTemplate>> {
      let rows = self
         .adapter
         .prepare("SELECT * FROM task_templates WHERE node_type = ? ORDER BY name")
         .await?
         .all(params![node_type])
         .await?;
      Ok(rows.map(|row| template_from_row(&row)).collect())
   }

   pub async fn get_template(&self, name: &str) -> Result<Option<TaskTemplate>> {
      let row = self
         .adapter
         .prepare("SELECT * FROM task_templates WHERE name = ?")
         .await?
         .get(params![name])
         .await?;
      Ok(row.as_ref().map(template_from_row))
   }

   /// Write pending changes to the dataset file.
   pub async fn flush(&self) -> Result<()> {
      Ok(self.adapter.flush().await?)
   }

   pub async fn close(&self) -> Result<()> {
      Ok(self.adapter.close().await?)
   }
}

fn node_from_row(row: &Row) -> NodeDescriptor {
   let node_type = text(row, "node_type").unwrap_or_default();

   NodeDescriptor {
      package_name: text(row, "package_name").unwrap_or_default(),
      display_name: text(row, "display_name").unwrap_or_default(),
      description: text(row, "description"),
      category: text(row, "category"),
      development_style: row.get_str("development_style").and_then(DevelopmentStyle::parse),
      is_ai_tool: flag(row, "is_ai_tool"),
      is_trigger: flag(row, "is_trigger"),
      is_webhook: flag(row, "is_webhook"),
      is_versioned: flag(row, "is_versioned"),
      version: text(row, "version"),
      documentation: text(row, "documentation"),
      properties_schema: json(row, "properties_schema", &node_type),
      operations: json(row, "operations", &node_type),
      credentials_required: json(row, "credentials_required", &node_type),
      updated_at: text(row, "updated_at"),
      node_type,
   }
}

fn template_from_row(row: &Row) -> TaskTemplate {
   let name = text(row, "name").unwrap_or_default();

   TaskTemplate {
      id: row.get_i64("id"),
      category: text(row, "category"),
      description: text(row, "description"),
      node_type: text(row, "node_type").unwrap_or_default(),
      configuration: row
         .get_str("configuration")
         .map(|raw| parse_json(raw, "configuration", &name, JsonValue::Object(Default::default())))
         .unwrap_or_else(|| JsonValue::Object(Default::default())),
      name,
   }
}

fn text(row: &Row, column: &str) -> Option<String> {
   row.get_str(column).map(str::to_owned)
}

fn flag(row: &Row, column: &str) -> bool {
   row.get_i64(column).unwrap_or(0) != 0
}

/// JSON array column; NULL or malformed content reads as `[]`.
fn json(row: &Row, column: &str, owner: &str) -> JsonValue {
   match row.get_str(column) {
      Some(raw) => parse_json(raw, column, owner, JsonValue::Array(Vec::new())),
      None => JsonValue::Array(Vec::new()),
   }
}

fn parse_json(raw: &str, column: &str, owner: &str, fallback: JsonValue) -> JsonValue {
   serde_json::from_str(raw).unwrap_or_else(|e| {
      warn!(column, owner, error = %e, "Malformed JSON in catalog column, using empty value");
      fallback
   })
}

/// Escape `LIKE` wildcards for use with `ESCAPE '\'`.
fn escape_like(input: &str) -> String {
   let mut escaped = String::with_capacity(input.len());
   for c in input.chars() {
      if matches!(c, '\\' | '%' | '_') {
         escaped.push('\\');
      }
      escaped.push(c);
   }
   escaped
}
