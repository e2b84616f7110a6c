use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// How a node package defines its behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevelopmentStyle {
   Declarative,
   Programmatic,
}

impl DevelopmentStyle {
   pub fn as_str(&self) -> &'static str {
      match self {
         DevelopmentStyle::Declarative => "declarative",
         DevelopmentStyle::Programmatic => "programmatic",
      }
   }

   pub(crate) fn parse(s: &str) -> Option<Self> {
      match s {
         "declarative" => Some(DevelopmentStyle::Declarative),
         "programmatic" => Some(DevelopmentStyle::Programmatic),
         _ => None,
      }
   }
}

/// One node type in the catalog.
///
/// `properties_schema`, `operations` and `credentials_required` are stored as
/// JSON text and parsed on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
   /// Fully qualified type, e.g. `nodes-base.httpRequest`.
   pub node_type: String,
   pub package_name: String,
   pub display_name: String,
   pub description: Option<String>,
   pub category: Option<String>,
   pub development_style: Option<DevelopmentStyle>,
   pub is_ai_tool: bool,
   pub is_trigger: bool,
   pub is_webhook: bool,
   pub is_versioned: bool,
   pub version: Option<String>,
   pub documentation: Option<String>,
   pub properties_schema: JsonValue,
   pub operations: JsonValue,
   pub credentials_required: JsonValue,
   /// Set by the store on every save.
   #[serde(default)]
   pub updated_at: Option<String>,
}

impl NodeDescriptor {
   /// A descriptor with only the required fields set.
   pub fn new(
      node_type: impl Into<String>,
      package_name: impl Into<String>,
      display_name: impl Into<String>,
   ) -> Self {
      Self {
         node_type: node_type.into(),
         package_name: package_name.into(),
         display_name: display_name.into(),
         description: None,
         category: None,
         development_style: None,
         is_ai_tool: false,
         is_trigger: false,
         is_webhook: false,
         is_versioned: false,
         version: None,
         documentation: None,
         properties_schema: JsonValue::Array(Vec::new()),
         operations: JsonValue::Array(Vec::new()),
         credentials_required: JsonValue::Array(Vec::new()),
         updated_at: None,
      }
   }
}

/// Narrows [`crate::NodeRepository::list_nodes`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeFilter {
   pub package_name: Option<String>,
   pub category: Option<String>,
   pub ai_tools_only: bool,
   pub triggers_only: bool,
   pub limit: Option<u32>,
}

impl NodeFilter {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn package(mut self, package_name: impl Into<String>) -> Self {
      self.package_name = Some(package_name.into());
      self
   }

   pub fn category(mut self, category: impl Into<String>) -> Self {
      self.category = Some(category.into());
      self
   }

   pub fn ai_tools_only(mut self) -> Self {
      self.ai_tools_only = true;
      self
   }

   pub fn triggers_only(mut self) -> Self {
      self.triggers_only = true;
      self
   }

   pub fn limit(mut self, limit: u32) -> Self {
      self.limit = Some(limit);
      self
   }
}

/// Pre-configured usage of a node for a common task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplate {
   /// Assigned by the store; ignored on save.
   #[serde(default)]
   pub id: Option<i64>,
   /// Unique task name, e.g. `post_json_request`.
   pub name: String,
   pub category: Option<String>,
   pub description: Option<String>,
   pub node_type: String,
   /// Node parameters to apply, stored as JSON text.
   pub configuration: JsonValue,
}

impl TaskTemplate {
   pub fn new(name: impl Into<String>, node_type: impl Into<String>, configuration: JsonValue) -> Self {
      Self {
         id: None,
         name: name.into(),
         category: None,
         description: None,
         node_type: node_type.into(),
         configuration,
      }
   }
}
