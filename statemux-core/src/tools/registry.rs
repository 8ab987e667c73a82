use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use super::{builtin, Tool, ToolContext, ToolDescription, ToolError, ToolFuture, ToolHandler};

/// Name → handler lookup table. Holds no state beyond registration.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `roll_dice`, `fetch_weather` and `stream_chat`
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        builtin::register_builtin_tools(&mut registry);
        registry
    }

    /// Register a tool; a tool already registered under the same name is replaced
    pub fn register<T: Tool>(&mut self, tool: T) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            warn!("tool {} registered twice, keeping the latest", name);
        }
        self
    }

    pub fn with<T: Tool>(mut self, tool: T) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptions of every registered tool, ordered by name
    pub fn list(&self) -> Vec<ToolDescription> {
        let mut tools: Vec<_> = self.tools.values().map(|t| t.describe()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Resolve and validate a call. Missing or null arguments count as `{}` so
    /// that argument defaults apply.
    pub fn prepare(
        &self,
        name: &str,
        arguments: Option<Value>,
        ctx: ToolContext,
    ) -> Result<ToolFuture, ToolError> {
        let handler = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let arguments = match arguments {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(args) => args,
        };

        handler.prepare(arguments, ctx)
    }
}
