use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chatrelay_common::{Error, Result};
use tracing::{debug, instrument};

use crate::accumulator::ToolCallRecord;
use crate::providers::ToolDefinition;

pub mod memory;

pub use memory::{
    DeleteMemoryTool, GetMemoryTool, ListMemoriesTool, SaveMemoryTool, memory_context,
    register_memory_tools,
};

/// Per-call context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: i64,
}

/// A local function the model may call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_schema(&self) -> serde_json::Value;

    async fn execute(&self, context: &ToolContext, input: serde_json::Value) -> Result<String>;
}

/// Executes fully reassembled tool calls on behalf of the orchestrator.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Definitions advertised to the model on every round.
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(&self, user_id: i64, call: &ToolCallRecord) -> Result<String>;
}

/// Name-keyed set of [`Tool`]s.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    order: Vec<&'static str>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if self.tools.insert(name, tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    #[instrument(skip(self, call), fields(tool = %call.name))]
    async fn execute(&self, user_id: i64, call: &ToolCallRecord) -> Result<String> {
        let input = call.parsed_arguments()?;
        let tool = self
            .tools
            .get(call.name.as_str())
            .ok_or_else(|| Error::Tool(format!("unknown tool: {}", call.name)))?;

        debug!(user_id, "executing tool");
        tool.execute(&ToolContext { user_id }, input).await
    }
}

/// Read a required string field from tool input.
pub(crate) fn required_str<'a>(
    tool: &str,
    input: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::ToolArguments {
            tool: tool.to_string(),
            reason: format!("missing string field '{field}'"),
        })
}
