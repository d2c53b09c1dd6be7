use std::sync::Arc;

use async_trait::async_trait;
use chatrelay_common::{Memory, Result};
use chatrelay_db::MemoryRepository;
use serde_json::json;
use tracing::info;

use super::{Tool, ToolContext, ToolRegistry, required_str};

/// Register the four memory tools backed by `repo`.
pub fn register_memory_tools(registry: &mut ToolRegistry, repo: Arc<dyn MemoryRepository>) {
    registry.register(Arc::new(SaveMemoryTool::new(repo.clone())));
    registry.register(Arc::new(GetMemoryTool::new(repo.clone())));
    registry.register(Arc::new(ListMemoriesTool::new(repo.clone())));
    registry.register(Arc::new(DeleteMemoryTool::new(repo)));
}

/// Render memories as the preamble block the model sees every turn.
/// Returns `None` when there is nothing to say.
pub fn memory_context(memories: &[Memory]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }
    let mut context = String::from("What you know about this user:\n");
    for memory in memories {
        context.push_str(&format!("- {}: {}\n", memory.key, memory.value));
    }
    Some(context)
}

pub struct SaveMemoryTool {
    repo: Arc<dyn MemoryRepository>,
}

impl SaveMemoryTool {
    pub fn new(repo: Arc<dyn MemoryRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for SaveMemoryTool {
    fn name(&self) -> &'static str {
        "save_memory"
    }

    fn description(&self) -> &'static str {
        "Remember a fact or an information about the user. Use this when you learn \
         something new about the user."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "A short, descriptive key for the memory (e.g. 'name', 'job', 'hobbies', 'preferences')"
                },
                "content": {
                    "type": "string",
                    "description": "The content of the memory record about the user"
                }
            },
            "required": ["key", "content"]
        })
    }

    async fn execute(&self, context: &ToolContext, input: serde_json::Value) -> Result<String> {
        let key = required_str(self.name(), &input, "key")?;
        let content = required_str(self.name(), &input, "content")?;
        self.repo.save_memory(context.user_id, key, content)?;
        info!(user_id = context.user_id, key, "memory saved");
        Ok(format!("Memory saved: {key} = {content}"))
    }
}

pub struct GetMemoryTool {
    repo: Arc<dyn MemoryRepository>,
}

impl GetMemoryTool {
    pub fn new(repo: Arc<dyn MemoryRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for GetMemoryTool {
    fn name(&self) -> &'static str {
        "get_memory"
    }

    fn description(&self) -> &'static str {
        "Retrieve a specific memory about the user using its key."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "key": {"type": "string", "description": "The key of the memory to retrieve"}
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, context: &ToolContext, input: serde_json::Value) -> Result<String> {
        let key = required_str(self.name(), &input, "key")?;
        Ok(match self.repo.get_memory(context.user_id, key)? {
            Some(memory) => format!("Memory for '{}': {}", memory.key, memory.value),
            None => format!("No memory found for key: {key}"),
        })
    }
}

pub struct ListMemoriesTool {
    repo: Arc<dyn MemoryRepository>,
}

impl ListMemoriesTool {
    pub fn new(repo: Arc<dyn MemoryRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for ListMemoriesTool {
    fn name(&self) -> &'static str {
        "list_memories"
    }

    fn description(&self) -> &'static str {
        "List all memories about the user."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, context: &ToolContext, _input: serde_json::Value) -> Result<String> {
        let memories = self.repo.list_memories(context.user_id)?;
        if memories.is_empty() {
            return Ok("No memories found for this user".to_string());
        }
        let mut out = String::from("User memories:\n");
        for memory in &memories {
            out.push_str(&format!("- {}: {}\n", memory.key, memory.value));
        }
        Ok(out)
    }
}

pub struct DeleteMemoryTool {
    repo: Arc<dyn MemoryRepository>,
}

impl DeleteMemoryTool {
    pub fn new(repo: Arc<dyn MemoryRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for DeleteMemoryTool {
    fn name(&self) -> &'static str {
        "delete_memory"
    }

    fn description(&self) -> &'static str {
        "Delete a specific memory about the user."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "key": {"type": "string", "description": "The key of the memory to delete"}
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, context: &ToolContext, input: serde_json::Value) -> Result<String> {
        let key = required_str(self.name(), &input, "key")?;
        self.repo.delete_memory(context.user_id, key)?;
        Ok(format!("Memory deleted: {key}"))
    }
}
