use std::collections::HashMap;

use chatrelay_common::{Error, Result};
use serde_json::Value;

use crate::providers::{StreamEvent, ToolCallFragment};

/// A tool call reassembled from its fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRecord {
    pub index: u32,
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallRecord {
    /// The vendor id, or a stable stand-in when the vendor never sent one.
    pub fn call_id(&self) -> String {
        if self.id.is_empty() {
            format!("call_{}", self.index)
        } else {
            self.id.clone()
        }
    }

    /// Parse the reassembled arguments. An empty argument string means `{}`.
    pub fn parsed_arguments(&self) -> Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(other) => Err(Error::ToolArguments {
                tool: self.name.clone(),
                reason: format!("expected a JSON object, got {other}"),
            }),
            Err(e) => Err(Error::ToolArguments {
                tool: self.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Folds the events of one provider stream into text, tool calls and usage.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    tool_calls: Vec<ToolCallRecord>,
    positions: HashMap<u32, usize>,
    input_tokens: u64,
    output_tokens: u64,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chunk(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta(delta) => self.text.push_str(delta),
            StreamEvent::ToolCallFragment(fragment) => self.merge_fragment(fragment),
            StreamEvent::Usage {
                prompt_tokens,
                completion_tokens,
            } => {
                self.input_tokens += prompt_tokens;
                self.output_tokens += completion_tokens;
            }
            StreamEvent::EndOfStream | StreamEvent::Error(_) => {}
        }
    }

    fn merge_fragment(&mut self, fragment: &ToolCallFragment) {
        let position = *self.positions.entry(fragment.index).or_insert_with(|| {
            self.tool_calls.push(ToolCallRecord {
                index: fragment.index,
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
            self.tool_calls.len() - 1
        });

        let record = &mut self.tool_calls[position];
        if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
            if record.id.is_empty() {
                record.id = id.to_string();
            }
        }
        if let Some(name) = fragment.name.as_deref().filter(|name| !name.is_empty()) {
            if record.name.is_empty() {
                record.name = name.to_string();
            }
        }
        if let Some(arguments) = &fragment.arguments {
            record.arguments.push_str(arguments);
        }
    }

    pub fn accumulated_text(&self) -> &str {
        &self.text
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Tool calls in the order their index was first seen.
    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> StreamEvent {
        StreamEvent::ToolCallFragment(ToolCallFragment {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: args.map(str::to_string),
        })
    }

    #[test]
    fn reassembles_split_arguments_by_index() {
        let mut acc = ResponseAccumulator::new();
        acc.add_chunk(&fragment(0, Some("call_9"), Some("save_memory"), Some("{\"key\":\"na")));
        acc.add_chunk(&fragment(0, None, None, Some("me\",\"content\":\"Bob\"}")));

        assert!(acc.has_tool_calls());
        let calls = acc.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "save_memory");
        assert_eq!(calls[0].arguments, r#"{"key":"name","content":"Bob"}"#);
        assert_eq!(
            calls[0].parsed_arguments().unwrap(),
            json!({"key": "name", "content": "Bob"})
        );
    }

    #[test]
    fn keeps_first_seen_order_across_interleaved_indexes() {
        let mut acc = ResponseAccumulator::new();
        acc.add_chunk(&fragment(3, Some("b"), Some("list_memories"), None));
        acc.add_chunk(&fragment(1, Some("a"), Some("get_memory"), Some("{\"key\"")));
        acc.add_chunk(&fragment(3, None, None, Some("{}")));
        acc.add_chunk(&fragment(1, None, None, Some(":\"x\"}")));

        let calls = acc.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].index, 3);
        assert_eq!(calls[0].arguments, "{}");
        assert_eq!(calls[1].index, 1);
        assert_eq!(calls[1].arguments, "{\"key\":\"x\"}");
    }

    #[test]
    fn later_ids_do_not_overwrite_first() {
        let mut acc = ResponseAccumulator::new();
        acc.add_chunk(&fragment(0, Some("first"), Some("get_memory"), None));
        acc.add_chunk(&fragment(0, Some("second"), Some("other"), None));
        assert_eq!(acc.tool_calls()[0].id, "first");
        assert_eq!(acc.tool_calls()[0].name, "get_memory");
    }

    #[test]
    fn text_and_usage_accumulate() {
        let mut acc = ResponseAccumulator::new();
        acc.add_chunk(&StreamEvent::Usage {
            prompt_tokens: 10,
            completion_tokens: 0,
        });
        acc.add_chunk(&StreamEvent::TextDelta("Hel".into()));
        acc.add_chunk(&StreamEvent::TextDelta("lo".into()));
        acc.add_chunk(&StreamEvent::Usage {
            prompt_tokens: 0,
            completion_tokens: 4,
        });

        assert_eq!(acc.accumulated_text(), "Hello");
        assert_eq!(acc.input_tokens(), 10);
        assert_eq!(acc.output_tokens(), 4);
        assert!(!acc.has_tool_calls());
    }

    #[test]
    fn usage_defaults_to_zero() {
        let acc = ResponseAccumulator::new();
        assert_eq!(acc.input_tokens(), 0);
        assert_eq!(acc.output_tokens(), 0);
    }

    #[test]
    fn empty_arguments_parse_as_empty_object() {
        let record = ToolCallRecord {
            index: 2,
            id: String::new(),
            name: "list_memories".into(),
            arguments: String::new(),
        };
        assert_eq!(record.parsed_arguments().unwrap(), json!({}));
        assert_eq!(record.call_id(), "call_2");
    }

    #[test]
    fn malformed_arguments_are_tool_argument_errors() {
        let record = ToolCallRecord {
            index: 0,
            id: "c".into(),
            name: "save_memory".into(),
            arguments: "{\"key\":".into(),
        };
        match record.parsed_arguments() {
            Err(Error::ToolArguments { tool, .. }) => assert_eq!(tool, "save_memory"),
            other => panic!("expected ToolArguments error, got {other:?}"),
        }

        let array = ToolCallRecord {
            arguments: "[1]".into(),
            ..record
        };
        assert!(matches!(
            array.parsed_arguments(),
            Err(Error::ToolArguments { .. })
        ));
    }
}
