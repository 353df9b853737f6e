//! Agent definition types.
//!
//! An [`AgentDefinition`] is immutable per deploy: it is created when a
//! bundle is uploaded (or configured at startup in single-agent mode) and
//! replaced wholesale by the next deploy of the same slug.

use serde::{Deserialize, Serialize};

/// A deployable voice agent: persona, greeting, voice, and tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    /// URL-safe identifier the registry routes on.
    pub slug: String,

    /// System instructions — becomes `transcript[0]` of every session.
    pub instructions: String,

    /// Spoken when a session becomes ready. Empty string disables the greeting.
    #[serde(default)]
    pub greeting: String,

    /// TTS voice identifier passed to the speech vendor.
    #[serde(default)]
    pub voice: String,

    /// Optional extra prompt appended to the instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Names of host-side builtin tools this agent may call.
    #[serde(default)]
    pub builtin_tool_names: Vec<String>,

    /// Agent-supplied tools, executed in the sandbox.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl AgentDefinition {
    /// The full system prompt: instructions plus the optional extra prompt.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        match &self.prompt {
            Some(extra) if !extra.trim().is_empty() => {
                format!("{}\n\n{}", self.instructions, extra)
            }
            _ => self.instructions.clone(),
        }
    }
}

/// A tool owned by an agent.
///
/// `handler_source` is a JavaScript function expression of shape
/// `async (args, ctx) => any`. The platform treats it as opaque source text
/// until the sandbox compiles it; compile errors surface on first invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,

    /// JSON Schema describing the tool's arguments, forwarded to the LLM.
    pub json_schema: serde_json::Value,

    /// Opaque JavaScript source of the handler.
    pub handler_source: String,
}

impl ToolDefinition {
    /// The LLM-facing view of this tool (no handler source).
    #[must_use]
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.json_schema.clone(),
        }
    }
}

/// What the LLM sees: a named function with a JSON Schema for its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_agent() -> AgentDefinition {
        AgentDefinition {
            slug: "demo".to_string(),
            instructions: "You are a helpful voice assistant.".to_string(),
            greeting: String::new(),
            voice: "luna".to_string(),
            prompt: None,
            builtin_tool_names: Vec::new(),
            tools: Vec::new(),
        }
    }

    #[test]
    fn system_prompt_without_extra() {
        let agent = minimal_agent();
        assert_eq!(agent.system_prompt(), agent.instructions);
    }

    #[test]
    fn system_prompt_appends_extra() {
        let agent = AgentDefinition {
            prompt: Some("Keep answers under two sentences.".to_string()),
            ..minimal_agent()
        };
        let prompt = agent.system_prompt();
        assert!(prompt.starts_with("You are a helpful"));
        assert!(prompt.ends_with("two sentences."));
    }

    #[test]
    fn blank_extra_prompt_is_ignored() {
        let agent = AgentDefinition {
            prompt: Some("   ".to_string()),
            ..minimal_agent()
        };
        assert_eq!(agent.system_prompt(), agent.instructions);
    }

    #[test]
    fn tool_spec_drops_handler_source() {
        let tool = ToolDefinition {
            name: "get_weather".to_string(),
            description: "Look up the weather".to_string(),
            json_schema: serde_json::json!({"type": "object"}),
            handler_source: "async (args, ctx) => 'sunny'".to_string(),
        };
        let spec = tool.spec();
        assert_eq!(spec.name, "get_weather");
        assert_eq!(spec.parameters, serde_json::json!({"type": "object"}));
    }
}
