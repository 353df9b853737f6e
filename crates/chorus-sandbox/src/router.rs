//! Tool dispatch: builtins first, then the sandbox.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use chorus_core::AgentDefinition;
use chorus_core::ports::ToolExecutor;

use crate::builtin;
use crate::isolate::Sandbox;

/// The executor a session sees: an agent's builtins plus its sandbox.
///
/// Dispatch order matters — a builtin name always wins, so an agent cannot
/// shadow `sleep_calculator` with a sandboxed handler of the same name.
pub struct ToolRouter {
    builtin_names: Vec<String>,
    sandbox: Arc<Sandbox>,
}

impl ToolRouter {
    /// Build the router (and its sandbox) for one session of `agent`.
    #[must_use]
    pub fn for_agent(agent: &AgentDefinition, secrets: HashMap<String, String>) -> Self {
        Self {
            builtin_names: agent
                .builtin_tool_names
                .iter()
                .filter(|name| {
                    let known = builtin::is_builtin(name);
                    if !known {
                        tracing::warn!(tool = %name, "agent references unknown builtin tool");
                    }
                    known
                })
                .cloned()
                .collect(),
            sandbox: Arc::new(Sandbox::new(&agent.tools, secrets)),
        }
    }
}

#[async_trait]
impl ToolExecutor for ToolRouter {
    async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> String {
        if self.builtin_names.iter().any(|n| n == name) {
            return builtin::run_builtin(name, &args);
        }
        self.sandbox.execute(name, args, cancel).await
    }

    fn dispose(&self) {
        self.sandbox.dispose();
    }
}
