//! Agent-bundle loader.
//!
//! A bundle's `worker.js` registers its agent by calling
//! `registerAgent({...})` at top level. The loader evaluates the worker
//! source in a throwaway isolate (same memory ceiling as tool calls, no
//! host capabilities at all — not even the proxied fetch) and captures the
//! registered definition, serializing tool handler functions back to source
//! text via `String(fn)` so they stay opaque until a session compiles them.

use std::time::Duration;

use rquickjs::{AsyncContext, AsyncRuntime, Promise, async_with};
use serde::Deserialize;

use chorus_core::{AgentDefinition, ToolDefinition};

use crate::error::SandboxError;
use crate::isolate::MEMORY_LIMIT_BYTES;

/// Wall clock for evaluating a worker source.
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Intermediate shape produced by the capture script.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapturedAgent {
    #[serde(default)]
    instructions: String,
    #[serde(default)]
    greeting: String,
    #[serde(default)]
    voice: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    builtin_tool_names: Vec<String>,
    #[serde(default)]
    tools: Vec<CapturedTool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapturedTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    json_schema: Option<serde_json::Value>,
    handler_source: String,
}

/// Evaluate a bundle's worker source and return the agent it registers.
pub async fn load_agent(slug: &str, worker_source: &str) -> Result<AgentDefinition, SandboxError> {
    let captured_json = tokio::time::timeout(LOAD_TIMEOUT, evaluate(worker_source))
        .await
        .map_err(|_| SandboxError::AgentLoad("worker evaluation timed out".to_string()))??;

    let captured: CapturedAgent = serde_json::from_str(&captured_json)
        .map_err(|e| SandboxError::AgentLoad(format!("invalid agent definition: {e}")))?;

    if captured.instructions.trim().is_empty() {
        return Err(SandboxError::AgentLoad(
            "agent definition has no instructions".to_string(),
        ));
    }

    Ok(AgentDefinition {
        slug: slug.to_string(),
        instructions: captured.instructions,
        greeting: captured.greeting,
        voice: captured.voice,
        prompt: captured.prompt,
        builtin_tool_names: captured.builtin_tool_names,
        tools: captured
            .tools
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name,
                description: t.description,
                json_schema: t
                    .json_schema
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
                handler_source: t.handler_source,
            })
            .collect(),
    })
}

async fn evaluate(worker_source: &str) -> Result<String, SandboxError> {
    let runtime = AsyncRuntime::new().map_err(|e| SandboxError::Init(e.to_string()))?;
    runtime.set_memory_limit(MEMORY_LIMIT_BYTES).await;

    let context = AsyncContext::full(&runtime)
        .await
        .map_err(|e| SandboxError::Init(e.to_string()))?;

    let worker = worker_source.to_string();
    async_with!(context => |ctx| {
        let run = async {
            // `registerAgent` must exist before the worker body runs.
            let _: rquickjs::Value = ctx.eval(PRELUDE)?;
            let _: rquickjs::Value = ctx.eval(worker)?;
            let promise: Promise = ctx.eval(CAPTURE)?;
            promise.into_future::<String>().await
        };
        run.await.map_err(|e| match e {
            rquickjs::Error::Exception => {
                SandboxError::AgentLoad(crate::isolate::caught_message(&ctx))
            }
            other => SandboxError::AgentLoad(other.to_string()),
        })
    })
    .await
}

/// Installs the capture hook the worker calls.
const PRELUDE: &str = r#"
"use strict";
globalThis.__registered = null;
globalThis.registerAgent = (def) => { globalThis.__registered = def; };
"#;

/// Normalizes the captured definition to the JSON shape the host parses.
/// Handler functions survive as source text via `String(fn)`.
const CAPTURE: &str = r#"
(async () => {
  const def = globalThis.__registered;
  if (!def || typeof def !== "object") {
    throw new Error("worker did not call registerAgent()");
  }
  const tools = (def.tools ?? []).map((t) => {
    if (!t || typeof t.name !== "string") {
      throw new Error("tool is missing a name");
    }
    const handler = t.handler ?? t.handlerSource;
    if (handler === undefined) {
      throw new Error(`tool "${t.name}" has no handler`);
    }
    return {
      name: t.name,
      description: t.description ?? "",
      jsonSchema: t.parameters ?? t.jsonSchema ?? null,
      handlerSource: typeof handler === "string" ? handler : String(handler),
    };
  });
  return JSON.stringify({
    instructions: def.instructions ?? "",
    greeting: def.greeting ?? "",
    voice: def.voice ?? "",
    prompt: def.prompt ?? null,
    builtinToolNames: def.builtinTools ?? def.builtinToolNames ?? [],
    tools,
  });
})()
"#;
