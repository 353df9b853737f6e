//! QuickJS isolate execution.
//!
//! Each `execute` builds a throwaway `AsyncRuntime` + `AsyncContext` pair:
//! the runtime carries the 128 MiB memory ceiling and the interrupt handler,
//! the context carries exactly three names the driver script needs
//! (`__args_json`, `__secrets_json`, `__host_fetch`). Nothing else of the
//! host is reachable, and nothing a handler leaves on `globalThis` survives
//! the call.
//!
//! The wall clock is enforced twice over: a watchdog task flips the
//! interrupt flag after 30 s (stopping compute-bound handlers), and cancels
//! the call token (stopping handlers parked on a proxied fetch).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rquickjs::function::{Async, Func};
use rquickjs::{AsyncContext, AsyncRuntime, Promise, async_with};
use tokio_util::sync::CancellationToken;

use chorus_core::ToolDefinition;
use chorus_core::ports::ToolExecutor;

use crate::error::SandboxError;
use crate::fetch;

/// Hard wall-clock limit per handler invocation.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Memory ceiling per handler invocation.
pub const MEMORY_LIMIT_BYTES: usize = 128 * 1024 * 1024;

/// Isolated executor for one agent's tool handlers.
pub struct Sandbox {
    /// Tool name → opaque handler source.
    handlers: HashMap<String, String>,
    /// Agent secrets, shallow-copied into each call.
    secrets: HashMap<String, String>,
    /// Host HTTP client backing the proxied fetch.
    http: reqwest::Client,
    /// Wall clock per invocation; [`TOOL_TIMEOUT`] unless overridden.
    tool_timeout: Duration,
    disposed: AtomicBool,
}

impl Sandbox {
    /// Build a sandbox seeded with each tool's handler source and a secrets
    /// snapshot. Handler compile errors surface on first invocation.
    #[must_use]
    pub fn new(tools: &[ToolDefinition], secrets: HashMap<String, String>) -> Self {
        let handlers = tools
            .iter()
            .map(|t| (t.name.clone(), t.handler_source.clone()))
            .collect();
        Self {
            handlers,
            secrets,
            http: reqwest::Client::new(),
            tool_timeout: TOOL_TIMEOUT,
            disposed: AtomicBool::new(false),
        }
    }

    /// Override the per-invocation wall clock.
    #[must_use]
    pub const fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Run handler `name` with `(args, {secrets, fetch})`.
    ///
    /// Strings return as-is; other values are JSON-stringified. Handler
    /// exceptions return `"Error: <message>"`, an unregistered name returns
    /// `Unknown tool "<name>"`, a wall-clock breach returns a string
    /// beginning with `"timed out"`, and a memory breach returns
    /// `"Error: memory limit exceeded"`.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> String {
        if self.disposed.load(Ordering::SeqCst) {
            return "Error: sandbox disposed".to_string();
        }
        let Some(source) = self.handlers.get(name) else {
            return format!("Unknown tool \"{name}\"");
        };

        let interrupt = Arc::new(AtomicBool::new(false));
        let timed_out = Arc::new(AtomicBool::new(false));
        let call_token = cancel.child_token();

        // Watchdog: interrupt compute-bound JS on cancel, and flag + cancel
        // on wall-clock expiry so pending fetches abort too.
        let watchdog = tokio::spawn({
            let interrupt = Arc::clone(&interrupt);
            let timed_out = Arc::clone(&timed_out);
            let call_token = call_token.clone();
            let timeout = self.tool_timeout;
            async move {
                tokio::select! {
                    () = call_token.cancelled() => {
                        interrupt.store(true, Ordering::SeqCst);
                    }
                    () = tokio::time::sleep(timeout) => {
                        timed_out.store(true, Ordering::SeqCst);
                        interrupt.store(true, Ordering::SeqCst);
                        call_token.cancel();
                    }
                }
            }
        });

        let outcome = self
            .run_isolate(source, &args, &call_token, Arc::clone(&interrupt))
            .await;
        watchdog.abort();

        match outcome {
            Ok(result) => result,
            Err(SandboxError::Js(message)) => {
                if timed_out.load(Ordering::SeqCst) {
                    format!("timed out after {} seconds", self.tool_timeout.as_secs())
                } else if cancel.is_cancelled() {
                    "Error: cancelled".to_string()
                } else if is_oom(&message) {
                    "Error: memory limit exceeded".to_string()
                } else {
                    format!("Error: {message}")
                }
            }
            Err(e) => format!("Error: {e}"),
        }
    }

    /// Release the sandbox. Idempotent; later calls return an error string.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    async fn run_isolate(
        &self,
        handler_source: &str,
        args: &serde_json::Value,
        call_token: &CancellationToken,
        interrupt: Arc<AtomicBool>,
    ) -> Result<String, SandboxError> {
        let runtime = AsyncRuntime::new().map_err(|e| SandboxError::Init(e.to_string()))?;
        runtime.set_memory_limit(MEMORY_LIMIT_BYTES).await;
        runtime
            .set_interrupt_handler(Some(Box::new(move || interrupt.load(Ordering::SeqCst))))
            .await;

        let context = AsyncContext::full(&runtime)
            .await
            .map_err(|e| SandboxError::Init(e.to_string()))?;

        let args_json = serde_json::to_string(args)?;
        let secrets_json = serde_json::to_string(&self.secrets)?;
        let driver = build_driver(handler_source);

        let client = self.http.clone();
        let fetch_token = call_token.clone();

        async_with!(context => |ctx| {
            let run = async {
                let globals = ctx.globals();
                globals.set("__args_json", args_json.as_str())?;
                globals.set("__secrets_json", secrets_json.as_str())?;
                globals.set(
                    "__host_fetch",
                    Func::from(Async(move |request_json: String| {
                        let client = client.clone();
                        let token = fetch_token.clone();
                        async move { fetch::perform(&client, &request_json, &token).await }
                    })),
                )?;

                let promise: Promise = ctx.eval(driver)?;
                promise.into_future::<String>().await
            };

            run.await.map_err(|e| match e {
                rquickjs::Error::Exception => SandboxError::Js(caught_message(&ctx)),
                other => SandboxError::Js(other.to_string()),
            })
        })
        .await
    }
}

#[async_trait]
impl ToolExecutor for Sandbox {
    async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> String {
        Self::execute(self, name, args, cancel).await
    }

    fn dispose(&self) {
        Self::dispose(self);
    }
}

/// Whether an engine error message reports the memory ceiling. QuickJS
/// phrases it as "out of memory"; rquickjs's own allocation failures say
/// "allocation".
fn is_oom(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("out of memory") || lower.contains("allocation")
}

/// Extract the pending exception's message from the context.
///
/// Handles both `throw new Error("…")` (message on the exception object)
/// and bare value throws like `throw "text"`.
pub(crate) fn caught_message(ctx: &rquickjs::Ctx<'_>) -> String {
    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        if let Some(message) = exception.message() {
            return message;
        }
    }
    if let Some(text) = caught.as_string() {
        if let Ok(text) = text.to_string() {
            return text;
        }
    }
    "unknown exception".to_string()
}

/// Build the per-call driver script around the opaque handler source.
///
/// The driver parses the args and secrets snapshots, freezes the secrets,
/// wires the `fetch` shim over the single host function, awaits the
/// handler, and applies the string-or-JSON coercion rule.
fn build_driver(handler_source: &str) -> String {
    format!(
        r#"(async () => {{
  "use strict";
  const __handler = ({handler_source});
  if (typeof __handler !== "function") {{
    throw new Error("tool handler is not a function");
  }}
  const __args = JSON.parse(__args_json);
  const __ctx = {{
    secrets: Object.freeze(JSON.parse(__secrets_json)),
    fetch: async (url, init) => {{
      const __raw = await __host_fetch(JSON.stringify({{ url: String(url), init: init ?? null }}));
      const __res = JSON.parse(__raw);
      if (__res.error) throw new Error(__res.error);
      return {{
        status: __res.status,
        ok: __res.status >= 200 && __res.status < 300,
        headers: __res.headers,
        text: async () => __res.body,
        json: async () => JSON.parse(__res.body),
      }};
    }},
  }};
  const __result = await __handler(__args, __ctx);
  if (typeof __result === "string") return __result;
  const __json = JSON.stringify(__result);
  return __json === undefined ? "null" : __json;
}})()"#
    )
}
