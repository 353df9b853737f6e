//! Tool sandbox — isolated execution of agent-supplied JavaScript handlers.
//!
//! Agent tools are JavaScript function expressions (`async (args, ctx) =>
//! any`) shipped inside a deploy bundle. The platform treats them as opaque
//! source text until execution: each call runs in a throwaway QuickJS
//! runtime + context pair with a 128 MiB memory ceiling and a 30 s wall
//! clock, so nothing a handler does — globals, prototype pollution, runaway
//! allocation, infinite loops — can outlive the call or touch the host.
//!
//! Inside the isolate nothing of the host resolves: no process handles, no
//! timers, no filesystem, no environment, no module loader, no native HTTP
//! client. The two capabilities a handler does get arrive on its `ctx`
//! argument: a frozen copy of the agent's secrets and a `fetch` whose body
//! is fulfilled by the host's HTTP client (and aborted by the call's cancel
//! token).
//!
//! Failures are values: handler exceptions, timeouts, memory breaches, and
//! unknown tool names all come back as result strings the LLM can read.

mod builtin;
mod error;
mod fetch;
mod isolate;
mod loader;
mod router;

pub use builtin::{is_builtin, run_builtin};
pub use error::SandboxError;
pub use isolate::{MEMORY_LIMIT_BYTES, Sandbox, TOOL_TIMEOUT};
pub use loader::load_agent;
pub use router::ToolRouter;
