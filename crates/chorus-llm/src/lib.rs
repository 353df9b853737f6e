//! Chat-completion adapter — OpenAI-compatible `POST /chat/completions`.
//!
//! The adapter translates the session transcript and tool specs into the
//! OpenAI wire format, issues one non-streaming completion request, and
//! normalizes the first choice into an [`AssistantReply`]: either final
//! text or a batch of parallel tool calls. Cancellation races the HTTP
//! round trip against the turn's cancel token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use chorus_core::chat::{ChatMessage, ToolCall};
use chorus_core::ports::{AssistantReply, ChatCompleter, LlmError};
use chorus_core::agent::ToolSpec;

/// LLM adapter configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible endpoint (no trailing slash needed).
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

/// [`ChatCompleter`] over an OpenAI-compatible HTTP endpoint.
pub struct OpenAiChat {
    config: LlmConfig,
    http: reqwest::Client,
}

impl OpenAiChat {
    #[must_use]
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ChatCompleter for OpenAiChat {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        cancel: &CancellationToken,
    ) -> Result<AssistantReply, LlmError> {
        let body = CompletionRequest {
            model: &self.config.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: tools.iter().map(WireTool::from).collect(),
        };

        let mut request = self.http.post(self.completions_url()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        debug!(model = %self.config.model, messages = messages.len(), tools = tools.len(), "chat completion requested");

        let response = tokio::select! {
            result = request.send() => result.map_err(|e| LlmError::Request(e.to_string()))?,
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
        };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Request(format!("{status}: {detail}")));
        }

        let completion = tokio::select! {
            result = response.json::<CompletionResponse>() => {
                result.map_err(|e| LlmError::Malformed(e.to_string()))?
            }
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
        };

        parse_reply(completion)
    }
}

fn parse_reply(completion: CompletionResponse) -> Result<AssistantReply, LlmError> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Malformed("completion has no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments_json: call.function.arguments,
        })
        .collect::<Vec<_>>();

    Ok(AssistantReply {
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
    })
}

// ── Wire DTOs ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        match message {
            ChatMessage::System { content } => Self {
                role: "system",
                content: Some(content),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
            ChatMessage::User { content } => Self {
                role: "user",
                content: Some(content),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => Self {
                role: "assistant",
                content: content.as_deref(),
                tool_calls: tool_calls.iter().map(WireToolCall::from).collect(),
                tool_call_id: None,
            },
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => Self {
                role: "tool",
                content: Some(content),
                tool_calls: Vec::new(),
                tool_call_id: Some(tool_call_id),
            },
        }
    }
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall<'a>,
}

impl<'a> From<&'a ToolCall> for WireToolCall<'a> {
    fn from(call: &'a ToolCall) -> Self {
        Self {
            id: &call.id,
            kind: "function",
            function: WireFunctionCall {
                name: &call.name,
                arguments: &call.arguments_json,
            },
        }
    }
}

#[derive(Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSpec<'a>,
}

impl<'a> From<&'a ToolSpec> for WireTool<'a> {
    fn from(spec: &'a ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireFunctionSpec {
                name: &spec.name,
                description: &spec.description,
                parameters: &spec.parameters,
            },
        }
    }
}

#[derive(Serialize)]
struct WireFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChoiceToolCall>,
}

#[derive(Deserialize)]
struct ChoiceToolCall {
    id: String,
    function: ChoiceFunction,
}

#[derive(Deserialize)]
struct ChoiceFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}
