//! The turn task — one chat+TTS cycle for one completed user turn.
//!
//! A turn task is spawned by the driver and is the *only* producer of this
//! turn's outbound frames, so the per-turn ordering
//! `turn → thinking → (chat) → audio* → tts_done` falls out of sequential
//! code. The driver guarantees at most one turn task is alive by cancelling
//! and awaiting the predecessor before spawning a successor.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chorus_core::ports::{LlmError, TtsError};
use chorus_core::text::{normalize_voice_text, split_into_chunks};
use chorus_core::{ChatMessage, ServerFrame, SessionState, ToolCall};

use crate::driver::{Outbound, SessionDeps, send_frame};
use crate::shared::SessionShared;

/// Upper bound on LLM iterations within one turn.
pub const MAX_TOOL_ITERATIONS: usize = 3;

/// Spoken when the LLM returns neither text nor tool calls.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response.";

/// Spoken when the tool loop hits [`MAX_TOOL_ITERATIONS`] without a final
/// text. Falling through silently would leave the client stuck in
/// `thinking` with no terminal frame for the turn.
pub const LOOP_EXHAUSTED_REPLY: &str = "Sorry, I couldn't finish that request.";

/// How a turn task ended. The driver only uses this for logging — all
/// frames and state transitions already happened inside the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TurnOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Drive one user turn end to end.
pub(crate) async fn run_turn(
    shared: Arc<SessionShared>,
    deps: SessionDeps,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    text: String,
) -> TurnOutcome {
    send_frame(&outbound, ServerFrame::Turn { text: text.clone() }).await;
    shared.set_state(SessionState::Thinking);
    send_frame(&outbound, ServerFrame::Thinking).await;

    shared.push_message(ChatMessage::user(text));

    let tool_specs: Vec<_> = deps
        .agent
        .tools
        .iter()
        .map(chorus_core::ToolDefinition::spec)
        .collect();
    let mut steps: Vec<String> = Vec::new();

    for iteration in 0..MAX_TOOL_ITERATIONS {
        let reply = match deps
            .llm
            .chat(&shared.transcript(), &tool_specs, &cancel)
            .await
        {
            Ok(reply) => reply,
            Err(LlmError::Cancelled) => return TurnOutcome::Cancelled,
            Err(e) => {
                warn!(session = %shared.id(), error = %e, "chat completion failed");
                send_frame(
                    &outbound,
                    ServerFrame::Error {
                        message: "Chat failed".to_string(),
                        details: None,
                    },
                )
                .await;
                shared.set_state(SessionState::Error);
                return TurnOutcome::Failed;
            }
        };

        if !reply.has_tool_calls() {
            let final_text = reply
                .content
                .unwrap_or_else(|| FALLBACK_REPLY.to_string());
            shared.push_message(ChatMessage::assistant(final_text.clone()));
            return speak_reply(&shared, &deps, &outbound, &cancel, final_text, steps).await;
        }

        debug!(
            session = %shared.id(),
            iteration,
            calls = reply.tool_calls.len(),
            "executing tool call batch"
        );
        shared.push_message(ChatMessage::assistant_tool_calls(
            reply.content,
            reply.tool_calls.clone(),
        ));
        steps.extend(
            reply
                .tool_calls
                .iter()
                .map(|call| format!("Using {}", call.name)),
        );

        // The batch runs in parallel; join_all keeps result order aligned
        // with tool-call order for the transcript.
        let results = join_all(
            reply
                .tool_calls
                .iter()
                .map(|call| execute_tool_call(&deps, call, &cancel)),
        )
        .await;

        if cancel.is_cancelled() {
            return TurnOutcome::Cancelled;
        }

        shared.extend_messages(
            reply
                .tool_calls
                .iter()
                .zip(results)
                .map(|(call, result)| ChatMessage::tool(call.id.clone(), result)),
        );
    }

    // Iteration cap reached without a final text.
    warn!(session = %shared.id(), "tool loop exhausted without a final reply");
    shared.push_message(ChatMessage::assistant(LOOP_EXHAUSTED_REPLY));
    speak_reply(
        &shared,
        &deps,
        &outbound,
        &cancel,
        LOOP_EXHAUSTED_REPLY.to_string(),
        steps,
    )
    .await
}

/// Speak the greeting at session start: `greeting` frame, then TTS. No
/// `chat` frame — the greeting is not a turn reply.
pub(crate) async fn run_greeting(
    shared: Arc<SessionShared>,
    deps: SessionDeps,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
) -> TurnOutcome {
    let text = deps.agent.greeting.clone();
    send_frame(&outbound, ServerFrame::Greeting { text: text.clone() }).await;
    shared.push_message(ChatMessage::assistant(text.clone()));
    speak_text(&shared, &deps, &outbound, &cancel, &text).await
}

/// Run one tool call: parse the arguments, then execute.
///
/// A JSON parse failure is the tool's *result* — the literal error string
/// goes back into the transcript so the model can react on its next
/// iteration instead of the session erroring.
async fn execute_tool_call(
    deps: &SessionDeps,
    call: &ToolCall,
    cancel: &CancellationToken,
) -> String {
    let args: serde_json::Value = match serde_json::from_str(&call.arguments_json) {
        Ok(args) => args,
        Err(_) => {
            return format!("Error: Invalid JSON arguments for tool \"{}\"", call.name);
        }
    };
    deps.tools.execute(&call.name, args, cancel).await
}

/// Emit the `chat` frame, then stream TTS until completion or cancel.
async fn speak_reply(
    shared: &Arc<SessionShared>,
    deps: &SessionDeps,
    outbound: &mpsc::Sender<Outbound>,
    cancel: &CancellationToken,
    text: String,
    steps: Vec<String>,
) -> TurnOutcome {
    send_frame(
        outbound,
        ServerFrame::Chat {
            text: text.clone(),
            steps,
        },
    )
    .await;
    speak_text(shared, deps, outbound, cancel, &text).await
}

/// Stream TTS for `text`, closing the turn with `tts_done` on success.
async fn speak_text(
    shared: &Arc<SessionShared>,
    deps: &SessionDeps,
    outbound: &mpsc::Sender<Outbound>,
    cancel: &CancellationToken,
    text: &str,
) -> TurnOutcome {
    shared.set_state(SessionState::Speaking);

    match stream_tts(deps, outbound, cancel, text).await {
        Ok(()) => {
            send_frame(outbound, ServerFrame::TtsDone).await;
            shared.set_state(SessionState::Listening);
            TurnOutcome::Completed
        }
        Err(TtsError::Cancelled) => TurnOutcome::Cancelled,
        Err(e) => {
            warn!(session = %shared.id(), error = %e, "TTS synthesis failed");
            send_frame(
                outbound,
                ServerFrame::Error {
                    message: "TTS synthesis failed".to_string(),
                    details: None,
                },
            )
            .await;
            shared.set_state(SessionState::Error);
            TurnOutcome::Failed
        }
    }
}

/// Synthesize `text` and forward each PCM chunk to the client.
///
/// The reply is normalized for speech and split into sentence-sized
/// chunks; the vendor handles short inputs more reliably and the first
/// chunk's audio starts streaming while later ones are still queued.
async fn stream_tts(
    deps: &SessionDeps,
    outbound: &mpsc::Sender<Outbound>,
    cancel: &CancellationToken,
    text: &str,
) -> Result<(), TtsError> {
    let spoken = normalize_voice_text(text);
    for chunk in split_into_chunks(&spoken) {
        if cancel.is_cancelled() {
            return Err(TtsError::Cancelled);
        }
        synthesize_chunk(deps, outbound, cancel, &chunk).await?;
    }
    Ok(())
}

/// One vendor synthesis call, with its audio forwarded as it arrives.
///
/// The synthesis future and the chunk forwarder are polled together; once
/// synthesis resolves, whatever is left in the channel is drained so the
/// final frames are not lost.
async fn synthesize_chunk(
    deps: &SessionDeps,
    outbound: &mpsc::Sender<Outbound>,
    cancel: &CancellationToken,
    text: &str,
) -> Result<(), TtsError> {
    let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(64);
    let synth = deps.tts.synthesize(text, audio_tx, cancel.clone());
    tokio::pin!(synth);

    let mut synth_result: Option<Result<(), TtsError>> = None;
    loop {
        tokio::select! {
            chunk = audio_rx.recv() => match chunk {
                Some(pcm) => {
                    if outbound.send(Outbound::Audio(pcm)).await.is_err() {
                        // Client gone; the adapter sees the closed channel.
                        return Err(TtsError::Cancelled);
                    }
                }
                // Sender dropped: synthesis is over, its result is next.
                None => break,
            },
            result = &mut synth, if synth_result.is_none() => {
                synth_result = Some(result);
            }
        }
    }

    match synth_result {
        Some(result) => result,
        // audio_rx closed before the future resolved — await the verdict.
        None => synth.await,
    }
}
