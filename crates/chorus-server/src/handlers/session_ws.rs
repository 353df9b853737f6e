//! WebSocket upgrade handler for voice sessions.
//!
//! `GET /session` (single-agent mode) and `GET /{slug}/session`
//! (multi-agent mode) upgrade to the session WebSocket. The socket carries
//! JSON control frames both ways and binary PCM16 LE audio (microphone up,
//! TTS down).
//!
//! ## Lifecycle
//!
//! 1. Resolve the agent worker (default, or through the deploy registry).
//!    An unknown slug accepts the upgrade and immediately closes with
//!    code 4404 so browser clients get a distinguishable close reason.
//! 2. Build the session's collaborators: STT/TTS adapters keyed by the
//!    worker's env, the chat completer, and a fresh sandbox tool router.
//! 3. Spawn the [`SessionDriver`] and two plumbing tasks:
//!    * **ingest** — decodes socket messages into `ClientInput`s. Dropping
//!      the sender tells the driver the client is gone.
//!    * **egress** — serializes `Outbound`s back onto the socket.
//! 4. Whichever plumbing task finishes first aborts the other; the driver
//!    tears down STT and the sandbox on its way out.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chorus_core::config::MIC_SAMPLE_RATE;
use chorus_core::{ClientFrame, PlatformConfig};
use chorus_llm::{LlmConfig, OpenAiChat};
use chorus_registry::AgentWorker;
use chorus_sandbox::ToolRouter;
use chorus_session::{ClientInput, Outbound, SessionDeps, SessionDriver};
use chorus_speech::{AssemblyAiStt, AssemblyAiTts, SttConfig, TtsConfig};

use crate::state::AppState;

/// WebSocket close code for an unknown slug.
const CLOSE_UNKNOWN_SLUG: u16 = 4404;

/// `GET /session` — single-agent mode.
pub async fn default_session(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        match state.default_agent.clone() {
            Some(worker) => handle_session(socket, worker, state).await,
            None => close_unknown(socket, "no default agent configured").await,
        }
    })
}

/// `GET /{slug}/session` — multi-agent mode via the deploy registry.
pub async fn slug_session(
    ws: WebSocketUpgrade,
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        match state.registry.worker(&slug).await {
            Ok(worker) => handle_session(socket, worker, state).await,
            Err(e) => {
                warn!(slug = %slug, error = %e, "session routing failed");
                close_unknown(socket, &format!("unknown slug: {slug}")).await;
            }
        }
    })
}

async fn close_unknown(mut socket: WebSocket, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_UNKNOWN_SLUG,
            reason: reason.to_string().into(),
        })))
        .await;
}

/// Wire one accepted socket to a session driver.
async fn handle_session(socket: WebSocket, worker: Arc<AgentWorker>, state: AppState) {
    let deps = build_deps(&state.config, &worker);
    info!(agent = %worker.definition.slug, "session WebSocket opened");

    let (input_tx, input_rx) = mpsc::channel::<ClientInput>(64);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(256);

    // The driver contains all session failures; a panic here is confined
    // to this task and the process lives on.
    let driver = tokio::spawn(SessionDriver::run(deps, input_rx, outbound_tx));

    let (mut ws_sink, mut ws_source) = socket.split();

    // ── Ingest: socket → driver inputs ───────────────────────────────
    let mut ingest = tokio::spawn(async move {
        while let Some(next) = ws_source.next().await {
            let input = match next {
                Ok(Message::Binary(pcm)) => ClientInput::Audio(pcm.into()),
                Ok(Message::Text(text)) => match ClientFrame::parse(&text) {
                    Some(frame) => ClientInput::Control(frame),
                    None => {
                        debug!("malformed client frame dropped");
                        continue;
                    }
                },
                Ok(Message::Close(_)) | Err(_) => break,
                // Transport-level ping/pong is handled by axum.
                Ok(_) => continue,
            };
            if input_tx.send(input).await.is_err() {
                break;
            }
        }
        let _ = input_tx.send(ClientInput::Closed).await;
    });

    // ── Egress: driver outbound → socket ─────────────────────────────
    let mut egress = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            let message = match outbound {
                Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        warn!(error = %e, "unserializable server frame dropped");
                        continue;
                    }
                },
                Outbound::Audio(pcm) => Message::Binary(pcm.to_vec()),
            };
            if ws_sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Wait for whichever plumbing task finishes first, then abort the
    // other. Covers both graceful close and abrupt network drops.
    tokio::select! {
        _ = &mut ingest => egress.abort(),
        _ = &mut egress => ingest.abort(),
    }
    if let Err(e) = driver.await {
        warn!(error = %e, "session driver task failed");
    }
    info!(agent = %worker.definition.slug, "session WebSocket closed");
}

/// Build the per-session collaborator set from the worker's env.
fn build_deps(config: &PlatformConfig, worker: &Arc<AgentWorker>) -> SessionDeps {
    let env = &worker.env;
    let stt_key = env
        .get("ASSEMBLYAI_API_KEY")
        .cloned()
        .unwrap_or_else(|| config.assemblyai_api_key.clone());
    let tts_key = env
        .get("ASSEMBLYAI_TTS_API_KEY")
        .cloned()
        .unwrap_or_else(|| config.assemblyai_tts_api_key.clone());

    let agent = Arc::clone(&worker.definition);
    let tools = ToolRouter::for_agent(&agent, env.clone());

    SessionDeps {
        stt: Arc::new(AssemblyAiStt::new(SttConfig {
            api_key: stt_key,
            sample_rate: MIC_SAMPLE_RATE,
            wss_url: None,
        })),
        tts: Arc::new(AssemblyAiTts::new(TtsConfig {
            api_key: tts_key,
            voice: agent.voice.clone(),
            sample_rate: chorus_core::config::TTS_SAMPLE_RATE,
            wss_url: config.tts_wss_url.clone(),
        })),
        llm: Arc::new(OpenAiChat::new(LlmConfig {
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
        })),
        tools: Arc::new(tools),
        agent,
        mic_sample_rate: MIC_SAMPLE_RATE,
    }
}
