//! The session driver — one task per client WebSocket.
//!
//! The driver owns the `select!` loop over client inputs and STT events,
//! forwards microphone audio to STT without blocking, and manages the
//! lifecycle of at most one in-flight turn task. The transport layer
//! (chorus-server) feeds `ClientInput`s in and drains `Outbound`s to the
//! socket; tests drive the same channels directly.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chorus_core::ports::{ChatCompleter, SttConnector, SttEvent, SttHandle, ToolExecutor, TtsSynthesizer};
use chorus_core::{AgentDefinition, ClientFrame, ServerFrame, SessionState};

use crate::shared::SessionShared;
use crate::turn::{self, TurnOutcome};

/// Everything a client connection can feed the driver.
#[derive(Debug)]
pub enum ClientInput {
    /// A parsed JSON control frame.
    Control(ClientFrame),
    /// A binary microphone PCM16 LE frame.
    Audio(Bytes),
    /// The transport closed (gracefully or not).
    Closed,
}

/// Everything the driver sends back to the client.
#[derive(Debug)]
pub enum Outbound {
    Frame(ServerFrame),
    /// A binary PCM16 LE TTS frame.
    Audio(Bytes),
}

/// Collaborator handles for one session. Cheap to clone — everything is
/// behind an `Arc`.
#[derive(Clone)]
pub struct SessionDeps {
    pub agent: Arc<AgentDefinition>,
    pub stt: Arc<dyn SttConnector>,
    pub tts: Arc<dyn TtsSynthesizer>,
    pub llm: Arc<dyn ChatCompleter>,
    pub tools: Arc<dyn ToolExecutor>,
    /// Microphone rate advertised in `ready` (Hz).
    pub mic_sample_rate: u32,
}

/// One in-flight turn (or greeting) task.
struct Inflight {
    cancel: CancellationToken,
    handle: JoinHandle<TurnOutcome>,
}

/// The per-connection state machine driver.
pub struct SessionDriver;

impl SessionDriver {
    /// Drive one session to completion. Returns when the client closes or
    /// the input channel is dropped.
    pub async fn run(
        deps: SessionDeps,
        mut inputs: mpsc::Receiver<ClientInput>,
        outbound: mpsc::Sender<Outbound>,
    ) {
        let shared = Arc::new(SessionShared::new(
            uuid::Uuid::new_v4().to_string(),
            deps.agent.system_prompt(),
        ));
        info!(session = %shared.id(), agent = %deps.agent.slug, "session opened");

        send_frame(
            &outbound,
            ServerFrame::Ready {
                sample_rate: deps.mic_sample_rate,
                tts_sample_rate: deps.tts.sample_rate(),
                version: Some(1),
            },
        )
        .await;
        shared.set_state(SessionState::Ready);

        let mut stt_handle: Option<Box<dyn SttHandle>> = None;
        let mut stt_events: Option<mpsc::Receiver<SttEvent>> = None;
        let mut inflight: Option<Inflight> = None;

        loop {
            tokio::select! {
                input = inputs.recv() => {
                    let input = input.unwrap_or(ClientInput::Closed);
                    match input {
                        ClientInput::Audio(pcm) => {
                            shared.count_audio_frame();
                            // Non-blocking fan-in; frames before audio_ready
                            // (no handle yet) are dropped.
                            if let Some(handle) = &stt_handle {
                                handle.send_audio(pcm);
                            }
                        }
                        ClientInput::Control(frame) => {
                            match frame {
                                ClientFrame::AudioReady => {
                                    if stt_handle.is_some() {
                                        debug!(session = %shared.id(), "duplicate audio_ready, ignoring");
                                        continue;
                                    }
                                    match deps.stt.connect().await {
                                        Ok((handle, events)) => {
                                            stt_handle = Some(handle);
                                            stt_events = Some(events);
                                            shared.set_state(SessionState::Listening);
                                            if !deps.agent.greeting.trim().is_empty() {
                                                inflight = Some(spawn_greeting(
                                                    &shared, &deps, &outbound,
                                                ));
                                            }
                                        }
                                        Err(e) => {
                                            warn!(session = %shared.id(), error = %e, "STT connect failed");
                                            send_frame(&outbound, ServerFrame::Error {
                                                message: "Failed to connect to speech recognition".to_string(),
                                                details: None,
                                            }).await;
                                            shared.set_state(SessionState::Error);
                                        }
                                    }
                                }
                                ClientFrame::Cancel => {
                                    cancel_inflight(&mut inflight).await;
                                    if let Some(handle) = &stt_handle {
                                        handle.clear();
                                    }
                                    send_frame(&outbound, ServerFrame::Cancelled).await;
                                    if matches!(
                                        shared.state(),
                                        SessionState::Thinking | SessionState::Speaking
                                    ) {
                                        shared.set_state(SessionState::Listening);
                                    }
                                }
                                ClientFrame::Reset => {
                                    cancel_inflight(&mut inflight).await;
                                    shared.reset_transcript();
                                    send_frame(&outbound, ServerFrame::Reset).await;
                                    match shared.state() {
                                        SessionState::Thinking | SessionState::Speaking => {
                                            shared.set_state(SessionState::Listening);
                                        }
                                        // A failed turn left the session in
                                        // error; with STT still live the
                                        // reset re-arms it, stepping through
                                        // the table like a fresh negotiation.
                                        SessionState::Error if stt_handle.is_some() => {
                                            shared.set_state(SessionState::Connecting);
                                            shared.set_state(SessionState::Ready);
                                            shared.set_state(SessionState::Listening);
                                        }
                                        _ => {}
                                    }
                                }
                                ClientFrame::Ping => {
                                    send_frame(&outbound, ServerFrame::Pong).await;
                                }
                                ClientFrame::Unknown => {
                                    debug!(session = %shared.id(), "unknown client frame dropped");
                                }
                            }
                        }
                        ClientInput::Closed => break,
                    }
                }

                event = recv_or_pending(&mut stt_events) => {
                    match event {
                        Some(SttEvent::Transcript { text, is_final }) => {
                            send_frame(&outbound, ServerFrame::Transcript { text, is_final }).await;
                        }
                        Some(SttEvent::Turn { text }) => {
                            if text.trim().is_empty() {
                                continue;
                            }
                            if shared.state() == SessionState::Error {
                                // A failed session takes no new turns until
                                // the client resets or reconnects.
                                debug!(session = %shared.id(), "turn ignored in error state");
                                continue;
                            }
                            // Barge-in semantics: the new turn first cancels
                            // (and awaits) the previous chat + TTS.
                            cancel_inflight(&mut inflight).await;
                            inflight = Some(spawn_turn(&shared, &deps, &outbound, text));
                        }
                        Some(SttEvent::Error(message)) => {
                            warn!(session = %shared.id(), error = %message, "STT stream error");
                        }
                        Some(SttEvent::Closed) | None => {
                            debug!(session = %shared.id(), "STT stream closed");
                            stt_events = None;
                        }
                    }
                }
            }
        }

        // Teardown: cancel in-flight work, close STT, release the sandbox.
        cancel_inflight(&mut inflight).await;
        if let Some(handle) = &stt_handle {
            handle.close();
        }
        deps.tools.dispose();
        info!(
            session = %shared.id(),
            audio_frames = shared.audio_frames(),
            "session closed"
        );
    }
}

/// Receive from an optional channel; pend forever when absent or finished.
async fn recv_or_pending(events: &mut Option<mpsc::Receiver<SttEvent>>) -> Option<SttEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Cancel the in-flight turn and *await* it, so no frame of the old turn
/// can be emitted after any frame of what follows.
async fn cancel_inflight(inflight: &mut Option<Inflight>) {
    if let Some(turn) = inflight.take() {
        turn.cancel.cancel();
        match turn.handle.await {
            Ok(outcome) => debug!(?outcome, "in-flight turn finished"),
            Err(e) => warn!(error = %e, "turn task panicked"),
        }
    }
}

fn spawn_turn(
    shared: &Arc<SessionShared>,
    deps: &SessionDeps,
    outbound: &mpsc::Sender<Outbound>,
    text: String,
) -> Inflight {
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(turn::run_turn(
        Arc::clone(shared),
        deps.clone(),
        outbound.clone(),
        cancel.clone(),
        text,
    ));
    Inflight { cancel, handle }
}

fn spawn_greeting(
    shared: &Arc<SessionShared>,
    deps: &SessionDeps,
    outbound: &mpsc::Sender<Outbound>,
) -> Inflight {
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(turn::run_greeting(
        Arc::clone(shared),
        deps.clone(),
        outbound.clone(),
        cancel.clone(),
    ));
    Inflight { cancel, handle }
}

/// Send one control frame; a closed outbound just means the client left.
pub(crate) async fn send_frame(outbound: &mpsc::Sender<Outbound>, frame: ServerFrame) {
    if outbound.send(Outbound::Frame(frame)).await.is_err() {
        debug!("outbound channel closed while sending frame");
    }
}
