//! The reconnecting client session.
//!
//! One background task owns the transport and drives the state machine;
//! the [`ClientSession`] handle sends it commands and exposes the event
//! bus. The task cycles through three phases:
//!
//! * **connected** — the `select!` loop over server traffic, microphone
//!   frames, the heartbeat, and commands.
//! * **backoff** — after an unintentional close: sleep `base·factor^k`
//!   (capped), then reconnect. The attempt counter resets on every
//!   `ready`; exhausting it raises `MaxReconnects` and parks the session.
//! * **idle** — after an intentional disconnect or exhausted backoff:
//!   wait for `connect()` or `reset()` to start a fresh cycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chorus_core::{ChatMessage, ClientFrame, ReconnectPolicy, ServerFrame, SessionState};

use crate::audio::{MicSource, SpeakerSink};
use crate::error::ClientError;
use crate::events::{ClientEvent, EventBus, EventKind, Subscription};
use crate::transport::{Connector, Transport, WireIn, WireOut};

/// Heartbeat period: one missed pong window closes the socket.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Full session URL, e.g. `wss://host/my-agent/session`.
    pub url: String,
    pub policy: ReconnectPolicy,
    pub ping_interval: Duration,
}

impl SessionOptions {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
            ping_interval: PING_INTERVAL,
        }
    }
}

/// Commands from the application to the session task.
enum Command {
    Connect,
    Cancel,
    Reset,
    Disconnect,
}

/// Conversation state visible to the application.
struct SharedState {
    state: Mutex<SessionState>,
    messages: Mutex<Vec<ChatMessage>>,
    partial_transcript: Mutex<String>,
    /// Latest microphone level (0.0–1.0), for UI meters to poll.
    mic_level: Mutex<f32>,
}

/// Handle to a running client session.
pub struct ClientSession {
    events: Arc<EventBus>,
    shared: Arc<SharedState>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ClientSession {
    /// Start a session with injected transport and audio implementations.
    /// Connects immediately.
    #[must_use]
    pub fn start(
        options: SessionOptions,
        connector: Box<dyn Connector>,
        mic: Box<dyn MicSource>,
        speaker: Box<dyn SpeakerSink>,
    ) -> Self {
        let events = EventBus::new();
        let shared = Arc::new(SharedState {
            state: Mutex::new(SessionState::Connecting),
            messages: Mutex::new(Vec::new()),
            partial_transcript: Mutex::new(String::new()),
            mic_level: Mutex::new(0.0),
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let runner = Runner {
            options,
            connector,
            mic,
            speaker,
            events: Arc::clone(&events),
            shared: Arc::clone(&shared),
            commands: command_rx,
            attempts: 0,
            cancel_pending: false,
            mic_rx: None,
        };
        tokio::spawn(runner.run());

        Self {
            events,
            shared,
            commands: command_tx,
        }
    }

    /// Start with the native transport (tokio-tungstenite) and audio
    /// devices (cpal microphone, rodio speaker).
    #[must_use]
    pub fn native(options: SessionOptions) -> Self {
        Self::start(
            options,
            Box::new(crate::transport::TungsteniteConnector),
            Box::new(crate::capture::CpalMicSource::new()),
            Box::new(crate::playback::RodioSpeakerSink::new()),
        )
    }

    /// Subscribe to one event kind.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.on(kind, handler)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().unwrap()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.messages.lock().unwrap().clone()
    }

    #[must_use]
    pub fn partial_transcript(&self) -> String {
        self.shared.partial_transcript.lock().unwrap().clone()
    }

    /// Latest microphone level (0.0–1.0), for UI meters.
    #[must_use]
    pub fn mic_level(&self) -> f32 {
        *self.shared.mic_level.lock().unwrap()
    }

    /// Reconnect after an intentional disconnect (or exhausted backoff).
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Barge-in: drop pending playback now, tell the server to stop.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }

    /// Clear the conversation. With an open socket this round-trips the
    /// server ack; with a closed one it resets locally and reconnects.
    pub fn reset(&self) {
        let _ = self.commands.send(Command::Reset);
    }

    /// Intentionally close; no reconnect until `connect()`.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }
}

// ── The session task ───────────────────────────────────────────────

/// Why a connection phase ended.
enum ConnectionEnd {
    /// `disconnect()` — no reconnect.
    Intentional,
    /// Transport loss, heartbeat timeout, or send failure.
    Dropped,
    /// The application handle was dropped; exit the task.
    HandleGone,
}

/// What to do after backoff/idle.
enum Flow {
    Reconnect,
    Exit,
}

struct Runner {
    options: SessionOptions,
    connector: Box<dyn Connector>,
    mic: Box<dyn MicSource>,
    speaker: Box<dyn SpeakerSink>,
    events: Arc<EventBus>,
    shared: Arc<SharedState>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Scheduled-reconnect counter; resets on every `ready`.
    attempts: u32,
    /// Set by `cancel()`, cleared by the server's `cancelled` ack. While
    /// set, inbound binary audio is dropped before the playback queue.
    cancel_pending: bool,
    /// Microphone frames, present while audio is running.
    mic_rx: Option<mpsc::Receiver<Bytes>>,
}

impl Runner {
    async fn run(mut self) {
        loop {
            self.set_state(SessionState::Connecting);
            let url = self.options.url.clone();
            let connected = self.connector.connect(&url).await;
            let end = match connected {
                Ok(transport) => {
                    info!(url = %self.options.url, "session transport connected");
                    self.events.emit(&ClientEvent::Connected);
                    self.set_state(SessionState::Ready);
                    let end = self.run_connection(transport).await;
                    self.stop_audio();
                    self.events.emit(&ClientEvent::Disconnected);
                    end
                }
                Err(e) => {
                    warn!(error = %e, "session connect failed");
                    self.events.emit(&ClientEvent::Error(e));
                    ConnectionEnd::Dropped
                }
            };

            let flow = match end {
                ConnectionEnd::HandleGone => break,
                ConnectionEnd::Intentional => self.idle().await,
                ConnectionEnd::Dropped => self.backoff().await,
            };
            match flow {
                Flow::Reconnect => {}
                Flow::Exit => break,
            }
        }
        debug!("session task finished");
    }

    /// The connected phase.
    async fn run_connection(&mut self, mut transport: Box<dyn Transport>) -> ConnectionEnd {
        let mut pong_pending = false;
        let start = tokio::time::Instant::now() + self.options.ping_interval;
        let mut heartbeat = tokio::time::interval_at(start, self.options.ping_interval);

        loop {
            tokio::select! {
                inbound = transport.next() => match inbound {
                    Some(WireIn::Frame(frame)) => {
                        match self.handle_frame(frame, transport.as_mut(), &mut pong_pending).await {
                            Ok(()) => {}
                            Err(end) => return end,
                        }
                    }
                    Some(WireIn::Audio(pcm)) => {
                        if self.cancel_pending {
                            // Late TTS after a local cancel: drop until the
                            // server acknowledges.
                            debug!(bytes = pcm.len(), "dropping late audio frame");
                        } else {
                            self.speaker.enqueue(&pcm);
                        }
                    }
                    None => return ConnectionEnd::Dropped,
                },

                command = self.commands.recv() => match command {
                    Some(Command::Cancel) => {
                        self.cancel_pending = true;
                        self.speaker.clear();
                        if transport.send(WireOut::Frame(ClientFrame::Cancel)).await.is_err() {
                            return ConnectionEnd::Dropped;
                        }
                        self.set_state(SessionState::Listening);
                    }
                    Some(Command::Reset) => {
                        self.speaker.clear();
                        if transport.send(WireOut::Frame(ClientFrame::Reset)).await.is_err() {
                            return ConnectionEnd::Dropped;
                        }
                        // Local state clears when the server ack arrives.
                    }
                    Some(Command::Disconnect) => {
                        transport.close().await;
                        return ConnectionEnd::Intentional;
                    }
                    Some(Command::Connect) => {}
                    None => {
                        transport.close().await;
                        return ConnectionEnd::HandleGone;
                    }
                },

                frame = recv_or_pending(&mut self.mic_rx) => {
                    if let Some(pcm) = frame {
                        *self.shared.mic_level.lock().unwrap() =
                            crate::audio::audio_level(&pcm);
                        if transport.send(WireOut::Audio(pcm)).await.is_err() {
                            return ConnectionEnd::Dropped;
                        }
                    } else {
                        // Capture ended (device stop); keep the session up.
                        self.mic_rx = None;
                    }
                }

                _ = heartbeat.tick() => {
                    if pong_pending {
                        warn!("heartbeat pong missed, closing transport");
                        transport.close().await;
                        return ConnectionEnd::Dropped;
                    }
                    if transport.send(WireOut::Frame(ClientFrame::Ping)).await.is_err() {
                        return ConnectionEnd::Dropped;
                    }
                    pong_pending = true;
                }
            }
        }
    }

    /// Handle one server control frame.
    async fn handle_frame(
        &mut self,
        frame: ServerFrame,
        transport: &mut dyn Transport,
        pong_pending: &mut bool,
    ) -> Result<(), ConnectionEnd> {
        match frame {
            ServerFrame::Ready {
                sample_rate,
                tts_sample_rate,
                version,
            } => {
                debug!(sample_rate, tts_sample_rate, ?version, "ready received");
                self.attempts = 0;
                match self.start_audio(sample_rate, tts_sample_rate) {
                    Ok(()) => {
                        if transport
                            .send(WireOut::Frame(ClientFrame::AudioReady))
                            .await
                            .is_err()
                        {
                            // Socket died during setup: release the audio
                            // devices and let reconnect handle the rest.
                            self.stop_audio();
                            return Err(ConnectionEnd::Dropped);
                        }
                        self.set_state(SessionState::Listening);
                        self.events.emit(&ClientEvent::AudioReady);
                    }
                    Err(e) => {
                        warn!(error = %e, "audio setup failed");
                        self.stop_audio();
                        self.events.emit(&ClientEvent::Error(e));
                        self.set_state(SessionState::Error);
                    }
                }
            }
            ServerFrame::Greeting { text } => {
                self.push_message(ChatMessage::assistant(text));
                self.set_state(SessionState::Speaking);
            }
            ServerFrame::Transcript { text, is_final } => {
                *self.shared.partial_transcript.lock().unwrap() =
                    if is_final { String::new() } else { text.clone() };
                self.events.emit(&ClientEvent::Transcript { text, is_final });
            }
            ServerFrame::Turn { text } => {
                self.shared.partial_transcript.lock().unwrap().clear();
                self.push_message(ChatMessage::user(text));
            }
            ServerFrame::Thinking => self.set_state(SessionState::Thinking),
            ServerFrame::Chat { text, steps } => {
                debug!(steps = steps.len(), "assistant reply");
                self.push_message(ChatMessage::assistant(text));
                self.set_state(SessionState::Speaking);
            }
            ServerFrame::TtsDone => self.set_state(SessionState::Listening),
            ServerFrame::Cancelled => {
                self.cancel_pending = false;
                self.speaker.clear();
                self.set_state(SessionState::Listening);
            }
            ServerFrame::Reset => {
                self.speaker.clear();
                self.shared.messages.lock().unwrap().clear();
                self.shared.partial_transcript.lock().unwrap().clear();
                self.events.emit(&ClientEvent::Reset);
            }
            ServerFrame::Pong => *pong_pending = false,
            ServerFrame::Error { message, details } => {
                self.set_state(SessionState::Error);
                self.events
                    .emit(&ClientEvent::Error(ClientError::Server { message, details }));
            }
            ServerFrame::Unknown => debug!("unknown server frame dropped"),
        }
        Ok(())
    }

    /// Backoff phase after an unintentional close.
    async fn backoff(&mut self) -> Flow {
        if !self.options.policy.allows_attempt(self.attempts) {
            warn!(attempts = self.attempts, "reconnect attempts exhausted");
            self.events
                .emit(&ClientEvent::Error(ClientError::MaxReconnects));
            self.set_state(SessionState::Error);
            return self.idle().await;
        }

        let delay = self.options.policy.delay_for_attempt(self.attempts);
        self.attempts += 1;
        debug!(attempt = self.attempts, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return Flow::Reconnect,
                command = self.commands.recv() => match command {
                    Some(Command::Disconnect) => return self.idle().await,
                    Some(Command::Reset) => {
                        // Closed socket: reset locally, reconnect now.
                        self.local_reset();
                        return Flow::Reconnect;
                    }
                    Some(Command::Connect) => {
                        self.attempts = 0;
                        return Flow::Reconnect;
                    }
                    Some(Command::Cancel) => {}
                    None => return Flow::Exit,
                },
            }
        }
    }

    /// Idle phase: intentionally disconnected, waiting for instructions.
    async fn idle(&mut self) -> Flow {
        loop {
            match self.commands.recv().await {
                Some(Command::Connect) => {
                    self.attempts = 0;
                    return Flow::Reconnect;
                }
                Some(Command::Reset) => {
                    // Closed socket: local reset then a fresh connect cycle.
                    self.local_reset();
                    self.attempts = 0;
                    return Flow::Reconnect;
                }
                Some(Command::Cancel | Command::Disconnect) => {}
                None => return Flow::Exit,
            }
        }
    }

    fn local_reset(&mut self) {
        self.speaker.clear();
        self.shared.messages.lock().unwrap().clear();
        self.shared.partial_transcript.lock().unwrap().clear();
        self.events.emit(&ClientEvent::Reset);
    }

    /// Start both audio pipelines; both must succeed.
    fn start_audio(&mut self, mic_rate: u32, tts_rate: u32) -> Result<(), ClientError> {
        let (frame_tx, frame_rx) = mpsc::channel(64);
        self.mic.start(mic_rate, frame_tx)?;
        if let Err(e) = self.speaker.start(tts_rate) {
            self.mic.stop();
            return Err(e);
        }
        self.mic_rx = Some(frame_rx);
        Ok(())
    }

    fn stop_audio(&mut self) {
        self.mic.stop();
        self.speaker.stop();
        self.mic_rx = None;
        self.cancel_pending = false;
    }

    fn push_message(&self, message: ChatMessage) {
        self.shared.messages.lock().unwrap().push(message.clone());
        self.events.emit(&ClientEvent::Message(message));
    }

    /// Apply a state change. The client applies transitions the wire hands
    /// it and logs the ones outside the table (e.g. a reconnect from
    /// `listening` back to `connecting`).
    fn set_state(&self, next: SessionState) {
        let mut state = self.shared.state.lock().unwrap();
        if *state == next {
            return;
        }
        if !state.can_transition_to(next) {
            debug!(from = %*state, to = %next, "off-table client state transition");
        }
        *state = next;
        drop(state);
        self.events.emit(&ClientEvent::StateChange(next));
    }
}

/// Receive from an optional channel; pend forever when absent.
async fn recv_or_pending(rx: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
