//! Behavioral tests for the reconnecting client session.
//!
//! Scripted connectors and recording audio fakes replace the socket and
//! the devices; `start_paused` tokio time makes the backoff and heartbeat
//! schedules exact. No test here touches a real network or audio device.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use chorus_client::{
    ClientError, ClientEvent, ClientSession, Connector, EventKind, MicSource, SessionOptions,
    SpeakerSink, Transport, WireIn, WireOut,
};
use chorus_core::{ChatMessage, ClientFrame, ServerFrame, SessionState};

// ── Scripted transport ─────────────────────────────────────────────

/// Test-side controls for one scripted connection.
struct Peer {
    /// Feed server traffic to the client. Dropping it closes the socket.
    incoming: mpsc::UnboundedSender<WireIn>,
    /// Everything the client sent.
    sent: mpsc::UnboundedReceiver<WireOut>,
}

impl Peer {
    fn send(&self, frame: ServerFrame) {
        let _ = self.incoming.send(WireIn::Frame(frame));
    }

    fn send_audio(&self, bytes: &'static [u8]) {
        let _ = self.incoming.send(WireIn::Audio(Bytes::from_static(bytes)));
    }

    async fn next_sent(&mut self) -> WireOut {
        tokio::time::timeout(Duration::from_secs(120), self.sent.recv())
            .await
            .expect("timed out waiting for client traffic")
            .expect("client transport gone")
    }

    async fn expect_frame(&mut self, expected: ClientFrame) {
        match self.next_sent().await {
            WireOut::Frame(frame) => assert_eq!(frame, expected),
            WireOut::Audio(_) => panic!("expected a control frame, got audio"),
        }
    }
}

struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<WireIn>,
    sent: mpsc::UnboundedSender<WireOut>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn next(&mut self) -> Option<WireIn> {
        self.incoming.recv().await
    }

    async fn send(&mut self, out: WireOut) -> Result<(), ClientError> {
        self.sent
            .send(out)
            .map_err(|_| ClientError::ConnectionFailed("peer gone".to_string()))
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

/// Connector handing out prepared transports and recording connect times.
struct ScriptedConnector {
    transports: Mutex<VecDeque<FakeTransport>>,
    connect_times: Arc<Mutex<Vec<tokio::time::Instant>>>,
}

impl ScriptedConnector {
    /// Prepare `n` connections; returns the connector, per-connection
    /// peers, and the shared connect-time log.
    fn new(n: usize) -> (Self, Vec<Peer>, Arc<Mutex<Vec<tokio::time::Instant>>>) {
        let mut transports = VecDeque::new();
        let mut peers = Vec::new();
        for _ in 0..n {
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            transports.push_back(FakeTransport {
                incoming: in_rx,
                sent: out_tx,
            });
            peers.push(Peer {
                incoming: in_tx,
                sent: out_rx,
            });
        }
        let times = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                transports: Mutex::new(transports),
                connect_times: Arc::clone(&times),
            },
            peers,
            times,
        )
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, ClientError> {
        self.connect_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        match self.transports.lock().unwrap().pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(ClientError::ConnectionFailed("script exhausted".to_string())),
        }
    }
}

// ── Recording audio fakes ──────────────────────────────────────────

#[derive(Default)]
struct FakeMicState {
    starts: Vec<u32>,
    stops: usize,
}

struct FakeMic {
    state: Arc<Mutex<FakeMicState>>,
    /// Kept so the channel stays open while "capturing".
    frames: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
}

impl FakeMic {
    fn new() -> (Self, Arc<Mutex<FakeMicState>>, Arc<Mutex<Option<mpsc::Sender<Bytes>>>>) {
        let state = Arc::new(Mutex::new(FakeMicState::default()));
        let frames = Arc::new(Mutex::new(None));
        (
            Self {
                state: Arc::clone(&state),
                frames: Arc::clone(&frames),
            },
            state,
            frames,
        )
    }
}

impl MicSource for FakeMic {
    fn start(&mut self, sample_rate: u32, frames: mpsc::Sender<Bytes>) -> Result<(), ClientError> {
        self.state.lock().unwrap().starts.push(sample_rate);
        *self.frames.lock().unwrap() = Some(frames);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().stops += 1;
        *self.frames.lock().unwrap() = None;
    }
}

#[derive(Default)]
struct FakeSpeakerState {
    starts: Vec<u32>,
    enqueued: usize,
    clears: usize,
}

struct FakeSpeaker {
    state: Arc<Mutex<FakeSpeakerState>>,
}

impl FakeSpeaker {
    fn new() -> (Self, Arc<Mutex<FakeSpeakerState>>) {
        let state = Arc::new(Mutex::new(FakeSpeakerState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl SpeakerSink for FakeSpeaker {
    fn start(&mut self, sample_rate: u32) -> Result<(), ClientError> {
        self.state.lock().unwrap().starts.push(sample_rate);
        Ok(())
    }

    fn enqueue(&self, _pcm: &Bytes) {
        self.state.lock().unwrap().enqueued += 1;
    }

    fn clear(&self) {
        self.state.lock().unwrap().clears += 1;
    }

    fn stop(&mut self) {}
}

/// A mic that fails to start.
struct DeniedMic;

impl MicSource for DeniedMic {
    fn start(&mut self, _sample_rate: u32, _frames: mpsc::Sender<Bytes>) -> Result<(), ClientError> {
        Err(ClientError::MicDenied)
    }

    fn stop(&mut self) {}
}

// ── Harness helpers ────────────────────────────────────────────────

fn options() -> SessionOptions {
    SessionOptions::new("ws://test.invalid/session")
}

fn capture_events(session: &ClientSession, kind: EventKind) -> mpsc::UnboundedReceiver<ClientEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    // Subscriptions stay alive after the handle drops; leak it on purpose.
    std::mem::forget(session.on(kind, move |event| {
        let _ = tx.send(event.clone());
    }));
    rx
}

async fn ready_handshake(peer: &mut Peer) {
    peer.send(ServerFrame::Ready {
        sample_rate: 16_000,
        tts_sample_rate: 24_000,
        version: Some(1),
    });
    peer.expect_frame(ClientFrame::AudioReady).await;
}

// ── S5: reconnect with exponential backoff ─────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnect_backoff_is_exponential_then_terminal() {
    // Initial socket + five reconnects; every one closes immediately.
    let (connector, peers, times) = ScriptedConnector::new(6);
    let (mic, _, _) = FakeMic::new();
    let (speaker, _) = FakeSpeaker::new();
    let session = ClientSession::start(
        options(),
        Box::new(connector),
        Box::new(mic),
        Box::new(speaker),
    );
    let mut errors = capture_events(&session, EventKind::Error);
    drop(peers); // all incoming senders dropped: each socket closes on arrival

    let terminal = tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            if let Some(ClientEvent::Error(e)) = errors.recv().await {
                if matches!(e, ClientError::MaxReconnects) {
                    return;
                }
            }
        }
    })
    .await;
    assert!(terminal.is_ok(), "MaxReconnects was never raised");

    let times = times.lock().unwrap();
    assert_eq!(times.len(), 6, "expected initial connect + five reconnects");
    let deltas: Vec<u64> = times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
        .collect();
    assert_eq!(deltas, vec![1000, 2000, 4000, 8000, 16000]);
    assert_eq!(session.state(), SessionState::Error);
}

#[tokio::test(start_paused = true)]
async fn ready_resets_the_attempt_counter() {
    let (connector, mut peers, times) = ScriptedConnector::new(3);
    let (mic, _, _) = FakeMic::new();
    let (speaker, _) = FakeSpeaker::new();
    let _session = ClientSession::start(
        options(),
        Box::new(connector),
        Box::new(mic),
        Box::new(speaker),
    );

    let mut third = peers.pop().unwrap();
    let mut second = peers.pop().unwrap();
    let first = peers.pop().unwrap();

    // Socket 1 dies instantly: one attempt consumed (1000 ms delay).
    drop(first);

    // Socket 2 completes the ready handshake (counter resets), then dies.
    ready_handshake(&mut second).await;
    drop(second);

    // Socket 3: prove the reset by checking its delay is 1000 ms again.
    ready_handshake(&mut third).await;

    let times = times.lock().unwrap();
    assert_eq!(times.len(), 3);
    let delta_2_3 = (times[2] - times[1]).as_millis() as u64;
    assert_eq!(delta_2_3, 1000, "counter must reset after ready");
}

// ── S6: reset with a closed socket ─────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reset_after_disconnect_resets_locally_and_reconnects() {
    let (connector, mut peers, times) = ScriptedConnector::new(2);
    let (mic, _, _) = FakeMic::new();
    let (speaker, _) = FakeSpeaker::new();
    let session = ClientSession::start(
        options(),
        Box::new(connector),
        Box::new(mic),
        Box::new(speaker),
    );
    let mut resets = capture_events(&session, EventKind::Reset);
    let mut disconnects = capture_events(&session, EventKind::Disconnected);

    let mut first = peers.remove(0);
    ready_handshake(&mut first).await;
    session.disconnect();
    tokio::time::timeout(Duration::from_secs(60), disconnects.recv())
        .await
        .expect("no disconnect event")
        .unwrap();
    assert_eq!(times.lock().unwrap().len(), 1);

    session.reset();
    // Local reset event fires, then a fresh socket is opened.
    tokio::time::timeout(Duration::from_secs(60), resets.recv())
        .await
        .expect("no local reset event")
        .unwrap();
    let mut second = peers.remove(0);
    ready_handshake(&mut second).await;
    assert_eq!(times.lock().unwrap().len(), 2);
}

// ── Heartbeat ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn missed_pong_closes_the_socket_and_reconnects() {
    let (connector, mut peers, times) = ScriptedConnector::new(2);
    let (mic, _, _) = FakeMic::new();
    let (speaker, _) = FakeSpeaker::new();
    let _session = ClientSession::start(
        options(),
        Box::new(connector),
        Box::new(mic),
        Box::new(speaker),
    );

    let mut first = peers.remove(0);
    ready_handshake(&mut first).await;

    // Tick 1 (t+30 s): ping goes out. No pong. Tick 2 (t+60 s): close.
    first.expect_frame(ClientFrame::Ping).await;
    let mut second = peers.remove(0);
    ready_handshake(&mut second).await;
    assert_eq!(times.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_the_connection_alive() {
    let (connector, mut peers, times) = ScriptedConnector::new(1);
    let (mic, _, _) = FakeMic::new();
    let (speaker, _) = FakeSpeaker::new();
    let _session = ClientSession::start(
        options(),
        Box::new(connector),
        Box::new(mic),
        Box::new(speaker),
    );

    let mut peer = peers.remove(0);
    ready_handshake(&mut peer).await;

    for _ in 0..3 {
        peer.expect_frame(ClientFrame::Ping).await;
        peer.send(ServerFrame::Pong);
    }
    // Three answered windows, one socket.
    assert_eq!(times.lock().unwrap().len(), 1);
}

// ── Property 4: cancel drops late audio ────────────────────────────

#[tokio::test(start_paused = true)]
async fn cancel_drops_audio_until_the_server_acknowledges() {
    let (connector, mut peers, _) = ScriptedConnector::new(1);
    let (mic, _, _) = FakeMic::new();
    let (speaker, speaker_state) = FakeSpeaker::new();
    let session = ClientSession::start(
        options(),
        Box::new(connector),
        Box::new(mic),
        Box::new(speaker),
    );
    // Transcript frames double as ordering barriers through the session
    // task: once one is observed, everything sent before it was handled.
    let barriers = Arc::new(Mutex::new(0usize));
    let barrier_count = Arc::clone(&barriers);
    std::mem::forget(session.on(EventKind::Transcript, move |_| {
        *barrier_count.lock().unwrap() += 1;
    }));
    let barrier = |n: usize, peer: &Peer| {
        peer.send(ServerFrame::Transcript {
            text: format!("barrier {n}"),
            is_final: false,
        });
    };

    let mut peer = peers.remove(0);
    ready_handshake(&mut peer).await;

    peer.send(ServerFrame::Chat {
        text: "long reply".to_string(),
        steps: vec![],
    });
    peer.send_audio(&[0u8; 640]);

    // Wait until the chunk reaches the playback queue.
    wait_for(|| speaker_state.lock().unwrap().enqueued == 1).await;

    session.cancel();
    peer.expect_frame(ClientFrame::Cancel).await;
    assert_eq!(session.state(), SessionState::Listening);
    // cancel() flushed the queue immediately.
    assert!(speaker_state.lock().unwrap().clears >= 1);

    // Late audio before the ack: dropped.
    peer.send_audio(&[0u8; 640]);
    peer.send_audio(&[0u8; 640]);
    barrier(1, &peer);
    wait_for(|| *barriers.lock().unwrap() >= 1).await;
    assert_eq!(speaker_state.lock().unwrap().enqueued, 1);

    // Ack arrives: the flag clears, audio flows again.
    peer.send(ServerFrame::Cancelled);
    peer.send_audio(&[0u8; 640]);
    wait_for(|| speaker_state.lock().unwrap().enqueued == 2).await;
}

// ── Receive lifecycle ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn conversation_messages_accumulate_and_reset_clears_them() {
    let (connector, mut peers, _) = ScriptedConnector::new(1);
    let (mic, mic_state, _) = FakeMic::new();
    let (speaker, speaker_state) = FakeSpeaker::new();
    let session = ClientSession::start(
        options(),
        Box::new(connector),
        Box::new(mic),
        Box::new(speaker),
    );
    let mut messages = capture_events(&session, EventKind::Message);

    let mut peer = peers.remove(0);
    ready_handshake(&mut peer).await;
    // Audio negotiated at the advertised rates.
    assert_eq!(mic_state.lock().unwrap().starts, vec![16_000]);
    assert_eq!(speaker_state.lock().unwrap().starts, vec![24_000]);

    peer.send(ServerFrame::Greeting {
        text: "Hi!".to_string(),
    });
    peer.send(ServerFrame::Transcript {
        text: "what is".to_string(),
        is_final: false,
    });
    peer.send(ServerFrame::Turn {
        text: "what is the weather?".to_string(),
    });
    peer.send(ServerFrame::Thinking);
    peer.send(ServerFrame::Chat {
        text: "Sunny.".to_string(),
        steps: vec![],
    });
    peer.send(ServerFrame::TtsDone);

    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(60), messages.recv())
            .await
            .expect("missing message event")
            .unwrap();
    }
    assert_eq!(
        session.messages(),
        vec![
            ChatMessage::assistant("Hi!"),
            ChatMessage::user("what is the weather?"),
            ChatMessage::assistant("Sunny."),
        ]
    );
    assert_eq!(session.state(), SessionState::Listening);
    // The completed turn cleared the partial transcript.
    assert_eq!(session.partial_transcript(), "");

    // Open-socket reset: ack round trip clears local state.
    session.reset();
    peer.expect_frame(ClientFrame::Reset).await;
    peer.send(ServerFrame::Reset);
    wait_for(|| session.messages().is_empty()).await;
}

#[tokio::test(start_paused = true)]
async fn server_error_frame_surfaces_and_enters_error_state() {
    let (connector, mut peers, _) = ScriptedConnector::new(1);
    let (mic, _, _) = FakeMic::new();
    let (speaker, _) = FakeSpeaker::new();
    let session = ClientSession::start(
        options(),
        Box::new(connector),
        Box::new(mic),
        Box::new(speaker),
    );
    let mut errors = capture_events(&session, EventKind::Error);

    let mut peer = peers.remove(0);
    ready_handshake(&mut peer).await;
    peer.send(ServerFrame::Error {
        message: "Chat failed".to_string(),
        details: None,
    });

    let event = tokio::time::timeout(Duration::from_secs(60), errors.recv())
        .await
        .expect("no error event")
        .unwrap();
    match event {
        ClientEvent::Error(ClientError::Server { message, .. }) => {
            assert_eq!(message, "Chat failed");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Error);
}

#[tokio::test(start_paused = true)]
async fn denied_microphone_is_an_audio_setup_error() {
    let (connector, mut peers, _) = ScriptedConnector::new(1);
    let (speaker, _) = FakeSpeaker::new();
    let session = ClientSession::start(
        options(),
        Box::new(connector),
        Box::new(DeniedMic),
        Box::new(speaker),
    );
    let mut errors = capture_events(&session, EventKind::Error);

    let peer = peers.remove(0);
    peer.send(ServerFrame::Ready {
        sample_rate: 16_000,
        tts_sample_rate: 24_000,
        version: None,
    });

    let event = tokio::time::timeout(Duration::from_secs(60), errors.recv())
        .await
        .expect("no error event")
        .unwrap();
    assert!(matches!(event, ClientEvent::Error(ClientError::MicDenied)));
    assert_eq!(session.state(), SessionState::Error);
}

#[tokio::test(start_paused = true)]
async fn microphone_frames_are_sent_as_binary() {
    let (connector, mut peers, _) = ScriptedConnector::new(1);
    let (mic, _, frames) = FakeMic::new();
    let (speaker, _) = FakeSpeaker::new();
    let session = ClientSession::start(
        options(),
        Box::new(connector),
        Box::new(mic),
        Box::new(speaker),
    );

    let mut peer = peers.remove(0);
    ready_handshake(&mut peer).await;
    assert!(session.mic_level() < f32::EPSILON);

    let sender = frames.lock().unwrap().clone().expect("mic not started");
    sender.try_send(Bytes::from_static(&[100u8; 3200])).unwrap();

    match peer.next_sent().await {
        WireOut::Audio(pcm) => assert_eq!(pcm.len(), 3200),
        WireOut::Frame(frame) => panic!("expected audio, got {frame:?}"),
    }
    // The forwarded frame updated the meter.
    assert!(session.mic_level() > 0.0);
}

// ── Utilities ──────────────────────────────────────────────────────

/// Poll a condition, yielding to the (paused) runtime between checks.
async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}
