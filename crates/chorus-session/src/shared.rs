//! State shared between a session's driver and its in-flight turn task.
//!
//! Everything here is per-session: the driver and at most one turn task
//! touch it, never another session. Locks are `std::sync::Mutex` held only
//! for field access — no `.await` happens under them.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chorus_core::{ChatMessage, SessionState};

/// Mutable session state.
pub struct SessionShared {
    id: String,
    state: Mutex<SessionState>,
    transcript: Mutex<Vec<ChatMessage>>,
    audio_frames: AtomicU64,
}

impl SessionShared {
    /// Create session state with the system message pinned at index 0.
    #[must_use]
    pub fn new(id: String, system_prompt: String) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::Connecting),
            transcript: Mutex::new(vec![ChatMessage::system(system_prompt)]),
            audio_frames: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Transition to `next` if the table allows it.
    ///
    /// Same-state calls are no-ops (idempotent cancels re-request
    /// `listening`); anything outside the table is rejected and logged.
    pub fn set_state(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == next {
            return true;
        }
        if !state.can_transition_to(next) {
            tracing::warn!(
                session = %self.id,
                from = %*state,
                to = %next,
                "rejected invalid session state transition"
            );
            return false;
        }
        tracing::debug!(session = %self.id, from = %*state, to = %next, "session state transition");
        *state = next;
        true
    }

    /// Append one message to the transcript.
    pub fn push_message(&self, message: ChatMessage) {
        self.transcript.lock().unwrap().push(message);
    }

    /// Append several messages, preserving order.
    pub fn extend_messages(&self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.transcript.lock().unwrap().extend(messages);
    }

    /// Snapshot of the transcript for an LLM call.
    #[must_use]
    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.transcript.lock().unwrap().clone()
    }

    /// Truncate the transcript back to the system message.
    pub fn reset_transcript(&self) {
        let mut transcript = self.transcript.lock().unwrap();
        transcript.truncate(1);
        debug_assert!(transcript[0].is_system());
    }

    /// Count one microphone frame received from the client.
    pub fn count_audio_frame(&self) {
        self.audio_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn audio_frames(&self) -> u64 {
        self.audio_frames.load(Ordering::Relaxed)
    }
}
