//! Session state machine.
//!
//! ```text
//!   Connecting → Ready → Listening ⇄ Thinking → Speaking
//!                             ▲__________________│
//! ```
//!
//! Every state may fall into `Error`; `Error` can only re-enter
//! `Connecting`. The transition table is closed — drivers validate each
//! transition with [`SessionState::can_transition_to`] and reject (with a
//! log line) anything outside it.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Transport is being established.
    Connecting,
    /// Transport open, audio I/O not yet negotiated.
    Ready,
    /// Microphone audio is flowing to STT.
    Listening,
    /// An LLM call (possibly with tool iterations) is in flight.
    Thinking,
    /// TTS audio is streaming to the client.
    Speaking,
    /// A turn or the session failed; recoverable via reset/reconnect.
    Error,
}

impl SessionState {
    /// Whether the transition `self → next` is in the table.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Ready)
                | (Self::Ready, Self::Listening)
                | (Self::Listening, Self::Thinking | Self::Speaking)
                | (Self::Thinking, Self::Speaking | Self::Listening)
                | (Self::Speaking, Self::Listening)
                | (
                    Self::Connecting
                        | Self::Ready
                        | Self::Listening
                        | Self::Thinking
                        | Self::Speaking,
                    Self::Error
                )
                | (Self::Error, Self::Connecting)
        )
    }

    /// Lowercase label, matching the wire serialization.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    const ALL: [super::SessionState; 6] =
        [Connecting, Ready, Listening, Thinking, Speaking, Error];

    #[test]
    fn transition_table_is_closed() {
        // (from, allowed-next) pairs, exhaustively.
        let allowed: &[(super::SessionState, &[super::SessionState])] = &[
            (Connecting, &[Ready, Error]),
            (Ready, &[Listening, Error]),
            (Listening, &[Thinking, Speaking, Error]),
            (Thinking, &[Speaking, Listening, Error]),
            (Speaking, &[Listening, Error]),
            (Error, &[Connecting]),
        ];

        for &(from, nexts) in allowed {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    nexts.contains(&to),
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn no_self_transitions() {
        for s in ALL {
            assert!(!s.can_transition_to(s), "{s} -> {s} must be rejected");
        }
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_value(Thinking).unwrap(), "thinking");
    }
}
