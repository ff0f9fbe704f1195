//! # Quizroom Session Core
//!
//! This library provides the core logic for live, synchronous trivia
//! sessions: a host controls pacing, many players answer a shared question
//! within a deadline, and everyone sees synchronized state (current
//! question, per-question results, running leaderboard).
//!
//! The crate is sans-io. It owns no sockets, threads, or timers; an
//! embedding server routes inbound connection events into the
//! [`registry::Registry`], periodically calls [`registry::Registry::tick`]
//! to fire due deadlines, and supplies a [`gateway::Gateway`] implementation
//! through which outbound [`Event`]s reach the real-time transport.

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]

use serde::Serialize;
use thiserror::Error as ThisError;

pub mod connection;
pub mod constants;
pub mod gateway;
pub mod join_code;
pub mod quiz;
pub mod registry;
pub mod scheduler;
pub mod scoring;
pub mod session;

use connection::ConnectionId;
use join_code::JoinCode;
use quiz::PublicQuestion;
use session::{LeaderboardEntry, PlayerResult, PlayerSnapshot, SessionSnapshot};

/// Outbound events the core emits through the broadcast gateway
///
/// Room-scoped events go to every connection in a session; the remaining
/// variants are addressed to a single connection. Events serialize to JSON
/// with the variant name as the tag.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    /// (to host) A new session was created for the host's quiz
    GameCreated {
        /// The allocated or supplied join code
        code: JoinCode,
        /// Title of the quiz being played
        title: String,
    },
    /// (to host) The host reattached to an existing session
    HostAttached {
        /// Current state of the session
        snapshot: SessionSnapshot,
    },
    /// (to player) Confirmation of joining, with the current state
    JoinedGame {
        /// The joining player
        player: PlayerSnapshot,
        /// Current state of the session
        snapshot: SessionSnapshot,
    },
    /// (room) A player joined the session
    PlayerJoined {
        /// The joining player
        player: PlayerSnapshot,
        /// Player count after the join
        total_players: usize,
    },
    /// (room) A player left or was removed from the session
    PlayerLeft {
        /// Connection of the departed player
        player_id: ConnectionId,
        /// Player count after the departure
        total_players: usize,
    },
    /// (room) The host started the game
    GameStarted {
        /// State snapshot at game start
        snapshot: SessionSnapshot,
    },
    /// (room) A question is now accepting answers
    QuestionStarted {
        /// The question, with the correct-answer index withheld
        question: PublicQuestion,
        /// Zero-based index of the question
        index: usize,
        /// Time limit in whole seconds
        time_limit: u64,
    },
    /// (room) The question resolved; answers are revealed
    QuestionEnded {
        /// Index of the correct option
        correct_answer: usize,
        /// Per-player outcome for this question
        results: Vec<PlayerResult>,
    },
    /// (room) Standings after a question resolved
    LeaderboardUpdated {
        /// Players sorted by score descending, ties by join order
        leaderboard: Vec<LeaderboardEntry>,
    },
    /// (room) The host paused or resumed the game
    GamePaused {
        /// The new paused flag
        paused: bool,
    },
    /// (room) The game is over
    GameEnded {
        /// Final standings
        final_leaderboard: Vec<LeaderboardEntry>,
    },
    /// (to player) The recipient was removed from the game by the host
    Kicked,
    /// (to one connection) An operation failed; see [`Error`]
    Error {
        /// Human-readable description of the failure
        message: String,
    },
}

impl Event {
    /// Converts the event to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Errors surfaced to callers of registry operations
///
/// All variants are recoverable by the caller: the failed operation
/// performed no mutation, and the embedding layer is expected to forward
/// the error to the offending connection as an [`Event::Error`].
#[derive(ThisError, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Error {
    /// No live session exists for the given join code
    #[error("game not found, check the join code")]
    SessionNotFound,
    /// The session exists but has already ended
    #[error("this game has already ended")]
    SessionAlreadyEnded,
    /// Creation was requested without a quiz and no session exists to attach to
    #[error("quiz data required to create a game")]
    MissingQuizData,
    /// The supplied display name is empty after trimming
    #[error("player name must not be empty")]
    InvalidName,
    /// Another player in the session already uses this display name
    #[error("player name already taken")]
    NameTaken,
    /// A host-only operation was invoked by a non-host connection
    #[error("unauthorized")]
    Unauthorized,
    /// The session has reached the maximum number of players
    #[error("maximum number of players reached")]
    SessionFull,
    /// The supplied quiz failed validation
    #[error("invalid quiz: {0}")]
    InvalidQuiz(String),
}

impl From<&Error> for Event {
    fn from(error: &Error) -> Self {
        Event::Error {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_to_message() {
        let event = Event::GamePaused { paused: true };
        let json = event.to_message();
        assert!(json.contains("GamePaused"));
        assert!(json.contains("true"));
    }

    #[test]
    fn test_error_converts_to_error_event() {
        let event: Event = (&Error::NameTaken).into();
        match event {
            Event::Error { message } => assert_eq!(message, "player name already taken"),
            other => panic!("expected error event, got {other:?}"),
        }
    }
}
