//! Error types for the debate arena.

use thiserror::Error;
use uuid::Uuid;

use crate::participant::UserId;

#[derive(Error, Debug)]
pub enum ArenaError {
    #[error("user {0} is already queued")]
    AlreadyQueued(UserId),

    #[error("user {0} is already in a live session")]
    AlreadyInSession(UserId),

    #[error("not {user}'s turn in session {session}")]
    NotYourTurn { session: Uuid, user: UserId },

    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    #[error("stale round {submitted} for session {session} (current round {current})")]
    StaleRound {
        session: Uuid,
        submitted: u32,
        current: u32,
    },

    #[error("user {0} is not a participant of this session")]
    NotAParticipant(UserId),

    #[error("scoring unavailable: {0}")]
    ScoringUnavailable(String),

    #[error("rating service unavailable: {0}")]
    RatingUnavailable(String),

    #[error("judge error: {0}")]
    Judge(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ArenaError {
    /// Stable wire code reported back to the originating client.
    pub fn code(&self) -> &'static str {
        match self {
            ArenaError::AlreadyQueued(_) => "already-queued",
            ArenaError::AlreadyInSession(_) => "already-in-session",
            ArenaError::NotYourTurn { .. } => "not-your-turn",
            ArenaError::UnknownSession(_) => "unknown-session",
            ArenaError::StaleRound { .. } => "stale-round",
            ArenaError::NotAParticipant(_) => "not-a-participant",
            ArenaError::ScoringUnavailable(_) => "scoring-unavailable",
            ArenaError::RatingUnavailable(_) => "rating-unavailable",
            ArenaError::Judge(_) => "judge-error",
            ArenaError::Config(_) => "config-error",
        }
    }
}
