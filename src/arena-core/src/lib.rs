//! Arena Core Library
//!
//! Server-side core of the real-time debate arena: connection registry,
//! matchmaking queue, per-session turn-taking state machine, turn clock,
//! capture ingestion, and the contracts of the external scoring and rating
//! collaborators.

pub mod capture;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod matchmaking;
pub mod participant;
pub mod registry;
pub mod scoring;
pub mod server;
pub mod session;

pub use capture::{AudioCapture, ChunkLedger, Contribution};
pub use clock::TurnClock;
pub use config::ArenaConfig;
pub use error::ArenaError;
pub use events::{ClientEvent, ContributionBody, ServerEvent};
pub use matchmaking::MatchQueue;
pub use participant::{UserHandle, UserId};
pub use registry::{ConnectionRegistry, Delivery};
pub use scoring::{
    AiJudgeScorer, DebateScores, EloChange, JudgeConfig, ParticipantScore, RatingService,
    RatingUpdate, ScoreCard, Scorer,
};
pub use server::ArenaServer;
pub use session::{DebateSession, Outcome, SessionResult, SessionRules, SessionStatus};
