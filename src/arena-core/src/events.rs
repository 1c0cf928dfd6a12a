//! Wire events for the real-time channel.
//!
//! Event names are kebab-case and payload fields camelCase, matching the
//! socket protocol the web client speaks. Both directions are plain serde
//! enums so any transport (websocket, SSE, in-process channel) can carry
//! them as JSON.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::participant::{UserHandle, UserId};
use crate::session::SessionResult;

/// Payload of a single contribution, tagged by kind on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum ContributionBody {
    /// One complete text argument, submitted in one shot.
    Text(String),
    /// One slice of a continuous voice stream.
    AudioChunk(Vec<u8>),
}

impl ContributionBody {
    pub fn is_text(&self) -> bool {
        matches!(self, ContributionBody::Text(_))
    }
}

/// Events a client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinQueue { user_id: UserId, rating: i32 },

    #[serde(rename_all = "camelCase")]
    LeaveQueue { user_id: UserId },

    #[serde(rename_all = "camelCase")]
    JoinSession { session_id: Uuid, user_id: UserId },

    #[serde(rename_all = "camelCase")]
    LeaveSession { session_id: Uuid, user_id: UserId },

    #[serde(rename_all = "camelCase")]
    SubmitContribution {
        session_id: Uuid,
        user_id: UserId,
        round: u32,
        #[serde(flatten)]
        body: ContributionBody,
        sequence_number: u64,
    },
}

impl ClientEvent {
    /// The user this event originated from, for addressing rejections.
    pub fn origin(&self) -> &UserId {
        match self {
            ClientEvent::JoinQueue { user_id, .. }
            | ClientEvent::LeaveQueue { user_id }
            | ClientEvent::JoinSession { user_id, .. }
            | ClientEvent::LeaveSession { user_id, .. }
            | ClientEvent::SubmitContribution { user_id, .. } => user_id,
        }
    }
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    MatchFound {
        session_id: Uuid,
        opponent: UserHandle,
        topic: String,
    },

    /// Authoritative session snapshot. `time_left_seconds` comes from the
    /// server-side turn clock; clients only render it.
    #[serde(rename_all = "camelCase")]
    SessionState {
        session_id: Uuid,
        current_round: u32,
        current_speaker_id: Option<UserId>,
        time_left_seconds: u64,
        is_active: bool,
        topic: String,
    },

    #[serde(rename_all = "camelCase")]
    ContributionBroadcast {
        session_id: Uuid,
        speaker_id: UserId,
        round: u32,
        #[serde(flatten)]
        body: ContributionBody,
    },

    SessionResult(SessionResult),

    /// A recoverable validation failure, echoed to the originating client.
    #[serde(rename_all = "camelCase")]
    Rejected { code: String, message: String },
}
