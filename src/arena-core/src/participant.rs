//! Participant identity types.
//!
//! A `UserHandle` is the immutable public view of a user as the session
//! layer sees it; it is referenced, never mutated, by sessions and the queue.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier.
///
/// Ordered so that pairing can pick a deterministic first speaker: the
/// lexicographically lower id is participant A and opens round 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Public view of a user inside the matchmaking and session layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserHandle {
    pub id: UserId,
    pub display_name: String,
    /// Current Elo rating as last reported by the rating collaborator.
    pub rating: i32,
}

impl UserHandle {
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>, rating: i32) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            rating,
        }
    }
}
