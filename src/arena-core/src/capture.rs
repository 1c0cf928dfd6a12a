//! Capture ingestion: contribution records, audio-chunk sequencing and
//! text cleanup.
//!
//! Text arrives as one complete unit per submit. Voice arrives as a
//! continuous stream of chunks tagged with per-round sequence numbers; the
//! network may reorder or drop chunks, so the ledger only enforces strict
//! monotonicity and tolerates gaps (there is no retransmission contract).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArenaError;
use crate::events::ContributionBody;
use crate::participant::UserId;

/// One accepted unit of speech attributed to the current speaker in the
/// current round. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub round: u32,
    pub speaker_id: UserId,
    #[serde(flatten)]
    pub body: ContributionBody,
    pub sequence_number: u64,
    pub captured_at: DateTime<Utc>,
}

impl Contribution {
    pub fn new(round: u32, speaker_id: UserId, body: ContributionBody, sequence_number: u64) -> Self {
        Self {
            round,
            speaker_id,
            body,
            sequence_number,
            captured_at: Utc::now(),
        }
    }
}

/// Per-round sequence bookkeeping for audio chunks.
///
/// Policy: a chunk is admitted only when its sequence number is strictly
/// greater than the last admitted one for the round. Duplicates and
/// reordered stragglers are dropped, gaps pass through.
#[derive(Debug, Default)]
pub struct ChunkLedger {
    round: u32,
    last_sequence: Option<u64>,
}

impl ChunkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset bookkeeping at a round boundary.
    pub fn begin_round(&mut self, round: u32) {
        self.round = round;
        self.last_sequence = None;
    }

    /// Whether a chunk with this sequence number should be stored.
    pub fn admit(&mut self, round: u32, sequence: u64) -> bool {
        if round != self.round {
            return false;
        }
        match self.last_sequence {
            Some(last) if sequence <= last => false,
            _ => {
                self.last_sequence = Some(sequence);
                true
            }
        }
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }
}

/// Capability interface for a concrete audio recorder: given start/stop
/// signals it produces binary chunks with sequence numbers. Any capture
/// backend (microphone, file replay, synthetic) satisfies it.
pub trait AudioCapture: Send {
    fn start(&mut self) -> Result<(), ArenaError>;
    fn stop(&mut self);
    /// Next available chunk, or None when the stream is (currently) dry.
    fn poll_chunk(&mut self) -> Option<(u64, Vec<u8>)>;
}

/// Clean up a text contribution before it enters the transcript: strip
/// markup tags and collapse runs of whitespace.
pub fn sanitize_text(input: &str) -> String {
    let mut result = input.to_string();

    if let Ok(tag_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = tag_re.replace_all(&result, "").to_string();
    }

    if let Ok(ws_re) = regex::Regex::new(r"\s+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}
