//! Session state machine.
//!
//! One `DebateSession` owns one debate's lifecycle:
//! `AwaitingStart -> RoundActive -> ... -> Finalizing -> Closed`. All
//! mutation of a session (attach, submit, clock expiry, leave) funnels
//! through its single async mutex, so exactly one round advance can win per
//! round and the clock-vs-submit race is resolved by a round-number guard
//! under that lock. Concurrent sessions are fully independent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capture::{ChunkLedger, Contribution, sanitize_text};
use crate::clock::TurnClock;
use crate::config::ArenaConfig;
use crate::error::ArenaError;
use crate::events::{ContributionBody, ServerEvent};
use crate::participant::{UserHandle, UserId};
use crate::registry::{ConnectionRegistry, Delivery};
use crate::scoring::{ParticipantScore, RatingService, ScoreCard, Scorer};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    AwaitingStart,
    RoundActive,
    Finalizing,
    Closed,
}

/// How the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Scored normally, winner by higher total.
    Scored,
    /// Scored normally, equal totals: no winner, no rating change.
    Draw,
    /// A participant left early; the remaining one wins without scoring.
    Forfeit,
    /// The scoring collaborator failed or timed out; zeroed scores,
    /// flagged reason, no rating change.
    Degraded,
}

/// The one result a session produces, delivered to both participants
/// before the session is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub session_id: Uuid,
    pub outcome: Outcome,
    pub winner_id: Option<UserId>,
    pub score_cards: Vec<ScoreCard>,
    pub elo_change: Option<crate::scoring::EloChange>,
    pub reason: Option<String>,
}

/// Timing and shape parameters a session runs under.
#[derive(Debug, Clone)]
pub struct SessionRules {
    pub total_rounds: u32,
    pub turn: Duration,
    pub scoring_timeout: Duration,
}

impl SessionRules {
    pub fn from_config(cfg: &ArenaConfig) -> Self {
        Self {
            total_rounds: cfg.session.total_rounds.max(1),
            turn: cfg.session.turn_duration(),
            scoring_timeout: cfg.scoring.timeout(),
        }
    }
}

/// Collaborators every session needs.
pub struct SessionDeps {
    pub registry: Arc<ConnectionRegistry>,
    pub scorer: Arc<dyn Scorer>,
    pub rating: Arc<dyn RatingService>,
    pub sessions: SessionMap,
}

/// Active session storage. A closed session removes itself, so a stale
/// session id resolves to `UnknownSession` at the lookup boundary.
#[derive(Clone, Default)]
pub struct SessionMap {
    inner: Arc<StdMutex<HashMap<Uuid, Arc<DebateSession>>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<DebateSession>) {
        self.inner.lock().unwrap().insert(session.id, session);
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<DebateSession>> {
        self.inner.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<DebateSession>> {
        self.inner.lock().unwrap().remove(id)
    }

    pub fn find_for_user(&self, user: &UserId) -> Option<Arc<DebateSession>> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .find(|s| s.participant_index(user).is_some())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum FinalizeTrigger {
    RoundsComplete,
    Forfeit { leaver: UserId },
}

struct SessionState {
    status: SessionStatus,
    attached: [bool; 2],
    /// 0 until the first round starts, then in `1..=total_rounds`.
    current_round: u32,
    round_deadline: Option<Instant>,
    transcript: Vec<Contribution>,
    ledger: ChunkLedger,
    clock: TurnClock,
}

pub struct DebateSession {
    pub id: Uuid,
    pub topic: String,
    participants: [UserHandle; 2],
    rules: SessionRules,
    deps: Arc<SessionDeps>,
    weak: Weak<DebateSession>,
    state: Mutex<SessionState>,
}

impl DebateSession {
    /// Create a session for an ordered pair: `participants[0]` is the lower
    /// user id and opens round 1.
    pub fn new(
        topic: String,
        participants: [UserHandle; 2],
        rules: SessionRules,
        deps: Arc<SessionDeps>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: Uuid::new_v4(),
            topic,
            participants,
            rules,
            deps,
            weak: weak.clone(),
            state: Mutex::new(SessionState {
                status: SessionStatus::AwaitingStart,
                attached: [false, false],
                current_round: 0,
                round_deadline: None,
                transcript: Vec::new(),
                ledger: ChunkLedger::new(),
                clock: TurnClock::new(),
            }),
        })
    }

    pub fn participants(&self) -> &[UserHandle; 2] {
        &self.participants
    }

    /// Speaker alternates strictly by round parity: odd rounds belong to
    /// participant A, even rounds to participant B.
    pub fn speaker_for(&self, round: u32) -> &UserHandle {
        &self.participants[((round + 1) % 2) as usize]
    }

    pub fn participant_index(&self, user: &UserId) -> Option<usize> {
        self.participants.iter().position(|p| p.id == *user)
    }

    fn opponent_of(&self, user: &UserId) -> Option<&UserHandle> {
        let idx = self.participant_index(user)?;
        Some(&self.participants[1 - idx])
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status
    }

    pub async fn current_round(&self) -> u32 {
        self.state.lock().await.current_round
    }

    pub async fn transcript(&self) -> Vec<Contribution> {
        self.state.lock().await.transcript.clone()
    }

    /// A participant has joined the session room. The debate starts once
    /// both are attached.
    pub async fn attach(&self, user: &UserId) -> Result<(), ArenaError> {
        let mut st = self.state.lock().await;
        let idx = self
            .participant_index(user)
            .ok_or_else(|| ArenaError::NotAParticipant(user.clone()))?;
        st.attached[idx] = true;

        if st.status == SessionStatus::AwaitingStart && st.attached.iter().all(|a| *a) {
            info!(session = %self.id, "both participants attached, starting");
            self.begin_round_locked(&mut st, 1);
        } else {
            // late or first joiner: push the authoritative snapshot
            self.deps.registry.send(user, self.state_event(&st));
        }
        Ok(())
    }

    /// Ingest one contribution from a client.
    ///
    /// Validation order: closed session -> `UnknownSession`; caller is not
    /// the current speaker -> `NotYourTurn`; round mismatch -> `StaleRound`.
    /// Returns Ok(false) when an audio chunk was dropped by the sequence
    /// ledger (duplicate or straggler; not an error).
    pub async fn submit(
        &self,
        user: &UserId,
        round: u32,
        body: ContributionBody,
        sequence: u64,
    ) -> Result<bool, ArenaError> {
        let finalize = {
            let mut st = self.state.lock().await;

            if st.status == SessionStatus::Closed {
                return Err(ArenaError::UnknownSession(self.id));
            }
            let is_speaker = st.status == SessionStatus::RoundActive
                && self.speaker_for(st.current_round).id == *user;
            if !is_speaker {
                return Err(ArenaError::NotYourTurn {
                    session: self.id,
                    user: user.clone(),
                });
            }
            if round != st.current_round {
                return Err(ArenaError::StaleRound {
                    session: self.id,
                    submitted: round,
                    current: st.current_round,
                });
            }

            match body {
                ContributionBody::Text(text) => {
                    let contribution = Contribution::new(
                        round,
                        user.clone(),
                        ContributionBody::Text(sanitize_text(&text)),
                        sequence,
                    );
                    st.transcript.push(contribution.clone());
                    self.broadcast_contribution(&contribution);
                    // explicit submit beats the clock for this round
                    st.clock.cancel(round);
                    self.advance_locked(&mut st)
                }
                ContributionBody::AudioChunk(bytes) => {
                    if !st.ledger.admit(round, sequence) {
                        debug!(session = %self.id, round, sequence, "audio chunk dropped by ledger");
                        return Ok(false);
                    }
                    let contribution = Contribution::new(
                        round,
                        user.clone(),
                        ContributionBody::AudioChunk(bytes),
                        sequence,
                    );
                    st.transcript.push(contribution.clone());
                    self.broadcast_contribution(&contribution);
                    // voice rounds advance on clock expiry only; a stream
                    // has no natural submit boundary
                    false
                }
            }
        };

        if finalize {
            self.finalize(FinalizeTrigger::RoundsComplete).await;
        }
        Ok(true)
    }

    /// A participant left (or disconnected) before completion: forfeit in
    /// favor of the remaining participant. No-op once finalizing.
    pub async fn leave(&self, user: &UserId) -> Result<(), ArenaError> {
        if self.participant_index(user).is_none() {
            return Err(ArenaError::NotAParticipant(user.clone()));
        }
        let claimed = {
            let mut st = self.state.lock().await;
            match st.status {
                SessionStatus::AwaitingStart | SessionStatus::RoundActive => {
                    st.status = SessionStatus::Finalizing;
                    st.round_deadline = None;
                    st.clock.disarm();
                    true
                }
                SessionStatus::Finalizing | SessionStatus::Closed => false,
            }
        };
        if claimed {
            info!(session = %self.id, leaver = %user, "participant left, forfeiting");
            self.finalize(FinalizeTrigger::Forfeit {
                leaver: user.clone(),
            })
            .await;
        }
        Ok(())
    }

    /// Turn clock callback. A stale round number (the round already
    /// advanced via submit) is discarded, so the expiry/submit race
    /// resolves exactly once.
    async fn clock_expired(&self, round: u32) {
        let finalize = {
            let mut st = self.state.lock().await;
            if st.status != SessionStatus::RoundActive || st.current_round != round {
                debug!(session = %self.id, round, "stale clock expiry discarded");
                return;
            }
            // drop our own timer entry without aborting ourselves
            st.clock.expired(round);
            debug!(session = %self.id, round, "turn expired, forcing advance");
            self.advance_locked(&mut st)
        };
        if finalize {
            self.finalize(FinalizeTrigger::RoundsComplete).await;
        }
    }

    fn begin_round_locked(&self, st: &mut SessionState, round: u32) {
        st.status = SessionStatus::RoundActive;
        st.current_round = round;
        st.round_deadline = Some(Instant::now() + self.rules.turn);
        st.ledger.begin_round(round);
        if let Some(session) = self.weak.upgrade() {
            st.clock.arm(round, self.rules.turn, move || async move {
                session.clock_expired(round).await;
            });
        }
        info!(session = %self.id, round, speaker = %self.speaker_for(round).id, "round started");
        self.broadcast_state(st);
    }

    /// Returns true when the session must finalize (last round done).
    fn advance_locked(&self, st: &mut SessionState) -> bool {
        let next = st.current_round + 1;
        if next > self.rules.total_rounds {
            st.status = SessionStatus::Finalizing;
            st.round_deadline = None;
            st.clock.disarm();
            self.broadcast_state(st);
            true
        } else {
            self.begin_round_locked(st, next);
            false
        }
    }

    fn state_event(&self, st: &SessionState) -> ServerEvent {
        let active = st.status == SessionStatus::RoundActive;
        ServerEvent::SessionState {
            session_id: self.id,
            current_round: st.current_round,
            current_speaker_id: active.then(|| self.speaker_for(st.current_round).id.clone()),
            time_left_seconds: st
                .round_deadline
                .map(|d| d.saturating_duration_since(Instant::now()).as_secs())
                .unwrap_or(0),
            is_active: active,
            topic: self.topic.clone(),
        }
    }

    fn broadcast_state(&self, st: &SessionState) {
        let event = self.state_event(st);
        for p in &self.participants {
            self.deps.registry.send(&p.id, event.clone());
        }
    }

    fn broadcast_contribution(&self, contribution: &Contribution) {
        let event = ServerEvent::ContributionBroadcast {
            session_id: self.id,
            speaker_id: contribution.speaker_id.clone(),
            round: contribution.round,
            body: contribution.body.clone(),
        };
        for p in &self.participants {
            self.deps.registry.send(&p.id, event.clone());
        }
    }

    /// Build and deliver the one SessionResult, then close and remove the
    /// session. Only the caller that transitioned the state to Finalizing
    /// runs this, so the rating service is invoked at most once.
    async fn finalize(&self, trigger: FinalizeTrigger) {
        let transcript = { self.state.lock().await.transcript.clone() };

        let result = match trigger {
            FinalizeTrigger::Forfeit { leaver } => self.forfeit_result(&leaver).await,
            FinalizeTrigger::RoundsComplete => self.scored_result(&transcript).await,
        };

        for p in &self.participants {
            let delivered = self
                .deps
                .registry
                .send(&p.id, ServerEvent::SessionResult(result.clone()));
            if delivered == Delivery::Undeliverable {
                warn!(session = %self.id, user = %p.id, "session result undeliverable");
            }
        }

        {
            let mut st = self.state.lock().await;
            st.status = SessionStatus::Closed;
            st.clock.disarm();
        }
        self.deps.sessions.remove(&self.id);
        info!(session = %self.id, outcome = ?result.outcome, "session closed");
    }

    /// Score the transcript within the configured bound; past it (or on
    /// scorer failure) the degraded path keeps the session from hanging on
    /// an external dependency.
    async fn scored_result(&self, transcript: &[Contribution]) -> SessionResult {
        let scored = tokio::time::timeout(
            self.rules.scoring_timeout,
            self.deps
                .scorer
                .score(&self.topic, &self.participants, transcript),
        )
        .await;

        match scored {
            Ok(Ok(scores)) => {
                let winner_id = scores.winner().cloned();
                match winner_id {
                    Some(winner_id) => {
                        // a misbehaving scorer may attribute a card to a
                        // stranger; degrade rather than trust the verdict
                        let Some(winner_idx) = self.participant_index(&winner_id) else {
                            warn!(session = %self.id, winner = %winner_id, "verdict names a non-participant");
                            return self.degraded_result(format!(
                                "scoring unavailable: verdict names non-participant {winner_id}"
                            ));
                        };
                        let winner = &self.participants[winner_idx];
                        let loser = &self.participants[1 - winner_idx];
                        let (elo_change, reason) =
                            match self.deps.rating.apply_result(winner, loser).await {
                                Ok(change) => (Some(change), None),
                                Err(e) => {
                                    warn!(session = %self.id, error = %e, "rating service failed");
                                    (None, Some(format!("rating unavailable: {e}")))
                                }
                            };
                        SessionResult {
                            session_id: self.id,
                            outcome: Outcome::Scored,
                            winner_id: Some(winner_id),
                            score_cards: scores.cards.to_vec(),
                            elo_change,
                            reason,
                        }
                    }
                    None => SessionResult {
                        session_id: self.id,
                        outcome: Outcome::Draw,
                        winner_id: None,
                        score_cards: scores.cards.to_vec(),
                        elo_change: None,
                        reason: None,
                    },
                }
            }
            Ok(Err(e)) => {
                warn!(session = %self.id, error = %e, "scoring failed, degrading result");
                self.degraded_result(format!("scoring unavailable: {e}"))
            }
            Err(_) => {
                warn!(session = %self.id, "scoring timed out, degrading result");
                self.degraded_result("scoring timed out".to_string())
            }
        }
    }

    fn degraded_result(&self, reason: String) -> SessionResult {
        SessionResult {
            session_id: self.id,
            outcome: Outcome::Degraded,
            winner_id: None,
            score_cards: self.zeroed_cards(),
            elo_change: None,
            reason: Some(reason),
        }
    }

    /// Forfeit skips scoring entirely: zeroed cards, remaining participant
    /// wins, rating still applied.
    async fn forfeit_result(&self, leaver: &UserId) -> SessionResult {
        let winner = self
            .opponent_of(leaver)
            .expect("leaver is a participant")
            .clone();
        let loser_idx = self.participant_index(leaver).expect("leaver checked");
        let loser = &self.participants[loser_idx];

        let (elo_change, rating_note) = match self.deps.rating.apply_result(&winner, loser).await {
            Ok(change) => (Some(change), None),
            Err(e) => {
                warn!(session = %self.id, error = %e, "rating service failed on forfeit");
                (None, Some(format!("; rating unavailable: {e}")))
            }
        };

        SessionResult {
            session_id: self.id,
            outcome: Outcome::Forfeit,
            winner_id: Some(winner.id),
            score_cards: self.zeroed_cards(),
            elo_change,
            reason: Some(format!(
                "{leaver} left the session{}",
                rating_note.unwrap_or_default()
            )),
        }
    }

    fn zeroed_cards(&self) -> Vec<ScoreCard> {
        self.participants
            .iter()
            .map(|p| ScoreCard {
                user_id: p.id.clone(),
                score: ParticipantScore::zeroed(),
            })
            .collect()
    }
}
