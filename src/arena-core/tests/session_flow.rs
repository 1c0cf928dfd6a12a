//! End-to-end session lifecycle tests: queue to result, driven through the
//! server facade with stub scoring and rating collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use arena_core::capture::Contribution;
use arena_core::config::ArenaConfig;
use arena_core::error::ArenaError;
use arena_core::events::{ClientEvent, ContributionBody, ServerEvent};
use arena_core::participant::{UserHandle, UserId};
use arena_core::scoring::{
    DebateScores, EloChange, ParticipantScore, RatingService, RatingUpdate, ScoreCard, Scorer,
};
use arena_core::server::ArenaServer;
use arena_core::session::{Outcome, SessionResult};

/// Gives the lexicographically lower participant the higher total.
struct FavorFirstScorer;

#[async_trait]
impl Scorer for FavorFirstScorer {
    async fn score(
        &self,
        _topic: &str,
        participants: &[UserHandle; 2],
        _transcript: &[Contribution],
    ) -> Result<DebateScores, ArenaError> {
        let card = |p: &UserHandle, base: f32| ScoreCard {
            user_id: p.id.clone(),
            score: ParticipantScore::from_parts(base, base, base, base, vec!["ok".into()]),
        };
        Ok(DebateScores {
            cards: [card(&participants[0], 8.0), card(&participants[1], 6.0)],
        })
    }
}

/// Never answers inside any reasonable bound.
struct SilentScorer;

#[async_trait]
impl Scorer for SilentScorer {
    async fn score(
        &self,
        _topic: &str,
        _participants: &[UserHandle; 2],
        _transcript: &[Contribution],
    ) -> Result<DebateScores, ArenaError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ArenaError::ScoringUnavailable("unreachable".into()))
    }
}

/// Fixed +/-16 adjustment, counting invocations.
struct CountingRating {
    calls: AtomicU32,
}

impl CountingRating {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl RatingService for CountingRating {
    async fn apply_result(
        &self,
        winner: &UserHandle,
        loser: &UserHandle,
    ) -> Result<EloChange, ArenaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EloChange {
            winner: RatingUpdate {
                id: winner.id.clone(),
                old_rating: winner.rating,
                new_rating: winner.rating + 16,
            },
            loser: RatingUpdate {
                id: loser.id.clone(),
                old_rating: loser.rating,
                new_rating: loser.rating - 16,
            },
        })
    }
}

fn config() -> ArenaConfig {
    ArenaConfig::parse(
        r#"
        [session]
        total_rounds = 3
        turn_seconds = 60

        [scoring]
        timeout_seconds = 30
        "#,
    )
    .unwrap()
}

struct Client {
    id: UserId,
    rx: UnboundedReceiver<ServerEvent>,
}

impl Client {
    async fn wait_for<F, T>(&mut self, mut pick: F) -> T
    where
        F: FnMut(ServerEvent) -> Option<T>,
    {
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(600), self.rx.recv())
                .await
                .expect("no matching event within bound")
                .expect("event stream closed");
            if let Some(t) = pick(ev) {
                return t;
            }
        }
    }

    async fn wait_for_result(&mut self) -> SessionResult {
        self.wait_for(|ev| match ev {
            ServerEvent::SessionResult(result) => Some(result),
            _ => None,
        })
        .await
    }
}

/// Queue both users, expect a match, attach both, return the session id.
async fn matched_session(srv: &ArenaServer, a: &mut Client, b: &mut Client) -> Uuid {
    srv.dispatch(ClientEvent::JoinQueue {
        user_id: a.id.clone(),
        rating: 1000,
    })
    .await
    .unwrap();
    srv.dispatch(ClientEvent::JoinQueue {
        user_id: b.id.clone(),
        rating: 1020,
    })
    .await
    .unwrap();

    let session_id = a
        .wait_for(|ev| match ev {
            ServerEvent::MatchFound { session_id, .. } => Some(session_id),
            _ => None,
        })
        .await;
    let session_id_b = b
        .wait_for(|ev| match ev {
            ServerEvent::MatchFound { session_id, .. } => Some(session_id),
            _ => None,
        })
        .await;
    assert_eq!(session_id, session_id_b);

    srv.dispatch(ClientEvent::JoinSession {
        session_id,
        user_id: a.id.clone(),
    })
    .await
    .unwrap();
    srv.dispatch(ClientEvent::JoinSession {
        session_id,
        user_id: b.id.clone(),
    })
    .await
    .unwrap();

    session_id
}

fn setup(scorer: Arc<dyn Scorer>, rating: Arc<dyn RatingService>) -> (Arc<ArenaServer>, Client, Client) {
    let srv = ArenaServer::new(config(), scorer, rating);
    let rx_a = srv.connect(UserHandle::new("alice", "Alice", 1000));
    let rx_b = srv.connect(UserHandle::new("bob", "Bob", 1020));
    (
        srv,
        Client {
            id: "alice".into(),
            rx: rx_a,
        },
        Client {
            id: "bob".into(),
            rx: rx_b,
        },
    )
}

fn text(session_id: Uuid, user: &UserId, round: u32, content: &str) -> ClientEvent {
    ClientEvent::SubmitContribution {
        session_id,
        user_id: user.clone(),
        round,
        body: ContributionBody::Text(content.into()),
        sequence_number: 0,
    }
}

#[tokio::test]
async fn queue_to_first_round_and_text_advance() {
    let (srv, mut alice, mut bob) = setup(Arc::new(FavorFirstScorer), CountingRating::new());
    let session_id = matched_session(&srv, &mut alice, &mut bob).await;

    // lower user id opens round 1
    let session = srv.sessions().get(&session_id).unwrap();
    assert_eq!(session.current_round().await, 1);
    assert_eq!(session.speaker_for(1).id, alice.id);

    srv.dispatch(text(session_id, &alice.id, 1, "Opening statement."))
        .await
        .unwrap();

    // round advanced, speaker flipped to bob
    let (round, speaker) = bob
        .wait_for(|ev| match ev {
            ServerEvent::SessionState {
                current_round: 2,
                current_speaker_id,
                ..
            } => Some((2u32, current_speaker_id)),
            _ => None,
        })
        .await;
    assert_eq!(round, 2);
    assert_eq!(speaker, Some(bob.id.clone()));
    assert_eq!(session.transcript().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_speaker_is_advanced_by_the_clock() {
    let (srv, mut alice, mut bob) = setup(Arc::new(FavorFirstScorer), CountingRating::new());
    let session_id = matched_session(&srv, &mut alice, &mut bob).await;
    let session = srv.sessions().get(&session_id).unwrap();

    // nobody submits; virtual time runs past the 60s turn
    let speaker = bob
        .wait_for(|ev| match ev {
            ServerEvent::SessionState {
                current_round: 2,
                current_speaker_id,
                ..
            } => Some(current_speaker_id),
            _ => None,
        })
        .await;
    assert_eq!(speaker, Some(bob.id.clone()));
    assert_eq!(session.current_round().await, 2);
}

#[tokio::test(start_paused = true)]
async fn expiry_and_late_submit_advance_exactly_once() {
    let (srv, mut alice, mut bob) = setup(Arc::new(FavorFirstScorer), CountingRating::new());
    let session_id = matched_session(&srv, &mut alice, &mut bob).await;
    let session = srv.sessions().get(&session_id).unwrap();

    // let round 1 expire
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(session.current_round().await, 2);

    // the late submit against round 1 is a stale-round no-op
    let err = srv
        .dispatch(text(session_id, &alice.id, 1, "too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArenaError::StaleRound { .. }));
    assert_eq!(session.current_round().await, 2);
    assert!(session.transcript().await.is_empty());

    // handle_event swallows it without a rejection to the client
    srv.handle_event(text(session_id, &alice.id, 1, "still late"))
        .await;
    while let Ok(ev) = alice.rx.try_recv() {
        assert!(!matches!(ev, ServerEvent::Rejected { .. }));
    }
}

#[tokio::test]
async fn completed_session_scores_rates_and_tears_down() {
    let rating = CountingRating::new();
    let (srv, mut alice, mut bob) = setup(Arc::new(FavorFirstScorer), rating.clone());
    let session_id = matched_session(&srv, &mut alice, &mut bob).await;

    srv.dispatch(text(session_id, &alice.id, 1, "Opening."))
        .await
        .unwrap();
    srv.dispatch(text(session_id, &bob.id, 2, "Rebuttal."))
        .await
        .unwrap();
    srv.dispatch(text(session_id, &alice.id, 3, "Closing."))
        .await
        .unwrap();

    let result_a = alice.wait_for_result().await;
    let result_b = bob.wait_for_result().await;
    assert_eq!(result_a, result_b);
    assert_eq!(result_a.outcome, Outcome::Scored);
    assert_eq!(result_a.winner_id, Some(alice.id.clone()));
    let elo = result_a.elo_change.expect("rating applied");
    assert_eq!(elo.winner.delta(), 16);
    assert_eq!(elo.loser.delta(), -16);
    assert_eq!(rating.calls.load(Ordering::SeqCst), 1);

    // session storage is empty; the id no longer resolves
    assert!(srv.sessions().is_empty());
    let err = srv
        .dispatch(text(session_id, &alice.id, 4, "anyone there?"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArenaError::UnknownSession(_)));
}

#[tokio::test(start_paused = true)]
async fn scoring_timeout_degrades_but_still_delivers() {
    let rating = CountingRating::new();
    let (srv, mut alice, mut bob) = setup(Arc::new(SilentScorer), rating.clone());
    let session_id = matched_session(&srv, &mut alice, &mut bob).await;

    srv.dispatch(text(session_id, &alice.id, 1, "Opening."))
        .await
        .unwrap();
    srv.dispatch(text(session_id, &bob.id, 2, "Rebuttal."))
        .await
        .unwrap();
    srv.dispatch(text(session_id, &alice.id, 3, "Closing."))
        .await
        .unwrap();

    let result = alice.wait_for_result().await;
    assert_eq!(result.outcome, Outcome::Degraded);
    assert!(result.winner_id.is_none());
    assert!(result.elo_change.is_none());
    assert!(result.reason.as_deref().unwrap_or("").contains("timed out"));
    assert!(result.score_cards.iter().all(|c| c.score.total == 0.0));
    // the other side gets the same degraded result
    assert_eq!(bob.wait_for_result().await, result);
    assert_eq!(rating.calls.load(Ordering::SeqCst), 0);
    assert!(srv.sessions().is_empty());
}

#[tokio::test]
async fn disconnect_mid_round_forfeits_to_the_opponent() {
    let rating = CountingRating::new();
    let (srv, mut alice, mut bob) = setup(Arc::new(FavorFirstScorer), rating.clone());
    let session_id = matched_session(&srv, &mut alice, &mut bob).await;

    srv.dispatch(text(session_id, &alice.id, 1, "Opening."))
        .await
        .unwrap();
    srv.disconnect(&bob.id).await;

    let result = alice.wait_for_result().await;
    assert_eq!(result.outcome, Outcome::Forfeit);
    assert_eq!(result.winner_id, Some(alice.id.clone()));
    // scoring skipped, rating still applied
    assert!(result.score_cards.iter().all(|c| c.score.total == 0.0));
    assert!(result.elo_change.is_some());
    assert_eq!(rating.calls.load(Ordering::SeqCst), 1);
    assert!(srv.sessions().is_empty());
}

#[tokio::test]
async fn voice_round_streams_chunks_and_waits_for_the_clock() {
    let (srv, mut alice, mut bob) = setup(Arc::new(FavorFirstScorer), CountingRating::new());
    let session_id = matched_session(&srv, &mut alice, &mut bob).await;
    let session = srv.sessions().get(&session_id).unwrap();

    for seq in 0..4u64 {
        srv.dispatch(ClientEvent::SubmitContribution {
            session_id,
            user_id: alice.id.clone(),
            round: 1,
            body: ContributionBody::AudioChunk(vec![0xAB; 32]),
            sequence_number: seq,
        })
        .await
        .unwrap();
    }

    // chunks are in the transcript but never advance the round
    assert_eq!(session.current_round().await, 1);
    assert_eq!(session.transcript().await.len(), 4);

    // the opponent hears the stream
    let heard = bob
        .wait_for(|ev| match ev {
            ServerEvent::ContributionBroadcast { round: 1, body, .. } if !body.is_text() => {
                Some(body)
            }
            _ => None,
        })
        .await;
    assert!(!heard.is_text());
}

#[tokio::test]
async fn mid_session_requeue_cannot_create_a_second_session() {
    let (srv, mut alice, mut bob) = setup(Arc::new(FavorFirstScorer), CountingRating::new());
    matched_session(&srv, &mut alice, &mut bob).await;

    // alice tries to queue again while her session is live
    let err = srv
        .dispatch(ClientEvent::JoinQueue {
            user_id: alice.id.clone(),
            rating: 1000,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ArenaError::AlreadyInSession(_)));

    // a third user arriving finds nobody to pair with
    let _rx_c = srv.connect(UserHandle::new("carol", "Carol", 1005));
    srv.dispatch(ClientEvent::JoinQueue {
        user_id: "carol".into(),
        rating: 1005,
    })
    .await
    .unwrap();

    assert_eq!(srv.sessions().len(), 1);
    // the rejection reaches the client through the normal side channel
    srv.handle_event(ClientEvent::JoinQueue {
        user_id: alice.id.clone(),
        rating: 1000,
    })
    .await;
    let code = alice
        .wait_for(|ev| match ev {
            ServerEvent::Rejected { code, .. } => Some(code),
            _ => None,
        })
        .await;
    assert_eq!(code, "already-in-session");
}

#[tokio::test]
async fn non_speaker_submission_is_rejected_to_sender() {
    let (srv, mut alice, mut bob) = setup(Arc::new(FavorFirstScorer), CountingRating::new());
    let session_id = matched_session(&srv, &mut alice, &mut bob).await;
    let session = srv.sessions().get(&session_id).unwrap();

    // round 1 belongs to alice; bob jumps the queue
    srv.handle_event(text(session_id, &bob.id, 1, "me first"))
        .await;

    let code = bob
        .wait_for(|ev| match ev {
            ServerEvent::Rejected { code, .. } => Some(code),
            _ => None,
        })
        .await;
    assert_eq!(code, "not-your-turn");
    assert!(session.transcript().await.is_empty());
    assert_eq!(session.current_round().await, 1);
}
