//! Arena CLI - local debate arena demo
//!
//! Drives two simulated clients through the full session lifecycle: queue,
//! match, alternating timed rounds (text or streamed voice), scoring and
//! rating. Useful for watching the protocol run and for judging changes to
//! the session core without a real transport in front of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use colored::Colorize;

use arena_core::{
    AiJudgeScorer, ArenaConfig, ArenaError, ArenaServer, AudioCapture, ClientEvent, Contribution,
    ContributionBody, DebateScores, EloChange, JudgeConfig, Outcome, ParticipantScore,
    RatingService, RatingUpdate, ScoreCard, Scorer, ServerEvent, UserHandle,
};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "arena",
    version,
    about = "Debate arena demo - run a full matched session locally",
    long_about = "Simulates two clients joining the matchmaking queue and debating \
                  through the real session core, with scoring and Elo adjustment."
)]
struct Cli {
    /// Topic to debate (picked from the config pool when omitted)
    #[arg(value_name = "TOPIC")]
    topic: Option<String>,

    /// Path to a TOML config file
    #[arg(long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Number of debate rounds
    #[arg(short, long, default_value = "3", value_name = "ROUNDS")]
    rounds: u32,

    /// Seconds per speaking turn
    #[arg(long, default_value = "5", value_name = "SECONDS")]
    turn_seconds: u64,

    /// Stream voice chunks instead of submitting text
    #[arg(long)]
    voice: bool,

    /// Score with an OpenAI-compatible judge model instead of the offline
    /// heuristic (requires OPENAI_API_KEY)
    #[arg(long)]
    ai_judge: bool,

    /// Judge model name (with --ai-judge)
    #[arg(long, default_value = "gpt-4o-mini", value_name = "MODEL")]
    judge_model: String,
}

/// Offline scorer: rewards longer, more substantial arguments. Good enough
/// to produce a deterministic winner for the demo.
struct WordCountScorer;

#[async_trait]
impl Scorer for WordCountScorer {
    async fn score(
        &self,
        _topic: &str,
        participants: &[UserHandle; 2],
        transcript: &[Contribution],
    ) -> Result<DebateScores, ArenaError> {
        let card = |p: &UserHandle| {
            let words: usize = transcript
                .iter()
                .filter(|c| c.speaker_id == p.id)
                .map(|c| match &c.body {
                    ContributionBody::Text(t) => t.split_whitespace().count(),
                    ContributionBody::AudioChunk(_) => 5,
                })
                .sum();
            let base = (words as f32 / 10.0).min(10.0);
            ScoreCard {
                user_id: p.id.clone(),
                score: ParticipantScore::from_parts(
                    base,
                    base * 0.9,
                    base * 0.95,
                    base * 0.85,
                    vec![format!("Contributed roughly {words} words of argument.")],
                ),
            }
        };
        Ok(DebateScores {
            cards: [card(&participants[0]), card(&participants[1])],
        })
    }
}

/// Classic Elo with a fixed K factor, playing the rating collaborator role.
struct KFactorElo {
    k: f64,
}

#[async_trait]
impl RatingService for KFactorElo {
    async fn apply_result(
        &self,
        winner: &UserHandle,
        loser: &UserHandle,
    ) -> Result<EloChange, ArenaError> {
        let expected =
            1.0 / (1.0 + 10f64.powf((loser.rating as f64 - winner.rating as f64) / 400.0));
        let delta = (self.k * (1.0 - expected)).round() as i32;
        Ok(EloChange {
            winner: RatingUpdate {
                id: winner.id.clone(),
                old_rating: winner.rating,
                new_rating: winner.rating + delta,
            },
            loser: RatingUpdate {
                id: loser.id.clone(),
                old_rating: loser.rating,
                new_rating: loser.rating - delta,
            },
        })
    }
}

/// Synthetic capture backend: replays a fixed set of chunks.
struct ScriptedCapture {
    chunks: Vec<Vec<u8>>,
    next: usize,
    running: bool,
}

impl ScriptedCapture {
    fn new(chunks: usize) -> Self {
        Self {
            chunks: (0..chunks).map(|i| vec![i as u8; 320]).collect(),
            next: 0,
            running: false,
        }
    }
}

impl AudioCapture for ScriptedCapture {
    fn start(&mut self) -> Result<(), ArenaError> {
        self.next = 0;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn poll_chunk(&mut self) -> Option<(u64, Vec<u8>)> {
        if !self.running || self.next >= self.chunks.len() {
            return None;
        }
        let seq = self.next as u64;
        let chunk = self.chunks[self.next].clone();
        self.next += 1;
        Some((seq, chunk))
    }
}

const ALICE_LINES: [&str; 3] = [
    "Clear rules protect users where platform self-policing has visibly failed.",
    "My opponent trusts incentives that have rewarded outrage for a decade.",
    "Regulation is not censorship; it is accountability with due process.",
];

const BOB_LINES: [&str; 3] = [
    "Heavy-handed rules entrench incumbents and freeze out smaller platforms.",
    "Accountability is better served by transparency than by state gatekeeping.",
    "The cure on offer is worse than the disease it claims to treat.",
];

struct SimClient {
    me: UserHandle,
    lines: Vec<String>,
    voice: bool,
}

impl SimClient {
    /// React to server events until the session result arrives.
    async fn run(self, srv: Arc<ArenaServer>, mut rx: UnboundedReceiver<ServerEvent>) {
        let mut session_id = None;
        let mut last_spoken_round = 0u32;

        while let Some(event) = rx.recv().await {
            match event {
                ServerEvent::MatchFound {
                    session_id: sid,
                    opponent,
                    topic,
                } => {
                    println!(
                        "{} {} matched against {} on {}",
                        "◆".bright_blue(),
                        self.me.display_name.bright_cyan(),
                        opponent.display_name.bright_cyan(),
                        format!("\"{topic}\"").bright_white()
                    );
                    session_id = Some(sid);
                    srv.handle_event(ClientEvent::JoinSession {
                        session_id: sid,
                        user_id: self.me.id.clone(),
                    })
                    .await;
                }
                ServerEvent::SessionState {
                    current_round,
                    current_speaker_id,
                    is_active,
                    ..
                } => {
                    let my_turn = is_active
                        && current_speaker_id.as_ref() == Some(&self.me.id)
                        && current_round > last_spoken_round;
                    if let (true, Some(sid)) = (my_turn, session_id) {
                        last_spoken_round = current_round;
                        self.speak(&srv, sid, current_round).await;
                    }
                }
                ServerEvent::ContributionBroadcast {
                    speaker_id,
                    round,
                    body,
                    ..
                } => {
                    if speaker_id != self.me.id {
                        match body {
                            ContributionBody::Text(text) => {
                                println!(
                                    "  {} {} {}",
                                    format!("[round {round}]").dimmed(),
                                    format!("{speaker_id}:").yellow(),
                                    text
                                );
                            }
                            ContributionBody::AudioChunk(bytes) => {
                                println!(
                                    "  {} {} {}",
                                    format!("[round {round}]").dimmed(),
                                    format!("{speaker_id}:").yellow(),
                                    format!("~ {} bytes of audio ~", bytes.len()).dimmed()
                                );
                            }
                        }
                    }
                }
                ServerEvent::SessionResult(result) => {
                    print_result(&self.me, &result);
                    break;
                }
                ServerEvent::Rejected { code, message } => {
                    eprintln!(
                        "{} {} rejected ({code}): {message}",
                        "!".red().bold(),
                        self.me.display_name
                    );
                }
            }
        }
    }

    async fn speak(&self, srv: &ArenaServer, session_id: Uuid, round: u32) {
        // small pause so the exchange reads like a conversation
        tokio::time::sleep(Duration::from_millis(300)).await;

        if self.voice {
            let mut capture = ScriptedCapture::new(4);
            if capture.start().is_ok() {
                while let Some((seq, chunk)) = capture.poll_chunk() {
                    srv.handle_event(ClientEvent::SubmitContribution {
                        session_id,
                        user_id: self.me.id.clone(),
                        round,
                        body: ContributionBody::AudioChunk(chunk),
                        sequence_number: seq,
                    })
                    .await;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                capture.stop();
            }
            // the turn clock ends a voice round; nothing to submit
        } else {
            let line = self
                .lines
                .get(((round - 1) / 2) as usize)
                .cloned()
                .unwrap_or_else(|| "I rest my case.".to_string());
            srv.handle_event(ClientEvent::SubmitContribution {
                session_id,
                user_id: self.me.id.clone(),
                round,
                body: ContributionBody::Text(line),
                sequence_number: 0,
            })
            .await;
        }
    }
}

fn print_result(me: &UserHandle, result: &arena_core::SessionResult) {
    let verdict = match (&result.outcome, &result.winner_id) {
        (Outcome::Scored, Some(w)) if *w == me.id => "Victory!".bright_green().bold(),
        (Outcome::Forfeit, Some(w)) if *w == me.id => "Win by forfeit".bright_green(),
        (Outcome::Scored, _) | (Outcome::Forfeit, _) => "Defeat".red(),
        (Outcome::Draw, _) => "Draw".yellow(),
        (Outcome::Degraded, _) => "Unscored (judge unavailable)".yellow(),
    };
    println!(
        "{} {} - {}",
        "★".bright_magenta(),
        me.display_name.bright_cyan().bold(),
        verdict
    );
    if let Some(card) = result.score_cards.iter().find(|c| c.user_id == me.id) {
        println!(
            "    logic {:.1}  evidence {:.1}  persuasion {:.1}  delivery {:.1}  total {:.1}",
            card.score.logical_consistency,
            card.score.evidence,
            card.score.persuasiveness,
            card.score.delivery,
            card.score.total
        );
        for line in &card.score.feedback {
            println!("    {}", line.dimmed());
        }
    }
    if let Some(elo) = &result.elo_change {
        let update = if elo.winner.id == me.id {
            &elo.winner
        } else {
            &elo.loser
        };
        let delta = update.delta();
        let signed = if delta >= 0 {
            format!("+{delta}").bright_green()
        } else {
            format!("{delta}").red()
        };
        println!("    rating {} → {} ({signed})", update.old_rating, update.new_rating);
    }
    if let Some(reason) = &result.reason {
        println!("    {}", reason.dimmed());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena_core=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ArenaConfig::load(path)?,
        None => ArenaConfig::default(),
    };
    config.session.total_rounds = cli.rounds.max(1);
    config.session.turn_seconds = cli.turn_seconds.max(1);
    if let Some(topic) = &cli.topic {
        config.topics.pool = vec![topic.clone()];
    }

    let scorer: Arc<dyn Scorer> = if cli.ai_judge {
        let api_base = std::env::var("OPENAI_API_BASE")
            .or_else(|_| std::env::var("OPENAI_BASE_URL"))
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
            eprintln!(
                "{}",
                "Warning: OPENAI_API_KEY not set. Judge calls may fail.".yellow()
            );
            String::new()
        });
        Arc::new(AiJudgeScorer::new(JudgeConfig {
            api_base,
            api_key,
            model: cli.judge_model.clone(),
        }))
    } else {
        Arc::new(WordCountScorer)
    };

    let server = ArenaServer::new(config, scorer, Arc::new(KFactorElo { k: 32.0 }));
    let _ticker = Arc::clone(&server).start();

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        "  Debate Arena - local session demo".bright_blue().bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    let alice = UserHandle::new("alice", "Alice", 1000);
    let bob = UserHandle::new("bob", "Bob", 1020);
    let rx_a = server.connect(alice.clone());
    let rx_b = server.connect(bob.clone());

    let client_a = SimClient {
        me: alice.clone(),
        lines: ALICE_LINES.iter().map(|s| s.to_string()).collect(),
        voice: cli.voice,
    };
    let client_b = SimClient {
        me: bob.clone(),
        lines: BOB_LINES.iter().map(|s| s.to_string()).collect(),
        voice: cli.voice,
    };

    let task_a = tokio::spawn(client_a.run(Arc::clone(&server), rx_a));
    let task_b = tokio::spawn(client_b.run(Arc::clone(&server), rx_b));

    for user in [&alice, &bob] {
        server
            .handle_event(ClientEvent::JoinQueue {
                user_id: user.id.clone(),
                rating: user.rating,
            })
            .await;
    }

    task_a.await?;
    task_b.await?;

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Session complete.".bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    Ok(())
}
