//! Scoring and rating contracts, plus the AI judge implementation.
//!
//! The session core only depends on the two traits here. The judge talks to
//! an OpenAI-compatible API and may fail or stall; the session bounds the
//! call with a timeout and falls back to a degraded result, so neither trait
//! is allowed to wedge a session.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::capture::Contribution;
use crate::error::ArenaError;
use crate::events::ContributionBody;
use crate::participant::{UserHandle, UserId};

/// The four sub-scores plus total and judge feedback for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantScore {
    pub logical_consistency: f32,
    pub evidence: f32,
    pub persuasiveness: f32,
    pub delivery: f32,
    pub total: f32,
    pub feedback: Vec<String>,
}

impl ParticipantScore {
    /// Placeholder scores for degraded and forfeit results.
    pub fn zeroed() -> Self {
        Self {
            logical_consistency: 0.0,
            evidence: 0.0,
            persuasiveness: 0.0,
            delivery: 0.0,
            total: 0.0,
            feedback: Vec::new(),
        }
    }

    pub fn from_parts(
        logical_consistency: f32,
        evidence: f32,
        persuasiveness: f32,
        delivery: f32,
        feedback: Vec<String>,
    ) -> Self {
        let total = (logical_consistency + evidence + persuasiveness + delivery) / 4.0;
        Self {
            logical_consistency,
            evidence,
            persuasiveness,
            delivery,
            total,
            feedback,
        }
    }
}

/// Scores attributed to one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCard {
    pub user_id: UserId,
    pub score: ParticipantScore,
}

/// Verdict for a whole debate, one card per participant in session order.
#[derive(Debug, Clone)]
pub struct DebateScores {
    pub cards: [ScoreCard; 2],
}

impl DebateScores {
    /// Winner by higher total. Equal totals mean a draw: no winner, no
    /// rating change.
    pub fn winner(&self) -> Option<&UserId> {
        let [a, b] = &self.cards;
        if a.score.total > b.score.total {
            Some(&a.user_id)
        } else if b.score.total > a.score.total {
            Some(&b.user_id)
        } else {
            None
        }
    }
}

/// Rating movement for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingUpdate {
    pub id: UserId,
    pub old_rating: i32,
    pub new_rating: i32,
}

impl RatingUpdate {
    pub fn delta(&self) -> i32 {
        self.new_rating - self.old_rating
    }
}

/// Both sides of one rating adjustment, as the rating collaborator
/// reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EloChange {
    pub winner: RatingUpdate,
    pub loser: RatingUpdate,
}

/// External scoring collaborator.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(
        &self,
        topic: &str,
        participants: &[UserHandle; 2],
        transcript: &[Contribution],
    ) -> Result<DebateScores, ArenaError>;
}

/// External rating collaborator. Authoritative; the session invokes it at
/// most once per session id.
#[async_trait]
pub trait RatingService: Send + Sync {
    async fn apply_result(
        &self,
        winner: &UserHandle,
        loser: &UserHandle,
    ) -> Result<EloChange, ArenaError>;
}

/// Configuration for the AI judge.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    /// API key for authentication.
    pub api_key: String,
    /// Model used as the judge.
    pub model: String,
}

/// Scorer backed by an OpenAI-compatible chat model acting as a debate
/// judge. The model is asked for a strict-JSON verdict which is parsed
/// with serde; anything else is a judge error.
pub struct AiJudgeScorer {
    config: JudgeConfig,
}

const JUDGE_SYSTEM_PROMPT: &str = r#"You are an impartial debate judge.
Score each participant from 0 to 10 on logical consistency, evidence,
persuasiveness and delivery, and give one or two short feedback sentences
per participant.

Respond with ONLY a JSON object of this exact shape, no prose around it:
{"scores": [{"userId": "...", "logicalConsistency": 0, "evidence": 0,
"persuasiveness": 0, "delivery": 0, "feedback": ["..."]}, {...}]}"#;

/// Wire shape of the judge's reply.
#[derive(Debug, Deserialize)]
struct JudgeReply {
    scores: Vec<JudgeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JudgeEntry {
    user_id: UserId,
    logical_consistency: f32,
    evidence: f32,
    persuasiveness: f32,
    delivery: f32,
    #[serde(default)]
    feedback: Vec<String>,
}

impl AiJudgeScorer {
    pub fn new(config: JudgeConfig) -> Self {
        Self { config }
    }

    /// Render the transcript for the judge. Voice rounds are summarized by
    /// chunk count; transcription is out of scope here.
    fn render_transcript(participants: &[UserHandle; 2], transcript: &[Contribution]) -> String {
        let mut out = String::new();
        let mut audio_chunks: Option<(u32, &UserId, usize)> = None;

        let flush_audio = |out: &mut String, pending: &mut Option<(u32, &UserId, usize)>| {
            if let Some((round, speaker, count)) = pending.take() {
                out.push_str(&format!(
                    "[Round {round}] {speaker}: (voice contribution, {count} audio chunks)\n"
                ));
            }
        };

        for c in transcript {
            match &c.body {
                ContributionBody::Text(text) => {
                    flush_audio(&mut out, &mut audio_chunks);
                    out.push_str(&format!("[Round {}] {}: {}\n", c.round, c.speaker_id, text));
                }
                ContributionBody::AudioChunk(_) => match &mut audio_chunks {
                    Some((round, speaker, count))
                        if *round == c.round && **speaker == c.speaker_id =>
                    {
                        *count += 1;
                    }
                    _ => {
                        flush_audio(&mut out, &mut audio_chunks);
                        audio_chunks = Some((c.round, &c.speaker_id, 1));
                    }
                },
            }
        }
        flush_audio(&mut out, &mut audio_chunks);

        let [a, b] = participants;
        format!(
            "Participants: {} ({}) and {} ({}).\n\nTranscript:\n{}",
            a.id, a.display_name, b.id, b.display_name, out
        )
    }

    /// Get a completion from the judge model, retrying transient failures
    /// with exponential backoff.
    async fn get_completion(&self, prompt: String) -> Result<String, ArenaError> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ArenaError::Judge(format!("Failed to create HTTP client: {}", e)))?;

        let config = OpenAIConfig::new()
            .with_api_key(&self.config.api_key)
            .with_api_base(&self.config.api_base);
        let client = Client::with_config(config).with_http_client(http_client);

        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: JUDGE_SYSTEM_PROMPT.into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: prompt.into(),
                name: None,
            }),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(messages)
            .build()
            .map_err(|e| ArenaError::Judge(e.to_string()))?;

        let max_retries = 3;
        let mut last_error = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = std::time::Duration::from_secs(1 << attempt);
                tokio::time::sleep(delay).await;
            }

            match client.chat().create(request.clone()).await {
                Ok(response) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();
                    return Ok(content);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "judge completion failed");
                    last_error = Some(e);
                }
            }
        }

        Err(ArenaError::Judge(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown API error after retries".to_string()),
        ))
    }
}

/// Pull the JSON object out of a model reply that may be wrapped in code
/// fences or prose.
fn extract_json(reply: &str) -> Result<&str, ArenaError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(&reply[s..=e]),
        _ => Err(ArenaError::Judge(format!(
            "no JSON object in judge reply: {reply:.80}"
        ))),
    }
}

fn parse_verdict(
    reply: &str,
    participants: &[UserHandle; 2],
) -> Result<DebateScores, ArenaError> {
    let json = extract_json(reply)?;
    let parsed: JudgeReply = serde_json::from_str(json)
        .map_err(|e| ArenaError::Judge(format!("malformed judge verdict: {}", e)))?;

    let card_for = |user: &UserHandle| -> Result<ScoreCard, ArenaError> {
        let entry = parsed
            .scores
            .iter()
            .find(|s| s.user_id == user.id)
            .ok_or_else(|| ArenaError::Judge(format!("verdict missing participant {}", user.id)))?;
        Ok(ScoreCard {
            user_id: entry.user_id.clone(),
            score: ParticipantScore::from_parts(
                entry.logical_consistency,
                entry.evidence,
                entry.persuasiveness,
                entry.delivery,
                entry.feedback.clone(),
            ),
        })
    };

    Ok(DebateScores {
        cards: [card_for(&participants[0])?, card_for(&participants[1])?],
    })
}

#[async_trait]
impl Scorer for AiJudgeScorer {
    async fn score(
        &self,
        topic: &str,
        participants: &[UserHandle; 2],
        transcript: &[Contribution],
    ) -> Result<DebateScores, ArenaError> {
        let prompt = format!(
            "TOPIC: {}\n\n{}",
            topic,
            Self::render_transcript(participants, transcript)
        );
        let reply = self.get_completion(prompt).await?;
        parse_verdict(&reply, participants)
    }
}
