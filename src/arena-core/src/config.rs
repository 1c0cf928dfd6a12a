//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ArenaError;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ArenaConfig {
    pub matchmaking: MatchmakingConfig,
    pub session: SessionConfig,
    pub scoring: ScoringConfig,
    pub topics: TopicsConfig,
}

/// Matchmaking queue tuning.
///
/// The tolerance band a waiting entry accepts is
/// `base_tolerance + waited_seconds * growth_per_second`, capped at
/// `max_tolerance`. Two entries pair only when the rating gap fits inside
/// both bands.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    pub base_tolerance: i32,
    pub growth_per_second: i32,
    pub max_tolerance: i32,
    /// Interval of the periodic pairing pass.
    pub tick_seconds: u64,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            base_tolerance: 50,
            growth_per_second: 10,
            max_tolerance: 400,
            tick_seconds: 2,
        }
    }
}

impl MatchmakingConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }
}

/// Session shape: round count and per-round speaking time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub total_rounds: u32,
    pub turn_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            total_rounds: 3,
            turn_seconds: 60,
        }
    }
}

impl SessionConfig {
    pub fn turn_duration(&self) -> Duration {
        Duration::from_secs(self.turn_seconds)
    }
}

/// Bound on the external scoring call; past it the degraded-result path
/// is taken so a session never stays open on a silent collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub timeout_seconds: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { timeout_seconds: 30 }
    }
}

impl ScoringConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Topic pool a new session draws from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub pool: Vec<String>,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            pool: vec![
                "Should social media be regulated more strictly?".to_string(),
                "Is remote work better for society than office work?".to_string(),
                "Should voting be mandatory?".to_string(),
                "Is space exploration worth the cost?".to_string(),
                "Should college education be free?".to_string(),
            ],
        }
    }
}

impl ArenaConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ArenaError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ArenaError::Config(format!("Failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse configuration from string content.
    pub fn parse(content: &str) -> Result<Self, ArenaError> {
        toml::from_str(content)
            .map_err(|e| ArenaError::Config(format!("Failed to parse config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ArenaConfig::default();
        assert_eq!(cfg.session.total_rounds, 3);
        assert_eq!(cfg.session.turn_seconds, 60);
        assert_eq!(cfg.matchmaking.base_tolerance, 50);
        assert!(!cfg.topics.pool.is_empty());
    }

    #[test]
    fn test_parse_partial_overrides() {
        let cfg = ArenaConfig::parse(
            r#"
            [session]
            total_rounds = 5
            turn_seconds = 30

            [matchmaking]
            base_tolerance = 25
            "#,
        )
        .unwrap();
        assert_eq!(cfg.session.total_rounds, 5);
        assert_eq!(cfg.session.turn_seconds, 30);
        assert_eq!(cfg.matchmaking.base_tolerance, 25);
        // untouched sections fall back to defaults
        assert_eq!(cfg.matchmaking.max_tolerance, 400);
        assert_eq!(cfg.scoring.timeout_seconds, 30);
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        assert!(ArenaConfig::parse("session = nonsense").is_err());
    }
}
