//! Configuration for the access-control core.

use serde::{Deserialize, Serialize};

/// Tunables for authentication, sessions, and challenges. Loaded from the
/// host's TOML config; every field has a production default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    /// Similarity at or above which voice alone authenticates.
    pub high_threshold: f64,
    /// Similarity at or above which a knowledge challenge may rescue the
    /// attempt. Below this the attempt is denied outright.
    pub low_threshold: f64,
    /// Session lifetime in seconds, fixed from issuance (not sliding).
    pub session_ttl_secs: u64,
    /// Confidence recorded on sessions issued via the challenge path.
    pub challenge_confidence: f64,
    /// Maximum challenges issued per attempt.
    pub max_challenges: usize,
    /// How long an issued challenge stays answerable.
    pub challenge_ttl_secs: u64,
    /// Characters of record content shown as a challenge hint.
    pub content_hint_len: usize,
    /// Dimensionality of the placeholder hash embedding.
    pub embedding_dim: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.85,
            low_threshold: 0.70,
            session_ttl_secs: 600,
            challenge_confidence: 0.75,
            max_challenges: 2,
            challenge_ttl_secs: 300,
            content_hint_len: 40,
            embedding_dim: 32,
        }
    }
}
