//! Knowledge-based fallback challenges for ambiguous voice scores.
//!
//! Challenges are generated from the principal's own recent records and
//! carry an expected answer captured at issuance. Issuance itself is
//! gated on the grant an ambiguous voice attempt deposits in the session
//! store, so the `voice` factor on a challenge-issued session always
//! stands for a real attempt. Verification compares the response against
//! the expected answer — a session is only issued on an actual match, at
//! a fixed lower confidence, with both `voice` and `challenge` factors
//! recorded for downstream policy.

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::session::SessionStore;
use crate::store::VoiceprintStore;
use crate::types::{now_secs, AuthSession, SessionFactor};
use chrono::DateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Categories whose records describe family relationships; these get the
/// relationship-direction challenge.
const FAMILY_CATEGORIES: &[&str] = &["family", "relationships"];

/// Snapshot of one memory record, provided by the surrounding memory
/// subsystem. The issuer never reaches into memory storage itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub category: String,
    pub content: String,
    pub created_at: u64,
    /// For relationship records: who the subject is to the principal
    /// (e.g. "mother", "younger brother").
    pub relationship_direction: Option<String>,
}

/// Supplies recent records and identity hints for challenge generation.
pub trait RecordProvider: Send + Sync {
    /// Most recent records for a principal, newest first.
    fn recent(&self, principal: &str, category: Option<&str>, limit: usize) -> Vec<MemoryRecord>;

    /// Display name the platform knows the principal by, if any.
    fn display_name(&self, principal: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Temporal,
    ContentHint,
    RelationshipDirection,
    Identity,
}

/// A challenge as shown to the principal. The expected answer stays
/// server-side in the pending table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub kind: ChallengeKind,
    pub prompt: String,
}

/// A response to a previously issued challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge_id: String,
    pub answer: String,
}

struct PendingChallenge {
    principal: String,
    kind: ChallengeKind,
    expected: String,
    category: Option<String>,
    expires_at: u64,
}

pub struct ChallengeIssuer {
    provider: Arc<dyn RecordProvider>,
    voiceprints: Arc<dyn VoiceprintStore>,
    sessions: Arc<SessionStore>,
    pending: Mutex<HashMap<String, PendingChallenge>>,
    config: CoreConfig,
}

impl ChallengeIssuer {
    pub fn new(
        provider: Arc<dyn RecordProvider>,
        voiceprints: Arc<dyn VoiceprintStore>,
        sessions: Arc<SessionStore>,
        config: CoreConfig,
    ) -> Self {
        Self {
            provider,
            voiceprints,
            sessions,
            pending: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Issue up to `max_challenges` challenges for a principal whose voice
    /// score landed in the ambiguous band. Challenges are only a second
    /// factor: a principal with no voice enrollment cannot take this path
    /// at all, and issuance consumes the grant the ambiguous voice
    /// attempt deposited — without one there is nothing to rescue.
    pub fn issue(
        &self,
        principal: &str,
        category: Option<&str>,
    ) -> Result<Vec<Challenge>, CoreError> {
        if self.voiceprints.list_for(principal)?.is_empty() {
            return Err(CoreError::NotEnrolled);
        }
        if self.sessions.take_challenge_grant(principal).is_none() {
            warn!(principal = %principal, "challenge requested without an ambiguous voice attempt");
            return Err(CoreError::denied(
                "no ambiguous voice attempt on file for this principal",
            ));
        }

        let records = self
            .provider
            .recent(principal, category, self.config.max_challenges + 1);
        let mut drafts: Vec<(ChallengeKind, String, String)> = Vec::new();

        if records.is_empty() {
            // no history to draw on — fall back to a generic identity check
            let expected = self
                .provider
                .display_name(principal)
                .unwrap_or_else(|| principal.to_string());
            drafts.push((
                ChallengeKind::Identity,
                "To confirm it's you: what name do I know you by?".to_string(),
                expected,
            ));
        } else {
            let newest = &records[0];
            drafts.push((
                ChallengeKind::Temporal,
                "Roughly what day was the last time we talked about this? (YYYY-MM-DD)"
                    .to_string(),
                day_of(newest.created_at),
            ));

            if let Some(second) = records.get(1) {
                let hint = truncate_chars(&second.content, self.config.content_hint_len);
                drafts.push((
                    ChallengeKind::ContentHint,
                    format!("Finish this memory of yours: \"{}…\"", hint),
                    second.content.clone(),
                ));
            }

            let family_scoped = category.map(is_family_category).unwrap_or(false);
            if let Some(direction) = records
                .iter()
                .find_map(|r| {
                    (family_scoped || is_family_category(&r.category))
                        .then(|| r.relationship_direction.clone())
                        .flatten()
                })
            {
                drafts.push((
                    ChallengeKind::RelationshipDirection,
                    "Who is this person to you?".to_string(),
                    direction,
                ));
            }
        }

        drafts.truncate(self.config.max_challenges);

        let now = now_secs();
        let mut pending = self.pending.lock();
        pending.retain(|_, p| p.expires_at > now);

        let challenges: Vec<Challenge> = drafts
            .into_iter()
            .map(|(kind, prompt, expected)| {
                let challenge = Challenge {
                    id: Uuid::new_v4().to_string(),
                    kind,
                    prompt,
                };
                pending.insert(
                    challenge.id.clone(),
                    PendingChallenge {
                        principal: principal.to_string(),
                        kind,
                        expected,
                        category: category.map(String::from),
                        expires_at: now + self.config.challenge_ttl_secs,
                    },
                );
                challenge
            })
            .collect();

        debug!(
            principal = %principal,
            count = challenges.len(),
            "challenges issued"
        );
        Ok(challenges)
    }

    /// Verify responses against the expected answers captured at issuance.
    /// One correct answer suffices. Success issues a session at the fixed
    /// challenge confidence with factors `{voice, challenge}`.
    pub fn verify(
        &self,
        principal: &str,
        channel: &str,
        responses: &[ChallengeResponse],
    ) -> Result<AuthSession, CoreError> {
        let now = now_secs();
        let (matched, category) = {
            let mut pending = self.pending.lock();
            pending.retain(|_, p| p.expires_at > now);

            let mut matched = false;
            let mut category = None;
            for response in responses {
                let Some(p) = pending.get(&response.challenge_id) else {
                    continue;
                };
                if p.principal != principal {
                    continue;
                }
                if answer_matches(p.kind, &p.expected, &response.answer) {
                    matched = true;
                    category = p.category.clone();
                    break;
                }
            }
            if matched {
                // consume every outstanding challenge for this principal
                pending.retain(|_, p| p.principal != principal);
            }
            (matched, category)
        };

        if !matched {
            warn!(principal = %principal, "challenge verification failed");
            return Err(CoreError::denied("challenge answers did not match"));
        }

        let session = self.sessions.issue(
            principal,
            channel,
            self.config.challenge_confidence,
            vec![SessionFactor::Voice, SessionFactor::Challenge],
            category,
        );
        info!(principal = %principal, "challenge verified, session issued");
        Ok(session)
    }

    /// Outstanding (unexpired) challenges for a principal.
    pub fn pending_count(&self, principal: &str) -> usize {
        let now = now_secs();
        self.pending
            .lock()
            .values()
            .filter(|p| p.principal == principal && p.expires_at > now)
            .count()
    }
}

fn is_family_category(category: &str) -> bool {
    FAMILY_CATEGORIES.contains(&category)
}

/// UTC calendar day of a unix timestamp, as "YYYY-MM-DD".
fn day_of(timestamp: u64) -> String {
    DateTime::from_timestamp(timestamp as i64, 0)
        .map(|dt| dt.date_naive().to_string())
        .unwrap_or_default()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Too-short answers never match, so "yes" or a stray word can't clear a
/// content challenge by accident.
const MIN_ANSWER_CHARS: usize = 3;

/// Whole-word containment: the tokens of `needle` must appear in
/// `haystack` as a contiguous run, never as a fragment of a longer word.
/// Both inputs are already normalized.
fn contains_words(haystack: &str, needle: &str) -> bool {
    let hay: Vec<&str> = haystack.split(' ').collect();
    let ned: Vec<&str> = needle.split(' ').collect();
    !ned.is_empty()
        && hay.len() >= ned.len()
        && hay.windows(ned.len()).any(|w| w == ned.as_slice())
}

/// A content answer must carry at least two words, or one word of five
/// or more characters. An article or stopword that happens to occur in
/// the remembered content is not knowledge of it.
fn is_substantial(answer: &str) -> bool {
    let mut tokens = answer.split(' ');
    match (tokens.next(), tokens.next()) {
        (Some(_), Some(_)) => true,
        (Some(t), None) => t.chars().count() >= 5,
        _ => false,
    }
}

fn answer_matches(kind: ChallengeKind, expected: &str, answer: &str) -> bool {
    let expected = normalize(expected);
    let answer = normalize(answer);
    if answer.chars().count() < MIN_ANSWER_CHARS || expected.is_empty() {
        return false;
    }
    match kind {
        // exact day string, or a response that quotes it
        ChallengeKind::Temporal => answer == expected || contains_words(&answer, &expected),
        // a substantial phrase from the remembered content
        ChallengeKind::ContentHint => {
            is_substantial(&answer) && contains_words(&expected, &answer)
        }
        ChallengeKind::RelationshipDirection | ChallengeKind::Identity => {
            answer == expected
                || contains_words(&answer, &expected)
                || contains_words(&expected, &answer)
        }
    }
}
