//! Voice-confidence authentication: enrollment and the three-way
//! verification state machine.

use crate::config::CoreConfig;
use crate::crypto;
use crate::embedding::{average_embeddings, cosine_similarity, EmbeddingExtractor};
use crate::error::CoreError;
use crate::session::SessionStore;
use crate::store::VoiceprintStore;
use crate::types::{now_secs, AuthSession, SessionFactor, Voiceprint};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of a verification attempt. Denials are values, never errors —
/// nothing about a failed attempt unwinds past this boundary.
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Authenticated(AuthSession),
    /// Score landed in the ambiguous band; the caller must obtain a
    /// second factor via the challenge issuer before a session exists.
    ChallengeRequired { score: f64 },
    Denied { score: f64, reason: String },
}

impl VerifyOutcome {
    /// Collapse into a session-or-error for callers that treat anything
    /// short of full authentication as failure.
    pub fn into_session(self) -> Result<AuthSession, CoreError> {
        match self {
            VerifyOutcome::Authenticated(session) => Ok(session),
            VerifyOutcome::ChallengeRequired { score } => {
                Err(CoreError::ChallengeRequired { score })
            }
            VerifyOutcome::Denied { score, .. } => Err(CoreError::AuthenticationDenied { score }),
        }
    }
}

/// Which band a similarity score falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Band {
    Authenticated,
    Challenge,
    Denied,
}

/// Both boundaries are inclusive on the lower edge of their band:
/// exactly 0.85 authenticates, exactly 0.70 earns a challenge.
pub(crate) fn band_for(score: f64, config: &CoreConfig) -> Band {
    if score >= config.high_threshold {
        Band::Authenticated
    } else if score >= config.low_threshold {
        Band::Challenge
    } else {
        Band::Denied
    }
}

pub struct ConfidenceAuthenticator {
    extractor: Arc<dyn EmbeddingExtractor>,
    voiceprints: Arc<dyn VoiceprintStore>,
    sessions: Arc<SessionStore>,
    config: CoreConfig,
}

impl ConfidenceAuthenticator {
    pub fn new(
        extractor: Arc<dyn EmbeddingExtractor>,
        voiceprints: Arc<dyn VoiceprintStore>,
        sessions: Arc<SessionStore>,
        config: CoreConfig,
    ) -> Self {
        Self {
            extractor,
            voiceprints,
            sessions,
            config,
        }
    }

    /// Enroll one voiceprint from one or more samples. Each call appends a
    /// new print (multi-sample enrollment averages within the call, never
    /// across calls).
    pub async fn enroll(
        &self,
        principal: &str,
        samples: &[Vec<u8>],
        device_hint: Option<&str>,
    ) -> Result<Voiceprint, CoreError> {
        if samples.is_empty() {
            return Err(CoreError::InvalidInput(
                "enrollment requires at least one sample".into(),
            ));
        }
        let mut embeddings = Vec::with_capacity(samples.len());
        for sample in samples {
            embeddings.push(self.extractor.extract(sample).await?);
        }
        let averaged = average_embeddings(&embeddings);

        // self-consistency of the samples against their average
        let enrollment_confidence = embeddings
            .iter()
            .map(|e| cosine_similarity(e, &averaged))
            .sum::<f64>()
            / embeddings.len() as f64;

        let serialized = serde_json::to_vec(&averaged)
            .map_err(|e| CoreError::InvalidInput(format!("embedding serialization: {}", e)))?;
        let print = Voiceprint {
            id: Uuid::new_v4().to_string(),
            owner: principal.to_string(),
            sealed_embedding: crypto::seal(&serialized)?,
            model_version: self.extractor.model_version().to_string(),
            device_hint: device_hint.map(String::from),
            enrollment_confidence,
            created_at: now_secs(),
        };
        self.voiceprints.add(&print)?;
        info!(
            principal = %principal,
            samples = samples.len(),
            confidence = enrollment_confidence,
            "voiceprint enrolled"
        );
        Ok(print)
    }

    /// Verify a live sample against every enrolled voiceprint, taking the
    /// maximum similarity. An unenrolled principal is denied with a
    /// reason, never an error that could leak across the boundary.
    pub async fn verify(
        &self,
        principal: &str,
        sample: &[u8],
        channel: &str,
    ) -> Result<VerifyOutcome, CoreError> {
        let prints = self.voiceprints.list_for(principal)?;
        if prints.is_empty() {
            warn!(principal = %principal, "verify attempt with no enrollment");
            return Ok(VerifyOutcome::Denied {
                score: 0.0,
                reason: CoreError::NotEnrolled.to_string(),
            });
        }

        let live = self.extractor.extract(sample).await?;
        let mut best = 0.0f64;
        for print in &prints {
            // a voiceprint that fails to open is corrupt enrollment data,
            // not a policy decision — surface it loudly
            let bytes = crypto::open(&print.sealed_embedding)?;
            let enrolled: Vec<f64> = serde_json::from_slice(&bytes)
                .map_err(|e| CoreError::DecryptionFailed(format!("embedding decode: {}", e)))?;
            best = best.max(cosine_similarity(&live, &enrolled));
        }

        match band_for(best, &self.config) {
            Band::Authenticated => {
                let session = self.sessions.issue(
                    principal,
                    channel,
                    best,
                    vec![SessionFactor::Voice],
                    None,
                );
                info!(principal = %principal, score = best, "voice authenticated");
                Ok(VerifyOutcome::Authenticated(session))
            }
            Band::Challenge => {
                // entitle exactly this principal to the challenge path;
                // the issuer refuses anyone without an ambiguous attempt
                self.sessions
                    .grant_challenge(principal, best, self.config.challenge_ttl_secs);
                info!(principal = %principal, score = best, "voice ambiguous, challenge required");
                Ok(VerifyOutcome::ChallengeRequired { score: best })
            }
            Band::Denied => {
                warn!(principal = %principal, score = best, "voice denied");
                Ok(VerifyOutcome::Denied {
                    score: best,
                    reason: format!("voice similarity {:.2} below threshold", best),
                })
            }
        }
    }

    /// Number of voiceprints on file for a principal.
    pub fn enrollment_count(&self, principal: &str) -> Result<usize, CoreError> {
        Ok(self.voiceprints.list_for(principal)?.len())
    }

    /// Remove every voiceprint for a principal. Only the explicit
    /// account-deletion flow calls this.
    pub fn delete_enrollment(&self, principal: &str) -> Result<usize, CoreError> {
        let removed = self.voiceprints.delete_for(principal)?;
        if removed > 0 {
            info!(principal = %principal, removed, "voice enrollment deleted");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingExtractor;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Extractor returning canned embeddings keyed by the sample bytes.
    struct StubExtractor {
        map: Mutex<HashMap<Vec<u8>, Vec<f64>>>,
    }

    impl StubExtractor {
        fn new(entries: &[(&[u8], Vec<f64>)]) -> Self {
            let mut map = HashMap::new();
            for (audio, emb) in entries {
                map.insert(audio.to_vec(), emb.clone());
            }
            Self {
                map: Mutex::new(map),
            }
        }
    }

    #[async_trait]
    impl EmbeddingExtractor for StubExtractor {
        async fn extract(&self, audio: &[u8]) -> Result<Vec<f64>, CoreError> {
            self.map
                .lock()
                .get(audio)
                .cloned()
                .ok_or_else(|| CoreError::Capability("unknown sample".into()))
        }

        fn model_version(&self) -> &str {
            "stub-v1"
        }
    }

    fn authenticator(extractor: Arc<dyn EmbeddingExtractor>) -> ConfidenceAuthenticator {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        ConfidenceAuthenticator::new(
            extractor,
            store,
            Arc::new(SessionStore::new(600)),
            CoreConfig::default(),
        )
    }

    #[test]
    fn band_boundaries_are_inclusive() {
        let config = CoreConfig::default();
        assert_eq!(band_for(1.0, &config), Band::Authenticated);
        assert_eq!(band_for(0.85, &config), Band::Authenticated);
        assert_eq!(band_for(0.8499999, &config), Band::Challenge);
        assert_eq!(band_for(0.70, &config), Band::Challenge);
        assert_eq!(band_for(0.6999999, &config), Band::Denied);
        assert_eq!(band_for(0.0, &config), Band::Denied);
    }

    #[tokio::test]
    async fn exact_sample_scores_one_and_authenticates() {
        let auth = authenticator(Arc::new(HashEmbeddingExtractor::new(32)));
        auth.enroll("u1", &[b"my voice".to_vec()], Some("pixel-9"))
            .await
            .unwrap();

        let outcome = auth.verify("u1", b"my voice", "whatsapp:1").await.unwrap();
        match outcome {
            VerifyOutcome::Authenticated(session) => {
                assert_eq!(session.confidence, 1.0);
                assert_eq!(session.factors, vec![SessionFactor::Voice]);
                assert_eq!(session.principal, "u1");
            }
            other => panic!("expected Authenticated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn ambiguous_score_requires_challenge_and_deposits_grant() {
        // enrolled print [1,0]; live sample at cosine 0.75 via stub
        let extractor = StubExtractor::new(&[
            (b"enroll", vec![1.0, 0.0]),
            (b"live", vec![0.75, (1.0f64 - 0.75 * 0.75).sqrt()]),
        ]);
        let sessions = Arc::new(SessionStore::new(600));
        let auth = ConfidenceAuthenticator::new(
            Arc::new(extractor),
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            sessions.clone(),
            CoreConfig::default(),
        );
        auth.enroll("u1", &[b"enroll".to_vec()], None).await.unwrap();

        let outcome = auth.verify("u1", b"live", "chan").await.unwrap();
        match outcome {
            VerifyOutcome::ChallengeRequired { score } => {
                assert!((score - 0.75).abs() < 1e-9);
            }
            other => panic!("expected ChallengeRequired, got {:?}", other),
        }
        // the attempt entitles this principal (and no one else) to the
        // challenge path, carrying the voice score that earned it
        assert!(sessions.take_challenge_grant("u2").is_none());
        let granted = sessions.take_challenge_grant("u1").unwrap();
        assert!((granted - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn session_lifetime_and_dimension_follow_config() {
        let config = CoreConfig {
            session_ttl_secs: 120,
            embedding_dim: 16,
            ..Default::default()
        };
        let auth = ConfidenceAuthenticator::new(
            Arc::new(HashEmbeddingExtractor::from_config(&config)),
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            Arc::new(SessionStore::from_config(&config)),
            config,
        );
        auth.enroll("u1", &[b"my voice".to_vec()], None).await.unwrap();

        let outcome = auth.verify("u1", b"my voice", "chan").await.unwrap();
        let VerifyOutcome::Authenticated(session) = outcome else {
            panic!("exact sample must authenticate");
        };
        assert_eq!(session.expires_at - session.issued_at, 120);
    }

    #[tokio::test]
    async fn low_score_denied_without_session() {
        let extractor = StubExtractor::new(&[
            (b"enroll", vec![1.0, 0.0]),
            (b"stranger", vec![0.2, (1.0f64 - 0.04).sqrt()]),
        ]);
        let sessions = Arc::new(SessionStore::new(600));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let auth = ConfidenceAuthenticator::new(
            Arc::new(extractor),
            store,
            sessions.clone(),
            CoreConfig::default(),
        );
        auth.enroll("u1", &[b"enroll".to_vec()], None).await.unwrap();

        let outcome = auth.verify("u1", b"stranger", "chan").await.unwrap();
        assert!(matches!(outcome, VerifyOutcome::Denied { .. }));
        assert!(sessions.is_empty(), "denial must not leave partial credit");
    }

    #[tokio::test]
    async fn max_over_multiple_prints_wins() {
        let extractor = StubExtractor::new(&[
            (b"old", vec![0.0, 1.0]),
            (b"new", vec![1.0, 0.0]),
            (b"live", vec![1.0, 0.0]),
        ]);
        let auth = authenticator(Arc::new(extractor));
        auth.enroll("u1", &[b"old".to_vec()], None).await.unwrap();
        auth.enroll("u1", &[b"new".to_vec()], None).await.unwrap();
        assert_eq!(auth.enrollment_count("u1").unwrap(), 2);

        let outcome = auth.verify("u1", b"live", "chan").await.unwrap();
        assert!(matches!(outcome, VerifyOutcome::Authenticated(_)));
    }

    #[tokio::test]
    async fn unenrolled_principal_denied_with_reason() {
        let auth = authenticator(Arc::new(HashEmbeddingExtractor::new(32)));
        let outcome = auth.verify("ghost", b"hello", "chan").await.unwrap();
        match outcome {
            VerifyOutcome::Denied { score, reason } => {
                assert_eq!(score, 0.0);
                assert!(reason.contains("enrollment"));
            }
            other => panic!("expected Denied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_enrollment_rejected() {
        let auth = authenticator(Arc::new(HashEmbeddingExtractor::new(32)));
        assert!(matches!(
            auth.enroll("u1", &[], None).await,
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn delete_enrollment_then_denied() {
        let auth = authenticator(Arc::new(HashEmbeddingExtractor::new(32)));
        auth.enroll("u1", &[b"voice".to_vec()], None).await.unwrap();
        assert_eq!(auth.delete_enrollment("u1").unwrap(), 1);

        let outcome = auth.verify("u1", b"voice", "chan").await.unwrap();
        assert!(matches!(outcome, VerifyOutcome::Denied { .. }));
    }
}
