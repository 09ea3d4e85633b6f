//! Process-wide table of live authentication sessions.
//!
//! Expiry is evaluated at read time — an expired session is absent the
//! moment its deadline passes, regardless of when the background sweep
//! last ran. `prune_expired` exists purely to reclaim memory.

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::types::{now_secs, AuthSession, SessionFactor};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Permission to take the challenge path, deposited by an ambiguous
/// voice attempt and consumed when challenges are issued.
struct ChallengeGrant {
    score: f64,
    expires_at: u64,
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, AuthSession>>,
    grants: Mutex<HashMap<String, ChallengeGrant>>,
    ttl_secs: u64,
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            grants: Mutex::new(HashMap::new()),
            ttl_secs,
        }
    }

    /// The configured TTL is the single source of truth for session
    /// lifetime; composition goes through here so it cannot drift from
    /// the store's own idea of expiry.
    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.session_ttl_secs)
    }

    /// Issue a session with the configured TTL from now. The TTL is fixed
    /// at issuance; there is no refresh operation.
    pub fn issue(
        &self,
        principal: &str,
        channel: &str,
        confidence: f64,
        factors: Vec<SessionFactor>,
        category: Option<String>,
    ) -> AuthSession {
        let now = now_secs();
        let session = AuthSession {
            id: Uuid::new_v4().to_string(),
            principal: principal.to_string(),
            channel: channel.to_string(),
            issued_at: now,
            expires_at: now + self.ttl_secs,
            confidence,
            factors,
            category,
        };
        debug!(
            principal = %session.principal,
            session = %session.id,
            expires_at = session.expires_at,
            "session issued"
        );
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Insert a pre-built session. Hosts restoring state and tests pinning
    /// exact expiry timestamps use this instead of `issue`.
    pub fn insert(&self, session: AuthSession) {
        self.sessions.write().insert(session.id.clone(), session);
    }

    /// Look up a live session. Expired sessions are removed and reported
    /// as `SessionExpired`; unknown ids as `SessionNotFound`.
    pub fn get(&self, session_id: &str) -> Result<AuthSession, CoreError> {
        let now = now_secs();
        {
            let sessions = self.sessions.read();
            match sessions.get(session_id) {
                Some(session) if session.is_valid_at(now) => return Ok(session.clone()),
                Some(_) => {}
                None => return Err(CoreError::SessionNotFound),
            }
        }
        self.sessions.write().remove(session_id);
        Err(CoreError::SessionExpired)
    }

    /// Gate an operation on a live session: optional category binding and
    /// a required factor set. A session bound to a category only
    /// authorizes that category; an unbound session authorizes any.
    pub fn authorize(
        &self,
        session_id: &str,
        category: Option<&str>,
        required_factors: &[SessionFactor],
    ) -> Result<AuthSession, CoreError> {
        let session = self.get(session_id)?;
        if let (Some(bound), Some(requested)) = (session.category.as_deref(), category) {
            if bound != requested {
                return Err(CoreError::denied(format!(
                    "session bound to category '{}', requested '{}'",
                    bound, requested
                )));
            }
        }
        for factor in required_factors {
            if !session.has_factor(*factor) {
                return Err(CoreError::denied(format!(
                    "session lacks required factor '{}'",
                    factor.as_str()
                )));
            }
        }
        Ok(session)
    }

    /// Record that an ambiguous voice attempt entitles `principal` to one
    /// round of knowledge challenges. A newer attempt replaces the grant.
    pub fn grant_challenge(&self, principal: &str, score: f64, ttl_secs: u64) {
        self.grants.lock().insert(
            principal.to_string(),
            ChallengeGrant {
                score,
                expires_at: now_secs() + ttl_secs,
            },
        );
    }

    /// Consume the challenge grant for `principal`, returning the voice
    /// score that earned it. `None` means no unexpired ambiguous voice
    /// attempt is on file.
    pub fn take_challenge_grant(&self, principal: &str) -> Option<f64> {
        let mut grants = self.grants.lock();
        let now = now_secs();
        grants.retain(|_, g| g.expires_at > now);
        grants.remove(principal).map(|g| g.score)
    }

    /// Explicit logout. Returns whether a session was actually removed.
    pub fn logout(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    /// Memory-reclamation sweep. Correctness never depends on this
    /// running; `get` already treats expired sessions as absent.
    pub fn prune_expired(&self) -> usize {
        let now = now_secs();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.is_valid_at(now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "pruned expired sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_expiry(id: &str, expires_at: u64) -> AuthSession {
        AuthSession {
            id: id.into(),
            principal: "u1".into(),
            channel: "whatsapp:123".into(),
            issued_at: 0,
            expires_at,
            confidence: 0.9,
            factors: vec![SessionFactor::Voice],
            category: None,
        }
    }

    #[test]
    fn issue_and_get() {
        let store = SessionStore::new(600);
        let session = store.issue("u1", "chan", 0.91, vec![SessionFactor::Voice], None);
        assert_eq!(session.expires_at - session.issued_at, 600);

        let got = store.get(&session.id).unwrap();
        assert_eq!(got.principal, "u1");
        assert_eq!(got.factors, vec![SessionFactor::Voice]);
    }

    #[test]
    fn usable_just_before_expiry_unusable_after() {
        let store = SessionStore::new(600);
        let now = now_secs();

        store.insert(session_with_expiry("live", now + 60));
        assert!(store.get("live").is_ok());

        store.insert(session_with_expiry("dead", now.saturating_sub(1)));
        assert!(matches!(store.get("dead"), Err(CoreError::SessionExpired)));
        // expired session is gone, not flagged
        assert!(matches!(
            store.get("dead"),
            Err(CoreError::SessionNotFound)
        ));
    }

    #[test]
    fn ttl_comes_from_config() {
        let config = CoreConfig {
            session_ttl_secs: 1,
            ..Default::default()
        };
        let store = SessionStore::from_config(&config);
        let session = store.issue("u1", "chan", 0.9, vec![SessionFactor::Voice], None);
        assert_eq!(session.expires_at - session.issued_at, 1);
    }

    #[test]
    fn challenge_grant_is_consumed_once() {
        let store = SessionStore::new(600);
        assert!(store.take_challenge_grant("u1").is_none());

        store.grant_challenge("u1", 0.78, 300);
        assert_eq!(store.take_challenge_grant("u1"), Some(0.78));
        assert!(store.take_challenge_grant("u1").is_none());
    }

    #[test]
    fn expired_challenge_grant_is_gone() {
        let store = SessionStore::new(600);
        store.grant_challenge("u1", 0.78, 0);
        assert!(store.take_challenge_grant("u1").is_none());
    }

    #[test]
    fn unknown_session() {
        let store = SessionStore::new(600);
        assert!(matches!(
            store.get("nope"),
            Err(CoreError::SessionNotFound)
        ));
    }

    #[test]
    fn logout_removes() {
        let store = SessionStore::new(600);
        let session = store.issue("u1", "chan", 0.9, vec![SessionFactor::Voice], None);
        assert!(store.logout(&session.id));
        assert!(!store.logout(&session.id));
        assert!(store.get(&session.id).is_err());
    }

    #[test]
    fn prune_reclaims_only_expired() {
        let store = SessionStore::new(600);
        let now = now_secs();
        store.insert(session_with_expiry("a", now.saturating_sub(10)));
        store.insert(session_with_expiry("b", now + 100));
        assert_eq!(store.prune_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn category_binding() {
        let store = SessionStore::new(600);
        let bound = store.issue(
            "u1",
            "chan",
            0.9,
            vec![SessionFactor::Voice],
            Some("family".into()),
        );
        assert!(store.authorize(&bound.id, Some("family"), &[]).is_ok());
        assert!(store.authorize(&bound.id, Some("finance"), &[]).is_err());
        // unscoped request against a bound session is fine
        assert!(store.authorize(&bound.id, None, &[]).is_ok());

        let unbound = store.issue("u1", "chan", 0.9, vec![SessionFactor::Voice], None);
        assert!(store.authorize(&unbound.id, Some("finance"), &[]).is_ok());
    }

    #[test]
    fn factor_requirements() {
        let store = SessionStore::new(600);
        let voice_only = store.issue("u1", "chan", 0.9, vec![SessionFactor::Voice], None);
        assert!(store
            .authorize(&voice_only.id, None, &[SessionFactor::Voice])
            .is_ok());
        let err = store
            .authorize(
                &voice_only.id,
                None,
                &[SessionFactor::Voice, SessionFactor::Challenge],
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::AuthorizationDenied { .. }));
    }
}
