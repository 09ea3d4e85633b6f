//! Designated-disclosure records and the mutual-disclosure matcher.
//!
//! A disclosure is a single-reader secret with an optional romantic
//! target. Whenever a romantic, targeted disclosure is created the
//! matcher scans the target's records for a reciprocal one; if found,
//! both records flip to matched inside one store transaction, guarded by
//! a lock keyed on the unordered principal pair so near-simultaneous
//! creations from both sides cannot interleave or deadlock.

use crate::crypto;
use crate::error::CoreError;
use crate::store::DisclosureStore;
use crate::types::{now_secs, DisclosureRecord, MatchEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};
use uuid::Uuid;

/// External romantic-intent classifier. The core treats it as an oracle;
/// production wires an LLM call behind this trait.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn is_romantic(&self, content: &str) -> Result<bool, CoreError>;
}

/// Keyword stand-in classifier, for hosts without a model wired up and
/// for tests.
pub struct KeywordIntentClassifier;

const ROMANTIC_KEYWORDS: &[&str] = &[
    "love", "crush", "in love", "feelings for", "romantic", "heart beats",
];

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn is_romantic(&self, content: &str) -> Result<bool, CoreError> {
        let lower = content.to_lowercase();
        Ok(ROMANTIC_KEYWORDS.iter().any(|kw| lower.contains(kw)))
    }
}

pub struct DisclosureService {
    store: Arc<dyn DisclosureStore>,
    classifier: Arc<dyn IntentClassifier>,
    /// One lock per unordered principal pair. Entries are tiny and the
    /// pair space is bounded by actual couples, so they are never reaped.
    pair_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
    events: Option<UnboundedSender<MatchEvent>>,
}

impl DisclosureService {
    pub fn new(store: Arc<dyn DisclosureStore>, classifier: Arc<dyn IntentClassifier>) -> Self {
        Self {
            store,
            classifier,
            pair_locks: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Wire the match-event stream to the host's notification dispatcher.
    pub fn with_events(mut self, sender: UnboundedSender<MatchEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Create a disclosure. Content is classified for romantic intent
    /// before persistence; a romantic disclosure naming a target triggers
    /// the reciprocal scan. Returns the stored record and, when this
    /// creation completed a pair, the single match event for that pair.
    pub async fn create(
        &self,
        owner: &str,
        title: &str,
        content: &str,
        target: Option<&str>,
        target_name: Option<&str>,
    ) -> Result<(DisclosureRecord, Option<MatchEvent>), CoreError> {
        if target == Some(owner) {
            return Err(CoreError::InvalidInput(
                "a disclosure cannot target its own owner".into(),
            ));
        }
        let is_romantic = self.classifier.is_romantic(content).await?;
        let mut record = DisclosureRecord {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            owner: owner.to_string(),
            sealed: crypto::seal(content.as_bytes())?,
            is_romantic,
            target: target.map(String::from),
            target_name: target_name.map(String::from),
            designated_reader: None,
            matched: false,
            matched_at: None,
            created_at: now_secs(),
        };

        let Some(target_id) = record.target.clone().filter(|_| is_romantic) else {
            self.store.insert(&record)?;
            return Ok((record, None));
        };

        // Serialize insert + scan + flip per principal pair. The key is
        // unordered, so both sides of a pair contend on the same lock
        // regardless of who creates first.
        let lock = self.pair_lock(owner, &target_id);
        let _guard = lock.lock();

        self.store.insert(&record)?;
        let Some(reciprocal) = self.store.find_reciprocal(&target_id, owner)? else {
            info!(owner = %owner, target = %target_id, "romantic disclosure stored, no reciprocal yet");
            return Ok((record, None));
        };

        let matched_at = now_secs();
        if !self.store.mark_matched(&record.id, &reciprocal.id, matched_at)? {
            // raced with another creation that completed the pair first
            warn!(owner = %owner, target = %target_id, "reciprocal already matched");
            return Ok((record, None));
        }
        record.matched = true;
        record.matched_at = Some(matched_at);

        let event = MatchEvent {
            principal_a: owner.to_string(),
            principal_b: target_id.clone(),
            record_a: record.id.clone(),
            record_b: reciprocal.id.clone(),
            matched_at,
        };
        info!(
            a = %event.principal_a,
            b = %event.principal_b,
            "mutual disclosure matched"
        );
        if let Some(sender) = &self.events {
            // host hung up on the stream; the match itself still stands
            let _ = sender.send(event.clone());
        }
        Ok((record, Some(event)))
    }

    /// Replace the designated reader. Owner-only; at most one reader at a
    /// time, and setting the same reader twice is a no-op.
    pub fn set_designated_reader(
        &self,
        record_id: &str,
        owner: &str,
        reader: &str,
    ) -> Result<DisclosureRecord, CoreError> {
        let Some(record) = self.store.get(record_id)? else {
            return Err(CoreError::RecordNotFound);
        };
        if record.owner != owner {
            // non-owners can't learn the record exists
            return Err(CoreError::RecordNotFound);
        }
        if reader == owner {
            return Err(CoreError::InvalidInput(
                "owner is always a reader; pick someone else".into(),
            ));
        }
        self.store.set_designated_reader(record_id, reader)?;
        info!(record = %record_id, reader = %reader, "designated reader set");
        self.store
            .get(record_id)?
            .ok_or(CoreError::RecordNotFound)
    }

    /// Decrypt a disclosure for a permitted reader: the owner, the
    /// designated reader, or — once matched — the target. Everyone else
    /// gets the uniform denial.
    pub async fn read(&self, record_id: &str, requester: &str) -> Result<String, CoreError> {
        let Some(record) = self.store.get(record_id)? else {
            return Err(CoreError::RecordNotFound);
        };
        if !record.can_read(requester) {
            warn!(record = %record_id, requester = %requester, "disclosure read denied");
            return Err(CoreError::denied("not in the reader set"));
        }
        crypto::open_utf8(&record.sealed)
    }

    fn pair_lock(&self, a: &str, b: &str) -> Arc<Mutex<()>> {
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        self.pair_locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
