//! Tiered secret storage with per-record authorization and a mandatory
//! audit trail.
//!
//! The authorization decision is ordered, first match wins: owner, then
//! the record's explicit list, then the requester's contact profile tier
//! against the record tier's minimum. Every attempt — allowed or denied —
//! appends one audit row before anything is returned; the audit trail is
//! itself a security property.

use crate::crypto;
use crate::error::CoreError;
use crate::store::SecretStore;
use crate::types::{
    now_secs, AccessLogEntry, ContactAuthorizationProfile, SecretRecord, SecretTier,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Which rule allowed an access. Recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessBasis {
    Owner,
    ExplicitAuthorization,
    TierPolicy,
}

impl AccessBasis {
    fn as_str(&self) -> &'static str {
        match self {
            AccessBasis::Owner => "owner",
            AccessBasis::ExplicitAuthorization => "explicit_authorization",
            AccessBasis::TierPolicy => "tier_policy",
        }
    }
}

pub struct SecretVault {
    store: Arc<dyn SecretStore>,
}

impl SecretVault {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Encrypt and persist a new secret. Key material rides with the
    /// record; plaintext never touches the store. Changing a record's
    /// tier later is not supported — create a new record instead.
    pub async fn put(
        &self,
        owner: &str,
        title: &str,
        tier: SecretTier,
        content: &str,
        authorized: &[String],
    ) -> Result<SecretRecord, CoreError> {
        let record = SecretRecord {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            tier,
            owner: owner.to_string(),
            sealed: crypto::seal(content.as_bytes())?,
            authorized: authorized.to_vec(),
            access_count: 0,
            last_access: None,
            created_at: now_secs(),
        };
        self.store.insert(&record)?;
        info!(
            owner = %owner,
            record = %record.id,
            tier = %tier,
            "secret stored"
        );
        Ok(record)
    }

    /// Authorize, audit, then (and only then) decrypt.
    ///
    /// To anyone who is not the owner and not authorized, a missing record
    /// and a denied record look identical — same error display, no
    /// existence leak.
    pub async fn get(
        &self,
        record_id: &str,
        requester: &str,
        profile: Option<&ContactAuthorizationProfile>,
    ) -> Result<String, CoreError> {
        let Some(record) = self.store.get(record_id)? else {
            warn!(requester = %requester, record = %record_id, "access to unknown record");
            return Err(CoreError::RecordNotFound);
        };

        let decision = authorize(&record, requester, profile);
        let entry = AccessLogEntry {
            principal: requester.to_string(),
            timestamp: now_secs(),
            success: decision.is_ok(),
            reason: match &decision {
                Ok(basis) => basis.as_str().to_string(),
                Err(detail) => detail.clone(),
            },
        };
        // audit row lands before any plaintext or denial leaves the vault
        self.store.record_access(&record.id, &entry)?;

        match decision {
            Ok(basis) => {
                let plaintext = crypto::open_utf8(&record.sealed).map_err(|e| {
                    // corrupt ciphertext is an integrity fault; never
                    // downgrade it to a quiet denial
                    error!(record = %record.id, error = %e, "secret failed to decrypt");
                    e
                })?;
                info!(
                    requester = %requester,
                    record = %record.id,
                    basis = basis.as_str(),
                    "secret access granted"
                );
                Ok(plaintext)
            }
            Err(detail) => {
                warn!(
                    requester = %requester,
                    record = %record.id,
                    detail = %detail,
                    "secret access denied"
                );
                Err(CoreError::denied(detail))
            }
        }
    }

    /// The append-only audit log, readable by the record owner only.
    /// Everyone else gets the uniform denial.
    pub async fn access_log(
        &self,
        record_id: &str,
        requester: &str,
    ) -> Result<Vec<AccessLogEntry>, CoreError> {
        let Some(record) = self.store.get(record_id)? else {
            return Err(CoreError::RecordNotFound);
        };
        if record.owner != requester {
            return Err(CoreError::denied("audit log is owner-only"));
        }
        self.store.access_log(record_id)
    }
}

/// Ordered authorization check. Returns the basis on allow, or the
/// audit-side denial detail.
fn authorize(
    record: &SecretRecord,
    requester: &str,
    profile: Option<&ContactAuthorizationProfile>,
) -> Result<AccessBasis, String> {
    if requester == record.owner {
        return Ok(AccessBasis::Owner);
    }
    if record.authorized.iter().any(|p| p == requester) {
        return Ok(AccessBasis::ExplicitAuthorization);
    }
    let required = record.tier.required_access();
    match profile {
        Some(p) if p.knowledge_access >= required => Ok(AccessBasis::TierPolicy),
        Some(p) => Err(format!(
            "profile level '{}' below required '{}' for tier '{}'",
            p.knowledge_access.as_str(),
            required.as_str(),
            record.tier
        )),
        None => Err("no explicit authorization and no contact profile".to_string()),
    }
}
