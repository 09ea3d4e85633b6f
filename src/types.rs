//! Core data model for the access-control subsystem.
//!
//! Principals and channels are referenced by opaque string ids assigned by
//! the surrounding platform (bot user ids, chat ids). Everything here is
//! plain data; behavior lives in the service modules.

use crate::crypto::SealedBox;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tiers and profiles ───────────────────────────────────────────

/// Secrecy tier of a stored secret. Strictly ordered by sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretTier {
    Secret,
    Confidential,
    UltraSecret,
}

impl SecretTier {
    /// Minimum knowledge-access level a contact profile must carry for
    /// tier-derived (non-explicit) access to a record of this tier.
    pub fn required_access(&self) -> KnowledgeAccessLevel {
        match self {
            SecretTier::Secret => KnowledgeAccessLevel::Personal,
            SecretTier::Confidential => KnowledgeAccessLevel::Secret,
            SecretTier::UltraSecret => KnowledgeAccessLevel::Secret,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SecretTier::Secret => "secret",
            SecretTier::Confidential => "confidential",
            SecretTier::UltraSecret => "ultra_secret",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "secret" => Some(SecretTier::Secret),
            "confidential" => Some(SecretTier::Confidential),
            "ultra_secret" => Some(SecretTier::UltraSecret),
            _ => None,
        }
    }
}

impl std::fmt::Display for SecretTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse knowledge-access level granted to a counterparty. Strictly
/// ordered; used for tier-derived default access via `>=` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeAccessLevel {
    General,
    Personal,
    Secret,
    UltraSecret,
}

impl KnowledgeAccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeAccessLevel::General => "general",
            KnowledgeAccessLevel::Personal => "personal",
            KnowledgeAccessLevel::Secret => "secret",
            KnowledgeAccessLevel::UltraSecret => "ultra_secret",
        }
    }
}

/// Relationship category of a counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Family,
    Friend,
    Romantic,
    Professional,
    Other,
}

/// Per-counterparty authorization snapshot, consumed from the external
/// contact-management collaborator. Drives default (non-explicit) access
/// to secret records via tier comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactAuthorizationProfile {
    /// Principal id of the counterparty this profile describes.
    pub principal: String,
    pub relationship: RelationshipType,
    pub knowledge_access: KnowledgeAccessLevel,
}

// ── Voiceprints and sessions ─────────────────────────────────────

/// An enrolled voiceprint. Immutable once created; a principal may hold
/// several (one per enrollment call). The embedding is sealed at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voiceprint {
    pub id: String,
    pub owner: String,
    /// Encrypted embedding (serialized `Vec<f64>`).
    pub sealed_embedding: SealedBox,
    /// Version tag of the embedding model that produced this print.
    pub model_version: String,
    /// Free-form hint about the enrollment device, if known.
    pub device_hint: Option<String>,
    /// Self-consistency of the enrollment samples (0.0–1.0).
    pub enrollment_confidence: f64,
    pub created_at: u64,
}

/// Proof mechanism that contributed to an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFactor {
    Voice,
    Challenge,
}

impl SessionFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionFactor::Voice => "voice",
            SessionFactor::Challenge => "challenge",
        }
    }
}

/// A live authentication session. Valid iff `now < expires_at`; expired
/// sessions are treated as absent by every lookup, not merely flagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub id: String,
    pub principal: String,
    /// Channel the verification arrived on.
    pub channel: String,
    pub issued_at: u64,
    pub expires_at: u64,
    /// Best similarity score (or challenge confidence) behind this session.
    pub confidence: f64,
    /// Ordered set of factors satisfied, in the order they were proven.
    pub factors: Vec<SessionFactor>,
    /// Memory category the session was opened for, if scoped.
    pub category: Option<String>,
}

impl AuthSession {
    pub fn is_valid_at(&self, now: u64) -> bool {
        now < self.expires_at
    }

    pub fn has_factor(&self, factor: SessionFactor) -> bool {
        self.factors.contains(&factor)
    }
}

// ── Secret records ───────────────────────────────────────────────

/// One entry in a record's append-only access log. Every access attempt,
/// allowed or denied, produces exactly one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub principal: String,
    pub timestamp: u64,
    pub success: bool,
    /// Audit-side detail. Never returned to the requester verbatim.
    pub reason: String,
}

/// A tiered secret. Content is sealed at rest; the access log lives in
/// its own append-only table keyed by record id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub id: String,
    pub title: String,
    pub tier: SecretTier,
    pub owner: String,
    pub sealed: SealedBox,
    /// Explicitly authorized principal ids, checked before tier policy.
    pub authorized: Vec<String>,
    pub access_count: u64,
    pub last_access: Option<u64>,
    pub created_at: u64,
}

// ── Disclosure records ───────────────────────────────────────────

/// A restricted single-reader secret with an optional romantic target.
///
/// The visible-reader set is exactly
/// `{owner} ∪ {designated_reader} ∪ ({target} iff matched)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureRecord {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub sealed: SealedBox,
    /// Whether the external classifier flagged the content as romantic.
    pub is_romantic: bool,
    /// Principal id of the romantic target, if one was named.
    pub target: Option<String>,
    /// Display name of the target as the owner gave it.
    pub target_name: Option<String>,
    /// At most one designated reader; reassignment replaces.
    pub designated_reader: Option<String>,
    pub matched: bool,
    pub matched_at: Option<u64>,
    pub created_at: u64,
}

impl DisclosureRecord {
    /// Whether `principal` is currently allowed to read this record.
    pub fn can_read(&self, principal: &str) -> bool {
        if principal == self.owner {
            return true;
        }
        if self.designated_reader.as_deref() == Some(principal) {
            return true;
        }
        self.matched && self.target.as_deref() == Some(principal)
    }
}

/// Fired exactly once per principal pair when two disclosure records
/// mutually name each other. Consumed by the external notification
/// dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub principal_a: String,
    pub principal_b: String,
    pub record_a: String,
    pub record_b: String,
    pub matched_at: u64,
}
