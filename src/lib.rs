//! Tiered access-control core for the Confidant companion agent.
//!
//! Gates category-scoped memory retrieval behind a voice-confidence
//! authentication state machine, stores secrets under a strict tier
//! ordering with per-record authorization and a mandatory audit trail,
//! and cross-references independently encrypted disclosure records to
//! detect mutual romantic intent.
//!
//! This crate is a library-level component: the surrounding transport
//! (bot webhook, HTTP adapter) supplies audio samples, contact profiles,
//! and memory snapshots, and consumes sessions, plaintext, and match
//! events. Embedding extraction and intent classification are injected
//! capabilities — the deterministic stand-ins here define the contract,
//! not the model.

pub mod authenticator;
pub mod challenge;
pub mod config;
pub mod crypto;
pub mod disclosure;
pub mod embedding;
pub mod error;
pub mod session;
pub mod store;
pub mod types;
pub mod vault;

pub use authenticator::{ConfidenceAuthenticator, VerifyOutcome};
pub use challenge::{
    Challenge, ChallengeIssuer, ChallengeKind, ChallengeResponse, MemoryRecord, RecordProvider,
};
pub use config::CoreConfig;
pub use crypto::SealedBox;
pub use disclosure::{DisclosureService, IntentClassifier, KeywordIntentClassifier};
pub use embedding::{cosine_similarity, EmbeddingExtractor, HashEmbeddingExtractor};
pub use error::CoreError;
pub use session::SessionStore;
pub use store::{DisclosureStore, SecretStore, SqliteStore, VoiceprintStore};
pub use types::{
    AccessLogEntry, AuthSession, ContactAuthorizationProfile, DisclosureRecord,
    KnowledgeAccessLevel, MatchEvent, RelationshipType, SecretRecord, SecretTier, SessionFactor,
    Voiceprint,
};
pub use vault::{AccessBasis, SecretVault};
