//! Repository traits and the SQLite-backed implementation.
//!
//! Services take the traits so lifecycle and concurrency guarantees are
//! explicit instead of hiding in module-level maps, and so the two-record
//! match transition can ride a real transaction boundary. The SQLite
//! connection sits behind a sync `parking_lot::Mutex`; no guard is ever
//! held across an `.await` point.

use crate::error::CoreError;
use crate::types::{AccessLogEntry, DisclosureRecord, SecretRecord, SecretTier, Voiceprint};
use crate::crypto::SealedBox;
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Arc;

// ── Traits ───────────────────────────────────────────────────────

pub trait VoiceprintStore: Send + Sync {
    fn add(&self, print: &Voiceprint) -> Result<(), CoreError>;
    fn list_for(&self, principal: &str) -> Result<Vec<Voiceprint>, CoreError>;
    /// Remove all prints for a principal (explicit account deletion — the
    /// only deletion path the data model allows). Returns rows removed.
    fn delete_for(&self, principal: &str) -> Result<usize, CoreError>;
}

pub trait SecretStore: Send + Sync {
    fn insert(&self, record: &SecretRecord) -> Result<(), CoreError>;
    fn get(&self, id: &str) -> Result<Option<SecretRecord>, CoreError>;
    /// Append one audit row. On success the record's access counter and
    /// last-access timestamp are bumped in the same statement batch.
    fn record_access(&self, id: &str, entry: &AccessLogEntry) -> Result<(), CoreError>;
    /// Audit rows for a record in strict append order.
    fn access_log(&self, id: &str) -> Result<Vec<AccessLogEntry>, CoreError>;
}

pub trait DisclosureStore: Send + Sync {
    fn insert(&self, record: &DisclosureRecord) -> Result<(), CoreError>;
    fn get(&self, id: &str) -> Result<Option<DisclosureRecord>, CoreError>;
    /// Replace (never accumulate) the designated reader.
    fn set_designated_reader(&self, id: &str, reader: &str) -> Result<(), CoreError>;
    /// Most recent unmatched romantic record owned by `owner` that names
    /// `target`.
    fn find_reciprocal(
        &self,
        owner: &str,
        target: &str,
    ) -> Result<Option<DisclosureRecord>, CoreError>;
    /// Flip both records to matched in one transaction. Returns false —
    /// and changes nothing — if either side is missing or already matched.
    fn mark_matched(&self, id_a: &str, id_b: &str, at: u64) -> Result<bool, CoreError>;
}

// ── SQLite implementation ────────────────────────────────────────

/// All three durable tables (`voiceprints`, `secret_records` with its
/// append-only `access_log`, `disclosure_records`) in one SQLite file.
/// Sessions are ephemeral and live in [`crate::session::SessionStore`].
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<Self, CoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS voiceprints (
                id                    TEXT PRIMARY KEY,
                owner                 TEXT NOT NULL,
                key_hex               TEXT NOT NULL,
                nonce_hex             TEXT NOT NULL,
                embedding_hex         TEXT NOT NULL,
                model_version         TEXT NOT NULL,
                device_hint           TEXT,
                enrollment_confidence REAL NOT NULL,
                created_at            INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_voiceprints_owner
                ON voiceprints(owner);

            CREATE TABLE IF NOT EXISTS secret_records (
                id              TEXT PRIMARY KEY,
                title           TEXT NOT NULL,
                tier            TEXT NOT NULL,
                owner           TEXT NOT NULL,
                key_hex         TEXT NOT NULL,
                nonce_hex       TEXT NOT NULL,
                ciphertext_hex  TEXT NOT NULL,
                authorized_json TEXT NOT NULL,
                access_count    INTEGER NOT NULL DEFAULT 0,
                last_access     INTEGER,
                created_at      INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_secret_records_owner
                ON secret_records(owner);

            CREATE TABLE IF NOT EXISTS access_log (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id TEXT NOT NULL,
                principal TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                success   INTEGER NOT NULL,
                reason    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_access_log_record
                ON access_log(record_id, id);

            CREATE TABLE IF NOT EXISTS disclosure_records (
                id                TEXT PRIMARY KEY,
                title             TEXT NOT NULL,
                owner             TEXT NOT NULL,
                key_hex           TEXT NOT NULL,
                nonce_hex         TEXT NOT NULL,
                ciphertext_hex    TEXT NOT NULL,
                is_romantic       INTEGER NOT NULL,
                target            TEXT,
                target_name       TEXT,
                designated_reader TEXT,
                matched           INTEGER NOT NULL DEFAULT 0,
                matched_at        INTEGER,
                created_at        INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_disclosure_owner
                ON disclosure_records(owner);
            CREATE INDEX IF NOT EXISTS idx_disclosure_target
                ON disclosure_records(target) WHERE target IS NOT NULL;",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn bad_column(reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, reason.into())
}

fn voiceprint_from_row(row: &Row<'_>) -> rusqlite::Result<Voiceprint> {
    Ok(Voiceprint {
        id: row.get(0)?,
        owner: row.get(1)?,
        sealed_embedding: SealedBox {
            key: row.get(2)?,
            nonce: row.get(3)?,
            ciphertext: row.get(4)?,
        },
        model_version: row.get(5)?,
        device_hint: row.get(6)?,
        enrollment_confidence: row.get(7)?,
        created_at: row.get::<_, i64>(8)? as u64,
    })
}

fn secret_from_row(row: &Row<'_>) -> rusqlite::Result<SecretRecord> {
    let tier_str: String = row.get(2)?;
    let tier = SecretTier::from_str(&tier_str)
        .ok_or_else(|| bad_column(format!("unknown tier: {}", tier_str)))?;
    let authorized_json: String = row.get(7)?;
    let authorized: Vec<String> = serde_json::from_str(&authorized_json)
        .map_err(|e| bad_column(format!("bad authorized_json: {}", e)))?;
    Ok(SecretRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        tier,
        owner: row.get(3)?,
        sealed: SealedBox {
            key: row.get(4)?,
            nonce: row.get(5)?,
            ciphertext: row.get(6)?,
        },
        authorized,
        access_count: row.get::<_, i64>(8)? as u64,
        last_access: row.get::<_, Option<i64>>(9)?.map(|t| t as u64),
        created_at: row.get::<_, i64>(10)? as u64,
    })
}

fn disclosure_from_row(row: &Row<'_>) -> rusqlite::Result<DisclosureRecord> {
    Ok(DisclosureRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        owner: row.get(2)?,
        sealed: SealedBox {
            key: row.get(3)?,
            nonce: row.get(4)?,
            ciphertext: row.get(5)?,
        },
        is_romantic: row.get::<_, i32>(6)? != 0,
        target: row.get(7)?,
        target_name: row.get(8)?,
        designated_reader: row.get(9)?,
        matched: row.get::<_, i32>(10)? != 0,
        matched_at: row.get::<_, Option<i64>>(11)?.map(|t| t as u64),
        created_at: row.get::<_, i64>(12)? as u64,
    })
}

impl VoiceprintStore for SqliteStore {
    fn add(&self, print: &Voiceprint) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO voiceprints (
                id, owner, key_hex, nonce_hex, embedding_hex,
                model_version, device_hint, enrollment_confidence, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                print.id,
                print.owner,
                print.sealed_embedding.key,
                print.sealed_embedding.nonce,
                print.sealed_embedding.ciphertext,
                print.model_version,
                print.device_hint,
                print.enrollment_confidence,
                print.created_at as i64,
            ],
        )?;
        Ok(())
    }

    fn list_for(&self, principal: &str) -> Result<Vec<Voiceprint>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, owner, key_hex, nonce_hex, embedding_hex,
                    model_version, device_hint, enrollment_confidence, created_at
             FROM voiceprints WHERE owner = ?1 ORDER BY created_at ASC",
        )?;
        let prints = stmt
            .query_map(params![principal], voiceprint_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(prints)
    }

    fn delete_for(&self, principal: &str) -> Result<usize, CoreError> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM voiceprints WHERE owner = ?1",
            params![principal],
        )?;
        Ok(removed)
    }
}

impl SecretStore for SqliteStore {
    fn insert(&self, record: &SecretRecord) -> Result<(), CoreError> {
        let authorized_json = serde_json::to_string(&record.authorized)
            .map_err(|e| CoreError::InvalidInput(format!("authorized list: {}", e)))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO secret_records (
                id, title, tier, owner, key_hex, nonce_hex, ciphertext_hex,
                authorized_json, access_count, last_access, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.title,
                record.tier.as_str(),
                record.owner,
                record.sealed.key,
                record.sealed.nonce,
                record.sealed.ciphertext,
                authorized_json,
                record.access_count as i64,
                record.last_access.map(|t| t as i64),
                record.created_at as i64,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<SecretRecord>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, tier, owner, key_hex, nonce_hex, ciphertext_hex,
                    authorized_json, access_count, last_access, created_at
             FROM secret_records WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], secret_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn record_access(&self, id: &str, entry: &AccessLogEntry) -> Result<(), CoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO access_log (record_id, principal, timestamp, success, reason)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                entry.principal,
                entry.timestamp as i64,
                entry.success as i32,
                entry.reason,
            ],
        )?;
        if entry.success {
            tx.execute(
                "UPDATE secret_records
                 SET access_count = access_count + 1, last_access = ?1
                 WHERE id = ?2",
                params![entry.timestamp as i64, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn access_log(&self, id: &str) -> Result<Vec<AccessLogEntry>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT principal, timestamp, success, reason
             FROM access_log WHERE record_id = ?1 ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![id], |row| {
                Ok(AccessLogEntry {
                    principal: row.get(0)?,
                    timestamp: row.get::<_, i64>(1)? as u64,
                    success: row.get::<_, i32>(2)? != 0,
                    reason: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

const DISCLOSURE_COLUMNS: &str = "id, title, owner, key_hex, nonce_hex, ciphertext_hex,
    is_romantic, target, target_name, designated_reader, matched, matched_at, created_at";

impl DisclosureStore for SqliteStore {
    fn insert(&self, record: &DisclosureRecord) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO disclosure_records (
                id, title, owner, key_hex, nonce_hex, ciphertext_hex,
                is_romantic, target, target_name, designated_reader,
                matched, matched_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.id,
                record.title,
                record.owner,
                record.sealed.key,
                record.sealed.nonce,
                record.sealed.ciphertext,
                record.is_romantic as i32,
                record.target,
                record.target_name,
                record.designated_reader,
                record.matched as i32,
                record.matched_at.map(|t| t as i64),
                record.created_at as i64,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<DisclosureRecord>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM disclosure_records WHERE id = ?1",
            DISCLOSURE_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id], disclosure_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn set_designated_reader(&self, id: &str, reader: &str) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE disclosure_records SET designated_reader = ?1 WHERE id = ?2",
            params![reader, id],
        )?;
        if updated == 0 {
            return Err(CoreError::RecordNotFound);
        }
        Ok(())
    }

    fn find_reciprocal(
        &self,
        owner: &str,
        target: &str,
    ) -> Result<Option<DisclosureRecord>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM disclosure_records
             WHERE owner = ?1 AND target = ?2 AND is_romantic = 1 AND matched = 0
             ORDER BY created_at DESC LIMIT 1",
            DISCLOSURE_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![owner, target], disclosure_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn mark_matched(&self, id_a: &str, id_b: &str, at: u64) -> Result<bool, CoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let first = tx.execute(
            "UPDATE disclosure_records SET matched = 1, matched_at = ?1
             WHERE id = ?2 AND matched = 0",
            params![at as i64, id_a],
        )?;
        let second = tx.execute(
            "UPDATE disclosure_records SET matched = 1, matched_at = ?1
             WHERE id = ?2 AND matched = 0",
            params![at as i64, id_b],
        )?;
        if first == 1 && second == 1 {
            tx.commit()?;
            Ok(true)
        } else {
            // dropping the transaction rolls back the partial update
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::seal;
    use crate::types::now_secs;

    fn secret(id: &str, owner: &str, tier: SecretTier) -> SecretRecord {
        SecretRecord {
            id: id.into(),
            title: format!("secret {}", id),
            tier,
            owner: owner.into(),
            sealed: seal(b"content").unwrap(),
            authorized: vec![],
            access_count: 0,
            last_access: None,
            created_at: now_secs(),
        }
    }

    fn disclosure(id: &str, owner: &str, target: Option<&str>) -> DisclosureRecord {
        DisclosureRecord {
            id: id.into(),
            title: format!("disclosure {}", id),
            owner: owner.into(),
            sealed: seal(b"feelings").unwrap(),
            is_romantic: target.is_some(),
            target: target.map(String::from),
            target_name: None,
            designated_reader: None,
            matched: false,
            matched_at: None,
            created_at: now_secs(),
        }
    }

    #[test]
    fn secret_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rec = secret("s1", "alice", SecretTier::Confidential);
        SecretStore::insert(&store, &rec).unwrap();
        let got = SecretStore::get(&store, "s1").unwrap().unwrap();
        assert_eq!(got.tier, SecretTier::Confidential);
        assert_eq!(got.sealed, rec.sealed);
        assert!(SecretStore::get(&store, "nope").unwrap().is_none());
    }

    #[test]
    fn access_log_is_append_ordered_and_counts_successes() {
        let store = SqliteStore::open_in_memory().unwrap();
        SecretStore::insert(&store, &secret("s1", "alice", SecretTier::Secret)).unwrap();

        for (i, success) in [(0u64, true), (1, false), (2, true)] {
            store
                .record_access(
                    "s1",
                    &AccessLogEntry {
                        principal: "bob".into(),
                        timestamp: 1000 + i,
                        success,
                        reason: format!("attempt {}", i),
                    },
                )
                .unwrap();
        }

        let log = store.access_log("s1").unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].reason, "attempt 0");
        assert_eq!(log[2].reason, "attempt 2");
        assert!(!log[1].success);

        let rec = SecretStore::get(&store, "s1").unwrap().unwrap();
        assert_eq!(rec.access_count, 2, "denied attempts don't count");
        assert_eq!(rec.last_access, Some(1002));
    }

    #[test]
    fn voiceprints_per_owner() {
        let store = SqliteStore::open_in_memory().unwrap();
        for id in ["v1", "v2"] {
            store
                .add(&Voiceprint {
                    id: id.into(),
                    owner: "alice".into(),
                    sealed_embedding: seal(b"[0.0]").unwrap(),
                    model_version: "hash-v1".into(),
                    device_hint: None,
                    enrollment_confidence: 1.0,
                    created_at: now_secs(),
                })
                .unwrap();
        }
        assert_eq!(store.list_for("alice").unwrap().len(), 2);
        assert!(store.list_for("bob").unwrap().is_empty());
        assert_eq!(store.delete_for("alice").unwrap(), 2);
        assert!(store.list_for("alice").unwrap().is_empty());
    }

    #[test]
    fn reciprocal_lookup_filters_matched_and_platonic() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut d1 = disclosure("d1", "alice", Some("bob"));
        d1.matched = true;
        d1.matched_at = Some(now_secs());
        DisclosureStore::insert(&store, &d1).unwrap();

        let mut d2 = disclosure("d2", "alice", Some("bob"));
        d2.is_romantic = false;
        DisclosureStore::insert(&store, &d2).unwrap();

        assert!(store.find_reciprocal("alice", "bob").unwrap().is_none());

        DisclosureStore::insert(&store, &disclosure("d3", "alice", Some("bob"))).unwrap();
        let found = store.find_reciprocal("alice", "bob").unwrap().unwrap();
        assert_eq!(found.id, "d3");
    }

    #[test]
    fn mark_matched_is_all_or_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        DisclosureStore::insert(&store, &disclosure("a", "alice", Some("bob"))).unwrap();
        DisclosureStore::insert(&store, &disclosure("b", "bob", Some("alice"))).unwrap();

        assert!(store.mark_matched("a", "b", 1234).unwrap());
        let a = DisclosureStore::get(&store, "a").unwrap().unwrap();
        let b = DisclosureStore::get(&store, "b").unwrap().unwrap();
        assert!(a.matched && b.matched);
        assert_eq!(a.matched_at, Some(1234));
        assert_eq!(b.matched_at, Some(1234));

        // a second attempt on the same pair changes nothing
        assert!(!store.mark_matched("a", "b", 9999).unwrap());
        let a = DisclosureStore::get(&store, "a").unwrap().unwrap();
        assert_eq!(a.matched_at, Some(1234));
    }

    #[test]
    fn mark_matched_rolls_back_when_one_side_missing() {
        let store = SqliteStore::open_in_memory().unwrap();
        DisclosureStore::insert(&store, &disclosure("a", "alice", Some("bob"))).unwrap();

        assert!(!store.mark_matched("a", "ghost", 1234).unwrap());
        let a = DisclosureStore::get(&store, "a").unwrap().unwrap();
        assert!(!a.matched, "no one-sided match may ever be visible");
    }

    #[test]
    fn designated_reader_is_replaced_not_accumulated() {
        let store = SqliteStore::open_in_memory().unwrap();
        DisclosureStore::insert(&store, &disclosure("d1", "alice", None)).unwrap();

        store.set_designated_reader("d1", "carol").unwrap();
        store.set_designated_reader("d1", "carol").unwrap();
        store.set_designated_reader("d1", "dave").unwrap();

        let rec = DisclosureStore::get(&store, "d1").unwrap().unwrap();
        assert_eq!(rec.designated_reader.as_deref(), Some("dave"));

        assert!(matches!(
            store.set_designated_reader("ghost", "eve"),
            Err(CoreError::RecordNotFound)
        ));
    }
}
