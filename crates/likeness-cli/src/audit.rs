//! Audit trail of verification outcomes.
//!
//! Records hold the decision and its provenance only; no pixels or face
//! templates are ever written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use likeness_core::scorer::ScoreMode;
use likeness_core::types::{Decision, VerificationResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("audit record encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt audit record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub document_id: String,
    pub frame_count: usize,
    pub frame_index: Option<usize>,
    pub score_mode: Option<ScoreMode>,
    pub result: VerificationResult,
}

impl VerificationRecord {
    pub fn new(
        document_id: impl Into<String>,
        frame_count: usize,
        frame_index: Option<usize>,
        score_mode: Option<ScoreMode>,
        result: VerificationResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            document_id: document_id.into(),
            frame_count,
            frame_index,
            score_mode,
            result,
        }
    }
}

/// Hex SHA-256 of the document photo, used when the caller has no id.
pub fn document_fingerprint(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{b:02x}")).collect()
}

pub trait VerificationStore {
    fn save(&self, record: &VerificationRecord) -> Result<(), AuditError>;
    /// All records for a document, oldest first.
    fn find_by_document(&self, document_id: &str) -> Result<Vec<VerificationRecord>, AuditError>;
    fn find_by_id(&self, id: Uuid) -> Result<Option<VerificationRecord>, AuditError>;
}

/// Keeps records for the life of the process; used with `--no-audit`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, VerificationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VerificationStore for MemoryStore {
    fn save(&self, record: &VerificationRecord) -> Result<(), AuditError> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, record.clone());
        Ok(())
    }

    fn find_by_document(&self, document_id: &str) -> Result<Vec<VerificationRecord>, AuditError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<_> = records
            .values()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<VerificationRecord>, AuditError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS verifications (
    id           TEXT PRIMARY KEY,
    created_at   TEXT NOT NULL,
    document_id  TEXT NOT NULL,
    frame_count  INTEGER NOT NULL,
    frame_index  INTEGER,
    score_mode   TEXT,
    decision     TEXT NOT NULL,
    is_identical INTEGER NOT NULL,
    confidence   REAL NOT NULL,
    message      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_verifications_document
    ON verifications (document_id, created_at);
";

const COLUMNS: &str = "id, created_at, document_id, frame_count, frame_index, score_mode, \
                       decision, is_identical, confidence, message";

/// SQLite audit database, one row per verification.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        Self::init(conn, path)
    }

    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "audit database ready");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn query(&self, filter: &str, param: &str) -> Result<Vec<VerificationRecord>, AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let sql = format!(
            "SELECT {COLUMNS} FROM verifications WHERE {filter} ORDER BY created_at, rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([param], Row::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Row::into_record).collect()
    }
}

impl VerificationStore for SqliteStore {
    fn save(&self, record: &VerificationRecord) -> Result<(), AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let sql = format!(
            "INSERT INTO verifications ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        );
        conn.execute(
            &sql,
            params![
                record.id.to_string(),
                record.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                record.document_id,
                record.frame_count as i64,
                record.frame_index.map(|i| i as i64),
                record.score_mode.map(|m| m.to_string()),
                record.result.decision.to_string(),
                record.result.is_identical,
                f64::from(record.result.confidence),
                record.result.message,
            ],
        )?;
        tracing::debug!(id = %record.id, path = %self.path.display(), "audit record written");
        Ok(())
    }

    fn find_by_document(&self, document_id: &str) -> Result<Vec<VerificationRecord>, AuditError> {
        self.query("document_id = ?1", document_id)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<VerificationRecord>, AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM verifications WHERE id = ?1"),
                [id.to_string()],
                Row::read,
            )
            .optional()?;
        row.map(Row::into_record).transpose()
    }
}

/// Raw column values of one `verifications` row.
struct Row {
    id: String,
    created_at: String,
    document_id: String,
    frame_count: i64,
    frame_index: Option<i64>,
    score_mode: Option<String>,
    decision: String,
    is_identical: bool,
    confidence: f64,
    message: String,
}

impl Row {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            document_id: row.get(2)?,
            frame_count: row.get(3)?,
            frame_index: row.get(4)?,
            score_mode: row.get(5)?,
            decision: row.get(6)?,
            is_identical: row.get(7)?,
            confidence: row.get(8)?,
            message: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<VerificationRecord, AuditError> {
        let corrupt = |reason: String| AuditError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc);
        let score_mode = self
            .score_mode
            .map(parse_label::<ScoreMode>)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        let decision = parse_label::<Decision>(self.decision).map_err(|e| corrupt(e.to_string()))?;

        Ok(VerificationRecord {
            id,
            created_at,
            document_id: self.document_id,
            frame_count: self.frame_count.max(0) as usize,
            frame_index: self.frame_index.map(|i| i.max(0) as usize),
            score_mode,
            result: VerificationResult {
                is_identical: self.is_identical,
                confidence: self.confidence as f32,
                decision,
                message: self.message,
            },
        })
    }
}

/// Parse a unit enum from the snake_case label it serializes to.
fn parse_label<T: DeserializeOwned>(label: String) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::Value::String(label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use likeness_core::decision;

    fn record(document_id: &str, confidence: f32) -> VerificationRecord {
        VerificationRecord::new(
            document_id,
            3,
            Some(1),
            Some(ScoreMode::Simulated),
            decision::decide(confidence),
        )
    }

    fn temp_db() -> PathBuf {
        std::env::temp_dir()
            .join(format!("likeness-audit-{}", Uuid::new_v4()))
            .join("audit.db")
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        assert_eq!(
            document_fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_memory_store_lookup() {
        let store = MemoryStore::new();
        let a = record("doc-a", 0.9);
        let b = record("doc-b", 0.3);
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        assert_eq!(store.find_by_document("doc-a").unwrap(), vec![a.clone()]);
        assert_eq!(store.find_by_id(b.id).unwrap(), Some(b));
        assert_eq!(store.find_by_id(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_sqlite_store_saves_and_reads_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = record("doc-a", 0.5);
        let second = record("doc-a", 0.85);
        let other = record("doc-b", 0.1);
        for r in [&first, &second, &other] {
            store.save(r).unwrap();
        }

        assert_eq!(store.find_by_document("doc-a").unwrap(), vec![first, second]);
        assert_eq!(store.find_by_id(other.id).unwrap(), Some(other));
        assert_eq!(store.find_by_id(Uuid::new_v4()).unwrap(), None);
        assert!(store.find_by_document("doc-c").unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_store_keeps_early_outcomes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let early = VerificationRecord::new(
            "doc",
            0,
            None,
            None,
            VerificationResult::retry("no usable live frame"),
        );
        store.save(&early).unwrap();
        assert_eq!(store.find_by_id(early.id).unwrap(), Some(early));
    }

    #[test]
    fn test_sqlite_store_persists_across_opens() {
        let path = temp_db();
        let saved = record("doc", 0.7);
        SqliteStore::open(&path).unwrap().save(&saved).unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.find_by_document("doc").unwrap(), vec![saved]);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let r = record("doc", 0.7);
        store.save(&r).unwrap();
        assert!(matches!(store.save(&r), Err(AuditError::Sqlite(_))));
    }

    #[test]
    fn test_document_lookup_uses_index() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.conn.lock().unwrap();
        let plan: String = conn
            .query_row(
                "EXPLAIN QUERY PLAN SELECT id FROM verifications WHERE document_id = 'x'",
                [],
                |row| row.get(3),
            )
            .unwrap();
        assert!(plan.contains("idx_verifications_document"), "{plan}");
    }
}
