//! SQLite session store.
//!
//! One connection behind a mutex. Every guarded write opens a `BEGIN IMMEDIATE`
//! transaction, reads the current status inside it and only then mutates, so
//! two concurrent writers can never both pass the same guard.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use serde_json::{Map, Value};
use vouch_types::{
    ArtifactId, DecisionStatus, MediaArtifact, MediaKind, ResultId, Score, Session, SessionId,
    SessionStatus, VerificationResult, Verdict, VouchError, VouchResult, missing_required_kinds,
};

use crate::sqlite_security::prepare_db_path;
use crate::{Publish, SessionRepository};

/// SQLite-backed [`SessionRepository`].
pub struct SqliteSessionStore {
    db: Mutex<Connection>,
}

impl SqliteSessionStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            callback_url TEXT,
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- One row per (session, kind); a re-upload replaces it.
        CREATE TABLE IF NOT EXISTS media_artifacts (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            kind TEXT NOT NULL,
            locator TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (session_id, kind)
        );

        -- Append-only; at most one per session.
        CREATE TABLE IF NOT EXISTS verification_results (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL UNIQUE REFERENCES sessions(id),
            status TEXT NOT NULL,
            score REAL NOT NULL,
            ocr_data TEXT NOT NULL,
            face_match REAL NOT NULL,
            liveness REAL NOT NULL,
            av_sync REAL NOT NULL,
            audio_spoof REAL NOT NULL,
            explanations TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_media_artifacts_session
        ON media_artifacts(session_id);
    ";

    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        prepare_db_path(path)?;

        let db = Connection::open(path)
            .with_context(|| format!("Failed to open session store at {}", path.display()))?;
        Self::initialize(db)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory session store")?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> Result<Self> {
        db.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON; \
             PRAGMA busy_timeout=5000;",
        )
        .context("Failed to set session store pragmas")?;
        db.execute_batch(Self::SCHEMA)
            .context("Failed to create session store schema")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-transaction rolls the transaction back on drop, so the
        // connection is still consistent.
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionRepository for SqliteSessionStore {
    fn create_session(
        &self,
        callback_url: Option<String>,
        metadata: Map<String, Value>,
    ) -> VouchResult<Session> {
        let now = now();
        let session = Session {
            id: SessionId::generate(),
            status: SessionStatus::Created,
            callback_url,
            metadata,
            created_at: now,
            updated_at: now,
        };
        let metadata_json =
            serde_json::to_string(&session.metadata).storage("encode session metadata")?;

        self.lock()
            .execute(
                "INSERT INTO sessions (id, status, callback_url, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    session.id.to_string(),
                    session.status.as_str(),
                    session.callback_url,
                    metadata_json,
                    timestamp(now),
                ],
            )
            .storage("insert session")?;

        tracing::info!(session_id = %session.id, "session created");
        Ok(session)
    }

    fn get_session(&self, id: SessionId) -> VouchResult<Session> {
        load_session(&self.lock(), id)
    }

    fn list_artifacts(&self, id: SessionId) -> VouchResult<Vec<MediaArtifact>> {
        let db = self.lock();
        load_status(&db, id)?;
        load_artifacts(&db, id)
    }

    fn record_upload(
        &self,
        id: SessionId,
        kind: MediaKind,
        mime_type: &str,
        publish: Publish<'_>,
    ) -> VouchResult<MediaArtifact> {
        let mut db = self.lock();
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .storage("begin upload transaction")?;

        let status = load_status(&tx, id)?;
        if !status.accepts_uploads() {
            return Err(VouchError::invalid_state(status, "upload to"));
        }
        if !kind.accepts_mime(mime_type) {
            return Err(VouchError::UnsupportedMedia {
                kind,
                mime_type: mime_type.to_string(),
            });
        }

        let locator = publish()?;
        let created_at = now();
        let row_id: i64 = tx
            .query_row(
                "INSERT INTO media_artifacts (session_id, kind, locator, mime_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (session_id, kind) DO UPDATE SET
                     locator = excluded.locator,
                     mime_type = excluded.mime_type,
                     created_at = excluded.created_at
                 RETURNING id",
                params![
                    id.to_string(),
                    kind.as_str(),
                    locator.to_string_lossy().into_owned(),
                    mime_type,
                    timestamp(created_at),
                ],
                |row| row.get(0),
            )
            .storage("upsert media artifact")?;
        set_status(&tx, id, SessionStatus::Uploading, created_at)?;
        tx.commit().storage("commit upload transaction")?;

        tracing::debug!(session_id = %id, %kind, previous = %status, "upload recorded");
        Ok(MediaArtifact {
            id: ArtifactId::new(row_id),
            session_id: id,
            kind,
            locator,
            mime_type: mime_type.to_string(),
            created_at,
        })
    }

    fn mark_media_complete(&self, id: SessionId) -> VouchResult<Session> {
        let mut db = self.lock();
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .storage("begin completion transaction")?;

        let status = load_status(&tx, id)?;
        if status.is_terminal() {
            return Err(VouchError::invalid_state(status, "complete media for"));
        }

        let present: BTreeSet<MediaKind> = load_artifacts(&tx, id)?
            .into_iter()
            .map(|artifact| artifact.kind)
            .collect();
        let missing = missing_required_kinds(&present);
        if !missing.is_empty() {
            return Err(VouchError::IncompleteMedia { missing });
        }

        if status != SessionStatus::MediaComplete {
            if !status.can_transition_to(SessionStatus::MediaComplete) {
                return Err(VouchError::invalid_state(status, "complete media for"));
            }
            set_status(&tx, id, SessionStatus::MediaComplete, now())?;
        }
        let session = load_session(&tx, id)?;
        tx.commit().storage("commit completion transaction")?;
        Ok(session)
    }

    fn commit_verdict(&self, id: SessionId, verdict: &Verdict) -> VouchResult<VerificationResult> {
        let mut db = self.lock();
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .storage("begin verdict transaction")?;

        let status = load_status(&tx, id)?;
        if status != SessionStatus::MediaComplete {
            return Err(VouchError::invalid_state(status, "commit a verdict for"));
        }

        let created_at = now();
        let ocr_json = serde_json::to_string(&verdict.ocr_data).storage("encode ocr data")?;
        let explanations_json =
            serde_json::to_string(&verdict.explanations).storage("encode explanations")?;
        let inserted = tx.execute(
            "INSERT INTO verification_results (
                 session_id, status, score, ocr_data, face_match, liveness,
                 av_sync, audio_spoof, explanations, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.to_string(),
                verdict.status.as_str(),
                verdict.score.value(),
                ocr_json,
                verdict.face_match.value(),
                verdict.liveness.value(),
                verdict.av_sync.value(),
                verdict.audio_spoof.value(),
                explanations_json,
                timestamp(created_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(VouchError::invalid_state(status, "commit a second verdict for"));
            }
            Err(err) => return Err(err).storage("insert verification result"),
        }
        let result_id = tx.last_insert_rowid();

        let next = verdict.status.session_status();
        set_status(&tx, id, next, created_at)?;
        tx.commit().storage("commit verdict transaction")?;

        tracing::info!(session_id = %id, decision = %verdict.status, status = %next, "verdict committed");
        Ok(VerificationResult {
            id: ResultId::new(result_id),
            session_id: id,
            verdict: verdict.clone(),
            created_at,
        })
    }

    fn get_result(&self, id: SessionId) -> VouchResult<Option<VerificationResult>> {
        let db = self.lock();
        load_status(&db, id)?;
        let row = db
            .query_row(
                "SELECT id, status, score, ocr_data, face_match, liveness, av_sync,
                        audio_spoof, explanations, created_at
                 FROM verification_results WHERE session_id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(ResultRow {
                        id: row.get(0)?,
                        status: row.get(1)?,
                        score: row.get(2)?,
                        ocr_data: row.get(3)?,
                        face_match: row.get(4)?,
                        liveness: row.get(5)?,
                        av_sync: row.get(6)?,
                        audio_spoof: row.get(7)?,
                        explanations: row.get(8)?,
                        created_at: row.get(9)?,
                    })
                },
            )
            .optional()
            .storage("query verification result")?;

        row.map(|row| row.decode(id))
            .transpose()
            .map_err(storage_error)
    }
}

struct ResultRow {
    id: i64,
    status: String,
    score: f64,
    ocr_data: String,
    face_match: f64,
    liveness: f64,
    av_sync: f64,
    audio_spoof: f64,
    explanations: String,
    created_at: String,
}

impl ResultRow {
    fn decode(self, session_id: SessionId) -> Result<VerificationResult> {
        let status: DecisionStatus = self.status.parse()?;
        let verdict = Verdict {
            status,
            score: Score::new(self.score)?,
            ocr_data: serde_json::from_str(&self.ocr_data).context("decode ocr data")?,
            face_match: Score::new(self.face_match)?,
            liveness: Score::new(self.liveness)?,
            av_sync: Score::new(self.av_sync)?,
            audio_spoof: Score::new(self.audio_spoof)?,
            explanations: serde_json::from_str(&self.explanations)
                .context("decode explanations")?,
        };
        Ok(VerificationResult {
            id: ResultId::new(self.id),
            session_id,
            verdict,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn load_status(db: &Connection, id: SessionId) -> VouchResult<SessionStatus> {
    let raw: Option<String> = db
        .query_row(
            "SELECT status FROM sessions WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .storage("query session status")?;
    let raw = raw.ok_or(VouchError::NotFound)?;
    raw.parse::<SessionStatus>()
        .map_err(|e| storage_error(anyhow!(e)))
}

fn load_session(db: &Connection, id: SessionId) -> VouchResult<Session> {
    let row = db
        .query_row(
            "SELECT status, callback_url, metadata, created_at, updated_at
             FROM sessions WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .storage("query session")?;
    let (status, callback_url, metadata, created_at, updated_at) =
        row.ok_or(VouchError::NotFound)?;

    let decode = || -> Result<Session> {
        Ok(Session {
            id,
            status: status.parse()?,
            callback_url,
            metadata: serde_json::from_str(&metadata).context("decode session metadata")?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    };
    decode().map_err(storage_error)
}

fn load_artifacts(db: &Connection, id: SessionId) -> VouchResult<Vec<MediaArtifact>> {
    let mut stmt = db
        .prepare(
            "SELECT id, kind, locator, mime_type, created_at
             FROM media_artifacts WHERE session_id = ?1
             ORDER BY id ASC",
        )
        .storage("prepare artifact query")?;
    let rows = stmt
        .query_map(params![id.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .storage("query artifacts")?;

    let mut artifacts = Vec::new();
    for row in rows {
        let (row_id, kind, locator, mime_type, created_at) = row.storage("read artifact row")?;
        let decode = || -> Result<MediaArtifact> {
            Ok(MediaArtifact {
                id: ArtifactId::new(row_id),
                session_id: id,
                kind: kind.parse()?,
                locator: PathBuf::from(&locator),
                mime_type: mime_type.clone(),
                created_at: parse_timestamp(&created_at)?,
            })
        };
        artifacts.push(decode().map_err(storage_error)?);
    }
    Ok(artifacts)
}

fn set_status(
    db: &Connection,
    id: SessionId,
    status: SessionStatus,
    at: DateTime<Utc>,
) -> VouchResult<()> {
    db.execute(
        "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), timestamp(at), id.to_string()],
    )
    .storage("update session status")?;
    Ok(())
}

/// Current time at the precision the store persists.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp '{raw}'"))?
        .with_timezone(&Utc))
}

fn storage_error(err: anyhow::Error) -> VouchError {
    tracing::error!(error = %format!("{err:#}"), "session store failure");
    VouchError::Storage(format!("{err:#}"))
}

trait StorageContext<T> {
    fn storage(self, what: &'static str) -> VouchResult<T>;
}

impl<T, E> StorageContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn storage(self, what: &'static str) -> VouchResult<T> {
        self.context(what).map_err(storage_error)
    }
}
