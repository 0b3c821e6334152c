//! Durable session storage
//!
//! SQLite-backed store for sessions, messages, reviews, and advisor
//! profiles. The marketplace invariants live here as partial unique indexes:
//! at most one open (pending or active) session per client, at most one
//! per advisor, and a unique request key where present. Uniqueness
//! violations surface as a typed `Conflict`, lost conditional updates as
//! `StaleState`; callers are expected to match on both.

use crate::error::{ConsultError, Result};
use crate::session::types::{
    AdvisorProfile, Review, Session, SessionMessage, SessionStatus, UserId,
};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::PathBuf;

/// Durable store for consultation state
pub struct SessionStore {
    db_path: PathBuf,
}

impl SessionStore {
    /// Create a store in the platform data directory
    ///
    /// The `CONSULTD_DB` environment variable overrides the location,
    /// which makes it easy to point the binary at a test DB or alternate
    /// file without changing the user's application data dir.
    ///
    /// # Errors
    ///
    /// Returns `ConsultError::StoreUnavailable` if the database cannot be
    /// opened or the schema cannot be created.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("CONSULTD_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("io", "consultd", "consultd").ok_or_else(|| {
            ConsultError::StoreUnavailable("Could not determine data directory".into())
        })?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        Self::new_with_path(data_dir.join("consultd.db"))
    }

    /// Create a store at the specified database path
    ///
    /// Primarily useful for tests where the default application data
    /// directory is not desirable (for example, a temporary directory).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use consultd::session::SessionStore;
    ///
    /// let store = SessionStore::new_with_path("/tmp/consultd.db").unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Open a connection with a busy timeout set
    ///
    /// The timeout prevents SQLITE_BUSY under concurrent write pressure
    /// (event handlers + timers + sweep).
    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| ConsultError::StoreUnavailable(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;
        Ok(conn)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                client_id INTEGER NOT NULL,
                advisor_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                request_key TEXT,
                theme TEXT,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                completed_at TEXT,
                archive_id TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_request_key
                ON sessions(request_key) WHERE request_key IS NOT NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_client_open
                ON sessions(client_id) WHERE status IN ('pending', 'active');
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_advisor_open
                ON sessions(advisor_id) WHERE status IN ('pending', 'active');
            CREATE INDEX IF NOT EXISTS idx_sessions_pending_deadline
                ON sessions(expires_at) WHERE status = 'pending';

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                sender_id INTEGER NOT NULL,
                body TEXT,
                media_ref TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_id);

            CREATE TABLE IF NOT EXISTS reviews (
                session_id TEXT PRIMARY KEY,
                advisor_id INTEGER NOT NULL,
                client_id INTEGER NOT NULL,
                rating INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reviews_advisor ON reviews(advisor_id);

            CREATE TABLE IF NOT EXISTS advisors (
                advisor_id INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL DEFAULT '',
                bio TEXT,
                specialization TEXT,
                rating REAL NOT NULL DEFAULT 0,
                review_count INTEGER NOT NULL DEFAULT 0,
                last_active_at TEXT
            );",
        )
        .map_err(|e| ConsultError::StoreUnavailable(format!("Failed to create schema: {}", e)))?;

        Ok(())
    }

    /// Insert a new session
    ///
    /// # Errors
    ///
    /// Returns `ConsultError::Conflict` when any uniqueness constraint is
    /// violated: duplicate request key (idempotent replay), an open session
    /// for the client, or an open session for the advisor. Callers
    /// re-read to find out which.
    pub fn create(&self, session: &Session) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO sessions
                (id, client_id, advisor_id, status, request_key, theme,
                 created_at, expires_at, completed_at, archive_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                session.id,
                session.client_id,
                session.advisor_id,
                session.status.as_str(),
                session.request_key,
                session.theme,
                ts(session.created_at),
                session.expires_at.map(ts),
                session.completed_at.map(ts),
                session.archive_id,
            ],
        )
        .map_err(|e| insert_error(e, "session insert"))?;

        Ok(())
    }

    /// Fetch a session by id
    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS),
            params![id],
            session_from_row,
        )
        .optional()
        .map_err(|e| ConsultError::StoreUnavailable(format!("Failed to query session: {}", e)))
    }

    /// Fetch the session where `user` participates and status is open
    ///
    /// Open means pending or active. The per-participant unique indexes
    /// guarantee at most one such row per side.
    pub fn find_active_or_pending(&self, user: UserId) -> Result<Option<Session>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM sessions
                 WHERE (client_id = ?1 OR advisor_id = ?1)
                   AND status IN ('pending', 'active')",
                SESSION_COLUMNS
            ),
            params![user],
            session_from_row,
        )
        .optional()
        .map_err(|e| ConsultError::StoreUnavailable(format!("Failed to query session: {}", e)))
    }

    /// Fetch a session by its idempotency key
    pub fn find_by_request_key(&self, key: &str) -> Result<Option<Session>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM sessions WHERE request_key = ?", SESSION_COLUMNS),
            params![key],
            session_from_row,
        )
        .optional()
        .map_err(|e| ConsultError::StoreUnavailable(format!("Failed to query session: {}", e)))
    }

    /// Conditionally move a session from `expected` to `new_status`
    ///
    /// Exactly one concurrent caller wins a given transition; the losers
    /// observe `StaleState` and must re-read to learn the new status.
    /// Entering `completed` stamps `completed_at`. Leaving pending clears
    /// `expires_at` (no later status carries a deadline) and releases the
    /// `request_key`, so a client may re-request the same advisor within
    /// the same dedup bucket once the session has moved on.
    ///
    /// # Errors
    ///
    /// `NotFound` when the row does not exist, `StaleState` when it does
    /// but its status is no longer `expected`.
    pub fn transition(
        &self,
        id: &str,
        expected: SessionStatus,
        new_status: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        let rows = tx
            .execute(
                "UPDATE sessions
                 SET status = ?1,
                     expires_at = NULL,
                     request_key = NULL,
                     completed_at = CASE WHEN ?1 = 'completed' THEN ?2 ELSE completed_at END
                 WHERE id = ?3 AND status = ?4",
                params![new_status.as_str(), ts(now), id, expected.as_str()],
            )
            .map_err(|e| ConsultError::StoreUnavailable(format!("Failed to update session: {}", e)))?;

        if rows == 0 {
            drop(tx);
            return match self.get(id)? {
                None => Err(ConsultError::not_found("session", id)),
                Some(_) => Err(ConsultError::StaleState {
                    session: id.to_string(),
                    expected: expected.to_string(),
                }),
            };
        }

        let session = tx
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS),
                params![id],
                session_from_row,
            )
            .map_err(|e| ConsultError::StoreUnavailable(format!("Failed to re-read session: {}", e)))?;

        tx.commit()
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        Ok(session)
    }

    /// Expire every pending session whose deadline has passed
    ///
    /// Returns exactly the sessions this call transitioned, so the caller
    /// can fan out one notification per row without duplicating work a
    /// deferred timer already did. Safe to run concurrently with itself
    /// and with per-session timers: the write lock is taken up front and
    /// each row is still flipped with a conditional update.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        let candidates: Vec<Session> = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM sessions
                     WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at < ?",
                    SESSION_COLUMNS
                ))
                .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

            let rows = stmt
                .query_map(params![ts(now)], session_from_row)
                .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?
        };

        let mut swept = Vec::with_capacity(candidates.len());
        for mut session in candidates {
            let rows = tx
                .execute(
                    "UPDATE sessions SET status = 'expired', expires_at = NULL
                     WHERE id = ? AND status = 'pending'",
                    params![session.id],
                )
                .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

            if rows == 1 {
                session.status = SessionStatus::Expired;
                session.expires_at = None;
                swept.push(session);
            }
        }

        tx.commit()
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        Ok(swept)
    }

    /// List the most recently created sessions (operator CLI)
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM sessions ORDER BY rowid DESC LIMIT ?",
                SESSION_COLUMNS
            ))
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        let rows = stmt
            .query_map(params![limit as i64], session_from_row)
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))
    }

    /// Record the archive reference returned by the archival collaborator
    pub fn set_archive_id(&self, session_id: &str, archive_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET archive_id = ? WHERE id = ?",
            params![archive_id, session_id],
        )
        .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Persist a message. Messages are immutable once written.
    pub fn insert_message(&self, message: &SessionMessage) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (id, session_id, sender_id, body, media_ref, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                message.id,
                message.session_id,
                message.sender_id,
                message.body,
                message.media_ref,
                ts(message.created_at),
            ],
        )
        .map_err(|e| insert_error(e, "message insert"))?;
        Ok(())
    }

    /// All messages of a session in insertion order
    ///
    /// Insertion order is the order the engine persisted them, which for
    /// a buffer flush is the original authoring order. The rowid carries
    /// it; timestamps alone cannot, since a flush writes many messages
    /// within the same instant.
    pub fn messages_for_session(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, sender_id, body, media_ref, created_at
                 FROM messages WHERE session_id = ? ORDER BY rowid",
            )
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(SessionMessage {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    body: row.get(3)?,
                    media_ref: row.get(4)?,
                    created_at: parse_ts(row, 5)?,
                })
            })
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))
    }

    /// Persist a review
    ///
    /// # Errors
    ///
    /// Returns `ConsultError::AlreadyReviewed` when the session already
    /// has one; the primary key on `session_id` enforces write-once.
    pub fn insert_review(&self, review: &Review) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reviews (session_id, advisor_id, client_id, rating, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                review.session_id,
                review.advisor_id,
                review.client_id,
                review.rating,
                ts(review.created_at),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ConsultError::AlreadyReviewed(review.session_id.clone())
            }
            other => ConsultError::StoreUnavailable(other.to_string()),
        })?;
        Ok(())
    }

    /// Recompute the advisor's aggregate rating from all stored reviews
    ///
    /// The aggregate is the arithmetic mean rounded to two decimals,
    /// upserted into the advisor profile together with the review count.
    pub fn recompute_advisor_rating(&self, advisor_id: UserId) -> Result<AdvisorProfile> {
        let conn = self.conn()?;

        let (sum, count): (i64, i64) = conn
            .query_row(
                "SELECT COALESCE(SUM(rating), 0), COUNT(*) FROM reviews WHERE advisor_id = ?",
                params![advisor_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        let rating = if count == 0 {
            0.0
        } else {
            ((sum as f64 / count as f64) * 100.0).round() / 100.0
        };

        conn.execute(
            "INSERT INTO advisors (advisor_id, rating, review_count)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(advisor_id) DO UPDATE SET
                 rating = excluded.rating,
                 review_count = excluded.review_count",
            params![advisor_id, rating, count],
        )
        .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;

        self.get_advisor(advisor_id)?
            .ok_or_else(|| ConsultError::not_found("advisor", advisor_id.to_string()))
    }

    /// Insert or update an advisor profile
    pub fn upsert_advisor(&self, profile: &AdvisorProfile) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO advisors
                (advisor_id, display_name, bio, specialization, rating, review_count, last_active_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(advisor_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 bio = excluded.bio,
                 specialization = excluded.specialization,
                 rating = excluded.rating,
                 review_count = excluded.review_count,
                 last_active_at = excluded.last_active_at",
            params![
                profile.advisor_id,
                profile.display_name,
                profile.bio,
                profile.specialization,
                profile.rating,
                profile.review_count,
                profile.last_active_at.map(ts),
            ],
        )
        .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Fetch an advisor profile
    pub fn get_advisor(&self, advisor_id: UserId) -> Result<Option<AdvisorProfile>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT advisor_id, display_name, bio, specialization, rating, review_count, last_active_at
             FROM advisors WHERE advisor_id = ?",
            params![advisor_id],
            |row| {
                Ok(AdvisorProfile {
                    advisor_id: row.get(0)?,
                    display_name: row.get(1)?,
                    bio: row.get(2)?,
                    specialization: row.get(3)?,
                    rating: row.get(4)?,
                    review_count: row.get::<_, i64>(5)? as u32,
                    last_active_at: parse_opt_ts(row, 6)?,
                })
            },
        )
        .optional()
        .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))
    }

    /// Stamp advisor-side activity, creating a bare profile row if needed
    ///
    /// Drives the derived "online" status.
    pub fn touch_advisor_activity(&self, advisor_id: UserId, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO advisors (advisor_id, last_active_at)
             VALUES (?1, ?2)
             ON CONFLICT(advisor_id) DO UPDATE SET last_active_at = excluded.last_active_at",
            params![advisor_id, ts(now)],
        )
        .map_err(|e| ConsultError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

const SESSION_COLUMNS: &str = "id, client_id, advisor_id, status, request_key, theme, \
                               created_at, expires_at, completed_at, archive_id";

/// Map a session row in `SESSION_COLUMNS` order
fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let status_str: String = row.get(3)?;
    let status = SessionStatus::parse_str(&status_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Session {
        id: row.get(0)?,
        client_id: row.get(1)?,
        advisor_id: row.get(2)?,
        status,
        request_key: row.get(4)?,
        theme: row.get(5)?,
        created_at: parse_ts(row, 6)?,
        expires_at: parse_opt_ts(row, 7)?,
        completed_at: parse_opt_ts(row, 8)?,
        archive_id: row.get(9)?,
    })
}

/// RFC-3339 timestamp for storage. All timestamps are UTC, so the string
/// form also compares correctly in SQL.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
    }
}

/// Constraint violations become `Conflict`; everything else is the store
/// failing us.
fn insert_error(e: rusqlite::Error, what: &str) -> ConsultError {
    match e {
        rusqlite::Error::SqliteFailure(inner, msg)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ConsultError::Conflict(msg.unwrap_or_else(|| what.to_string()))
        }
        other => ConsultError::StoreUnavailable(format!("{} failed: {}", what, other)),
    }
}
