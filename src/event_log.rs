//! Durable, append-only record of sessions and their events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::app_dirs::AppDirs;
use crate::error::StorageError;
use crate::event::{Event, EventKind};
use crate::session::{Outcome, Rules, Session, SessionId};

/// Session row without its events, as listed for history.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub outcome: Outcome,
    pub rules: Rules,
    pub event_count: usize,
    pub abandoned: bool,
}

pub trait EventLog {
    /// Insert the session row. Events are appended separately.
    fn create_session(&mut self, session: &Session) -> Result<(), StorageError>;

    fn append_event(&mut self, session_id: SessionId, event: &Event) -> Result<(), StorageError>;

    fn set_outcome(&mut self, session_id: SessionId, outcome: Outcome) -> Result<(), StorageError>;

    /// Flag a session the player reset before it was decided.
    fn mark_abandoned(&mut self, session_id: SessionId) -> Result<(), StorageError>;

    /// Events of one session in insertion order.
    fn events(&self, session_id: SessionId) -> Result<Vec<Event>, StorageError>;

    /// Session row plus all of its events, or `None` if unknown.
    fn load_session(&self, session_id: SessionId) -> Result<Option<Session>, StorageError>;

    /// All sessions of a user, oldest first.
    fn sessions_for_user(&self, user_id: &str) -> Result<Vec<SessionRecord>, StorageError>;
}

impl<L: EventLog + ?Sized> EventLog for Box<L> {
    fn create_session(&mut self, session: &Session) -> Result<(), StorageError> {
        (**self).create_session(session)
    }

    fn append_event(&mut self, session_id: SessionId, event: &Event) -> Result<(), StorageError> {
        (**self).append_event(session_id, event)
    }

    fn set_outcome(&mut self, session_id: SessionId, outcome: Outcome) -> Result<(), StorageError> {
        (**self).set_outcome(session_id, outcome)
    }

    fn mark_abandoned(&mut self, session_id: SessionId) -> Result<(), StorageError> {
        (**self).mark_abandoned(session_id)
    }

    fn events(&self, session_id: SessionId) -> Result<Vec<Event>, StorageError> {
        (**self).events(session_id)
    }

    fn load_session(&self, session_id: SessionId) -> Result<Option<Session>, StorageError> {
        (**self).load_session(session_id)
    }

    fn sessions_for_user(&self, user_id: &str) -> Result<Vec<SessionRecord>, StorageError> {
        (**self).sessions_for_user(user_id)
    }
}

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS sessions (
        session_id  TEXT PRIMARY KEY,
        user_id     TEXT NOT NULL,
        start_time  TEXT NOT NULL,
        outcome     TEXT NOT NULL,
        goal_ms     INTEGER NOT NULL,
        grace_ms    INTEGER NOT NULL,
        abandoned   INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id  TEXT NOT NULL REFERENCES sessions(session_id),
        kind        TEXT NOT NULL,
        time        TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id, id);
    CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, start_time);
"#;

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(s: &str, table: &'static str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            table,
            message: format!("bad timestamp {s:?}: {e}"),
        })
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn from_millis(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or_default())
}

/// SQLite-backed event log.
#[derive(Debug)]
pub struct SqliteEventLog {
    conn: Connection,
}

impl SqliteEventLog {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open the database in the default state directory.
    pub fn open_default() -> Result<Self, StorageError> {
        let path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("pocketed_sessions.db"));
        Self::open(path)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn read_session_row(&self, session_id: SessionId) -> Result<Option<Session>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, start_time, outcome, goal_ms, grace_ms, abandoned
                 FROM sessions WHERE session_id = ?1",
                [session_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((user_id, start, outcome, goal_ms, grace_ms, abandoned)) = row else {
            return Ok(None);
        };

        Ok(Some(Session {
            id: session_id,
            user_id,
            start_time: parse_ts(&start, "sessions")?,
            outcome: parse_outcome(&outcome)?,
            rules: Rules {
                goal: from_millis(goal_ms),
                grace: from_millis(grace_ms),
            },
            events: Vec::new(),
            abandoned,
        }))
    }
}

fn parse_outcome(s: &str) -> Result<Outcome, StorageError> {
    Outcome::parse(s).ok_or_else(|| StorageError::Corrupt {
        table: "sessions",
        message: format!("unknown outcome {s:?}"),
    })
}

impl EventLog for SqliteEventLog {
    fn create_session(&mut self, session: &Session) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO sessions (session_id, user_id, start_time, outcome, goal_ms, grace_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id.to_string(),
                session.user_id,
                ts(&session.start_time),
                session.outcome.to_string(),
                millis(session.rules.goal),
                millis(session.rules.grace),
            ],
        )?;
        Ok(())
    }

    fn append_event(&mut self, session_id: SessionId, event: &Event) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO events (session_id, kind, time) VALUES (?1, ?2, ?3)",
            params![session_id.to_string(), event.kind.to_string(), ts(&event.time)],
        )?;
        Ok(())
    }

    fn set_outcome(&mut self, session_id: SessionId, outcome: Outcome) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE sessions SET outcome = ?2 WHERE session_id = ?1",
            params![session_id.to_string(), outcome.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::UnknownSession(session_id));
        }
        Ok(())
    }

    fn mark_abandoned(&mut self, session_id: SessionId) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE sessions SET abandoned = 1 WHERE session_id = ?1",
            [session_id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::UnknownSession(session_id));
        }
        Ok(())
    }

    fn events(&self, session_id: SessionId) -> Result<Vec<Event>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, time FROM events WHERE session_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map([session_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (kind, time) = row?;
            let kind = EventKind::parse(&kind).ok_or_else(|| StorageError::Corrupt {
                table: "events",
                message: format!("unknown event kind {kind:?}"),
            })?;
            events.push(Event::new(kind, parse_ts(&time, "events")?));
        }
        Ok(events)
    }

    fn load_session(&self, session_id: SessionId) -> Result<Option<Session>, StorageError> {
        let Some(mut session) = self.read_session_row(session_id)? else {
            return Ok(None);
        };
        session.events = self.events(session_id)?;
        Ok(Some(session))
    }

    fn sessions_for_user(&self, user_id: &str) -> Result<Vec<SessionRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT s.session_id, s.user_id, s.start_time, s.outcome, s.goal_ms, s.grace_ms,
                   s.abandoned, COUNT(e.id)
            FROM sessions s
            LEFT JOIN events e ON e.session_id = s.session_id
            WHERE s.user_id = ?1
            GROUP BY s.session_id
            ORDER BY s.start_time
            "#,
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, user_id, start, outcome, goal_ms, grace_ms, abandoned, count) = row?;
            let id = SessionId::parse(&id).ok_or_else(|| StorageError::Corrupt {
                table: "sessions",
                message: format!("bad session id {id:?}"),
            })?;
            records.push(SessionRecord {
                id,
                user_id,
                start_time: parse_ts(&start, "sessions")?,
                outcome: parse_outcome(&outcome)?,
                rules: Rules {
                    goal: from_millis(goal_ms),
                    grace: from_millis(grace_ms),
                },
                event_count: usize::try_from(count).unwrap_or_default(),
                abandoned,
            });
        }
        Ok(records)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    sessions: Vec<Session>,
    index: HashMap<SessionId, usize>,
    offline: bool,
}

/// In-process event log. Clones share storage, and the log can be switched
/// offline to simulate an unavailable store.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventLog {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_session<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, StorageError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(StorageError::Offline);
        }
        let idx = *inner
            .index
            .get(&session_id)
            .ok_or(StorageError::UnknownSession(session_id))?;
        Ok(f(&mut inner.sessions[idx]))
    }
}

impl EventLog for MemoryEventLog {
    fn create_session(&mut self, session: &Session) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(StorageError::Offline);
        }
        let mut row = session.clone();
        row.events.clear();
        let idx = inner.sessions.len();
        inner.sessions.push(row);
        inner.index.insert(session.id, idx);
        Ok(())
    }

    fn append_event(&mut self, session_id: SessionId, event: &Event) -> Result<(), StorageError> {
        self.with_session(session_id, |s| s.events.push(*event))
    }

    fn set_outcome(&mut self, session_id: SessionId, outcome: Outcome) -> Result<(), StorageError> {
        self.with_session(session_id, |s| s.outcome = outcome)
    }

    fn mark_abandoned(&mut self, session_id: SessionId) -> Result<(), StorageError> {
        self.with_session(session_id, |s| s.abandoned = true)
    }

    fn events(&self, session_id: SessionId) -> Result<Vec<Event>, StorageError> {
        self.with_session(session_id, |s| s.events.clone())
    }

    fn load_session(&self, session_id: SessionId) -> Result<Option<Session>, StorageError> {
        match self.with_session(session_id, |s| s.clone()) {
            Ok(s) => Ok(Some(s)),
            Err(StorageError::UnknownSession(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn sessions_for_user(&self, user_id: &str) -> Result<Vec<SessionRecord>, StorageError> {
        let inner = self.lock();
        if inner.offline {
            return Err(StorageError::Offline);
        }
        let mut records: Vec<SessionRecord> = inner
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| SessionRecord {
                id: s.id,
                user_id: s.user_id.clone(),
                start_time: s.start_time,
                outcome: s.outcome,
                rules: s.rules,
                event_count: s.events.len(),
                abandoned: s.abandoned,
            })
            .collect();
        records.sort_by_key(|r| r.start_time);
        Ok(records)
    }
}
