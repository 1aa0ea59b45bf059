//! Per-user game history: win/loss tallies and CSV export.

use std::io::Write;

use itertools::Itertools;
use serde::Serialize;

use crate::error::StorageError;
use crate::event_log::{EventLog, SessionRecord};
use crate::session::Outcome;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub won: usize,
    pub lost: usize,
    /// Undecided and still resumable.
    pub pending: usize,
    /// Reset by the player before a decision.
    pub abandoned: usize,
}

impl HistoryStats {
    pub fn from_records(records: &[SessionRecord]) -> Self {
        let counts = records
            .iter()
            .map(|r| (r.outcome, r.abandoned))
            .counts();
        let count = |o: Outcome, abandoned: bool| counts.get(&(o, abandoned)).copied().unwrap_or(0);
        Self {
            won: count(Outcome::Won, false),
            lost: count(Outcome::Lost, false),
            pending: count(Outcome::Pending, false),
            abandoned: count(Outcome::Pending, true),
        }
    }

    pub fn total(&self) -> usize {
        self.won + self.lost + self.pending + self.abandoned
    }

    /// Share of finished games that were won; `None` before the first finish.
    pub fn win_rate(&self) -> Option<f64> {
        match self.won + self.lost {
            0 => None,
            finished => Some(self.won as f64 / finished as f64),
        }
    }
}

pub fn stats_for_user<L: EventLog + ?Sized>(
    log: &L,
    user_id: &str,
) -> Result<HistoryStats, StorageError> {
    Ok(HistoryStats::from_records(&log.sessions_for_user(user_id)?))
}

/// Most recent undecided session that was not reset, the one a restarted
/// process resumes.
pub fn latest_pending<L: EventLog + ?Sized>(
    log: &L,
    user_id: &str,
) -> Result<Option<SessionRecord>, StorageError> {
    Ok(log
        .sessions_for_user(user_id)?
        .into_iter()
        .filter(|r| r.outcome == Outcome::Pending && !r.abandoned)
        .max_by_key(|r| r.start_time))
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    session_id: String,
    user_id: &'a str,
    start_time: String,
    outcome: String,
    goal_secs: u64,
    grace_secs: u64,
    events: usize,
}

/// Write one CSV row per session, oldest first, with a header. Returns the
/// number of rows written.
pub fn export_csv<L: EventLog + ?Sized, W: Write>(
    log: &L,
    user_id: &str,
    out: W,
) -> Result<usize, StorageError> {
    let records = log.sessions_for_user(user_id)?;
    let mut writer = csv::Writer::from_writer(out);
    for r in &records {
        writer
            .serialize(ExportRow {
                session_id: r.id.to_string(),
                user_id: &r.user_id,
                start_time: r.start_time.to_rfc3339(),
                outcome: r.outcome.to_string(),
                goal_secs: r.rules.goal.as_secs(),
                grace_secs: r.rules.grace.as_secs(),
                events: r.event_count,
            })
            .map_err(csv_error)?;
    }
    writer.flush()?;
    Ok(records.len())
}

fn csv_error(e: csv::Error) -> StorageError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => StorageError::Io(io),
        other => StorageError::Corrupt {
            table: "sessions",
            message: format!("{other:?}"),
        },
    }
}
