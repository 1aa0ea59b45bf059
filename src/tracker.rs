//! Ownership of the active session's events, mirrored to an [`EventLog`].
//!
//! In-memory state is the authority for the active session. Every mutation is
//! applied in memory first and then queued for the log; a write the log
//! refuses stays queued and is retried on the next mutation, so a flaky store
//! never interrupts play.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{GameError, StorageError};
use crate::event::{device_state, DeviceState, Event};
use crate::event_log::EventLog;
use crate::session::{Outcome, Rules, Session, SessionId};

#[derive(Debug, Clone)]
enum Write {
    Create(Session),
    Append(SessionId, Event),
    Finalize(SessionId, Outcome),
    Abandon(SessionId),
}

impl Write {
    fn apply<L: EventLog>(&self, log: &mut L) -> Result<(), StorageError> {
        match self {
            Write::Create(session) => log.create_session(session),
            Write::Append(id, event) => log.append_event(*id, event),
            Write::Finalize(id, outcome) => log.set_outcome(*id, *outcome),
            Write::Abandon(id) => log.mark_abandoned(*id),
        }
    }
}

pub struct SessionTracker<L: EventLog> {
    log: L,
    active: Option<Session>,
    pending: VecDeque<Write>,
}

impl<L: EventLog> SessionTracker<L> {
    pub fn new(log: L) -> Self {
        Self {
            log,
            active: None,
            pending: VecDeque::new(),
        }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active.as_ref().map(|s| s.id)
    }

    pub fn device_state(&self) -> Option<DeviceState> {
        self.active.as_ref().and_then(|s| device_state(&s.events))
    }

    /// Writes accepted in memory but not yet confirmed by the log.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Start a new session, replacing whatever was active.
    pub fn begin(&mut self, user_id: &str, rules: Rules, at: DateTime<Utc>) -> SessionId {
        let session = Session::begin(user_id, rules, at);
        let id = session.id;
        info!(session = %id, user = user_id, ?rules, "session started");
        self.pending.push_back(Write::Create(session.clone()));
        for event in &session.events {
            self.pending.push_back(Write::Append(id, *event));
        }
        self.active = Some(session);
        self.flush();
        id
    }

    /// Append to the active session. Returns the event as stored: a timestamp
    /// earlier than the previous event is clamped to it.
    pub fn append_event(&mut self, session_id: SessionId, event: Event) -> Result<Event, GameError> {
        let session = self.active_pending_mut(session_id)?;

        let mut event = event;
        if let Some(last) = session.last_event() {
            if event.time < last.time {
                warn!(
                    session = %session_id,
                    kind = %event.kind,
                    behind_ms = (last.time - event.time).num_milliseconds(),
                    "clock went backwards; clamping event time"
                );
                event.time = last.time;
            }
        }
        session.events.push(event);
        debug!(session = %session_id, kind = %event.kind, at = %event.time, "event appended");

        self.pending.push_back(Write::Append(session_id, event));
        self.flush();
        Ok(event)
    }

    /// Ordered events of a session: the in-memory copy for the active one,
    /// the log for anything else.
    pub fn events(&self, session_id: SessionId) -> Result<Vec<Event>, GameError> {
        if let Some(session) = self.active.as_ref().filter(|s| s.id == session_id) {
            return Ok(session.events.clone());
        }
        match self.log.load_session(session_id)? {
            Some(session) => Ok(session.events),
            None => Err(GameError::InvalidSession(session_id)),
        }
    }

    /// Move the active session out of `Pending`. Finalizing an already final
    /// session is a no-op that returns `Ok(false)`.
    pub fn finalize(&mut self, session_id: SessionId, outcome: Outcome) -> Result<bool, GameError> {
        let session = self
            .active
            .as_mut()
            .filter(|s| s.id == session_id)
            .ok_or(GameError::InvalidSession(session_id))?;

        if !session.finalize(outcome) {
            return Ok(false);
        }
        info!(session = %session_id, %outcome, "session finalized");
        self.pending.push_back(Write::Finalize(session_id, outcome));
        self.flush();
        Ok(true)
    }

    /// Drop the in-memory session. A session left undecided is flagged as
    /// abandoned in the log so it is never resumed; its rows are kept.
    pub fn release(&mut self) -> Option<Session> {
        let mut session = self.active.take()?;
        if !session.is_finalized() && !session.abandoned {
            session.abandoned = true;
            info!(session = %session.id, "session abandoned");
            self.pending.push_back(Write::Abandon(session.id));
        }
        self.flush();
        Some(session)
    }

    /// Rebuild the active session from the log after a restart.
    pub fn restore(&mut self, session_id: SessionId) -> Result<&Session, GameError> {
        self.flush();
        let session = self
            .log
            .load_session(session_id)?
            .filter(Session::is_resumable)
            .ok_or(GameError::InvalidSession(session_id))?;
        info!(session = %session_id, events = session.events.len(), "session restored");
        Ok(self.active.insert(session))
    }

    /// Push queued writes to the log. Returns true once the queue is empty.
    pub fn flush(&mut self) -> bool {
        while let Some(write) = self.pending.front() {
            match write.apply(&mut self.log) {
                Ok(()) => {
                    self.pending.pop_front();
                }
                Err(e) => {
                    warn!(error = %e, queued = self.pending.len(), "event log write deferred");
                    return false;
                }
            }
        }
        true
    }

    fn active_pending_mut(&mut self, session_id: SessionId) -> Result<&mut Session, GameError> {
        self.active
            .as_mut()
            .filter(|s| s.id == session_id && !s.is_finalized())
            .ok_or(GameError::InvalidSession(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::event_log::{MemoryEventLog, SqliteEventLog};
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn rules() -> Rules {
        Rules::from_secs(10, 5).unwrap()
    }

    #[test]
    fn begin_persists_row_and_start_event() {
        let log = MemoryEventLog::new();
        let mut tracker = SessionTracker::new(log.clone());
        let id = tracker.begin("ana", rules(), at(0));

        let stored = log.load_session(id).unwrap().unwrap();
        assert_eq!(stored.events, vec![Event::new(EventKind::Start, at(0))]);
        assert_eq!(tracker.device_state(), Some(DeviceState::Unlocked));
        assert_eq!(tracker.pending_writes(), 0);
    }

    #[test]
    fn append_rejects_foreign_session() {
        let mut tracker = SessionTracker::new(MemoryEventLog::new());
        tracker.begin("ana", rules(), at(0));

        let stranger = SessionId::new();
        assert_matches!(
            tracker.append_event(stranger, Event::new(EventKind::Locked, at(1))),
            Err(GameError::InvalidSession(id)) if id == stranger
        );
    }

    #[test]
    fn append_rejects_finalized_session() {
        let mut tracker = SessionTracker::new(MemoryEventLog::new());
        let id = tracker.begin("ana", rules(), at(0));
        tracker.finalize(id, Outcome::Lost).unwrap();

        assert_matches!(
            tracker.append_event(id, Event::new(EventKind::Locked, at(1))),
            Err(GameError::InvalidSession(_))
        );
    }

    #[test]
    fn finalize_twice_is_a_no_op() {
        let log = MemoryEventLog::new();
        let mut tracker = SessionTracker::new(log.clone());
        let id = tracker.begin("ana", rules(), at(0));

        assert!(tracker.finalize(id, Outcome::Won).unwrap());
        assert!(!tracker.finalize(id, Outcome::Lost).unwrap());
        assert_eq!(log.load_session(id).unwrap().unwrap().outcome, Outcome::Won);
    }

    #[test]
    fn backwards_timestamps_are_clamped() {
        let mut tracker = SessionTracker::new(MemoryEventLog::new());
        let id = tracker.begin("ana", rules(), at(10));

        let stored = tracker
            .append_event(id, Event::new(EventKind::Locked, at(4)))
            .unwrap();
        assert_eq!(stored.time, at(10));
    }

    #[test]
    fn offline_log_defers_writes_until_it_recovers() {
        let log = MemoryEventLog::new();
        let mut tracker = SessionTracker::new(log.clone());
        log.set_offline(true);

        let id = tracker.begin("ana", rules(), at(0));
        tracker.append_event(id, Event::new(EventKind::Locked, at(1))).unwrap();
        assert_eq!(tracker.pending_writes(), 3);
        assert_eq!(tracker.events(id).unwrap().len(), 2);

        log.set_offline(false);
        tracker.append_event(id, Event::new(EventKind::Unlocked, at(3))).unwrap();
        assert_eq!(tracker.pending_writes(), 0);

        let kinds: Vec<EventKind> = log.events(id).unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Start, EventKind::Locked, EventKind::Unlocked]);
    }

    #[test]
    fn events_of_archived_session_come_from_the_log() {
        let mut tracker = SessionTracker::new(SqliteEventLog::open_in_memory().unwrap());
        let first = tracker.begin("ana", rules(), at(0));
        tracker.append_event(first, Event::new(EventKind::Locked, at(2))).unwrap();
        tracker.finalize(first, Outcome::Lost).unwrap();
        tracker.release();
        tracker.begin("ana", rules(), at(50));

        assert_eq!(tracker.events(first).unwrap().len(), 2);
        assert_matches!(
            tracker.events(SessionId::new()),
            Err(GameError::InvalidSession(_))
        );
    }

    #[test]
    fn restore_reloads_pending_session() {
        let log = MemoryEventLog::new();
        let id = {
            let mut tracker = SessionTracker::new(log.clone());
            let id = tracker.begin("ana", rules(), at(0));
            tracker.append_event(id, Event::new(EventKind::Locked, at(1))).unwrap();
            id
        };

        let mut tracker = SessionTracker::new(log);
        let restored = tracker.restore(id).unwrap();
        assert_eq!(restored.events.len(), 2);
        assert_eq!(tracker.device_state(), Some(DeviceState::Locked));
    }

    #[test]
    fn released_pending_session_is_not_restorable() {
        let log = MemoryEventLog::new();
        let mut tracker = SessionTracker::new(log.clone());
        let id = tracker.begin("ana", rules(), at(0));

        let released = tracker.release().unwrap();
        assert!(released.abandoned);
        let stored = log.load_session(id).unwrap().unwrap();
        assert!(stored.abandoned);
        assert_eq!(stored.outcome, Outcome::Pending);

        let mut fresh = SessionTracker::new(log);
        assert_matches!(fresh.restore(id), Err(GameError::InvalidSession(_)));
    }

    #[test]
    fn released_finished_session_is_not_flagged() {
        let log = MemoryEventLog::new();
        let mut tracker = SessionTracker::new(log.clone());
        let id = tracker.begin("ana", rules(), at(0));
        tracker.finalize(id, Outcome::Won).unwrap();
        tracker.release();

        assert!(!log.load_session(id).unwrap().unwrap().abandoned);
    }

    #[test]
    fn restore_refuses_finalized_or_unknown_sessions() {
        let log = MemoryEventLog::new();
        let mut tracker = SessionTracker::new(log.clone());
        let id = tracker.begin("ana", rules(), at(0));
        tracker.finalize(id, Outcome::Won).unwrap();

        let mut fresh = SessionTracker::new(log);
        assert_matches!(fresh.restore(id), Err(GameError::InvalidSession(_)));
        assert_matches!(fresh.restore(SessionId::new()), Err(GameError::InvalidSession(_)));
    }
}
