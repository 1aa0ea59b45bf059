//! Win and loss alarms: the scheduler seam and an in-memory table.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::AlarmError;
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlarmId {
    Win,
    Loss,
}

impl AlarmId {
    pub const ALL: [AlarmId; 2] = [AlarmId::Win, AlarmId::Loss];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmId::Win => "win-alarm",
            AlarmId::Loss => "loss-alarm",
        }
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a notification says when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmPayload {
    pub session_id: SessionId,
    pub message: String,
}

/// Point-in-time notification service.
///
/// Scheduling an id that is already pending replaces it; cancelling an id
/// that is not pending does nothing.
pub trait AlarmScheduler {
    fn schedule(
        &mut self,
        id: AlarmId,
        fire_at: DateTime<Utc>,
        payload: AlarmPayload,
    ) -> Result<(), AlarmError>;

    fn cancel(&mut self, id: AlarmId) -> Result<(), AlarmError>;

    fn cancel_all(&mut self) -> Result<(), AlarmError> {
        for id in AlarmId::ALL {
            self.cancel(id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAlarm {
    pub id: AlarmId,
    pub fire_at: DateTime<Utc>,
    pub payload: AlarmPayload,
}

/// Alarm table held in memory. The binary polls it for due alarms; tests
/// inspect it directly.
#[derive(Debug, Clone, Default)]
pub struct PendingAlarms {
    pending: BTreeMap<AlarmId, PendingAlarm>,
}

impl PendingAlarms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: AlarmId) -> Option<&PendingAlarm> {
        self.pending.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Remove and return every alarm due at or before `now`, earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<PendingAlarm> {
        let due: Vec<AlarmId> = self
            .pending
            .values()
            .filter(|a| a.fire_at <= now)
            .map(|a| a.id)
            .collect();
        let mut fired: Vec<PendingAlarm> =
            due.iter().filter_map(|id| self.pending.remove(id)).collect();
        fired.sort_by_key(|a| a.fire_at);
        fired
    }
}

impl AlarmScheduler for PendingAlarms {
    fn schedule(
        &mut self,
        id: AlarmId,
        fire_at: DateTime<Utc>,
        payload: AlarmPayload,
    ) -> Result<(), AlarmError> {
        self.pending.insert(
            id,
            PendingAlarm {
                id,
                fire_at,
                payload,
            },
        );
        Ok(())
    }

    fn cancel(&mut self, id: AlarmId) -> Result<(), AlarmError> {
        self.pending.remove(&id);
        Ok(())
    }
}
