//! Sessions: identity, rules and lifecycle of one play-through.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GameError;
use crate::event::{Event, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Pending,
    Won,
    Lost,
}

impl Outcome {
    pub fn parse(s: &str) -> Option<Self> {
        [Outcome::Pending, Outcome::Won, Outcome::Lost]
            .into_iter()
            .find(|o| o.to_string() == s)
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }
}

/// Goal and grace thresholds, fixed for the lifetime of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rules {
    pub goal: Duration,
    pub grace: Duration,
}

impl Rules {
    pub fn new(goal: Duration, grace: Duration) -> Result<Self, GameError> {
        if goal.is_zero() || grace.is_zero() {
            return Err(GameError::InvalidConfiguration { goal, grace });
        }
        Ok(Self { goal, grace })
    }

    pub fn from_secs(goal_secs: u64, grace_secs: u64) -> Result<Self, GameError> {
        Self::new(Duration::from_secs(goal_secs), Duration::from_secs(grace_secs))
    }
}

/// One play-through: everything between `start` and a win, loss or reset.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub outcome: Outcome,
    pub rules: Rules,
    pub events: Vec<Event>,
    /// Reset by the player before it was decided. Stays `Pending` for good.
    pub abandoned: bool,
}

impl Session {
    /// New pending session whose first event is `Start` at `at`.
    pub fn begin(user_id: impl Into<String>, rules: Rules, at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            user_id: user_id.into(),
            start_time: at,
            outcome: Outcome::Pending,
            rules,
            events: vec![Event::new(EventKind::Start, at)],
            abandoned: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome.is_final()
    }

    /// Still open and never reset, so it can be picked up again.
    pub fn is_resumable(&self) -> bool {
        !self.is_finalized() && !self.abandoned
    }

    pub fn last_event(&self) -> Option<&Event> {
        self.events.last()
    }

    /// One-way transition out of `Pending`. Returns false when the session was
    /// already final, leaving it untouched.
    pub fn finalize(&mut self, outcome: Outcome) -> bool {
        if self.is_finalized() || !outcome.is_final() {
            return false;
        }
        self.outcome = outcome;
        true
    }
}
