//! Game state machine.
//!
//! ```text
//!            start(rules)               tick / signal decides
//!  Reset ───────────────► Running ─────────────────────────► Won | Lost
//!    ▲                       │                                    │
//!    └──────── reset ────────┴──────────────── reset ─────────────┘
//! ```
//!
//! Every transition runs to completion before the next signal is handled:
//! the event is appended, metrics are recomputed from the full sequence and
//! alarms are re-armed in one call. Nothing here blocks on storage or alarms;
//! both are best-effort.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::alarm::{AlarmId, AlarmPayload, AlarmScheduler};
use crate::clock::Clock;
use crate::error::GameError;
use crate::event::{DeviceState, Event, EventKind};
use crate::event_log::EventLog;
use crate::session::{Outcome, Rules, SessionId};
use crate::timing::{DerivedMetrics, TimingEngine};
use crate::tracker::SessionTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum GameState {
    Reset,
    Running,
    Won,
    Lost,
}

impl GameState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GameState::Won | GameState::Lost)
    }
}

impl From<Outcome> for GameState {
    fn from(o: Outcome) -> Self {
        match o {
            Outcome::Pending => GameState::Running,
            Outcome::Won => GameState::Won,
            Outcome::Lost => GameState::Lost,
        }
    }
}

/// What the UI needs after each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: GameState,
    pub session_id: Option<SessionId>,
    pub device: Option<DeviceState>,
    pub rules: Option<Rules>,
    pub metrics: DerivedMetrics,
}

impl Status {
    pub fn goal_remaining(&self) -> Duration {
        self.rules
            .map(|r| self.metrics.goal_remaining(&r))
            .unwrap_or_default()
    }
}

pub struct OutcomeController<L: EventLog, A: AlarmScheduler, C: Clock> {
    tracker: SessionTracker<L>,
    alarms: A,
    clock: C,
    state: GameState,
    last_metrics: DerivedMetrics,
}

impl<L: EventLog, A: AlarmScheduler, C: Clock> OutcomeController<L, A, C> {
    pub fn new(log: L, alarms: A, clock: C) -> Self {
        Self {
            tracker: SessionTracker::new(log),
            alarms,
            clock,
            state: GameState::Reset,
            last_metrics: DerivedMetrics::default(),
        }
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn tracker(&self) -> &SessionTracker<L> {
        &self.tracker
    }

    pub fn alarms(&self) -> &A {
        &self.alarms
    }

    pub fn alarms_mut(&mut self) -> &mut A {
        &mut self.alarms
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.tracker.active_id()
    }

    /// Metrics as of the last transition or tick.
    pub fn last_metrics(&self) -> DerivedMetrics {
        self.last_metrics
    }

    /// Recompute metrics for the active session at the clock's current time
    /// without changing state.
    pub fn metrics(&self) -> Option<DerivedMetrics> {
        let session = self.tracker.active()?;
        Some(TimingEngine::compute(
            &session.events,
            &session.rules,
            self.clock.now(),
        ))
    }

    pub fn status(&self) -> Status {
        let session = self.tracker.active();
        Status {
            state: self.state,
            session_id: session.map(|s| s.id),
            device: self.tracker.device_state(),
            rules: session.map(|s| s.rules),
            metrics: self.last_metrics,
        }
    }

    /// `Reset → Running`. Starting from a finished game resets it first;
    /// starting while a game is running is refused as `InvalidSession`.
    pub fn start(&mut self, user_id: &str, rules: Rules) -> Result<SessionId, GameError> {
        let rules = Rules::new(rules.goal, rules.grace)?;
        match self.state {
            GameState::Running => {
                let active = self.tracker.active_id().unwrap_or_default();
                return Err(GameError::InvalidSession(active));
            }
            GameState::Won | GameState::Lost => self.reset(),
            GameState::Reset => {}
        }

        let now = self.clock.now();
        let id = self.tracker.begin(user_id, rules, now);
        self.state = GameState::Running;
        self.refresh();
        self.arm(AlarmId::Loss, TimingEngine::predicted_loss_at(&self.last_metrics, now));
        Ok(id)
    }

    /// Reattach to a session left `Pending` by a previous process.
    pub fn resume(&mut self, session_id: SessionId) -> Result<GameState, GameError> {
        if self.state == GameState::Running {
            let active = self.tracker.active_id().unwrap_or_default();
            return Err(GameError::InvalidSession(active));
        }
        self.cancel_all_alarms();
        self.tracker.restore(session_id)?;
        self.state = GameState::Running;
        info!(session = %session_id, "session resumed");

        if !self.evaluate() {
            self.rearm_for_device();
        }
        Ok(self.state)
    }

    pub fn device_locked(&mut self) -> Result<GameState, GameError> {
        self.device_signal(DeviceState::Locked)
    }

    pub fn device_unlocked(&mut self) -> Result<GameState, GameError> {
        self.device_signal(DeviceState::Unlocked)
    }

    /// Halve the consumed grace. Only meaningful while running.
    pub fn powerup(&mut self) -> Result<GameState, GameError> {
        let Some(id) = self.running_session() else {
            debug!(state = %self.state, "powerup ignored outside a running game");
            return Ok(self.state);
        };
        self.append(id, EventKind::Powerup)?;
        if !self.evaluate() {
            self.rearm_for_device();
        }
        Ok(self.state)
    }

    /// Periodic re-evaluation. Time passes without events, so this is what
    /// declares a game won or lost while the device sits still.
    pub fn tick(&mut self) -> GameState {
        if self.state == GameState::Running {
            self.evaluate();
        }
        self.state
    }

    /// Any state `→ Reset`. Cancels every alarm and forgets the in-memory
    /// session. Persisted history is kept; an undecided session is flagged
    /// abandoned so it is not resumed later.
    pub fn reset(&mut self) {
        self.cancel_all_alarms();
        if let Some(session) = self.tracker.release() {
            info!(session = %session.id, outcome = %session.outcome, "game reset");
        }
        self.state = GameState::Reset;
        self.last_metrics = DerivedMetrics::default();
    }

    fn device_signal(&mut self, signal: DeviceState) -> Result<GameState, GameError> {
        let Some(id) = self.running_session() else {
            debug!(state = %self.state, ?signal, "device signal ignored outside a running game");
            return Ok(self.state);
        };
        if self.tracker.device_state() == Some(signal) {
            debug!(?signal, "duplicate device signal ignored");
            return Ok(self.state);
        }

        let kind = match signal {
            DeviceState::Locked => EventKind::Locked,
            DeviceState::Unlocked => EventKind::Unlocked,
        };
        self.append(id, kind)?;

        if !self.evaluate() {
            self.rearm_for_device();
        }
        Ok(self.state)
    }

    fn running_session(&self) -> Option<SessionId> {
        match self.state {
            GameState::Running => self.tracker.active_id(),
            _ => None,
        }
    }

    fn append(&mut self, id: SessionId, kind: EventKind) -> Result<Event, GameError> {
        let event = Event::new(kind, self.clock.now());
        self.tracker.append_event(id, event)
    }

    fn refresh(&mut self) -> Option<Rules> {
        let rules = self.tracker.active()?.rules;
        if let Some(metrics) = self.metrics() {
            self.last_metrics = metrics;
        }
        Some(rules)
    }

    /// Recompute and finish the game if it is decided. Returns true when the
    /// game ended on this call.
    fn evaluate(&mut self) -> bool {
        let Some(rules) = self.refresh() else {
            return false;
        };
        match self.last_metrics.outcome(&rules) {
            Some(outcome) => {
                self.finish(outcome);
                true
            }
            None => false,
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        if let Some(id) = self.tracker.active_id() {
            if let Err(e) = self.tracker.finalize(id, outcome) {
                warn!(error = %e, "finalize failed");
            }
        }
        self.cancel_all_alarms();
        self.state = outcome.into();
        info!(
            state = %self.state,
            locked_ms = self.last_metrics.locked_elapsed.as_millis() as u64,
            grace_left_ms = self.last_metrics.grace_remaining.as_millis() as u64,
            "game over"
        );
    }

    /// Arm the alarm for whatever the current device state is racing toward.
    fn rearm_for_device(&mut self) {
        let now = self.clock.now();
        let Some(rules) = self.tracker.active().map(|s| s.rules) else {
            return;
        };
        match self.tracker.device_state() {
            Some(DeviceState::Locked) => {
                self.disarm(AlarmId::Loss);
                self.arm(
                    AlarmId::Win,
                    TimingEngine::predicted_win_at(&self.last_metrics, &rules, now),
                );
            }
            Some(DeviceState::Unlocked) => {
                self.disarm(AlarmId::Win);
                self.arm(
                    AlarmId::Loss,
                    TimingEngine::predicted_loss_at(&self.last_metrics, now),
                );
            }
            None => {}
        }
    }

    fn arm(&mut self, id: AlarmId, fire_at: chrono::DateTime<chrono::Utc>) {
        let Some(session_id) = self.tracker.active_id() else {
            return;
        };
        let message = match id {
            AlarmId::Win => "Goal reached, you won!".to_string(),
            AlarmId::Loss => "Out of grace, you lost.".to_string(),
        };
        let payload = AlarmPayload {
            session_id,
            message,
        };
        match self.alarms.schedule(id, fire_at, payload) {
            Ok(()) => debug!(alarm = %id, at = %fire_at, "alarm armed"),
            Err(e) => warn!(alarm = %id, error = %e, "alarm scheduling failed"),
        }
    }

    fn disarm(&mut self, id: AlarmId) {
        if let Err(e) = self.alarms.cancel(id) {
            warn!(alarm = %id, error = %e, "alarm cancel failed");
        }
    }

    fn cancel_all_alarms(&mut self) {
        if let Err(e) = self.alarms.cancel_all() {
            warn!(error = %e, "alarm cancel failed");
        }
    }
}
