//! Timing engine: turns an ordered event sequence into game metrics.
//!
//! Every interval between two consecutive marks is credited to the state the
//! device was in during that interval, which is the state the closing event
//! ends:
//!
//! ```text
//! Start/Unlocked ──(unlocked, burns grace)──► Locked
//! Locked ────────(locked, counts to goal)──► Unlocked
//! ```
//!
//! The still-open interval at `now` is added to the reported totals but never
//! changes what the recorded events settled. Computation is a single pass and
//! a pure function of its inputs, so replaying a persisted log reproduces the
//! live numbers exactly.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::event::{device_state, DeviceState, Event, EventKind};
use crate::session::{Outcome, Rules};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DerivedMetrics {
    /// Qualifying locked time, progress toward the goal.
    pub locked_elapsed: Duration,
    /// Unlocked time charged against the grace budget, after powerups.
    pub grace_consumed: Duration,
    /// `grace - grace_consumed`, clamped at zero.
    pub grace_remaining: Duration,
    /// The recorded events alone already decided the game.
    pub is_game_over: bool,
}

impl DerivedMetrics {
    /// Decision at the instant these metrics were computed for. Reaching the
    /// goal wins over running out of grace.
    pub fn outcome(&self, rules: &Rules) -> Option<Outcome> {
        if self.locked_elapsed >= rules.goal {
            Some(Outcome::Won)
        } else if self.grace_remaining.is_zero() {
            Some(Outcome::Lost)
        } else {
            None
        }
    }

    pub fn goal_remaining(&self, rules: &Rules) -> Duration {
        rules.goal.saturating_sub(self.locked_elapsed)
    }
}

/// Non-negative span between two instants. Clock skew reads as zero.
pub fn span(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or_default()
}

fn after(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct TimingEngine;

impl TimingEngine {
    pub fn compute(events: &[Event], rules: &Rules, now: DateTime<Utc>) -> DerivedMetrics {
        let mut locked_elapsed = Duration::ZERO;
        let mut consumed = Duration::ZERO;
        let mut last_mark: Option<DateTime<Utc>> = None;
        let mut game_over = false;

        for event in events {
            match event.kind {
                EventKind::Start => {
                    last_mark = Some(event.time);
                }
                EventKind::Unlocked => {
                    if let Some(mark) = last_mark {
                        locked_elapsed += span(mark, event.time);
                    }
                    last_mark = Some(event.time);
                    if locked_elapsed >= rules.goal {
                        game_over = true;
                        break;
                    }
                }
                EventKind::Locked => {
                    if let Some(mark) = last_mark {
                        consumed += span(mark, event.time);
                    }
                    last_mark = Some(event.time);
                    if consumed >= rules.grace {
                        game_over = true;
                        break;
                    }
                }
                EventKind::Powerup => {
                    consumed /= 2;
                }
            }
        }

        if !game_over {
            if let Some(mark) = last_mark {
                let open = span(mark, now);
                match device_state(events) {
                    Some(DeviceState::Unlocked) => consumed += open,
                    Some(DeviceState::Locked) => locked_elapsed += open,
                    None => {}
                }
            }
        }

        DerivedMetrics {
            locked_elapsed,
            grace_consumed: consumed,
            grace_remaining: rules.grace.saturating_sub(consumed),
            is_game_over: game_over,
        }
    }

    /// When the goal completes if the device stays locked from `now` on.
    pub fn predicted_win_at(
        metrics: &DerivedMetrics,
        rules: &Rules,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        after(now, metrics.goal_remaining(rules))
    }

    /// When the grace budget runs out if the device stays unlocked from `now` on.
    pub fn predicted_loss_at(metrics: &DerivedMetrics, now: DateTime<Utc>) -> DateTime<Utc> {
        after(now, metrics.grace_remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn ev(kind: EventKind, secs: i64) -> Event {
        Event::new(kind, at(secs))
    }

    fn rules(goal: u64, grace: u64) -> Rules {
        Rules::from_secs(goal, grace).unwrap()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn never_locked_after_start_burns_grace() {
        let r = rules(10, 5);
        let m = TimingEngine::compute(&[ev(EventKind::Start, 0)], &r, at(11));

        assert_eq!(m.locked_elapsed, Duration::ZERO);
        assert_eq!(m.grace_remaining, Duration::ZERO);
        assert_eq!(m.grace_consumed, secs(11));
        assert!(!m.is_game_over);
        assert_eq!(m.outcome(&r), Some(Outcome::Lost));
    }

    #[test]
    fn unlock_credits_the_locked_interval() {
        let r = rules(10, 5);
        let events = [
            ev(EventKind::Start, 0),
            ev(EventKind::Locked, 2),
            ev(EventKind::Unlocked, 4),
        ];

        let m = TimingEngine::compute(&events, &r, at(4));
        assert_eq!(m.locked_elapsed, secs(2));
        assert_eq!(m.grace_consumed, secs(2));
        assert_eq!(m.grace_remaining, secs(3));

        // grace resumes accruing from the unlock
        let later = TimingEngine::compute(&events, &r, at(6));
        assert_eq!(later.grace_remaining, secs(1));
        assert_eq!(later.locked_elapsed, secs(2));
    }

    #[test]
    fn goal_completion_is_terminal() {
        let r = rules(10, 5);
        let events = [
            ev(EventKind::Start, 0),
            ev(EventKind::Locked, 0),
            ev(EventKind::Unlocked, 12),
            ev(EventKind::Locked, 40),
        ];

        let m = TimingEngine::compute(&events, &r, at(100));
        assert!(m.is_game_over);
        assert_eq!(m.locked_elapsed, secs(12));
        assert_eq!(m.grace_consumed, Duration::ZERO);
        assert_eq!(m.outcome(&r), Some(Outcome::Won));
    }

    #[test]
    fn grace_exhaustion_is_terminal() {
        let r = rules(10, 5);
        let events = [
            ev(EventKind::Start, 0),
            ev(EventKind::Locked, 6),
            ev(EventKind::Unlocked, 30),
        ];

        let m = TimingEngine::compute(&events, &r, at(30));
        assert!(m.is_game_over);
        assert_eq!(m.locked_elapsed, Duration::ZERO);
        assert_eq!(m.outcome(&r), Some(Outcome::Lost));
    }

    #[test]
    fn powerup_halves_consumed_grace() {
        let r = rules(100, 5);
        let events = [
            ev(EventKind::Start, 0),
            ev(EventKind::Locked, 4),
        ];
        let before = TimingEngine::compute(&events, &r, at(4));
        assert_eq!(before.grace_remaining, secs(1));

        let mut with_powerup = events.to_vec();
        with_powerup.push(ev(EventKind::Powerup, 5));
        let m = TimingEngine::compute(&with_powerup, &r, at(5));
        assert_eq!(m.grace_consumed, secs(2));
        assert_eq!(m.grace_remaining, secs(3));
    }

    #[test]
    fn powerup_truncates_odd_durations() {
        let r = rules(100, 50);
        let events = [
            ev(EventKind::Start, 0),
            Event::new(EventKind::Locked, at(0) + chrono::Duration::nanoseconds(3)),
            Event::new(EventKind::Powerup, at(1)),
        ];
        let m = TimingEngine::compute(&events, &r, at(1));
        assert_eq!(m.grace_consumed, Duration::from_nanos(1));
    }

    #[test]
    fn open_locked_interval_counts_toward_goal() {
        let r = rules(10, 5);
        let events = [ev(EventKind::Start, 0), ev(EventKind::Locked, 1)];

        let m = TimingEngine::compute(&events, &r, at(8));
        assert_eq!(m.locked_elapsed, secs(7));
        assert_eq!(m.grace_remaining, secs(4));
        assert!(!m.is_game_over);
        assert_eq!(m.outcome(&r), None);

        let m = TimingEngine::compute(&events, &r, at(11));
        assert_eq!(m.outcome(&r), Some(Outcome::Won));
    }

    #[test]
    fn open_interval_after_powerup_uses_device_state() {
        let r = rules(10, 5);
        let events = [
            ev(EventKind::Start, 0),
            ev(EventKind::Locked, 2),
            ev(EventKind::Powerup, 3),
        ];
        let m = TimingEngine::compute(&events, &r, at(6));
        assert_eq!(m.locked_elapsed, secs(4));
        assert_eq!(m.grace_consumed, secs(1));
    }

    #[test]
    fn backwards_timestamps_saturate_to_zero() {
        let r = rules(10, 5);
        let events = [ev(EventKind::Start, 5), ev(EventKind::Locked, 3)];
        let m = TimingEngine::compute(&events, &r, at(1));
        assert_eq!(m.grace_consumed, Duration::ZERO);
        assert_eq!(m.locked_elapsed, Duration::ZERO);
    }

    #[test]
    fn empty_sequence_reports_full_grace() {
        let r = rules(10, 5);
        let m = TimingEngine::compute(&[], &r, at(100));
        assert_eq!(m.grace_remaining, secs(5));
        assert_eq!(m.locked_elapsed, Duration::ZERO);
    }

    #[test]
    fn predictions_follow_remaining_budgets() {
        let r = rules(10, 5);
        let events = [
            ev(EventKind::Start, 0),
            ev(EventKind::Locked, 1),
            ev(EventKind::Unlocked, 4),
        ];
        let m = TimingEngine::compute(&events, &r, at(4));
        assert_eq!(TimingEngine::predicted_win_at(&m, &r, at(4)), at(11));
        assert_eq!(TimingEngine::predicted_loss_at(&m, at(4)), at(8));
    }

    #[test]
    fn compute_is_pure() {
        let r = rules(10, 5);
        let events = [
            ev(EventKind::Start, 0),
            ev(EventKind::Locked, 1),
            ev(EventKind::Powerup, 2),
            ev(EventKind::Unlocked, 3),
        ];
        assert_eq!(
            TimingEngine::compute(&events, &r, at(7)),
            TimingEngine::compute(&events, &r, at(7))
        );
    }

    fn kind_from_code(code: u8) -> EventKind {
        match code % 3 {
            0 => EventKind::Locked,
            1 => EventKind::Unlocked,
            _ => EventKind::Powerup,
        }
    }

    fn build(steps: &[(u8, u16)]) -> Vec<Event> {
        let mut t = 0i64;
        let mut events = vec![ev(EventKind::Start, 0)];
        for &(code, gap) in steps {
            t += i64::from(gap);
            events.push(ev(kind_from_code(code), t));
        }
        events
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_every_prefix_stays_within_bounds(steps in prop::collection::vec((0u8..3, 0u16..30), 0..40)) {
            let r = rules(300, 120);
            let events = build(&steps);
            for n in 1..=events.len() {
                let prefix = &events[..n];
                let now = prefix[n - 1].time;
                let m = TimingEngine::compute(prefix, &r, now);
                prop_assert!(m.grace_remaining <= r.grace);
                prop_assert_eq!(m.grace_remaining, r.grace.saturating_sub(m.grace_consumed));
            }
        }

        #[test]
        fn prop_unlock_never_decreases_locked_elapsed(steps in prop::collection::vec((0u8..3, 0u16..30), 0..40), gap in 0u16..30) {
            let r = rules(3_000, 1_200);
            let mut events = build(&steps);
            let last = events[events.len() - 1].time;
            let before = TimingEngine::compute(&events, &r, last);
            events.push(Event::new(EventKind::Unlocked, last + chrono::Duration::seconds(i64::from(gap))));
            let after = TimingEngine::compute(&events, &r, last);
            prop_assert!(after.locked_elapsed >= before.locked_elapsed);
        }

        #[test]
        fn prop_lock_never_decreases_consumed_grace(steps in prop::collection::vec((0u8..3, 0u16..30), 0..40), gap in 0u16..30) {
            let r = rules(3_000, 1_200);
            let mut events = build(&steps);
            let last = events[events.len() - 1].time;
            let lock_at = last + chrono::Duration::seconds(i64::from(gap));
            let before = TimingEngine::compute(&events, &r, lock_at);
            events.push(Event::new(EventKind::Locked, lock_at));
            let after = TimingEngine::compute(&events, &r, lock_at);
            prop_assert!(after.grace_consumed >= before.grace_consumed);
        }
    }
}
