//! Session events and the device state they imply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened at a point in a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Start,
    Locked,
    Unlocked,
    Powerup,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Start,
        EventKind::Locked,
        EventKind::Unlocked,
        EventKind::Powerup,
    ];

    /// Parse the persisted lowercase name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.to_string() == s)
    }
}

/// Observed lock state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Locked,
    Unlocked,
}

impl DeviceState {
    /// Device state implied by the latest state-changing event. A session
    /// starts with the phone in hand, so `Start` reads as unlocked.
    pub fn after(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::Start | EventKind::Unlocked => Some(DeviceState::Unlocked),
            EventKind::Locked => Some(DeviceState::Locked),
            EventKind::Powerup => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind, time: DateTime<Utc>) -> Self {
        Self { time, kind }
    }
}

/// Device state implied by an ordered event sequence, ignoring powerups.
pub fn device_state(events: &[Event]) -> Option<DeviceState> {
    events
        .iter()
        .rev()
        .find_map(|e| DeviceState::after(e.kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn kind_names_round_trip_through_parse() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(EventKind::Unlocked.to_string(), "unlocked");
        assert_eq!(EventKind::parse("sleeping"), None);
    }

    #[test]
    fn kinds_compare_by_value() {
        let a = EventKind::Locked;
        let b = EventKind::parse("locked").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, EventKind::Unlocked);
    }

    #[test]
    fn device_state_skips_powerups() {
        let events = vec![
            Event::new(EventKind::Start, at(0)),
            Event::new(EventKind::Locked, at(1)),
            Event::new(EventKind::Powerup, at(2)),
        ];
        assert_eq!(device_state(&events), Some(DeviceState::Locked));
    }

    #[test]
    fn start_reads_as_unlocked() {
        let events = vec![Event::new(EventKind::Start, at(0))];
        assert_eq!(device_state(&events), Some(DeviceState::Unlocked));
        assert_eq!(device_state(&[]), None);
    }

    #[test]
    fn serde_uses_lowercase_kind() {
        let json = serde_json::to_string(&Event::new(EventKind::Powerup, at(3))).unwrap();
        assert!(json.contains("\"powerup\""));
    }
}
