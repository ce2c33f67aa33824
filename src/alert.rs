//! Alert cooldown gate.
//!
//! `AlertGate::allow` is evaluated once per detection event, never once per
//! region: several regions found in the same tick must produce at most one
//! notification.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Default minimum spacing between two permitted notifications.
pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct AlertGate {
    cooldown: Duration,
    last_sent: Option<DateTime<Utc>>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_sent(&self) -> Option<DateTime<Utc>> {
        self.last_sent
    }

    /// Returns true and records `now` when more than the cooldown has elapsed
    /// since the last permitted alert (or none was ever sent). Otherwise returns
    /// false and leaves the state untouched. A clock that moved backwards never
    /// permits an alert.
    pub fn allow<Tz: TimeZone>(&mut self, now: DateTime<Tz>) -> bool {
        let now = now.with_timezone(&Utc);
        let permitted = match self.last_sent {
            None => true,
            Some(last) => match now.signed_duration_since(last).to_std() {
                Ok(elapsed) => elapsed > self.cooldown,
                Err(_) => false,
            },
        };
        if permitted {
            self.last_sent = Some(now);
        }
        permitted
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn within_cooldown_is_suppressed() {
        let mut gate = AlertGate::default();
        assert!(gate.allow(t0()));
        assert!(!gate.allow(t0() + TimeDelta::seconds(29)));
    }

    #[test]
    fn after_cooldown_is_permitted() {
        let mut gate = AlertGate::default();
        assert!(gate.allow(t0()));
        assert!(gate.allow(t0() + TimeDelta::seconds(31)));
    }

    #[test]
    fn exactly_cooldown_is_suppressed() {
        let mut gate = AlertGate::default();
        assert!(gate.allow(t0()));
        assert!(!gate.allow(t0() + TimeDelta::seconds(30)));
    }

    #[test]
    fn suppressed_call_does_not_extend_cooldown() {
        let mut gate = AlertGate::default();
        assert!(gate.allow(t0()));
        assert!(!gate.allow(t0() + TimeDelta::seconds(20)));
        assert_eq!(gate.last_sent(), Some(t0()));
        assert!(gate.allow(t0() + TimeDelta::seconds(31)));
    }

    #[test]
    fn clock_moving_backwards_is_suppressed() {
        let mut gate = AlertGate::default();
        assert!(gate.allow(t0()));
        assert!(!gate.allow(t0() - TimeDelta::seconds(120)));
    }
}
