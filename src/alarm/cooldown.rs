use std::time::{Duration, Instant};

use crate::models::AlarmEvent;

pub const DEFAULT_ALARM_COOLDOWN: Duration = Duration::from_secs(3);

/// Global rate limit on alarm dispatches, shared by all regions.
///
/// When any region is in violation and the cooldown has elapsed, every current
/// violation goes out together and the timer restarts. Violations seen during the
/// cooldown are dropped, not queued, so a spike shorter than the cooldown that
/// starts right after a dispatch is never reported.
#[derive(Debug, Clone)]
pub struct AlarmGate {
    cooldown: Duration,
    last_dispatch: Option<Instant>,
}

impl AlarmGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_dispatch: None,
        }
    }

    /// Returns the events to dispatch now, or `None` if there are none or the
    /// cooldown is still running.
    pub fn admit(&mut self, events: Vec<AlarmEvent>, now: Instant) -> Option<Vec<AlarmEvent>> {
        if events.is_empty() || !self.cooldown_elapsed(now) {
            return None;
        }
        self.last_dispatch = Some(now);
        Some(events)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn reset(&mut self) {
        self.last_dispatch = None;
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.last_dispatch
            .map(|last| now.saturating_duration_since(last) >= self.cooldown)
            .unwrap_or(true)
    }
}

impl Default for AlarmGate {
    fn default() -> Self {
        Self::new(DEFAULT_ALARM_COOLDOWN)
    }
}
