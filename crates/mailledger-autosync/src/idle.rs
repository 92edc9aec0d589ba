//! Idle-state tracking.
//!
//! Auto-sync only does heavy work while the user is away. Two sources report
//! idleness: the application itself (e.g. all windows minimized) and the
//! system (no input for a while). [`transition`] folds both into a single
//! [`IdleState`]; [`IdleDetector`] derives the system notifications from
//! recorded user activity.

use std::time::Duration;

use tokio::time::Instant;

/// Process-wide idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdleState {
    /// The user is active.
    #[default]
    NotIdle,
    /// The system reported no user input for a while.
    SystemIdle,
    /// The application declared itself idle.
    AppIdle,
}

impl IdleState {
    /// Whether this is one of the idle states.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        !matches!(self, Self::NotIdle)
    }
}

/// An idle notification from the application or the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleNotification {
    /// The application went idle.
    AppIdle,
    /// The application is back from idle.
    AppBack,
    /// The system went idle.
    SystemIdle,
    /// The system is back from idle.
    SystemBack,
}

/// What the manager has to do after an idle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// Nothing changed.
    None,
    /// Entered an idle state: start idle processing.
    StartIdleProcessing,
    /// Left idle: tell listeners auto-sync stopped running.
    Stopped,
}

/// Apply `event` to `current`, returning the next state and the action to take.
#[must_use]
pub const fn transition(current: IdleState, event: IdleNotification) -> (IdleState, IdleAction) {
    match (current, event) {
        (IdleState::NotIdle, IdleNotification::AppIdle) => {
            (IdleState::AppIdle, IdleAction::StartIdleProcessing)
        }
        (IdleState::NotIdle, IdleNotification::SystemIdle) => {
            (IdleState::SystemIdle, IdleAction::StartIdleProcessing)
        }
        (IdleState::AppIdle | IdleState::SystemIdle, IdleNotification::AppBack)
        | (IdleState::SystemIdle, IdleNotification::SystemBack) => {
            (IdleState::NotIdle, IdleAction::Stopped)
        }
        // App idleness outranks system idleness; system back does not end it.
        (state, _) => (state, IdleAction::None),
    }
}

/// Turns recorded user activity into system idle notifications.
#[derive(Debug, Clone)]
pub struct IdleDetector {
    threshold: Duration,
    last_activity: Instant,
    idle: bool,
}

impl IdleDetector {
    /// Create a detector that reports idle after `threshold` without activity.
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self::starting_at(threshold, Instant::now())
    }

    /// Create a detector whose last activity happened at `now`.
    #[must_use]
    pub const fn starting_at(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            last_activity: now,
            idle: false,
        }
    }

    /// Idle threshold.
    #[must_use]
    pub const fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Whether the detector currently reports idle.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.idle
    }

    /// Record user activity at `now`. Returns `SystemBack` if the user was idle.
    pub fn record_activity(&mut self, now: Instant) -> Option<IdleNotification> {
        self.last_activity = now;
        if self.idle {
            self.idle = false;
            Some(IdleNotification::SystemBack)
        } else {
            None
        }
    }

    /// Check for idleness at `now`. Returns `SystemIdle` once per idle period.
    pub fn poll(&mut self, now: Instant) -> Option<IdleNotification> {
        if !self.idle && now.saturating_duration_since(self.last_activity) >= self.threshold {
            self.idle = true;
            Some(IdleNotification::SystemIdle)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_idle_starts_processing() {
        assert_eq!(
            transition(IdleState::NotIdle, IdleNotification::AppIdle),
            (IdleState::AppIdle, IdleAction::StartIdleProcessing)
        );
        assert_eq!(
            transition(IdleState::NotIdle, IdleNotification::SystemIdle),
            (IdleState::SystemIdle, IdleAction::StartIdleProcessing)
        );
    }

    #[test]
    fn test_repeated_idle_is_ignored() {
        for state in [IdleState::AppIdle, IdleState::SystemIdle] {
            assert_eq!(
                transition(state, IdleNotification::AppIdle),
                (state, IdleAction::None)
            );
        }
        assert_eq!(
            transition(IdleState::AppIdle, IdleNotification::SystemIdle),
            (IdleState::AppIdle, IdleAction::None)
        );
    }

    #[test]
    fn test_back_events() {
        assert_eq!(
            transition(IdleState::AppIdle, IdleNotification::AppBack),
            (IdleState::NotIdle, IdleAction::Stopped)
        );
        assert_eq!(
            transition(IdleState::SystemIdle, IdleNotification::AppBack),
            (IdleState::NotIdle, IdleAction::Stopped)
        );
        assert_eq!(
            transition(IdleState::SystemIdle, IdleNotification::SystemBack),
            (IdleState::NotIdle, IdleAction::Stopped)
        );
        assert_eq!(
            transition(IdleState::AppIdle, IdleNotification::SystemBack),
            (IdleState::AppIdle, IdleAction::None)
        );
        assert_eq!(
            transition(IdleState::NotIdle, IdleNotification::SystemBack),
            (IdleState::NotIdle, IdleAction::None)
        );
        assert_eq!(
            transition(IdleState::NotIdle, IdleNotification::AppBack),
            (IdleState::NotIdle, IdleAction::None)
        );
    }

    #[test]
    fn test_detector_reports_idle_once() {
        let start = Instant::now();
        let mut detector = IdleDetector::starting_at(Duration::from_secs(10), start);

        assert_eq!(detector.poll(start + Duration::from_secs(9)), None);
        assert_eq!(
            detector.poll(start + Duration::from_secs(10)),
            Some(IdleNotification::SystemIdle)
        );
        assert_eq!(detector.poll(start + Duration::from_secs(20)), None);
        assert!(detector.is_idle());

        assert_eq!(
            detector.record_activity(start + Duration::from_secs(21)),
            Some(IdleNotification::SystemBack)
        );
        assert_eq!(detector.record_activity(start + Duration::from_secs(22)), None);
        assert_eq!(detector.poll(start + Duration::from_secs(30)), None);
    }
}
