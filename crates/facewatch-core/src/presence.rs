//! Presence hysteresis and alert gating.
//!
//! Each class (authorized, unauthorized) counts consecutive frames in which it
//! was observed. A class alerts once its counter reaches the threshold, its
//! latch is clear and the global cooldown has elapsed. Latches clear after a
//! stretch with no faces at all.

use crate::types::FaceClass;
use std::time::{Duration, Instant};

/// Kind of alert decided by the state machine.
pub type AlertKind = FaceClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Consecutive frames a class must be seen before it may alert.
    pub min_frames_for_alert: u32,
    /// Minimum time between two alerts of any kind.
    pub alert_cooldown: Duration,
    /// Face-free time after which both latches clear.
    pub presence_reset: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            min_frames_for_alert: 8,
            alert_cooldown: Duration::from_secs(10),
            presence_reset: Duration::from_secs(15),
        }
    }
}

/// Where one class stands in its `Idle → Counting → Alerted` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Counting(u32),
    Alerted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ClassState {
    counter: u32,
    latched: bool,
}

impl ClassState {
    fn phase(&self) -> Phase {
        if self.latched {
            Phase::Alerted
        } else if self.counter > 0 {
            Phase::Counting(self.counter)
        } else {
            Phase::Idle
        }
    }
}

/// Point-in-time copy of the machine, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub authorized: Phase,
    pub unauthorized: Phase,
    pub cooling_down: bool,
}

#[derive(Debug)]
pub struct PresenceStateMachine {
    config: PresenceConfig,
    authorized: ClassState,
    unauthorized: ClassState,
    last_alert: Option<Instant>,
    last_presence: Option<Instant>,
}

impl PresenceStateMachine {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            authorized: ClassState::default(),
            unauthorized: ClassState::default(),
            last_alert: None,
            last_presence: None,
        }
    }

    /// Feed one frame's classification summary. Returns the alert to raise, if any.
    pub fn observe(&mut self, authorized_seen: bool, unauthorized_seen: bool, now: Instant) -> Option<AlertKind> {
        if !authorized_seen && !unauthorized_seen {
            self.observe_empty(now);
            return None;
        }
        self.last_presence = Some(now);

        // Authorized presence suppresses the unauthorized count entirely.
        let class = if authorized_seen {
            self.authorized.counter = self.authorized.counter.saturating_add(1);
            self.unauthorized.counter = 0;
            FaceClass::Authorized
        } else {
            self.unauthorized.counter = self.unauthorized.counter.saturating_add(1);
            self.authorized.counter = 0;
            FaceClass::Unauthorized
        };

        let frames = self.state(class).counter;
        if frames < self.config.min_frames_for_alert || self.state(class).latched || !self.cooldown_elapsed(now) {
            return None;
        }

        let state = self.state_mut(class);
        state.latched = true;
        state.counter = 0;
        self.state_mut(class.other()).latched = false;
        self.last_alert = Some(now);
        tracing::info!(kind = ?class, frames, "presence alert");
        Some(class)
    }

    pub fn snapshot(&self, now: Instant) -> PresenceSnapshot {
        PresenceSnapshot {
            authorized: self.authorized.phase(),
            unauthorized: self.unauthorized.phase(),
            cooling_down: !self.cooldown_elapsed(now),
        }
    }

    fn observe_empty(&mut self, now: Instant) {
        self.authorized.counter = 0;
        self.unauthorized.counter = 0;

        let absent_long_enough = self
            .last_presence
            .map_or(true, |seen| now.saturating_duration_since(seen) > self.config.presence_reset);
        if absent_long_enough && (self.authorized.latched || self.unauthorized.latched) {
            tracing::debug!("no faces for presence reset window; clearing alert latches");
            self.authorized.latched = false;
            self.unauthorized.latched = false;
        }
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.last_alert
            .map_or(true, |at| now.saturating_duration_since(at) > self.config.alert_cooldown)
    }

    fn state(&self, class: FaceClass) -> &ClassState {
        match class {
            FaceClass::Authorized => &self.authorized,
            FaceClass::Unauthorized => &self.unauthorized,
        }
    }

    fn state_mut(&mut self, class: FaceClass) -> &mut ClassState {
        match class {
            FaceClass::Authorized => &mut self.authorized,
            FaceClass::Unauthorized => &mut self.unauthorized,
        }
    }
}

impl Default for PresenceStateMachine {
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}
