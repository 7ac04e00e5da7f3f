//! Entity presence tracking
//!
//! One [`Liveness`] per remote entity. It moves `Unknown -> Available` on the
//! first ENTITY_AVAILABLE, stays Available while advertisements keep arriving
//! inside the advertised valid time, and becomes `Departed` on
//! ENTITY_DEPARTING or when [`Liveness::expire`] finds the valid time elapsed.
//! A departed entity that advertises again becomes Available again.

use std::time::{Duration, Instant};

use super::Adpdu;

/// Shortest valid time honoured, whatever the entity advertises
pub const MIN_VALID_TIME: Duration = Duration::from_secs(2);

/// Presence state of a remote entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LivenessState {
    Unknown,
    Available,
    Departed,
}

/// What an ENTITY_AVAILABLE meant for a tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisementOutcome {
    /// First advertisement ever seen
    Discovered,
    /// Same available_index as before
    Refreshed,
    /// available_index advanced: the entity changed some advertised state
    Updated,
    /// available_index went backwards or the entity model changed; any cached
    /// model is stale
    Restarted,
    /// A departed entity came back without restarting
    Reconnected,
}

#[derive(Debug, Clone)]
pub struct Liveness {
    state: LivenessState,
    available_index: u32,
    entity_model_id: u64,
    valid_time: Duration,
    last_seen: Option<Instant>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            state: LivenessState::Unknown,
            available_index: 0,
            entity_model_id: 0,
            valid_time: MIN_VALID_TIME,
            last_seen: None,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn is_available(&self) -> bool {
        self.state == LivenessState::Available
    }

    pub fn available_index(&self) -> u32 {
        self.available_index
    }

    pub fn valid_time(&self) -> Duration {
        self.valid_time
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// Instant after which the entity is considered gone
    pub fn deadline(&self) -> Option<Instant> {
        self.last_seen.map(|seen| seen + self.valid_time)
    }

    /// Record an ENTITY_AVAILABLE
    pub fn on_available(&mut self, adpdu: &Adpdu, now: Instant) -> AdvertisementOutcome {
        let index = adpdu.available_index();
        let model = adpdu.entity_model_id();
        let restarted = index < self.available_index || model != self.entity_model_id;

        let outcome = match self.state {
            LivenessState::Unknown => AdvertisementOutcome::Discovered,
            _ if restarted => AdvertisementOutcome::Restarted,
            LivenessState::Departed => AdvertisementOutcome::Reconnected,
            LivenessState::Available if index == self.available_index => {
                AdvertisementOutcome::Refreshed
            }
            LivenessState::Available => AdvertisementOutcome::Updated,
        };

        self.state = LivenessState::Available;
        self.available_index = index;
        self.entity_model_id = model;
        self.valid_time = adpdu.valid_time().max(MIN_VALID_TIME);
        self.last_seen = Some(now);
        outcome
    }

    /// Record an ENTITY_DEPARTING. Returns true if the entity was available.
    pub fn on_departing(&mut self) -> bool {
        let was_available = self.is_available();
        if self.state != LivenessState::Unknown {
            self.state = LivenessState::Departed;
        }
        was_available
    }

    /// Mark the entity departed if its valid time has elapsed at `now`.
    /// Returns true only on the transition, so each expiry is reported once.
    pub fn expire(&mut self, now: Instant) -> bool {
        if !self.is_available() {
            return false;
        }
        match self.deadline() {
            Some(deadline) if now > deadline => {
                self.state = LivenessState::Departed;
                true
            }
            _ => false,
        }
    }
}
