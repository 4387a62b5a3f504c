//! Server health state machine.
//!
//! # States
//! - Unknown: no probe has completed yet; treated as healthy
//! - Healthy: server receives traffic
//! - Unhealthy: server excluded from load balancing, but kept in the pool
//!
//! # State Transitions
//! ```text
//! Unknown → Healthy | Unhealthy: first probe result
//! Healthy → Unhealthy: one failed probe
//! Unhealthy → Healthy: one successful probe
//! ```
//!
//! # Design Decisions
//! - No hysteresis: a single probe flips the state, favouring fast failure detection
//! - State is an atomic byte so the request path only performs a load
//! - Last check time is informational and behind its own small lock

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Per-server health, written by the health checker and read by the pool.
#[derive(Debug)]
pub struct HealthStatus {
    state: AtomicU8,
    last_check: Mutex<Option<SystemTime>>,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(HealthState::Unknown as u8),
            last_check: Mutex::new(None),
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    /// Unknown counts as healthy.
    pub fn is_available(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    /// Record a probe result. Returns the previous state when it changed.
    pub fn record(&self, healthy: bool) -> Option<HealthState> {
        let next = if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };
        *self
            .last_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(SystemTime::now());

        let previous = HealthState::from(self.state.swap(next as u8, Ordering::AcqRel));
        (previous != next).then_some(previous)
    }

    pub fn last_check(&self) -> Option<SystemTime> {
        *self
            .last_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_available() {
        let status = HealthStatus::new();
        assert_eq!(status.state(), HealthState::Unknown);
        assert!(status.is_available());
        assert!(status.last_check().is_none());
    }

    #[test]
    fn single_probe_flips_state() {
        let status = HealthStatus::new();

        assert_eq!(status.record(false), Some(HealthState::Unknown));
        assert!(!status.is_available());

        // Repeated failures are not transitions.
        assert_eq!(status.record(false), None);

        assert_eq!(status.record(true), Some(HealthState::Unhealthy));
        assert!(status.is_available());
        assert!(status.last_check().is_some());
    }
}
