// Practice session status and counters

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Lifecycle: idle -> running -> (paused <-> running) -> finished
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, waiting for start
    Idle,
    /// Matching live input
    Running,
    /// Matching suspended (explicit pause or device disconnect)
    Paused,
    /// Terminal; report has been produced
    Finished,
}

/// Snapshot of a session's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    /// Index of the first expected note that may still need a verdict
    pub cursor: usize,
    pub total_notes: usize,
    /// Hits so far
    pub accumulated_score: u32,
    pub accumulated_misses: u32,
    pub accumulated_extras: u32,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            cursor: 0,
            total_notes: 0,
            accumulated_score: 0,
            accumulated_misses: 0,
            accumulated_extras: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    /// Check if the session can be started
    pub fn can_start(&self) -> bool {
        self.status == SessionStatus::Idle
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic session time that stands still while paused
#[derive(Debug, Clone)]
pub struct SessionClock {
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl SessionClock {
    pub fn start() -> Self {
        Self::start_at(Instant::now())
    }

    pub fn start_at(started: Instant) -> Self {
        Self {
            started,
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    pub fn now(&self) -> Duration {
        self.at(Instant::now())
    }

    /// Session time corresponding to a wall clock instant.
    /// Instants inside a pause map to the moment the pause began.
    pub fn at(&self, instant: Instant) -> Duration {
        let instant = match self.paused_at {
            Some(paused_at) => instant.min(paused_at),
            None => instant,
        };
        instant
            .saturating_duration_since(self.started)
            .saturating_sub(self.paused_total)
    }

    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn pause_at(&mut self, instant: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(instant);
        }
    }

    pub fn resume(&mut self) {
        self.resume_at(Instant::now());
    }

    pub fn resume_at(&mut self, instant: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += instant.saturating_duration_since(paused_at);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }
}
