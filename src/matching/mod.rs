// Matching live note events against the expected sequence

pub mod matcher;

pub use matcher::Matcher;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::input::NoteEvent;

/// Outcome of matching, produced once per resolved key press or expired note
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum MatchVerdict {
    /// An expected note was played inside its window
    Hit {
        note: usize,
        pitch: u8,
        /// Signed offset from the expected time (positive = late)
        timing_delta_us: i64,
        at: Duration,
    },
    /// An expected note's window closed without a matching key press
    Miss { note: usize, pitch: u8, at: Duration },
    /// A key press that matched nothing
    Extra { event: NoteEvent, at: Duration },
}

impl MatchVerdict {
    /// Time of the event or sweep tick that produced this verdict
    pub fn at(&self) -> Duration {
        match self {
            MatchVerdict::Hit { at, .. } | MatchVerdict::Miss { at, .. } | MatchVerdict::Extra { at, .. } => *at,
        }
    }

    /// Index of the expected note this verdict resolves, if any
    pub fn note(&self) -> Option<usize> {
        match self {
            MatchVerdict::Hit { note, .. } | MatchVerdict::Miss { note, .. } => Some(*note),
            MatchVerdict::Extra { .. } => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, MatchVerdict::Hit { .. })
    }

    pub fn timing_delta_ms(&self) -> Option<f64> {
        match self {
            MatchVerdict::Hit { timing_delta_us, .. } => Some(*timing_delta_us as f64 / 1000.0),
            _ => None,
        }
    }
}

/// Coarse timing of a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingClass {
    Early,
    OnTime,
    Late,
}

impl TimingClass {
    pub fn classify(timing_delta_us: i64, on_time: Duration) -> Self {
        let threshold = on_time.as_micros() as i64;
        if timing_delta_us.abs() <= threshold {
            TimingClass::OnTime
        } else if timing_delta_us < 0 {
            TimingClass::Early
        } else {
            TimingClass::Late
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimingClass::Early => "early",
            TimingClass::OnTime => "on time",
            TimingClass::Late => "late",
        }
    }
}

/// Signed difference `a - b` in microseconds
pub fn signed_delta_us(a: Duration, b: Duration) -> i64 {
    if a >= b {
        (a - b).as_micros() as i64
    } else {
        -((b - a).as_micros() as i64)
    }
}
