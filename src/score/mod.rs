// Score ingestion and the expected-note model built from it

pub mod midi;
pub mod sequence;

pub use midi::{load_performance, load_score, parse_score, TimedMessage};
pub use sequence::{ExpectedNote, ExpectedSequence};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A note the score asks for: (pitch, time, duration)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreNote {
    pub pitch: u8,
    /// Offset from the start of the piece
    pub time: Duration,
    pub duration: Duration,
}

impl ScoreNote {
    pub fn new(pitch: u8, time: Duration, duration: Duration) -> Self {
        Self {
            pitch,
            time,
            duration,
        }
    }
}

/// Ordered list of notes to be played
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Score {
    pub title: Option<String>,
    pub notes: Vec<ScoreNote>,
}

impl Score {
    pub fn from_notes(notes: Vec<ScoreNote>) -> Self {
        Self { title: None, notes }
    }

    /// Build from (pitch, time in ms) pairs with a nominal quarter-second duration
    pub fn from_millis(notes: &[(u8, u64)]) -> Self {
        Self::from_notes(
            notes
                .iter()
                .map(|&(pitch, ms)| {
                    ScoreNote::new(pitch, Duration::from_millis(ms), Duration::from_millis(250))
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
