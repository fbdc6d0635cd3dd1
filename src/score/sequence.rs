// Expected-note sequence with tolerance windows
//
// Built once per session and shared read-only (Arc) between the matcher and
// anything that wants to display progress.

use serde::Serialize;
use std::time::Duration;

use super::Score;
use crate::config::MatchParams;
use crate::error::{PracticeError, Result};

const MICROSECOND: Duration = Duration::from_micros(1);

/// A note the player is expected to hit, with its matchable window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedNote {
    /// Position in the sequence; verdicts refer to notes by this index
    pub index: usize,
    pub pitch: u8,
    pub expected_time: Duration,
    pub duration: Duration,
    /// Inclusive window bounds
    pub window_start: Duration,
    pub window_end: Duration,
}

impl ExpectedNote {
    pub fn window_contains(&self, t: Duration) -> bool {
        t >= self.window_start && t <= self.window_end
    }

    /// True once the whole window lies in the past
    pub fn has_expired(&self, now: Duration) -> bool {
        now > self.window_end
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpectedSequence {
    notes: Vec<ExpectedNote>,
}

impl ExpectedSequence {
    /// Order the score's notes by time (score order breaks ties) and assign
    /// tolerance windows.
    ///
    /// Consecutive notes of the same pitch at different times whose windows
    /// would overlap are split at the midpoint between their expected times,
    /// so a key press can only ever fall inside one of them. Exact duplicates
    /// keep identical windows and are resolved first-in-first-out by the matcher.
    ///
    /// Pitches above 127 are rejected with `ScoreParse`.
    pub fn build(score: &Score, params: &MatchParams) -> Result<Self> {
        if score.notes.is_empty() {
            return Err(PracticeError::EmptyScore);
        }

        let mut ordered: Vec<_> = score.notes.iter().collect();
        // Stable sort keeps chord notes in score order
        ordered.sort_by_key(|n| n.time);

        let mut notes: Vec<ExpectedNote> = Vec::with_capacity(ordered.len());
        // Per pitch: indices of the most recent notes, all sharing one expected time
        let mut latest_by_pitch: Vec<Vec<usize>> = vec![Vec::new(); 128];

        for (index, note) in ordered.into_iter().enumerate() {
            if note.pitch > 127 {
                return Err(PracticeError::ScoreParse(format!(
                    "note at {:?} has pitch {} outside 0-127",
                    note.time, note.pitch
                )));
            }
            let pitch = note.pitch;
            let mut expected = ExpectedNote {
                index,
                pitch,
                expected_time: note.time,
                duration: note.duration,
                window_start: note.time.saturating_sub(params.early),
                window_end: note.time + params.late,
            };

            let group = &mut latest_by_pitch[pitch as usize];
            match group.first().map(|&i| notes[i].clone()) {
                // Exact duplicate: share the window of the group
                Some(prev) if prev.expected_time == expected.expected_time => {
                    expected.window_start = prev.window_start;
                    expected.window_end = prev.window_end;
                }
                Some(prev) => {
                    if expected.window_start <= prev.window_end {
                        let boundary = prev.expected_time
                            + (expected.expected_time - prev.expected_time) / 2;
                        for &i in group.iter() {
                            notes[i].window_end = notes[i].window_end.min(boundary);
                        }
                        expected.window_start =
                            expected.window_start.max(boundary + MICROSECOND);
                    }
                    group.clear();
                }
                None => {}
            }

            group.push(index);
            notes.push(expected);
        }

        log::debug!("Built expected sequence with {} notes", notes.len());

        Ok(Self { notes })
    }

    pub fn notes(&self) -> &[ExpectedNote] {
        &self.notes
    }

    pub fn get(&self, index: usize) -> Option<&ExpectedNote> {
        self.notes.get(index)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Time after which every window has closed
    pub fn end_time(&self) -> Duration {
        self.notes
            .iter()
            .map(|n| n.window_end)
            .max()
            .unwrap_or_default()
    }
}
