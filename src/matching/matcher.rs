// Single-pass matcher over a bounded look-ahead window
//
// Key presses are resolved immediately against the active window. Notes the
// player never plays are resolved by the clock-driven sweep. Nothing ever
// backtracks behind the cursor.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use super::{signed_delta_us, MatchVerdict};
use crate::input::NoteEvent;
use crate::score::ExpectedSequence;

pub struct Matcher {
    sequence: Arc<ExpectedSequence>,
    /// One flag per expected note; set once it has a verdict
    consumed: Vec<bool>,
    /// First note that may still need a verdict
    cursor: usize,
    lookahead: usize,
    resolved: usize,
}

impl Matcher {
    pub fn new(sequence: Arc<ExpectedSequence>, lookahead: usize) -> Self {
        let len = sequence.len();
        Self {
            sequence,
            consumed: vec![false; len],
            cursor: 0,
            lookahead: lookahead.max(1),
            resolved: 0,
        }
    }

    pub fn sequence(&self) -> &Arc<ExpectedSequence> {
        &self.sequence
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Indices of the notes currently eligible for matching
    pub fn active_window(&self) -> Range<usize> {
        let end = (self.cursor + self.lookahead).min(self.sequence.len());
        self.cursor..end
    }

    pub fn is_consumed(&self, index: usize) -> bool {
        self.consumed.get(index).copied().unwrap_or(false)
    }

    /// Number of expected notes still waiting for a verdict
    pub fn remaining(&self) -> usize {
        self.sequence.len() - self.resolved
    }

    /// Every expected note has a verdict
    pub fn is_complete(&self) -> bool {
        self.resolved == self.sequence.len()
    }

    /// Resolve one incoming event.
    ///
    /// Note-offs are accepted and ignored. A note-on hits the earliest
    /// unconsumed expected note of the same pitch whose window contains the
    /// event; otherwise it is an extra. Never fails.
    pub fn on_event(&mut self, event: &NoteEvent) -> Option<MatchVerdict> {
        if !event.is_on() {
            return None;
        }

        let now = event.timestamp;
        let candidate = self.active_window().find(|&i| {
            let note = &self.sequence.notes()[i];
            !self.consumed[i] && note.pitch == event.pitch && note.window_contains(now)
        });

        let verdict = match candidate {
            Some(index) => {
                let note = &self.sequence.notes()[index];
                let verdict = MatchVerdict::Hit {
                    note: index,
                    pitch: note.pitch,
                    timing_delta_us: signed_delta_us(now, note.expected_time),
                    at: now,
                };
                self.consume(index);
                verdict
            }
            None => MatchVerdict::Extra {
                event: event.clone(),
                at: now,
            },
        };

        self.advance(now);
        Some(verdict)
    }

    /// Emit a miss for every note in the active window whose tolerance
    /// window has fully elapsed at `now`, in expected order.
    pub fn sweep(&mut self, now: Duration) -> Vec<MatchVerdict> {
        let mut misses = Vec::new();

        loop {
            for index in self.active_window() {
                let note = &self.sequence.notes()[index];
                if !self.consumed[index] && note.has_expired(now) {
                    misses.push(MatchVerdict::Miss {
                        note: index,
                        pitch: note.pitch,
                        at: now,
                    });
                    self.consume(index);
                }
            }

            // Advancing may pull more already-expired notes into the window
            let before = self.cursor;
            self.advance(now);
            if self.cursor == before {
                break;
            }
        }

        misses
    }

    /// Miss every note that is still unresolved (used when a session stops early)
    pub fn resolve_all(&mut self, now: Duration) -> Vec<MatchVerdict> {
        let mut misses = Vec::new();
        for index in self.cursor..self.sequence.len() {
            if !self.consumed[index] {
                let note = &self.sequence.notes()[index];
                misses.push(MatchVerdict::Miss {
                    note: index,
                    pitch: note.pitch,
                    at: now,
                });
                self.consume(index);
            }
        }
        self.cursor = self.sequence.len();
        misses
    }

    fn consume(&mut self, index: usize) {
        if !self.consumed[index] {
            self.consumed[index] = true;
            self.resolved += 1;
        }
    }

    /// Move the cursor past verdicted notes whose window has opened
    fn advance(&mut self, now: Duration) {
        while self.cursor < self.sequence.len()
            && self.consumed[self.cursor]
            && self.sequence.notes()[self.cursor].window_start <= now
        {
            self.cursor += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchParams;
    use crate::score::Score;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn matcher(notes: &[(u8, u64)], early: u64, late: u64, lookahead: usize) -> Matcher {
        let params = MatchParams {
            early: ms(early),
            late: ms(late),
            lookahead,
            ..MatchParams::default()
        };
        let sequence = ExpectedSequence::build(&Score::from_millis(notes), &params).unwrap();
        Matcher::new(Arc::new(sequence), lookahead)
    }

    #[test]
    fn test_hit_then_sweep_miss() {
        let mut m = matcher(&[(60, 0), (64, 500)], 100, 100, 8);

        let verdict = m.on_event(&NoteEvent::on(60, 90, ms(50))).unwrap();
        assert_eq!(
            verdict,
            MatchVerdict::Hit {
                note: 0,
                pitch: 60,
                timing_delta_us: 50_000,
                at: ms(50)
            }
        );

        // Window of the second note closes at 600ms (inclusive)
        assert!(m.sweep(ms(600)).is_empty());
        let misses = m.sweep(ms(650));
        assert_eq!(misses, vec![MatchVerdict::Miss { note: 1, pitch: 64, at: ms(650) }]);
        assert!(m.is_complete());
        assert_eq!(m.cursor(), 2);
    }

    #[test]
    fn test_duplicate_pitch_fifo() {
        let mut m = matcher(&[(60, 0), (60, 0)], 100, 100, 8);

        let verdict = m.on_event(&NoteEvent::on(60, 90, ms(10))).unwrap();
        assert_eq!(verdict.note(), Some(0));
        assert!(m.is_consumed(0));
        assert!(!m.is_consumed(1));

        let misses = m.sweep(ms(101));
        assert_eq!(misses.len(), 1);
        assert_eq!(misses[0].note(), Some(1));
    }

    #[test]
    fn test_wrong_pitch_is_extra() {
        let mut m = matcher(&[(60, 0), (64, 0)], 100, 100, 8);

        let verdict = m.on_event(&NoteEvent::on(67, 90, ms(10))).unwrap();
        assert!(matches!(verdict, MatchVerdict::Extra { .. }));
        assert!(!m.is_consumed(0));
        assert!(!m.is_consumed(1));
        assert_eq!(m.remaining(), 2);
    }

    #[test]
    fn test_chord_notes_independent() {
        let mut m = matcher(&[(60, 0), (64, 0), (67, 0)], 100, 100, 8);

        assert_eq!(m.on_event(&NoteEvent::on(67, 90, ms(5))).unwrap().note(), Some(2));
        assert_eq!(m.on_event(&NoteEvent::on(60, 90, ms(8))).unwrap().note(), Some(0));
        // Cursor moves past 0 but waits at the unresolved 64
        assert_eq!(m.cursor(), 1);
        assert_eq!(m.on_event(&NoteEvent::on(64, 90, ms(12))).unwrap().note(), Some(1));
        assert_eq!(m.cursor(), 3);
        assert!(m.is_complete());
    }

    #[test]
    fn test_second_press_of_consumed_note_is_extra() {
        let mut m = matcher(&[(60, 0)], 100, 100, 8);
        assert!(m.on_event(&NoteEvent::on(60, 90, ms(0))).unwrap().is_hit());
        let again = m.on_event(&NoteEvent::on(60, 90, ms(20))).unwrap();
        assert!(matches!(again, MatchVerdict::Extra { .. }));
    }

    #[test]
    fn test_outside_window_is_extra() {
        let mut m = matcher(&[(60, 500)], 100, 100, 8);
        let early = m.on_event(&NoteEvent::on(60, 90, ms(350))).unwrap();
        assert!(matches!(early, MatchVerdict::Extra { .. }));

        let hit = m.on_event(&NoteEvent::on(60, 90, ms(420))).unwrap();
        assert_eq!(hit.timing_delta_ms(), Some(-80.0));
    }

    #[test]
    fn test_note_off_ignored() {
        let mut m = matcher(&[(60, 0)], 100, 100, 8);
        assert!(m.on_event(&NoteEvent::off(60, ms(10))).is_none());
        assert!(!m.is_consumed(0));
    }

    #[test]
    fn test_lookahead_bounds_matching() {
        let mut m = matcher(&[(60, 0), (62, 0), (64, 0)], 100, 100, 2);
        assert_eq!(m.active_window(), 0..2);

        // 64 is outside the active window until the cursor moves
        let verdict = m.on_event(&NoteEvent::on(64, 90, ms(5))).unwrap();
        assert!(matches!(verdict, MatchVerdict::Extra { .. }));

        m.on_event(&NoteEvent::on(60, 90, ms(6)));
        assert_eq!(m.active_window(), 1..3);
        assert_eq!(m.on_event(&NoteEvent::on(64, 90, ms(7))).unwrap().note(), Some(2));
    }

    #[test]
    fn test_sweep_walks_past_lookahead() {
        let mut m = matcher(&[(60, 0), (62, 100), (64, 200), (65, 300)], 50, 50, 1);
        let misses = m.sweep(ms(1000));
        let notes: Vec<Option<usize>> = misses.iter().map(|v| v.note()).collect();
        assert_eq!(notes, vec![Some(0), Some(1), Some(2), Some(3)]);
        assert!(m.is_complete());
    }

    #[test]
    fn test_cursor_monotonic() {
        let mut m = matcher(&[(60, 0), (62, 300), (64, 600)], 100, 100, 8);
        let mut last = m.cursor();
        for t in [0u64, 50, 120, 290, 310, 500, 700, 800] {
            m.on_event(&NoteEvent::on(62, 90, ms(t)));
            m.sweep(ms(t));
            assert!(m.cursor() >= last);
            last = m.cursor();
        }
    }

    #[test]
    fn test_resolve_all() {
        let mut m = matcher(&[(60, 0), (62, 300), (64, 600)], 100, 100, 8);
        m.on_event(&NoteEvent::on(62, 90, ms(300)));
        let misses = m.resolve_all(ms(320));
        let notes: Vec<Option<usize>> = misses.iter().map(|v| v.note()).collect();
        assert_eq!(notes, vec![Some(0), Some(2)]);
        assert!(m.is_complete());
        assert!(m.resolve_all(ms(330)).is_empty());
    }
}
