// Turns the verdict stream into running scores and pushes feedback to subscribers

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::report::{feedback_messages, timing_tendency, NoteResult, NoteStatus, SessionReport};
use crate::matching::{MatchVerdict, TimingClass};
use crate::score::ExpectedSequence;
use crate::session::SessionStatus;

/// Incremental feedback for one verdict
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackUnit {
    pub verdict: MatchVerdict,
    pub running_accuracy: f64,
    pub hits: u32,
    pub misses: u32,
    pub extras: u32,
    /// Timing class of a hit
    pub timing: Option<TimingClass>,
    /// Consecutive hits, including this one
    pub streak: u32,
}

/// Everything pushed to subscribers, in order
#[derive(Debug, Clone)]
pub enum FeedbackEvent {
    Feedback(FeedbackUnit),
    Status(SessionStatus),
    Finished(SessionReport),
}

/// Session metadata that only the controller knows
pub struct ReportContext {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub title: Option<String>,
}

pub struct FeedbackAggregator {
    sequence: Arc<ExpectedSequence>,
    on_time: Duration,
    hits: u32,
    misses: u32,
    extras: u32,
    streak: u32,
    best_streak: u32,
    early_hits: u32,
    on_time_hits: u32,
    late_hits: u32,
    delta_sum_us: i64,
    abs_delta_sum_us: u64,
    /// Verdict per expected note: Some(delta) for hits, None for misses
    resolved: Vec<Option<Option<i64>>>,
    subscribers: Vec<Sender<FeedbackEvent>>,
}

impl FeedbackAggregator {
    pub fn new(sequence: Arc<ExpectedSequence>, on_time: Duration) -> Self {
        let len = sequence.len();
        Self {
            sequence,
            on_time,
            hits: 0,
            misses: 0,
            extras: 0,
            streak: 0,
            best_streak: 0,
            early_hits: 0,
            on_time_hits: 0,
            late_hits: 0,
            delta_sum_us: 0,
            abs_delta_sum_us: 0,
            resolved: vec![None; len],
            subscribers: Vec::new(),
        }
    }

    /// Register a consumer of the feedback stream
    pub fn subscribe(&mut self) -> Receiver<FeedbackEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Attach an existing channel (e.g. one created before the sequence was known)
    pub fn add_subscriber(&mut self, tx: Sender<FeedbackEvent>) {
        self.subscribers.push(tx);
    }

    pub fn take_subscribers(&mut self) -> Vec<Sender<FeedbackEvent>> {
        std::mem::take(&mut self.subscribers)
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn extras(&self) -> u32 {
        self.extras
    }

    /// hits / (hits + misses + extras); 0 before any verdict
    pub fn accuracy(&self) -> f64 {
        accuracy(self.hits, self.misses, self.extras)
    }

    /// Fold one verdict into the running totals and publish it.
    ///
    /// Verdicts may arrive slightly out of order (sweep misses interleaved
    /// with event hits). A second verdict for an expected note that already
    /// has one is dropped, so no note is ever counted twice.
    pub fn record(&mut self, verdict: MatchVerdict) -> Option<FeedbackUnit> {
        let mut timing = None;

        match &verdict {
            MatchVerdict::Hit {
                note,
                timing_delta_us,
                ..
            } => {
                if !self.mark_resolved(*note, Some(*timing_delta_us)) {
                    return None;
                }
                self.hits += 1;
                self.streak += 1;
                self.best_streak = self.best_streak.max(self.streak);
                self.delta_sum_us += timing_delta_us;
                self.abs_delta_sum_us += timing_delta_us.unsigned_abs();

                let class = TimingClass::classify(*timing_delta_us, self.on_time);
                match class {
                    TimingClass::Early => self.early_hits += 1,
                    TimingClass::OnTime => self.on_time_hits += 1,
                    TimingClass::Late => self.late_hits += 1,
                }
                timing = Some(class);
            }
            MatchVerdict::Miss { note, .. } => {
                if !self.mark_resolved(*note, None) {
                    return None;
                }
                self.misses += 1;
                self.streak = 0;
            }
            MatchVerdict::Extra { .. } => {
                self.extras += 1;
                self.streak = 0;
            }
        }

        log::debug!(
            "Verdict {:?} -> accuracy {:.3} ({} hits, {} misses, {} extras)",
            verdict,
            self.accuracy(),
            self.hits,
            self.misses,
            self.extras
        );

        let unit = FeedbackUnit {
            verdict,
            running_accuracy: self.accuracy(),
            hits: self.hits,
            misses: self.misses,
            extras: self.extras,
            timing,
            streak: self.streak,
        };
        self.publish(FeedbackEvent::Feedback(unit.clone()));
        Some(unit)
    }

    /// Push an event to every live subscriber, dropping closed ones
    pub fn publish(&mut self, event: FeedbackEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Build the final summary and push it to subscribers
    pub fn finish(&mut self, context: ReportContext) -> SessionReport {
        let mean_delta_ms = if self.hits > 0 {
            self.delta_sum_us as f64 / self.hits as f64 / 1000.0
        } else {
            0.0
        };
        let mean_abs_delta_ms = if self.hits > 0 {
            self.abs_delta_sum_us as f64 / self.hits as f64 / 1000.0
        } else {
            0.0
        };

        let note_results = self
            .sequence
            .notes()
            .iter()
            .zip(self.resolved.iter())
            .map(|(note, resolved)| {
                let (status, timing_delta_ms) = match resolved {
                    Some(Some(delta_us)) => (NoteStatus::Hit, Some(*delta_us as f64 / 1000.0)),
                    Some(None) => (NoteStatus::Missed, None),
                    None => (NoteStatus::Pending, None),
                };
                NoteResult {
                    index: note.index,
                    pitch: note.pitch,
                    expected_time_ms: note.expected_time.as_secs_f64() * 1000.0,
                    status,
                    timing_delta_ms,
                }
            })
            .collect();

        let on_time_ms = self.on_time.as_secs_f64() * 1000.0;
        let mut report = SessionReport {
            id: context.id,
            started_at: context.started_at,
            duration_secs: context.duration.as_secs_f64(),
            title: context.title,
            total_notes: self.sequence.len() as u32,
            hits: self.hits,
            misses: self.misses,
            extras: self.extras,
            accuracy: self.accuracy(),
            mean_timing_delta_ms: mean_delta_ms,
            mean_abs_timing_delta_ms: mean_abs_delta_ms,
            early_hits: self.early_hits,
            on_time_hits: self.on_time_hits,
            late_hits: self.late_hits,
            best_streak: self.best_streak,
            timing_tendency: timing_tendency(mean_delta_ms, on_time_ms).to_string(),
            feedback: Vec::new(),
            note_results,
        };
        report.feedback = feedback_messages(&report);

        self.publish(FeedbackEvent::Finished(report.clone()));
        report
    }

    fn mark_resolved(&mut self, note: usize, delta_us: Option<i64>) -> bool {
        let Some(slot) = self.resolved.get_mut(note) else {
            log::warn!("Ignoring verdict for unknown expected note {}", note);
            return false;
        };
        if slot.is_some() {
            log::warn!("Ignoring duplicate verdict for expected note {}", note);
            return false;
        }
        *slot = Some(delta_us);
        true
    }
}

/// Accuracy from verdict counts; always within [0, 1]
pub fn accuracy(hits: u32, misses: u32, extras: u32) -> f64 {
    let total = hits as u64 + misses as u64 + extras as u64;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
