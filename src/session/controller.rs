// Practice session state machine
//
// Single writer: every mutation of matcher, aggregator and state goes
// through `&mut self`, so key presses and sweep ticks can never interleave
// inside the matcher. Callers supply session time explicitly.

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use super::state::{SessionState, SessionStatus};
use crate::config::{Config, MatchParams};
use crate::error::{PracticeError, Result};
use crate::feedback::{FeedbackAggregator, FeedbackEvent, FeedbackUnit, ReportContext, SessionReport};
use crate::input::{InputMessage, NoteEvent, Normalizer, RawMidiMessage};
use crate::matching::{MatchVerdict, Matcher};
use crate::score::{ExpectedSequence, Score};

pub struct PracticeSession {
    id: String,
    params: MatchParams,
    title: Option<String>,
    state: SessionState,
    normalizer: Normalizer,
    sequence: Option<Arc<ExpectedSequence>>,
    matcher: Option<Matcher>,
    aggregator: Option<FeedbackAggregator>,
    /// Subscribers registered before a sequence was loaded
    pending_subscribers: Vec<Sender<FeedbackEvent>>,
    started_at: Option<DateTime<Utc>>,
    report: Option<SessionReport>,
    /// Latest session time seen by the matcher
    last_time: Duration,
    /// Session time at which the current pause began
    paused_at: Duration,
}

impl PracticeSession {
    pub fn new(params: MatchParams) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            params,
            title: None,
            state: SessionState::new(),
            normalizer: Normalizer::new(),
            sequence: None,
            matcher: None,
            aggregator: None,
            pending_subscribers: Vec::new(),
            started_at: None,
            report: None,
            last_time: Duration::ZERO,
            paused_at: Duration::ZERO,
        }
    }

    /// Create a session from config, rejecting invalid settings
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.validate()?))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    pub fn sequence(&self) -> Option<&Arc<ExpectedSequence>> {
        self.sequence.as_ref()
    }

    /// Final report, once the session has finished
    pub fn report(&self) -> Option<&SessionReport> {
        self.report.as_ref()
    }

    /// Receive feedback units, status changes and the final report
    pub fn subscribe(&mut self) -> Receiver<FeedbackEvent> {
        match self.aggregator.as_mut() {
            Some(aggregator) => aggregator.subscribe(),
            None => {
                let (tx, rx) = unbounded();
                self.pending_subscribers.push(tx);
                rx
            }
        }
    }

    /// Build the expected sequence for `score` and prepare the matcher
    pub fn load(&mut self, score: &Score) -> Result<()> {
        let sequence = ExpectedSequence::build(score, &self.params)?;
        self.load_sequence(Arc::new(sequence))?;
        self.title = score.title.clone();
        Ok(())
    }

    /// Use an already built sequence
    pub fn load_sequence(&mut self, sequence: Arc<ExpectedSequence>) -> Result<()> {
        match self.state.status {
            SessionStatus::Idle => {}
            SessionStatus::Finished => return Err(PracticeError::SessionAlreadyFinished),
            SessionStatus::Running | SessionStatus::Paused => {
                return Err(PracticeError::SessionActive)
            }
        }
        if sequence.is_empty() {
            return Err(PracticeError::EmptyScore);
        }

        let mut subscribers = std::mem::take(&mut self.pending_subscribers);
        if let Some(mut previous) = self.aggregator.take() {
            subscribers.extend(previous.take_subscribers());
        }

        let mut aggregator = FeedbackAggregator::new(sequence.clone(), self.params.on_time);
        for tx in subscribers {
            aggregator.add_subscriber(tx);
        }

        self.matcher = Some(Matcher::new(sequence.clone(), self.params.lookahead));
        self.aggregator = Some(aggregator);
        self.state.total_notes = sequence.len();
        self.state.cursor = 0;
        self.sequence = Some(sequence);
        Ok(())
    }

    /// idle -> running
    pub fn start(&mut self) -> Result<()> {
        match self.state.status {
            SessionStatus::Idle => {}
            SessionStatus::Finished => return Err(PracticeError::SessionAlreadyFinished),
            SessionStatus::Running | SessionStatus::Paused => {
                return Err(PracticeError::SessionActive)
            }
        }
        if self.matcher.is_none() {
            return Err(PracticeError::NotReady);
        }

        self.started_at = Some(Utc::now());
        self.set_status(SessionStatus::Running);
        log::info!(
            "Practice session {} started ({} expected notes)",
            self.id,
            self.state.total_notes
        );
        Ok(())
    }

    /// running -> paused. Pausing a paused session is a no-op.
    pub fn pause(&mut self) -> Result<()> {
        match self.state.status {
            SessionStatus::Running => {
                self.paused_at = self.last_time;
                self.set_status(SessionStatus::Paused);
                log::info!("Practice session {} paused at note {}", self.id, self.state.cursor);
                Ok(())
            }
            SessionStatus::Paused => Ok(()),
            SessionStatus::Idle => Err(PracticeError::NotReady),
            SessionStatus::Finished => Err(PracticeError::SessionAlreadyFinished),
        }
    }

    /// paused -> running, continuing from the saved cursor
    pub fn resume(&mut self) -> Result<()> {
        match self.state.status {
            SessionStatus::Paused => {
                self.set_status(SessionStatus::Running);
                log::info!("Practice session {} resumed at note {}", self.id, self.state.cursor);
                Ok(())
            }
            SessionStatus::Running => Ok(()),
            SessionStatus::Idle => Err(PracticeError::NotReady),
            SessionStatus::Finished => Err(PracticeError::SessionAlreadyFinished),
        }
    }

    /// Route a message from an input source.
    ///
    /// A disconnect pauses the session and is returned as
    /// `DeviceDisconnected` so the caller can react.
    pub fn handle_message(
        &mut self,
        message: &InputMessage,
        received: Duration,
    ) -> Result<Vec<FeedbackUnit>> {
        match message {
            InputMessage::Midi {
                source, message, ..
            } => self.handle_raw(source, message, received),
            InputMessage::Disconnected { source } => {
                self.ensure_not_finished()?;
                log::warn!("Input source {} disconnected", source);
                if self.state.status == SessionStatus::Running {
                    self.pause()?;
                }
                Err(PracticeError::DeviceDisconnected(source.clone()))
            }
        }
    }

    /// Normalize and match one raw device message
    pub fn handle_raw(
        &mut self,
        source: &str,
        message: &RawMidiMessage,
        received: Duration,
    ) -> Result<Vec<FeedbackUnit>> {
        self.accepts_input()?;
        match self.normalizer.normalize(source, message, received) {
            Some(event) => self.handle_event(event),
            None => Ok(Vec::new()),
        }
    }

    /// Match one normalized note event.
    ///
    /// Overdue misses are swept first so verdicts come out in time order.
    /// While paused the matcher is left alone: a key press is an extra at the
    /// pause time and a release is ignored.
    pub fn handle_event(&mut self, event: NoteEvent) -> Result<Vec<FeedbackUnit>> {
        if !self.accepts_input()? {
            return Ok(self.record_paused(event).into_iter().collect());
        }

        let now = event.timestamp;
        self.last_time = self.last_time.max(now);
        let mut verdicts = self.matcher_mut()?.sweep(now);
        if let Some(verdict) = self.matcher_mut()?.on_event(&event) {
            verdicts.push(verdict);
        }
        self.apply(verdicts, now)
    }

    /// Periodic sweep: misses for notes whose window closed before `now`
    pub fn tick(&mut self, now: Duration) -> Result<Vec<FeedbackUnit>> {
        if !self.accepts_input()? {
            return Ok(Vec::new());
        }
        self.last_time = self.last_time.max(now);
        let verdicts = self.matcher_mut()?.sweep(now);
        self.apply(verdicts, now)
    }

    /// running|paused -> finished.
    ///
    /// Notes still waiting for a verdict are missed, the final report is
    /// produced and the matcher is released.
    pub fn stop(&mut self, now: Duration) -> Result<SessionReport> {
        match self.state.status {
            SessionStatus::Running | SessionStatus::Paused => {}
            SessionStatus::Idle => return Err(PracticeError::NotReady),
            SessionStatus::Finished => return Err(PracticeError::SessionAlreadyFinished),
        }

        let verdicts = self.matcher_mut()?.resolve_all(now);
        for verdict in verdicts {
            self.record(verdict);
        }
        self.sync_state();
        self.finish(now)
    }

    fn accepts_input(&self) -> Result<bool> {
        match self.state.status {
            SessionStatus::Running => Ok(true),
            SessionStatus::Paused => Ok(false),
            SessionStatus::Idle => Err(PracticeError::NotReady),
            SessionStatus::Finished => Err(PracticeError::SessionAlreadyFinished),
        }
    }

    fn ensure_not_finished(&self) -> Result<()> {
        if self.state.is_finished() {
            return Err(PracticeError::SessionAlreadyFinished);
        }
        Ok(())
    }

    fn matcher_mut(&mut self) -> Result<&mut Matcher> {
        self.matcher.as_mut().ok_or(PracticeError::NotReady)
    }

    fn apply(&mut self, verdicts: Vec<MatchVerdict>, now: Duration) -> Result<Vec<FeedbackUnit>> {
        let units: Vec<FeedbackUnit> = verdicts
            .into_iter()
            .filter_map(|verdict| self.record(verdict))
            .collect();
        self.sync_state();

        if self.matcher.as_ref().is_some_and(|m| m.is_complete()) {
            log::info!("Every expected note has a verdict; finishing session {}", self.id);
            self.finish(now)?;
        }

        Ok(units)
    }

    fn record_paused(&mut self, event: NoteEvent) -> Option<FeedbackUnit> {
        if !event.is_on() {
            return None;
        }
        log::debug!("Key {} pressed while paused", event.pitch);
        let verdict = MatchVerdict::Extra {
            event,
            at: self.paused_at,
        };
        let unit = self.record(verdict);
        self.sync_state();
        unit
    }

    fn record(&mut self, verdict: MatchVerdict) -> Option<FeedbackUnit> {
        self.aggregator.as_mut().and_then(|a| a.record(verdict))
    }

    fn sync_state(&mut self) {
        if let Some(matcher) = &self.matcher {
            self.state.cursor = matcher.cursor();
        }
        if let Some(aggregator) = &self.aggregator {
            self.state.accumulated_score = aggregator.hits();
            self.state.accumulated_misses = aggregator.misses();
            self.state.accumulated_extras = aggregator.extras();
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.state.status = status;
        if let Some(aggregator) = self.aggregator.as_mut() {
            aggregator.publish(FeedbackEvent::Status(status));
        }
    }

    fn finish(&mut self, now: Duration) -> Result<SessionReport> {
        self.set_status(SessionStatus::Finished);

        let context = ReportContext {
            id: self.id.clone(),
            started_at: self.started_at.unwrap_or_else(Utc::now),
            duration: now,
            title: self.title.clone(),
        };
        let report = self
            .aggregator
            .as_mut()
            .map(|aggregator| aggregator.finish(context))
            .ok_or(PracticeError::NotReady)?;

        // Matcher state is no longer needed once every note has a verdict
        self.matcher = None;

        log::info!(
            "Practice session {} finished: {} hits, {} misses, {} extras (accuracy {:.1}%)",
            self.id,
            report.hits,
            report.misses,
            report.extras,
            report.accuracy * 100.0
        );

        self.report = Some(report.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::NoteStatus;
    use crate::matching::MatchVerdict;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn session(notes: &[(u8, u64)], early: u64, late: u64) -> PracticeSession {
        let params = MatchParams {
            early: ms(early),
            late: ms(late),
            ..MatchParams::default()
        };
        let mut session = PracticeSession::new(params);
        session.load(&Score::from_millis(notes)).unwrap();
        session
    }

    #[test]
    fn test_start_requires_sequence() {
        let mut session = PracticeSession::new(MatchParams::default());
        assert!(matches!(session.start(), Err(PracticeError::NotReady)));
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_load_empty_score_fails() {
        let mut session = PracticeSession::new(MatchParams::default());
        assert!(matches!(
            session.load(&Score::default()),
            Err(PracticeError::EmptyScore)
        ));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = Config::default();
        config.matching.lookahead = 0;
        assert!(matches!(
            PracticeSession::from_config(&config),
            Err(PracticeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_events_before_start_rejected() {
        let mut session = session(&[(60, 0)], 100, 100);
        assert!(matches!(
            session.handle_event(NoteEvent::on(60, 90, ms(0))),
            Err(PracticeError::NotReady)
        ));
    }

    #[test]
    fn test_hit_then_miss_finishes() {
        let mut session = session(&[(60, 0), (64, 500)], 100, 100);
        session.start().unwrap();

        let units = session.handle_event(NoteEvent::on(60, 90, ms(50))).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(
            units[0].verdict,
            MatchVerdict::Hit {
                note: 0,
                pitch: 60,
                timing_delta_us: 50_000,
                at: ms(50)
            }
        );

        assert!(session.tick(ms(600)).unwrap().is_empty());
        let units = session.tick(ms(620)).unwrap();
        assert_eq!(units.len(), 1);
        assert!(matches!(units[0].verdict, MatchVerdict::Miss { note: 1, .. }));

        assert_eq!(session.status(), SessionStatus::Finished);
        let report = session.report().unwrap();
        assert_eq!(report.accuracy, 0.5);
        assert!(matches!(session.tick(ms(700)), Err(PracticeError::SessionAlreadyFinished)));
    }

    #[test]
    fn test_event_sweeps_overdue_notes_first() {
        let mut session = session(&[(60, 0), (64, 500)], 100, 100);
        session.start().unwrap();

        let units = session.handle_event(NoteEvent::on(64, 90, ms(480))).unwrap();
        assert_eq!(units.len(), 2);
        assert!(matches!(units[0].verdict, MatchVerdict::Miss { note: 0, .. }));
        assert!(matches!(units[1].verdict, MatchVerdict::Hit { note: 1, .. }));
        assert_eq!(session.status(), SessionStatus::Finished);
    }

    #[test]
    fn test_note_off_produces_no_feedback() {
        let mut session = session(&[(60, 0)], 100, 100);
        session.start().unwrap();
        assert!(session.handle_event(NoteEvent::off(60, ms(5))).unwrap().is_empty());
        assert_eq!(session.status(), SessionStatus::Running);
    }

    #[test]
    fn test_raw_messages_normalized() {
        let mut session = session(&[(60, 0)], 100, 100);
        session.start().unwrap();

        let cc = RawMidiMessage::new(0, &[0xB0, 64, 127]);
        assert!(session.handle_raw("piano", &cc, ms(1)).unwrap().is_empty());

        let on = RawMidiMessage::new(123_456, &[0x90, 60, 70]);
        let units = session.handle_raw("piano", &on, ms(20)).unwrap();
        assert_eq!(units[0].verdict.timing_delta_ms(), Some(20.0));
    }

    #[test]
    fn test_disconnect_pauses_and_resume_keeps_cursor() {
        let mut session = session(&[(60, 0), (62, 500), (64, 1000)], 100, 100);
        session.start().unwrap();
        session.handle_event(NoteEvent::on(60, 90, ms(0))).unwrap();
        let cursor = session.state().cursor;

        let disconnect = InputMessage::Disconnected {
            source: "piano".to_string(),
        };
        let result = session.handle_message(&disconnect, ms(100));
        assert!(matches!(result, Err(PracticeError::DeviceDisconnected(_))));
        assert_eq!(session.status(), SessionStatus::Paused);
        assert_eq!(session.state().cursor, cursor);

        // Matching and sweeping are suspended while paused
        let units = session.handle_event(NoteEvent::on(62, 90, ms(500))).unwrap();
        assert_eq!(units.len(), 1);
        assert!(matches!(units[0].verdict, MatchVerdict::Extra { .. }));
        assert!(session.handle_event(NoteEvent::off(62, ms(520))).unwrap().is_empty());
        assert!(session.tick(ms(5000)).unwrap().is_empty());
        assert_eq!(session.state().accumulated_misses, 0);
        assert_eq!(session.state().accumulated_extras, 1);

        session.resume().unwrap();
        assert_eq!(session.state().cursor, cursor);
        let units = session.handle_event(NoteEvent::on(62, 90, ms(510))).unwrap();
        assert!(units[0].verdict.is_hit());
        assert_eq!(session.state().accumulated_score, 2);
    }

    #[test]
    fn test_press_while_paused_is_extra_at_pause_time() {
        let mut session = session(&[(60, 0), (62, 500)], 100, 100);
        session.start().unwrap();
        session.handle_event(NoteEvent::on(60, 90, ms(30))).unwrap();
        session.tick(ms(200)).unwrap();
        session.pause().unwrap();

        let raw = RawMidiMessage::new(0, &[0x90, 62, 80]);
        let units = session.handle_raw("piano", &raw, ms(900)).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].verdict, MatchVerdict::Extra {
            event: NoteEvent::on(62, 80, ms(900)).with_source("piano"),
            at: ms(200),
        });
        // The expected 62 is still pending
        assert_eq!(session.state().cursor, 1);

        let report = session.stop(ms(900)).unwrap();
        assert_eq!(report.hits, 1);
        assert_eq!(report.misses, 1);
        assert_eq!(report.extras, 1);
    }

    #[test]
    fn test_stop_misses_remaining_notes() {
        let mut session = session(&[(60, 0), (62, 500), (64, 1000)], 100, 100);
        let rx = session.subscribe();
        session.start().unwrap();
        session.handle_event(NoteEvent::on(60, 90, ms(10))).unwrap();

        let report = session.stop(ms(200)).unwrap();
        assert_eq!(report.hits, 1);
        assert_eq!(report.misses, 2);
        assert!(report
            .note_results
            .iter()
            .all(|r| r.status != NoteStatus::Pending));
        assert_eq!(session.status(), SessionStatus::Finished);
        assert!(matches!(session.stop(ms(300)), Err(PracticeError::SessionAlreadyFinished)));
        assert!(matches!(session.resume(), Err(PracticeError::SessionAlreadyFinished)));

        let events: Vec<FeedbackEvent> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(FeedbackEvent::Status(SessionStatus::Running))));
        assert!(matches!(events.last(), Some(FeedbackEvent::Finished(_))));
        // Nothing is published after the final report
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_subscribe_before_load() {
        let mut session = PracticeSession::new(MatchParams::default());
        let rx = session.subscribe();
        session.load(&Score::from_millis(&[(60, 0)])).unwrap();
        session.start().unwrap();
        session.handle_event(NoteEvent::on(60, 90, ms(0))).unwrap();

        let events: Vec<FeedbackEvent> = rx.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, FeedbackEvent::Feedback(unit) if unit.verdict.is_hit())));
        assert!(events.iter().any(|e| matches!(e, FeedbackEvent::Finished(_))));
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut session = session(&[(60, 0)], 100, 100);
        session.start().unwrap();
        assert!(matches!(session.start(), Err(PracticeError::SessionActive)));
        assert!(matches!(
            session.load(&Score::from_millis(&[(62, 0)])),
            Err(PracticeError::SessionActive)
        ));
    }
}
