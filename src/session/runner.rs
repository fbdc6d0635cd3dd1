// Drives a practice session from a live input source on background threads
//
// One worker thread owns the session and is its only writer. Input messages,
// control requests and the sweep timer are multiplexed onto that thread, so
// matching and sweeping never race.

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::controller::PracticeSession;
use super::state::{SessionClock, SessionState, SessionStatus};
use crate::config::Config;
use crate::devices::health_check_loop;
use crate::error::{PracticeError, Result};
use crate::feedback::{FeedbackEvent, SessionReport};
use crate::input::{InputMessage, InputSource};
use crate::score::Score;

/// Timer settings for a runner
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    pub sweep_interval: Duration,
    pub health_check_interval: Duration,
}

impl RunnerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sweep_interval: config.sweep_interval(),
            health_check_interval: config.health_check_interval(),
        }
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

enum Control {
    Pause(Sender<Result<()>>),
    Resume(Sender<Result<()>>),
    Subscribe(Sender<Receiver<FeedbackEvent>>),
    Stop,
}

pub struct SessionRunner {
    control: Sender<Control>,
    state: Arc<Mutex<SessionState>>,
    worker: Option<JoinHandle<Result<SessionReport>>>,
    health_stop: Arc<AtomicBool>,
    health: Option<JoinHandle<()>>,
}

impl SessionRunner {
    /// Start `session` (already loaded) and begin consuming `source`.
    ///
    /// Session time zero is the moment the source is opened.
    pub fn start(
        mut session: PracticeSession,
        mut source: Box<dyn InputSource>,
        options: RunnerOptions,
    ) -> Result<Self> {
        session.start()?;

        let (input_tx, input_rx) = unbounded();
        let clock = SessionClock::start();
        source.open(input_tx.clone())?;

        let health_stop = Arc::new(AtomicBool::new(false));
        let health = match source.port_name() {
            Some(port_name) => {
                let port_name = port_name.to_string();
                let sink = input_tx.clone();
                let stop_flag = health_stop.clone();
                let interval = options.health_check_interval;
                Some(
                    std::thread::Builder::new()
                        .name("etude-health".to_string())
                        .spawn(move || health_check_loop(port_name, interval, sink, stop_flag))?,
                )
            }
            None => None,
        };

        let state = Arc::new(Mutex::new(session.state().clone()));
        let (control_tx, control_rx) = unbounded();

        let worker = Worker {
            session,
            clock,
            source,
            source_open: true,
            input_tx,
            input_rx,
            state: state.clone(),
        };
        let sweep_interval = options.sweep_interval;
        let handle = std::thread::Builder::new()
            .name("etude-session".to_string())
            .spawn(move || worker.run(control_rx, sweep_interval))?;

        Ok(Self {
            control: control_tx,
            state,
            worker: Some(handle),
            health_stop,
            health,
        })
    }

    /// Build a session for `score` from config and start it
    pub fn from_config(
        config: &Config,
        score: &Score,
        source: Box<dyn InputSource>,
    ) -> Result<Self> {
        let mut session = PracticeSession::from_config(config)?;
        session.load(score)?;
        Self::start(session, source, RunnerOptions::from_config(config))
    }

    /// Latest state published by the worker
    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Subscribe to feedback from now on
    pub fn subscribe(&self) -> Result<Receiver<FeedbackEvent>> {
        let (tx, rx) = bounded(1);
        self.control
            .send(Control::Subscribe(tx))
            .map_err(|_| PracticeError::SessionAlreadyFinished)?;
        rx.recv().map_err(|_| PracticeError::SessionAlreadyFinished)
    }

    pub fn pause(&self) -> Result<()> {
        self.request(Control::Pause)
    }

    /// Resume after a pause or a disconnect; reopens the input source
    pub fn resume(&self) -> Result<()> {
        self.request(Control::Resume)
    }

    /// Finish now, missing any notes still pending
    pub fn stop(mut self) -> Result<SessionReport> {
        // Fails only if the worker already finished on its own
        let _ = self.control.send(Control::Stop);
        self.join()
    }

    /// Block until every expected note has a verdict
    pub fn wait(mut self) -> Result<SessionReport> {
        self.join()
    }

    fn request(&self, make: fn(Sender<Result<()>>) -> Control) -> Result<()> {
        let (tx, rx) = bounded(1);
        self.control
            .send(make(tx))
            .map_err(|_| PracticeError::SessionAlreadyFinished)?;
        rx.recv().map_err(|_| PracticeError::SessionAlreadyFinished)?
    }

    fn join(&mut self) -> Result<SessionReport> {
        let result = match self.worker.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(PracticeError::Midi("session worker panicked".to_string()))),
            None => Err(PracticeError::SessionAlreadyFinished),
        };

        self.health_stop.store(true, Ordering::Relaxed);
        if let Some(health) = self.health.take() {
            let _ = health.join();
        }
        result
    }
}

impl Drop for SessionRunner {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.control.send(Control::Stop);
            let _ = self.join();
        }
    }
}

struct Worker {
    session: PracticeSession,
    clock: SessionClock,
    source: Box<dyn InputSource>,
    source_open: bool,
    input_tx: Sender<InputMessage>,
    input_rx: Receiver<InputMessage>,
    state: Arc<Mutex<SessionState>>,
}

impl Worker {
    fn run(mut self, control_rx: Receiver<Control>, sweep_interval: Duration) -> Result<SessionReport> {
        let ticker = crossbeam_channel::tick(sweep_interval);
        let input_rx = self.input_rx.clone();

        loop {
            select! {
                recv(input_rx) -> message => {
                    if let Ok(message) = message {
                        self.on_input(message);
                    }
                }
                recv(control_rx) -> control => match control {
                    Ok(Control::Pause(reply)) => {
                        let _ = reply.send(self.pause());
                    }
                    Ok(Control::Resume(reply)) => {
                        let _ = reply.send(self.resume());
                    }
                    Ok(Control::Subscribe(reply)) => {
                        let _ = reply.send(self.session.subscribe());
                    }
                    Ok(Control::Stop) | Err(_) => return self.stop(),
                },
                recv(ticker) -> _ => {
                    if self.session.status() == SessionStatus::Running {
                        let now = self.clock.now();
                        if let Err(e) = self.session.tick(now) {
                            log::warn!("Sweep failed: {}", e);
                        }
                    }
                }
            }

            self.publish_state();

            if let Some(report) = self.session.report().cloned() {
                self.close_source();
                return Ok(report);
            }
        }
    }

    fn on_input(&mut self, message: InputMessage) {
        let received = match &message {
            InputMessage::Midi { received_at, .. } => self.clock.at(*received_at),
            InputMessage::Disconnected { .. } => self.clock.now(),
        };

        match self.session.handle_message(&message, received) {
            Ok(units) => {
                for unit in &units {
                    log::trace!("{:?}", unit.verdict);
                }
            }
            Err(PracticeError::DeviceDisconnected(name)) => {
                self.clock.pause();
                self.close_source();
                log::warn!(
                    "Session paused at note {}: {} disconnected",
                    self.session.state().cursor,
                    name
                );
            }
            Err(e) => log::warn!("Dropped input message: {}", e),
        }
    }

    fn pause(&mut self) -> Result<()> {
        // Messages received before the request still count
        let pending: Vec<InputMessage> = self.input_rx.try_iter().collect();
        for message in pending {
            self.on_input(message);
            if self.session.status() != SessionStatus::Running {
                break;
            }
        }

        self.session.pause()?;
        self.clock.pause();
        self.close_source();
        self.publish_state();
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if self.session.status() != SessionStatus::Paused {
            return self.session.resume();
        }

        // Presses that arrived while paused still get their extra verdicts
        let pending: Vec<InputMessage> = self.input_rx.try_iter().collect();
        for message in pending {
            self.on_input(message);
        }

        if !self.source_open {
            self.source.open(self.input_tx.clone())?;
            self.source_open = true;
        }
        self.session.resume()?;
        self.clock.resume();
        self.publish_state();
        Ok(())
    }

    fn stop(&mut self) -> Result<SessionReport> {
        self.close_source();
        let now = self.clock.now();
        let report = match self.session.report().cloned() {
            Some(report) => Ok(report),
            None => self.session.stop(now),
        };
        self.publish_state();
        report
    }

    fn close_source(&mut self) {
        if self.source_open {
            self.source.close();
            self.source_open = false;
        }
    }

    fn publish_state(&self) {
        *self.state.lock() = self.session.state().clone();
    }
}
