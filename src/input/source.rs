// Input sources: live MIDI ports and recorded performances

use crossbeam_channel::Sender;
use midir::{Ignore, MidiInput, MidiInputConnection};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::message::{InputMessage, RawMidiMessage};
use crate::devices::{find_midi_device, MidiDevice};
use crate::error::{PracticeError, Result};
use crate::score::{load_performance, TimedMessage};

/// Something that produces raw MIDI messages for a session.
///
/// `open` starts delivery into `sink`; `close` stops it. After `close`
/// returns no further messages are sent. A closed source may be opened again.
pub trait InputSource: Send {
    fn name(&self) -> &str;

    fn open(&mut self, sink: Sender<InputMessage>) -> Result<()>;

    fn close(&mut self);

    /// System port name to watch for disconnection, if any
    fn port_name(&self) -> Option<&str> {
        None
    }
}

/// Live input from a midir port
pub struct MidiPortSource {
    device: MidiDevice,
    connection: Option<MidiInputConnection<()>>,
}

impl MidiPortSource {
    pub fn new(device: MidiDevice) -> Self {
        Self {
            device,
            connection: None,
        }
    }

    /// Open the first port whose name contains `name_contains`
    pub fn find(name_contains: Option<&str>) -> Result<Self> {
        Ok(Self::new(find_midi_device(name_contains)?))
    }

    pub fn device(&self) -> &MidiDevice {
        &self.device
    }
}

impl InputSource for MidiPortSource {
    fn name(&self) -> &str {
        &self.device.name
    }

    fn open(&mut self, sink: Sender<InputMessage>) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let mut midi_in =
            MidiInput::new("etude-input").map_err(|e| PracticeError::Midi(e.to_string()))?;
        midi_in.ignore(Ignore::All);

        // Port indices shift when devices come and go; look the port up by name
        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| midi_in.port_name(p).ok().as_deref() == Some(self.device.name.as_str()))
            .ok_or_else(|| PracticeError::DeviceNotFound(self.device.name.clone()))?
            .clone();

        let source = self.device.name.clone();
        let connection = midi_in
            .connect(
                &port,
                "etude-practice",
                move |timestamp, data, _| {
                    let received_at = Instant::now();
                    // A closed receiver means the session is gone
                    let _ = sink.send(InputMessage::Midi {
                        source: source.clone(),
                        message: RawMidiMessage::new(timestamp, data),
                        received_at,
                    });
                },
                (),
            )
            .map_err(|e| PracticeError::Midi(format!("Failed to connect to MIDI port: {}", e)))?;

        self.connection = Some(connection);
        log::info!("Listening on MIDI port {}", self.device.name);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            log::info!("Closed MIDI port {}", self.device.name);
        }
    }

    fn port_name(&self) -> Option<&str> {
        Some(&self.device.name)
    }
}

impl Drop for MidiPortSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Position within a replay, kept across close/open
#[derive(Debug, Default)]
struct ReplayPosition {
    next: usize,
    /// Performance time already played back
    elapsed: Duration,
}

/// Replays a recorded performance in real time.
///
/// Time zero of the recording lines up with the moment the source is first
/// opened. Closing and reopening continues where playback stopped.
pub struct SmfPerformanceSource {
    name: String,
    messages: Arc<Vec<TimedMessage>>,
    position: Arc<Mutex<ReplayPosition>>,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SmfPerformanceSource {
    pub fn load(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "performance".to_string());
        Ok(Self::from_messages(&name, load_performance(path)?))
    }

    pub fn from_messages(name: &str, messages: Vec<TimedMessage>) -> Self {
        Self {
            name: name.to_string(),
            messages: Arc::new(messages),
            position: Arc::new(Mutex::new(ReplayPosition::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Time of the last recorded message
    pub fn duration(&self) -> Duration {
        self.messages.last().map(|m| m.time).unwrap_or_default()
    }

    /// All messages have been delivered
    pub fn is_exhausted(&self) -> bool {
        self.position.lock().next >= self.messages.len()
    }
}

fn replay_loop(
    name: String,
    messages: Arc<Vec<TimedMessage>>,
    position: Arc<Mutex<ReplayPosition>>,
    sink: Sender<InputMessage>,
    stop_flag: Arc<AtomicBool>,
) {
    let (mut next, resume_at) = {
        let pos = position.lock();
        (pos.next, pos.elapsed)
    };
    let origin = Instant::now();

    while next < messages.len() {
        let message = &messages[next];
        let due = message.time.saturating_sub(resume_at);

        // Sleep in short slices so close() takes effect promptly
        loop {
            if stop_flag.load(Ordering::Relaxed) {
                let mut pos = position.lock();
                pos.next = next;
                pos.elapsed = resume_at + origin.elapsed().min(due);
                return;
            }
            let waited = origin.elapsed();
            if waited >= due {
                break;
            }
            std::thread::sleep((due - waited).min(Duration::from_millis(5)));
        }

        let sent = sink.send(InputMessage::Midi {
            source: name.clone(),
            message: RawMidiMessage::new(message.time.as_micros() as u64, &message.data),
            received_at: Instant::now(),
        });
        next += 1;
        {
            let mut pos = position.lock();
            pos.next = next;
            pos.elapsed = message.time;
        }
        if sent.is_err() {
            return;
        }
    }

    log::debug!("Replay of {} finished", name);
}

impl InputSource for SmfPerformanceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, sink: Sender<InputMessage>) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        self.stop_flag.store(false, Ordering::Relaxed);
        let name = self.name.clone();
        let messages = self.messages.clone();
        let position = self.position.clone();
        let stop_flag = self.stop_flag.clone();

        let handle = std::thread::Builder::new()
            .name("etude-replay".to_string())
            .spawn(move || replay_loop(name, messages, position, sink, stop_flag))?;
        self.handle = Some(handle);

        log::info!("Replaying {} ({} messages)", self.name, self.messages.len());
        Ok(())
    }

    fn close(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Replay thread for {} panicked", self.name);
            }
        }
    }
}

impl Drop for SmfPerformanceSource {
    fn drop(&mut self) {
        self.close();
    }
}
