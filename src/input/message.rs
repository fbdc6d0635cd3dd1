// Raw device messages and the canonical note events derived from them

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// MIDI message as delivered by a device callback
#[derive(Debug, Clone)]
pub struct RawMidiMessage {
    /// Timestamp reported by the driver, in microseconds. Kept for diagnostics only.
    pub device_timestamp_us: u64,
    pub data: Vec<u8>,
}

impl RawMidiMessage {
    pub fn new(device_timestamp_us: u64, data: &[u8]) -> Self {
        Self {
            device_timestamp_us,
            data: data.to_vec(),
        }
    }
}

/// Messages flowing from an input source into a session
#[derive(Debug, Clone)]
pub enum InputMessage {
    Midi {
        source: String,
        message: RawMidiMessage,
        /// Wall clock time when the callback saw the message
        received_at: Instant,
    },
    Disconnected {
        source: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    On,
    Off,
}

/// A single note-on/off occurrence in session time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    pub kind: NoteKind,
    pub channel: u8,
    /// Time since session start (paused spans excluded)
    pub timestamp: Duration,
    pub source: String,
}

impl NoteEvent {
    pub fn on(pitch: u8, velocity: u8, timestamp: Duration) -> Self {
        Self {
            pitch,
            velocity,
            kind: NoteKind::On,
            channel: 0,
            timestamp,
            source: String::new(),
        }
    }

    pub fn off(pitch: u8, timestamp: Duration) -> Self {
        Self {
            pitch,
            velocity: 0,
            kind: NoteKind::Off,
            channel: 0,
            timestamp,
            source: String::new(),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn is_on(&self) -> bool {
        self.kind == NoteKind::On
    }
}

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Scientific pitch name for a MIDI note number (60 = C4)
pub fn pitch_name(pitch: u8) -> String {
    let name = NOTE_NAMES[(pitch % 12) as usize];
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", name, octave)
}
