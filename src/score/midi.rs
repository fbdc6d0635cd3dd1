// Standard MIDI File reading for scores and recorded takes

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use super::{Score, ScoreNote};
use crate::error::{PracticeError, Result};

#[derive(Debug, Clone)]
pub struct TempoEvent {
    pub tick: u64,
    pub microseconds_per_beat: u32,
}

/// A note on/off message with its absolute time in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedMessage {
    pub time: Duration,
    pub track: usize,
    pub channel: u8,
    /// Raw 3-byte channel voice message
    pub data: [u8; 3],
}

impl TimedMessage {
    pub fn pitch(&self) -> u8 {
        self.data[1]
    }

    pub fn is_note_on(&self) -> bool {
        self.data[0] & 0xF0 == 0x90 && self.data[2] > 0
    }
}

/// Convert a tick position to seconds using the tempo map.
pub fn tick_to_seconds(tick: u64, ticks_per_beat: u16, tempo_map: &[TempoEvent]) -> f64 {
    let tpb = ticks_per_beat as f64;
    let mut seconds = 0.0;
    let mut last_tick = 0u64;
    let mut usec_per_beat = 500_000.0; // default 120 BPM

    for te in tempo_map {
        if te.tick >= tick {
            break;
        }
        let delta_ticks = te.tick - last_tick;
        seconds += (delta_ticks as f64 / tpb) * (usec_per_beat / 1_000_000.0);
        last_tick = te.tick;
        usec_per_beat = te.microseconds_per_beat as f64;
    }

    let delta_ticks = tick - last_tick;
    seconds += (delta_ticks as f64 / tpb) * (usec_per_beat / 1_000_000.0);
    seconds
}

/// Maps absolute ticks to wall time for one file
enum Clock {
    Metrical {
        ticks_per_beat: u16,
        tempo_map: Vec<TempoEvent>,
    },
    Timecode {
        ticks_per_second: f64,
    },
}

impl Clock {
    fn from_smf(smf: &midly::Smf) -> Self {
        match smf.header.timing {
            midly::Timing::Metrical(tpb) => {
                let mut tempo_map: Vec<TempoEvent> = Vec::new();
                for track in &smf.tracks {
                    let mut current_tick: u64 = 0;
                    for event in track {
                        current_tick += event.delta.as_int() as u64;
                        if let midly::TrackEventKind::Meta(midly::MetaMessage::Tempo(t)) =
                            event.kind
                        {
                            tempo_map.push(TempoEvent {
                                tick: current_tick,
                                microseconds_per_beat: t.as_int(),
                            });
                        }
                    }
                }
                tempo_map.sort_by_key(|t| t.tick);
                tempo_map.dedup_by_key(|t| t.tick);

                Clock::Metrical {
                    ticks_per_beat: tpb.as_int().max(1),
                    tempo_map,
                }
            }
            midly::Timing::Timecode(fps, subframes) => Clock::Timecode {
                ticks_per_second: (fps.as_f32() as f64 * subframes as f64).max(1.0),
            },
        }
    }

    fn time_at(&self, tick: u64) -> Duration {
        let seconds = match self {
            Clock::Metrical {
                ticks_per_beat,
                tempo_map,
            } => tick_to_seconds(tick, *ticks_per_beat, tempo_map),
            Clock::Timecode { ticks_per_second } => tick as f64 / ticks_per_second,
        };
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

/// Extract every note on/off message with its absolute time, ordered by time.
/// Messages at the same time keep track order, then file order.
pub fn read_note_messages(data: &[u8]) -> Result<Vec<TimedMessage>> {
    let smf = midly::Smf::parse(data)
        .map_err(|e| PracticeError::ScoreParse(format!("Failed to parse MIDI: {}", e)))?;
    let clock = Clock::from_smf(&smf);

    let mut messages: Vec<TimedMessage> = Vec::new();
    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut current_tick: u64 = 0;
        for event in track {
            current_tick += event.delta.as_int() as u64;

            if let midly::TrackEventKind::Midi { channel, message } = event.kind {
                let ch = channel.as_int();
                let data = match message {
                    midly::MidiMessage::NoteOn { key, vel } => [0x90 | ch, key.as_int(), vel.as_int()],
                    midly::MidiMessage::NoteOff { key, vel } => [0x80 | ch, key.as_int(), vel.as_int()],
                    _ => continue,
                };
                messages.push(TimedMessage {
                    time: clock.time_at(current_tick),
                    track: track_index,
                    channel: ch,
                    data,
                });
            }
        }
    }

    // Stable: ties keep track order
    messages.sort_by_key(|m| m.time);
    Ok(messages)
}

/// Title from the first track name meta event, if any
fn read_title(smf: &midly::Smf) -> Option<String> {
    smf.tracks.iter().flat_map(|track| track.iter()).find_map(|event| {
        match event.kind {
            midly::TrackEventKind::Meta(midly::MetaMessage::TrackName(name)) => {
                let title = String::from_utf8_lossy(name).trim().to_string();
                (!title.is_empty()).then_some(title)
            }
            _ => None,
        }
    })
}

/// Parse a Standard MIDI File into a score, optionally keeping one channel.
pub fn parse_score(data: &[u8], channel: Option<u8>) -> Result<Score> {
    let smf = midly::Smf::parse(data)
        .map_err(|e| PracticeError::ScoreParse(format!("Failed to parse MIDI: {}", e)))?;
    let title = read_title(&smf);
    let messages = read_note_messages(data)?;

    let mut notes: Vec<ScoreNote> = Vec::new();
    // Active notes: (track, channel, pitch) -> index into `notes`
    let mut active: HashMap<(usize, u8, u8), usize> = HashMap::new();
    let end_time = messages.last().map(|m| m.time).unwrap_or_default();

    for message in messages
        .iter()
        .filter(|m| channel.map_or(true, |ch| m.channel == ch))
    {
        let key = (message.track, message.channel, message.pitch());

        // A re-strike or a note off both end the sounding note
        if let Some(index) = active.remove(&key) {
            let note = &mut notes[index];
            note.duration = message.time.saturating_sub(note.time);
        }

        if message.is_note_on() {
            active.insert(key, notes.len());
            notes.push(ScoreNote {
                pitch: message.pitch(),
                time: message.time,
                duration: Duration::ZERO,
            });
        }
    }

    // Close notes that never received an off
    for (_, index) in active.drain() {
        let note = &mut notes[index];
        note.duration = end_time.saturating_sub(note.time);
    }

    log::debug!(
        "Parsed score {:?}: {} notes",
        title.as_deref().unwrap_or("untitled"),
        notes.len()
    );

    Ok(Score { title, notes })
}

/// Load a score from a Standard MIDI File on disk.
pub fn load_score(path: &Path, channel: Option<u8>) -> Result<Score> {
    let data = std::fs::read(path)?;
    let mut score = parse_score(&data, channel)?;
    if score.title.is_none() {
        score.title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string());
    }
    Ok(score)
}

/// Load a recorded performance as time-ordered note messages.
pub fn load_performance(path: &Path) -> Result<Vec<TimedMessage>> {
    let data = std::fs::read(path)?;
    read_note_messages(&data)
}
