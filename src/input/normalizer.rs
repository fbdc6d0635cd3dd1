// Converts raw device messages into session-timed note events
//
// Device clocks drift against the session clock, so events are stamped with
// the time they were received, never with the driver timestamp.

use std::time::Duration;

use super::message::{NoteEvent, NoteKind, RawMidiMessage};

/// Decoded channel voice note message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedNote {
    pub kind: NoteKind,
    pub channel: u8,
    pub pitch: u8,
    pub velocity: u8,
}

/// Decode a note-on/note-off message. Everything else (controllers, clock,
/// sysex, truncated messages) yields `None`.
pub fn decode_note(data: &[u8]) -> Option<DecodedNote> {
    if data.len() < 3 {
        return None;
    }

    let status = data[0];
    let pitch = data[1];
    let velocity = data[2];

    // Data bytes must have the high bit clear
    if pitch & 0x80 != 0 || velocity & 0x80 != 0 {
        return None;
    }

    let channel = status & 0x0F;
    let kind = match status & 0xF0 {
        // Note on with velocity 0 is a note off
        0x90 if velocity > 0 => NoteKind::On,
        0x90 | 0x80 => NoteKind::Off,
        _ => return None,
    };

    Some(DecodedNote {
        kind,
        channel,
        pitch,
        velocity,
    })
}

/// Stamps decoded notes with a monotonic session-relative time
#[derive(Debug, Default)]
pub struct Normalizer {
    last_emitted: Duration,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one raw message received at `received` (session time).
    ///
    /// Emitted timestamps never go backwards: a message whose receipt time is
    /// earlier than the previous emission is clamped to it.
    pub fn normalize(
        &mut self,
        source: &str,
        message: &RawMidiMessage,
        received: Duration,
    ) -> Option<NoteEvent> {
        let Some(note) = decode_note(&message.data) else {
            log::trace!(
                "Dropping non-note MIDI message from {}: {:02X?}",
                source,
                message.data
            );
            return None;
        };

        let timestamp = received.max(self.last_emitted);
        self.last_emitted = timestamp;

        Some(NoteEvent {
            pitch: note.pitch,
            velocity: note.velocity,
            kind: note.kind,
            channel: note.channel,
            timestamp,
            source: source.to_string(),
        })
    }

    /// Time of the most recently emitted event
    pub fn last_emitted(&self) -> Duration {
        self.last_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(data: &[u8]) -> RawMidiMessage {
        RawMidiMessage::new(0, data)
    }

    #[test]
    fn test_decode_note_on_and_off() {
        let on = decode_note(&[0x91, 60, 100]).unwrap();
        assert_eq!(on.kind, NoteKind::On);
        assert_eq!(on.channel, 1);
        assert_eq!(on.pitch, 60);
        assert_eq!(on.velocity, 100);

        let off = decode_note(&[0x80, 60, 64]).unwrap();
        assert_eq!(off.kind, NoteKind::Off);
    }

    #[test]
    fn test_note_on_zero_velocity_is_off() {
        let note = decode_note(&[0x90, 62, 0]).unwrap();
        assert_eq!(note.kind, NoteKind::Off);
    }

    #[test]
    fn test_unrecognized_messages_dropped() {
        // Control change (sustain pedal)
        assert!(decode_note(&[0xB0, 64, 127]).is_none());
        // Timing clock
        assert!(decode_note(&[0xF8]).is_none());
        // Sysex
        assert!(decode_note(&[0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]).is_none());
        // Truncated note on
        assert!(decode_note(&[0x90, 60]).is_none());
        // Data byte with status bit set
        assert!(decode_note(&[0x90, 0x90, 100]).is_none());
    }

    #[test]
    fn test_timestamps_rebased_to_receipt() {
        let mut normalizer = Normalizer::new();
        let mut message = raw(&[0x90, 60, 90]);
        message.device_timestamp_us = 99_000_000;

        let event = normalizer
            .normalize("piano", &message, Duration::from_millis(50))
            .unwrap();
        assert_eq!(event.timestamp, Duration::from_millis(50));
        assert_eq!(event.source, "piano");
    }

    #[test]
    fn test_emission_is_monotonic() {
        let mut normalizer = Normalizer::new();
        let first = normalizer
            .normalize("piano", &raw(&[0x90, 60, 90]), Duration::from_millis(100))
            .unwrap();
        let second = normalizer
            .normalize("piano", &raw(&[0x90, 64, 90]), Duration::from_millis(80))
            .unwrap();

        assert_eq!(first.timestamp, Duration::from_millis(100));
        assert_eq!(second.timestamp, Duration::from_millis(100));
        assert_eq!(normalizer.last_emitted(), Duration::from_millis(100));
    }

    #[test]
    fn test_dropped_message_does_not_move_clock() {
        let mut normalizer = Normalizer::new();
        assert!(normalizer
            .normalize("piano", &raw(&[0xB0, 64, 127]), Duration::from_millis(500))
            .is_none());
        assert_eq!(normalizer.last_emitted(), Duration::ZERO);
    }
}
