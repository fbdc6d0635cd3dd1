// MIDI port enumeration

use super::MidiDevice;
use crate::error::{PracticeError, Result};

/// Enumerate all available MIDI input devices
pub fn enumerate_midi_devices() -> Vec<MidiDevice> {
    let mut devices = Vec::new();

    match midir::MidiInput::new("etude-probe") {
        Ok(midi_in) => {
            let ports = midi_in.ports();
            for (index, port) in ports.iter().enumerate() {
                if let Ok(name) = midi_in.port_name(port) {
                    devices.push(MidiDevice {
                        id: format!("midi-{}", index),
                        name,
                        port_index: index,
                    });
                }
            }
        }
        Err(e) => log::warn!("Failed to open MIDI input for enumeration: {}", e),
    }

    log::debug!("Found {} MIDI input port(s)", devices.len());
    devices
}

/// Pick the port to practice with: the first whose name contains
/// `name_contains`, or the first port at all when no filter is given.
pub fn find_midi_device(name_contains: Option<&str>) -> Result<MidiDevice> {
    select_device(enumerate_midi_devices(), name_contains)
}

fn select_device(devices: Vec<MidiDevice>, name_contains: Option<&str>) -> Result<MidiDevice> {
    let found = match name_contains {
        Some(filter) => devices.into_iter().find(|d| d.matches(filter)),
        None => devices.into_iter().next(),
    };

    found.ok_or_else(|| {
        PracticeError::DeviceNotFound(
            name_contains
                .map(str::to_string)
                .unwrap_or_else(|| "no MIDI input ports available".to_string()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<MidiDevice> {
        ["Midi Through Port-0", "Digital Piano MIDI 1"]
            .iter()
            .enumerate()
            .map(|(index, name)| MidiDevice {
                id: format!("midi-{}", index),
                name: name.to_string(),
                port_index: index,
            })
            .collect()
    }

    #[test]
    fn test_select_by_name() {
        let device = select_device(devices(), Some("piano")).unwrap();
        assert_eq!(device.id, "midi-1");
    }

    #[test]
    fn test_select_first_without_filter() {
        let device = select_device(devices(), None).unwrap();
        assert_eq!(device.port_index, 0);
    }

    #[test]
    fn test_select_missing() {
        assert!(matches!(
            select_device(devices(), Some("organ")),
            Err(PracticeError::DeviceNotFound(name)) if name == "organ"
        ));
        assert!(matches!(
            select_device(Vec::new(), None),
            Err(PracticeError::DeviceNotFound(_))
        ));
    }
}
