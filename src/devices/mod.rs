// MIDI input discovery and connection monitoring

pub mod enumeration;
pub mod health;

pub use enumeration::*;
pub use health::*;

use serde::{Deserialize, Serialize};

/// Represents a MIDI input device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MidiDevice {
    pub id: String,
    pub name: String,
    pub port_index: usize,
}

impl MidiDevice {
    /// Case-insensitive substring match on the port name
    pub fn matches(&self, name_contains: &str) -> bool {
        self.name
            .to_lowercase()
            .contains(&name_contains.to_lowercase())
    }
}
