// Device health monitoring: detects a MIDI input port going away mid-session

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::input::InputMessage;

/// Longest stretch the checker sleeps without looking at its stop flag
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Enumerate currently-connected MIDI port names (lightweight, no device details).
pub fn enumerate_midi_port_names() -> HashSet<String> {
    let mut names = HashSet::new();
    if let Ok(midi_in) = midir::MidiInput::new("etude-health") {
        let ports = midi_in.ports();
        for port in &ports {
            if let Ok(name) = midi_in.port_name(port) {
                names.insert(name);
            }
        }
    }
    names
}

/// Tracks connected/disconnected transitions for one port
#[derive(Debug)]
pub struct PortWatch {
    port_name: String,
    connected: bool,
}

/// Change observed by a single health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortTransition {
    Disconnected,
    Reconnected,
}

impl PortWatch {
    pub fn new(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            connected: true,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Feed the current set of port names; reports only edges
    pub fn observe(&mut self, available: &HashSet<String>) -> Option<PortTransition> {
        let present = available.contains(&self.port_name);
        let transition = match (self.connected, present) {
            (true, false) => Some(PortTransition::Disconnected),
            (false, true) => Some(PortTransition::Reconnected),
            _ => None,
        };
        self.connected = present;
        transition
    }
}

/// Background thread body that polls the port list every `interval`.
///
/// A disappearing port is reported once on `sink` as
/// `InputMessage::Disconnected`. Reconnection is only logged; resuming is
/// the caller's decision.
pub fn health_check_loop(
    port_name: String,
    interval: Duration,
    sink: Sender<InputMessage>,
    stop_flag: Arc<AtomicBool>,
) {
    let mut watch = PortWatch::new(&port_name);

    log::debug!("Health checker started for {}", port_name);

    while !stop_flag.load(Ordering::Relaxed) {
        if !sleep_unless_stopped(interval, &stop_flag) {
            break;
        }

        match watch.observe(&enumerate_midi_port_names()) {
            Some(PortTransition::Disconnected) => {
                log::warn!("MIDI device disconnected: {}", port_name);
                if sink
                    .send(InputMessage::Disconnected {
                        source: port_name.clone(),
                    })
                    .is_err()
                {
                    break;
                }
            }
            Some(PortTransition::Reconnected) => {
                log::info!("MIDI device reconnected: {}", port_name);
            }
            None => {}
        }
    }

    log::debug!("Health checker stopped for {}", port_name);
}

/// Sleep for `interval` in short slices. Returns false once the stop flag is set.
fn sleep_unless_stopped(interval: Duration, stop_flag: &AtomicBool) -> bool {
    let mut remaining = interval;
    while !remaining.is_zero() {
        if stop_flag.load(Ordering::Relaxed) {
            return false;
        }
        let slice = remaining.min(STOP_POLL_INTERVAL);
        std::thread::sleep(slice);
        remaining -= slice;
    }
    !stop_flag.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reports_edges_only() {
        let mut watch = PortWatch::new("Piano");
        assert_eq!(watch.observe(&names(&["Piano"])), None);
        assert_eq!(watch.observe(&names(&[])), Some(PortTransition::Disconnected));
        assert!(!watch.is_connected());
        // Still gone: no repeated report
        assert_eq!(watch.observe(&names(&["Other"])), None);
        assert_eq!(watch.observe(&names(&["Piano"])), Some(PortTransition::Reconnected));
        assert!(watch.is_connected());
    }

    #[test]
    fn test_loop_exits_on_stop() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(true));
        // Returns immediately because the flag is already set
        health_check_loop("Piano".to_string(), Duration::from_millis(1), tx, stop);
    }

    #[test]
    fn test_stop_interrupts_long_interval() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::spawn(move || {
            health_check_loop("Piano".to_string(), Duration::from_secs(10), tx, flag)
        });

        std::thread::sleep(Duration::from_millis(20));
        let stopped_at = std::time::Instant::now();
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert!(stopped_at.elapsed() < Duration::from_secs(1));
    }
}
