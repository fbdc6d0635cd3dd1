// Etude - real-time MIDI practice matcher
// Library entry point

pub mod config;
pub mod devices;
pub mod error;
pub mod feedback;
pub mod input;
pub mod matching;
pub mod score;
pub mod session;

pub use error::{PracticeError, Result};
