// Session Controller: lifecycle, clock and the threads that drive it

pub mod controller;
pub mod runner;
pub mod state;

pub use controller::PracticeSession;
pub use runner::{RunnerOptions, SessionRunner};
pub use state::{SessionClock, SessionState, SessionStatus};
