// Event Normalizer and the sources feeding it

pub mod message;
pub mod normalizer;
pub mod source;

pub use message::*;
pub use normalizer::*;
pub use source::*;
