// Running score, incremental feedback and the final practice report

pub mod aggregator;
pub mod report;

pub use aggregator::*;
pub use report::*;
