pub mod log;
pub mod metrics;

pub use log::LogManager;
pub use metrics::{MatchTally, MAX_REPORTED_MISMATCHES};
