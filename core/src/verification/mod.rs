pub mod comparator;
pub mod report;
pub mod synth;

pub use comparator::{Comparator, SweepConfig, FIELD_TOLERANCE_LSB};
pub use report::{ComparisonReport, Mismatch};
pub use synth::{expected_packet_samples, pattern_sample, synthesize_trace, write_trace};
