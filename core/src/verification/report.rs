use crate::telemetry::metrics::MatchTally;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One out-of-tolerance value with enough context to find it in the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub integration: u32,
    pub frame: u8,
    pub packet: u8,
    pub virtual_channel: u32,
    pub field: String,
    /// Sample within the packet, for data mismatches.
    pub sample: Option<usize>,
    pub expected: i64,
    pub observed: i64,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "integration {} frame {} packet {} vc {} {}",
            self.integration, self.frame, self.packet, self.virtual_channel, self.field
        )?;
        if let Some(sample) = self.sample {
            write!(f, " sample {}", sample)?;
        }
        write!(f, ": expected {} observed {}", self.expected, self.observed)
    }
}

/// Aggregate result of one verification run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub data: MatchTally<Mismatch>,
    pub metadata: MatchTally<Mismatch>,
    pub packets_compared: usize,
    /// Channels found zero or several times in the configuration.
    pub lookup_failures: usize,
    /// Trace records skipped by the parser.
    pub parse_errors: usize,
    /// Configured channels with no packets in a swept frame.
    pub missing_channels: usize,
    /// Packets of a present channel's frame that the trace does not hold.
    pub missing_packets: usize,
    /// Packets holding fewer samples than a full packet.
    pub short_packets: usize,
}

impl ComparisonReport {
    pub fn is_clean(&self) -> bool {
        self.data.mismatched() == 0 && self.metadata.mismatched() == 0
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "packets compared: {}", self.packets_compared)?;
        writeln!(
            f,
            "data: {} match, {} mismatch",
            self.data.matched(),
            self.data.mismatched()
        )?;
        writeln!(
            f,
            "metadata: {} match, {} mismatch",
            self.metadata.matched(),
            self.metadata.mismatched()
        )?;
        writeln!(
            f,
            "lookup failures: {}, parse errors: {}, missing channels: {}, missing packets: {}, short packets: {}",
            self.lookup_failures,
            self.parse_errors,
            self.missing_channels,
            self.missing_packets,
            self.short_packets
        )?;
        for (name, tally) in [("data", &self.data), ("metadata", &self.metadata)] {
            for mismatch in tally.first_mismatches() {
                writeln!(f, "  {} mismatch: {}", name, mismatch)?;
            }
        }
        Ok(())
    }
}
