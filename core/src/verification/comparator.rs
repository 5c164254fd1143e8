//! Checks a parsed hardware trace against the delay model.
//!
//! Every packet of every swept frame is compared: the coarse delay exactly,
//! fine delay and phase to within one LSB, and samples exactly against the
//! derippled test pattern. Nothing short of an I/O failure stops a run;
//! problems are logged and counted in the returned [`ComparisonReport`].

use crate::config::model::PolynomialConfig;
use crate::delay::evaluator::{
    evaluate_frame, DelayResult, FRAMES_PER_INTEGRATION, PACKETS_PER_FRAME, SAMPLES_PER_PACKET,
};
use crate::processing::deripple::DerippleFilter;
use crate::telemetry::log::LogManager;
use crate::trace::parser::{HardwareTrace, PacketMetadata, TracePacket, SAMPLE_COMPONENTS};
use crate::verification::report::{ComparisonReport, Mismatch};
use crate::verification::synth::expected_packet_samples;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Allowed |expected - observed| for fine delay and phase fields.
pub const FIELD_TOLERANCE_LSB: i64 = 1;

const COMPONENT_NAMES: [&str; SAMPLE_COMPONENTS] = ["h_re", "h_im", "v_re", "v_im"];

/// Range of corner-turn frames covered by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub integration_start: u32,
    pub sim_frames: u32,
}

impl SweepConfig {
    pub fn from_config(config: &PolynomialConfig) -> Self {
        Self {
            integration_start: config.integration_start,
            sim_frames: config.sim_frames,
        }
    }

    /// (integration, corner-turn frame) for every swept frame.
    pub fn frames(&self) -> impl Iterator<Item = (u32, u8)> {
        let start = self.integration_start;
        let per_integration = u32::from(FRAMES_PER_INTEGRATION);
        (0..self.sim_frames).map(move |f| (start + f / per_integration, (f % per_integration) as u8))
    }
}

fn within_tolerance(expected: u32, observed: u32) -> bool {
    (i64::from(expected) - i64::from(observed)).abs() <= FIELD_TOLERANCE_LSB
}

pub struct Comparator<'a> {
    config: &'a PolynomialConfig,
    deripple: DerippleFilter,
    logger: LogManager,
}

impl<'a> Comparator<'a> {
    pub fn new(config: &'a PolynomialConfig) -> Self {
        Self::with_deripple(config, DerippleFilter::new())
    }

    /// Compares against data derippled with `deripple` instead of the default table.
    pub fn with_deripple(config: &'a PolynomialConfig, deripple: DerippleFilter) -> Self {
        Self {
            config,
            deripple,
            logger: LogManager::new("comparator"),
        }
    }

    pub fn run(&self, trace: &HardwareTrace, sweep: &SweepConfig) -> ComparisonReport {
        let mut report = ComparisonReport {
            parse_errors: trace.parse_errors(),
            ..Default::default()
        };

        for (integration, frame) in sweep.frames() {
            let mut by_channel: BTreeMap<u32, Vec<&TracePacket>> = BTreeMap::new();
            for packet in trace.frame_packets(integration, frame) {
                by_channel
                    .entry(packet.metadata.virtual_channel)
                    .or_default()
                    .push(packet);
            }

            for (&vc, packets) in &by_channel {
                self.compare_channel(integration, frame, vc, packets, &mut report);
            }

            let seen: BTreeSet<u32> = by_channel.keys().copied().collect();
            for vc in self.config.channel_ids() {
                if seen.contains(&vc) {
                    continue;
                }
                if let Err(err) = self.config.lookup(vc) {
                    report.lookup_failures += 1;
                    self.logger.warn(&format!(
                        "{}; skipping integration {} frame {}",
                        err, integration, frame
                    ));
                    continue;
                }
                report.missing_channels += 1;
                self.logger.warn(&format!(
                    "no trace data for vc {} in integration {} frame {}",
                    vc, integration, frame
                ));
            }
        }

        self.logger.record(&format!(
            "data {} match / {} mismatch, metadata {} match / {} mismatch",
            report.data.matched(),
            report.data.mismatched(),
            report.metadata.matched(),
            report.metadata.mismatched()
        ));
        report
    }

    fn compare_channel(
        &self,
        integration: u32,
        frame: u8,
        vc: u32,
        packets: &[&TracePacket],
        report: &mut ComparisonReport,
    ) {
        let entry = match self.config.lookup(vc) {
            Ok(entry) => entry,
            Err(err) => {
                report.lookup_failures += 1;
                self.logger.warn(&format!(
                    "{}; skipping integration {} frame {}",
                    err, integration, frame
                ));
                return;
            }
        };
        let results = match evaluate_frame(entry, integration, frame) {
            Ok(results) => results,
            Err(err) => {
                self.logger.warn(&format!("vc {}: {}", vc, err));
                return;
            }
        };

        let absent = usize::from(PACKETS_PER_FRAME).saturating_sub(packets.len());
        if absent > 0 {
            report.missing_packets += absent;
            self.logger.detail(&format!(
                "vc {} integration {} frame {}: {} packets not in trace",
                vc, integration, frame, absent
            ));
        }

        for packet in packets {
            let expected = &results[usize::from(packet.metadata.packet)];
            report.packets_compared += 1;
            self.compare_metadata(&packet.metadata, expected, report);
            self.compare_samples(packet, expected, report);
        }
    }

    fn compare_metadata(
        &self,
        observed: &PacketMetadata,
        expected: &DelayResult,
        report: &mut ComparisonReport,
    ) {
        let coarse = expected.coarse_delay as u32;
        let fields = [
            ("coarse_delay", coarse, observed.coarse_delay, coarse == observed.coarse_delay),
            (
                "h_delay_offset",
                expected.fine_delay_x,
                observed.h_delay_offset,
                within_tolerance(expected.fine_delay_x, observed.h_delay_offset),
            ),
            (
                "h_phase_offset",
                expected.phase_x,
                observed.h_phase_offset,
                within_tolerance(expected.phase_x, observed.h_phase_offset),
            ),
            (
                "v_delay_offset",
                expected.fine_delay_y,
                observed.v_delay_offset,
                within_tolerance(expected.fine_delay_y, observed.v_delay_offset),
            ),
            (
                "v_phase_offset",
                expected.phase_y,
                observed.v_phase_offset,
                within_tolerance(expected.phase_y, observed.v_phase_offset),
            ),
        ];

        for (field, want, got, ok) in fields {
            if ok {
                report.metadata.record_match();
                continue;
            }
            let mismatch = Mismatch {
                integration: observed.integration,
                frame: observed.frame,
                packet: observed.packet,
                virtual_channel: observed.virtual_channel,
                field: field.to_string(),
                sample: None,
                expected: i64::from(want),
                observed: i64::from(got),
            };
            if report.metadata.record_mismatch(mismatch) {
                if let Some(kept) = report.metadata.first_mismatches().last() {
                    self.logger.warn(&format!("metadata mismatch: {}", kept));
                }
            }
        }
    }

    fn compare_samples(
        &self,
        packet: &TracePacket,
        expected: &DelayResult,
        report: &mut ComparisonReport,
    ) {
        let meta = &packet.metadata;
        if packet.samples.len() < SAMPLES_PER_PACKET {
            report.short_packets += 1;
            self.logger.detail(&format!(
                "vc {} packet {} holds {} samples",
                meta.virtual_channel,
                meta.packet,
                packet.samples.len()
            ));
        }

        let model = expected_packet_samples(
            meta.integration,
            meta.frame,
            meta.packet,
            meta.virtual_channel,
            expected.coarse_delay,
            packet.samples.len(),
            &self.deripple,
        );

        for (index, (want, got)) in model.iter().zip(&packet.samples).enumerate() {
            for component in 0..SAMPLE_COMPONENTS {
                let observed = i32::from(got[component]);
                if want[component] == observed {
                    report.data.record_match();
                    continue;
                }
                let mismatch = Mismatch {
                    integration: meta.integration,
                    frame: meta.frame,
                    packet: meta.packet,
                    virtual_channel: meta.virtual_channel,
                    field: COMPONENT_NAMES[component].to_string(),
                    sample: Some(index),
                    expected: i64::from(want[component]),
                    observed: i64::from(observed),
                };
                if report.data.record_mismatch(mismatch) {
                    if let Some(kept) = report.data.first_mismatches().last() {
                        self.logger.warn(&format!("data mismatch: {}", kept));
                    }
                }
            }
        }
    }
}
