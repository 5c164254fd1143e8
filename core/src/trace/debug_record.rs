//! Decoder for the 32-byte polynomial debug records captured from the card.
//!
//! Records are little endian: `u32 u16 u16 u32 u32 u32 u16 u16 f32 f32`.
//! These are for inspection only; verification uses the text trace.

use crate::math::stats::StatsHelper;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RECORD_SIZE_BYTES: usize = 32;
/// Upper bound on records decoded from one capture.
pub const DECODE_MAX: usize = 528_384;
/// Seconds per tick of the uptime counter.
pub const UPTIME_UNIT_S: f64 = 256.0 / 300e6;
/// One filterbank output sample, 4096 input samples of 1080 ns.
pub const FILTERBANK_SAMPLE_S: f64 = 4096.0 * 1080e-9;

/// `delay` half-word: virtual channel in bits 0..10, packet in bits 10..16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayField {
    pub virtual_channel: u16,
    pub packet: u8,
}

impl DelayField {
    pub fn unpack(raw: u16) -> Self {
        Self {
            virtual_channel: raw & 0x03ff,
            packet: ((raw >> 10) & 0x003f) as u8,
        }
    }
}

/// Integration word: corner-turn frame in bits 0..2, integration above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationField {
    pub integration: u32,
    pub ct_frame: u8,
}

impl IntegrationField {
    pub fn unpack(raw: u32) -> Self {
        Self {
            integration: raw >> 2,
            ct_frame: (raw & 0x3) as u8,
        }
    }
}

/// Buffer select in bit 15, FIFO occupancy in bits 0..11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectCountField {
    pub buffer_select: u8,
    pub fifo_count: u16,
}

impl SelectCountField {
    pub fn unpack(raw: u16) -> Self {
        Self {
            buffer_select: (raw >> 15) as u8,
            fifo_count: raw & 0x07ff,
        }
    }
}

/// Configuration write flag in bit 15, last write address in bits 0..15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteInfoField {
    pub write_occurred: bool,
    pub write_address: u16,
}

impl WriteInfoField {
    pub fn unpack(raw: u16) -> Self {
        Self {
            write_occurred: raw >> 15 != 0,
            write_address: raw & 0x7fff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HardwareTraceRecord {
    pub uptime_counter: u32,
    pub delay: DelayField,
    pub coarse_delay: u16,
    pub hpol_phase: u32,
    pub hpol_phase_slope: u32,
    pub integration: IntegrationField,
    pub select: SelectCountField,
    pub write: WriteInfoField,
    /// Polynomial result in ns.
    pub poly_result: f32,
    /// Time the polynomial was evaluated at, seconds.
    pub poly_time: f32,
}

fn le_u16(bytes: &[u8; RECORD_SIZE_BYTES], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8; RECORD_SIZE_BYTES], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl HardwareTraceRecord {
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE_BYTES]) -> Self {
        Self {
            uptime_counter: le_u32(bytes, 0),
            delay: DelayField::unpack(le_u16(bytes, 4)),
            coarse_delay: le_u16(bytes, 6),
            hpol_phase: le_u32(bytes, 8),
            hpol_phase_slope: le_u32(bytes, 12),
            integration: IntegrationField::unpack(le_u32(bytes, 16)),
            select: SelectCountField::unpack(le_u16(bytes, 20)),
            write: WriteInfoField::unpack(le_u16(bytes, 22)),
            poly_result: f32::from_bits(le_u32(bytes, 24)),
            poly_time: f32::from_bits(le_u32(bytes, 28)),
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        f64::from(self.uptime_counter) * UPTIME_UNIT_S
    }

    /// Evaluation time since the epoch implied by the packet/frame/integration fields.
    /// There are 64 filterbank samples per frame and 192 per integration.
    pub fn sample_time_seconds(&self) -> f64 {
        f64::from(self.delay.packet) * FILTERBANK_SAMPLE_S
            + f64::from(self.integration.integration) * FILTERBANK_SAMPLE_S * 192.0
            + f64::from(self.integration.ct_frame) * FILTERBANK_SAMPLE_S * 64.0
    }
}

/// Decodes whole records from a capture; a trailing partial record is ignored.
pub fn decode_records(data: &[u8]) -> Vec<HardwareTraceRecord> {
    data.chunks_exact(RECORD_SIZE_BYTES)
        .take(DECODE_MAX)
        .filter_map(|chunk| <&[u8; RECORD_SIZE_BYTES]>::try_from(chunk).ok())
        .map(HardwareTraceRecord::from_bytes)
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugSummary {
    pub record_count: usize,
    pub virtual_channels: Vec<u16>,
    pub mean_poly_result: BTreeMap<u16, f64>,
    /// Records where the selected buffer differs from the previous record's.
    pub buffer_switches: usize,
    pub max_fifo_count: u16,
    pub config_writes: usize,
}

pub fn summarize(records: &[HardwareTraceRecord]) -> DebugSummary {
    let mut per_channel: BTreeMap<u16, Vec<f64>> = BTreeMap::new();
    for record in records {
        per_channel
            .entry(record.delay.virtual_channel)
            .or_default()
            .push(f64::from(record.poly_result));
    }

    let buffer_switches = records
        .windows(2)
        .filter(|pair| pair[0].select.buffer_select != pair[1].select.buffer_select)
        .count();

    DebugSummary {
        record_count: records.len(),
        virtual_channels: per_channel.keys().copied().collect(),
        mean_poly_result: per_channel
            .iter()
            .map(|(&vc, values)| (vc, StatsHelper::mean(values)))
            .collect(),
        buffer_switches,
        max_fifo_count: records
            .iter()
            .map(|r| r.select.fifo_count)
            .max()
            .unwrap_or(0),
        config_writes: records.iter().filter(|r| r.write.write_occurred).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes(fields: (u32, u16, u16, u32, u32, u32, u16, u16, f32, f32)) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(RECORD_SIZE_BYTES);
        bytes.extend_from_slice(&fields.0.to_le_bytes());
        bytes.extend_from_slice(&fields.1.to_le_bytes());
        bytes.extend_from_slice(&fields.2.to_le_bytes());
        bytes.extend_from_slice(&fields.3.to_le_bytes());
        bytes.extend_from_slice(&fields.4.to_le_bytes());
        bytes.extend_from_slice(&fields.5.to_le_bytes());
        bytes.extend_from_slice(&fields.6.to_le_bytes());
        bytes.extend_from_slice(&fields.7.to_le_bytes());
        bytes.extend_from_slice(&fields.8.to_le_bytes());
        bytes.extend_from_slice(&fields.9.to_le_bytes());
        bytes
    }

    #[test]
    fn bit_fields_all_zero() {
        assert_eq!(
            DelayField::unpack(0),
            DelayField {
                virtual_channel: 0,
                packet: 0
            }
        );
        assert_eq!(
            IntegrationField::unpack(0),
            IntegrationField {
                integration: 0,
                ct_frame: 0
            }
        );
        assert_eq!(SelectCountField::unpack(0).fifo_count, 0);
        assert!(!WriteInfoField::unpack(0).write_occurred);
    }

    #[test]
    fn bit_fields_all_ones() {
        assert_eq!(
            DelayField::unpack(0xffff),
            DelayField {
                virtual_channel: 0x3ff,
                packet: 0x3f
            }
        );
        assert_eq!(
            IntegrationField::unpack(u32::MAX),
            IntegrationField {
                integration: 0x3fff_ffff,
                ct_frame: 3
            }
        );
        assert_eq!(
            SelectCountField::unpack(0xffff),
            SelectCountField {
                buffer_select: 1,
                fifo_count: 0x7ff
            }
        );
        assert_eq!(
            WriteInfoField::unpack(0xffff),
            WriteInfoField {
                write_occurred: true,
                write_address: 0x7fff
            }
        );
    }

    #[test]
    fn bit_fields_single_bit_set() {
        assert_eq!(DelayField::unpack(1 << 10).packet, 1);
        assert_eq!(DelayField::unpack(1 << 10).virtual_channel, 0);
        assert_eq!(DelayField::unpack(1 << 9).virtual_channel, 512);
        assert_eq!(IntegrationField::unpack(1 << 2).integration, 1);
        assert_eq!(IntegrationField::unpack(1 << 1).ct_frame, 2);
        assert_eq!(SelectCountField::unpack(1 << 15).buffer_select, 1);
        assert_eq!(SelectCountField::unpack(1 << 11).fifo_count, 0);
        assert_eq!(WriteInfoField::unpack(1 << 14).write_address, 1 << 14);
        assert!(!WriteInfoField::unpack(1 << 14).write_occurred);
    }

    #[test]
    fn record_fields_decode_in_order() {
        let integ = (7 << 2) | 2;
        let delay = (12 << 10) | 33;
        let bytes = record_bytes((
            300, delay, 5, 0x1234_5678, 0x9abc_def0, integ, 0x8010, 0x0042, 1500.5, 0.25,
        ));
        let records = decode_records(&bytes);
        assert_eq!(records.len(), 1);
        let r = records[0];

        assert_eq!(r.delay.virtual_channel, 33);
        assert_eq!(r.delay.packet, 12);
        assert_eq!(r.coarse_delay, 5);
        assert_eq!(r.hpol_phase, 0x1234_5678);
        assert_eq!(r.hpol_phase_slope, 0x9abc_def0);
        assert_eq!(r.integration.integration, 7);
        assert_eq!(r.integration.ct_frame, 2);
        assert_eq!(r.select.buffer_select, 1);
        assert_eq!(r.select.fifo_count, 0x10);
        assert_eq!(r.write.write_address, 0x42);
        assert_eq!(r.poly_result, 1500.5);
        assert_eq!(r.poly_time, 0.25);

        let expected_time =
            FILTERBANK_SAMPLE_S * (12.0 + 7.0 * 192.0 + 2.0 * 64.0);
        assert!((r.sample_time_seconds() - expected_time).abs() < 1e-12);
        assert!((r.uptime_seconds() - 300.0 * 256.0 / 300e6).abs() < 1e-15);
    }

    #[test]
    fn partial_trailing_record_is_ignored() {
        let mut bytes = record_bytes((1, 0, 0, 0, 0, 0, 0, 0, 0.0, 0.0));
        bytes.extend_from_slice(&[0xff; 10]);
        assert_eq!(decode_records(&bytes).len(), 1);
    }

    #[test]
    fn summary_groups_by_channel() {
        let mut bytes = Vec::new();
        bytes.extend(record_bytes((0, 1, 0, 0, 0, 0, 0x0005, 0, 10.0, 0.0)));
        bytes.extend(record_bytes((0, 1, 0, 0, 0, 0, 0x8003, 0x8001, 20.0, 0.0)));
        bytes.extend(record_bytes((0, 2, 0, 0, 0, 0, 0x8000, 0, -4.0, 0.0)));
        let summary = summarize(&decode_records(&bytes));

        assert_eq!(summary.record_count, 3);
        assert_eq!(summary.virtual_channels, vec![1, 2]);
        assert_eq!(summary.mean_poly_result[&1], 15.0);
        assert_eq!(summary.buffer_switches, 1);
        assert_eq!(summary.max_fifo_count, 5);
        assert_eq!(summary.config_writes, 1);
    }
}
