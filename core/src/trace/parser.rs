//! Parser for the line-oriented corner-turn output trace.
//!
//! Every line is whitespace separated hexadecimal. The first field routes it:
//!
//! * tags 1..=4: metadata for interleave lane `tag - 1`:
//!   `tag integration ct_frame packet virtual_channel coarse_delay
//!    h_delay_offset h_delay_slope h_phase_offset h_phase_slope
//!    v_delay_offset v_delay_slope v_phase_offset v_phase_slope`.
//!   Tag 1 opens a new group and forgets lanes 2..4.
//! * tag 5: one sample for each of the four lanes, 16 values ordered
//!   `lane * 4 + component` with components (H re, H im, V re, V im).
//!
//! Bad lines are logged, counted and skipped; parsing always runs to the end.

use crate::delay::evaluator::{FRAMES_PER_INTEGRATION, PACKETS_PER_FRAME, SAMPLES_PER_PACKET};
use crate::prelude::{ModelError, ModelResult, PacketCoordinate};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;

pub const TRACE_LANES: usize = 4;
pub const SAMPLE_COMPONENTS: usize = 4;
pub const DATA_TAG: u32 = 5;
const METADATA_FIELDS: usize = 14;
const DATA_FIELDS: usize = 1 + TRACE_LANES * SAMPLE_COMPONENTS;

/// One sample: H re, H im, V re, V im.
pub type TraceSample = [i16; SAMPLE_COMPONENTS];

/// Unsigned 16-bit trace value reinterpreted as signed.
pub fn to_signed(raw: u16) -> i16 {
    if raw > 32767 {
        (i32::from(raw) - 65536) as i16
    } else {
        raw as i16
    }
}

/// Per-packet delay state reported by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketMetadata {
    pub integration: u32,
    pub frame: u8,
    pub packet: u8,
    pub virtual_channel: u32,
    pub coarse_delay: u32,
    pub h_delay_offset: u32,
    pub h_delay_slope: u32,
    pub h_phase_offset: u32,
    pub h_phase_slope: u32,
    pub v_delay_offset: u32,
    pub v_delay_slope: u32,
    pub v_phase_offset: u32,
    pub v_phase_slope: u32,
}

impl PacketMetadata {
    pub fn coordinate(&self) -> PacketCoordinate {
        PacketCoordinate::new(self.integration, self.frame, self.packet, self.virtual_channel)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TracePacket {
    pub metadata: PacketMetadata,
    pub samples: Vec<TraceSample>,
}

/// Parsed trace indexed by (integration, frame, packet, virtual channel).
#[derive(Debug, Clone, Default)]
pub struct HardwareTrace {
    packets: BTreeMap<PacketCoordinate, TracePacket>,
    parse_errors: usize,
}

impl HardwareTrace {
    pub fn get(&self, coordinate: &PacketCoordinate) -> Option<&TracePacket> {
        self.packets.get(coordinate)
    }

    pub fn packets(&self) -> impl Iterator<Item = &TracePacket> {
        self.packets.values()
    }

    /// Packets of one corner-turn frame, in channel then packet order.
    pub fn frame_packets(&self, integration: u32, frame: u8) -> Vec<&TracePacket> {
        let mut packets: Vec<&TracePacket> = self
            .packets
            .values()
            .filter(|p| p.metadata.integration == integration && p.metadata.frame == frame)
            .collect();
        packets.sort_by_key(|p| (p.metadata.virtual_channel, p.metadata.packet));
        packets
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn parse_errors(&self) -> usize {
        self.parse_errors
    }
}

/// Writes trace lines in the format the parser reads.
pub struct TraceFormat;

impl TraceFormat {
    pub fn metadata_line(lane: usize, meta: &PacketMetadata) -> String {
        format!(
            "{:x} {:x} {:x} {:x} {:x} {:x} {:x} {:x} {:x} {:x} {:x} {:x} {:x} {:x}",
            lane + 1,
            meta.integration,
            meta.frame,
            meta.packet,
            meta.virtual_channel,
            meta.coarse_delay,
            meta.h_delay_offset,
            meta.h_delay_slope,
            meta.h_phase_offset,
            meta.h_phase_slope,
            meta.v_delay_offset,
            meta.v_delay_slope,
            meta.v_phase_offset,
            meta.v_phase_slope
        )
    }

    pub fn data_line(lanes: &[TraceSample; TRACE_LANES]) -> String {
        let mut line = format!("{:x}", DATA_TAG);
        for sample in lanes {
            for &value in sample {
                line.push_str(&format!(" {:04x}", value as u16));
            }
        }
        line
    }
}

struct TraceParser {
    lanes: [Option<PacketCoordinate>; TRACE_LANES],
    trace: HardwareTrace,
    logger: LogManager,
}

impl TraceParser {
    fn new() -> Self {
        Self {
            lanes: [None; TRACE_LANES],
            trace: HardwareTrace::default(),
            logger: LogManager::new("trace-parser"),
        }
    }

    fn line(&mut self, number: usize, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if let Err(err) = self.parse_line(number, trimmed) {
            self.trace.parse_errors += 1;
            self.logger.warn(&format!("{}; record skipped", err));
        }
    }

    fn parse_line(&mut self, number: usize, text: &str) -> ModelResult<()> {
        let error = |reason: String| ModelError::Parse {
            line: number,
            reason,
        };
        let fields = text
            .split_whitespace()
            .map(|token| {
                u32::from_str_radix(token, 16)
                    .map_err(|_| error(format!("{:?} is not hexadecimal", token)))
            })
            .collect::<ModelResult<Vec<u32>>>()?;

        match fields[0] {
            tag @ 1..=4 => self.metadata(tag as usize - 1, &fields).map_err(error),
            DATA_TAG => self.data(&fields).map_err(error),
            tag => Err(error(format!("unrecognized tag {}", tag))),
        }
    }

    fn metadata(&mut self, lane: usize, fields: &[u32]) -> Result<(), String> {
        if fields.len() != METADATA_FIELDS {
            return Err(format!(
                "metadata has {} fields, expected {}",
                fields.len(),
                METADATA_FIELDS
            ));
        }
        let frame = fields[2];
        let packet = fields[3];
        if frame >= u32::from(FRAMES_PER_INTEGRATION) {
            return Err(format!("corner turn frame {} out of range", frame));
        }
        if packet >= u32::from(PACKETS_PER_FRAME) {
            return Err(format!("packet {} out of range", packet));
        }

        let metadata = PacketMetadata {
            integration: fields[1],
            frame: frame as u8,
            packet: packet as u8,
            virtual_channel: fields[4],
            coarse_delay: fields[5],
            h_delay_offset: fields[6],
            h_delay_slope: fields[7],
            h_phase_offset: fields[8],
            h_phase_slope: fields[9],
            v_delay_offset: fields[10],
            v_delay_slope: fields[11],
            v_phase_offset: fields[12],
            v_phase_slope: fields[13],
        };

        if lane == 0 {
            self.lanes = [None; TRACE_LANES];
        }
        let coordinate = metadata.coordinate();
        self.lanes[lane] = Some(coordinate);
        self.trace
            .packets
            .entry(coordinate)
            .and_modify(|existing| existing.metadata = metadata)
            .or_insert_with(|| TracePacket {
                metadata,
                samples: Vec::with_capacity(SAMPLES_PER_PACKET),
            });
        Ok(())
    }

    fn data(&mut self, fields: &[u32]) -> Result<(), String> {
        if fields.len() != DATA_FIELDS {
            return Err(format!(
                "sample line has {} fields, expected {}",
                fields.len(),
                DATA_FIELDS
            ));
        }
        if let Some(value) = fields[1..].iter().find(|&&v| v > 0xFFFF) {
            return Err(format!("sample value {:#x} wider than 16 bits", value));
        }
        if self.lanes.iter().all(Option::is_none) {
            return Err("sample data before any metadata".into());
        }

        for coordinate in self.lanes.iter().flatten() {
            let full = self
                .trace
                .packets
                .get(coordinate)
                .map_or(false, |p| p.samples.len() >= SAMPLES_PER_PACKET);
            if full {
                return Err(format!(
                    "packet {:?} exceeds {} samples",
                    coordinate, SAMPLES_PER_PACKET
                ));
            }
        }

        for (lane, slot) in self.lanes.iter().enumerate() {
            let Some(coordinate) = slot else { continue };
            let base = 1 + lane * SAMPLE_COMPONENTS;
            let mut sample = [0i16; SAMPLE_COMPONENTS];
            for (component, value) in sample.iter_mut().enumerate() {
                *value = to_signed(fields[base + component] as u16);
            }
            if let Some(packet) = self.trace.packets.get_mut(coordinate) {
                packet.samples.push(sample);
            }
        }
        Ok(())
    }

    fn finish(self) -> HardwareTrace {
        self.logger.record(&format!(
            "parsed {} packets, {} records skipped",
            self.trace.len(),
            self.trace.parse_errors
        ));
        self.trace
    }
}

/// Parses a complete trace held in memory.
pub fn parse_trace(text: &str) -> HardwareTrace {
    let mut parser = TraceParser::new();
    for (index, line) in text.lines().enumerate() {
        parser.line(index + 1, line);
    }
    parser.finish()
}

/// Parses a trace from a reader. Only I/O failures are returned as errors.
pub fn parse_trace_reader<R: BufRead>(reader: R) -> ModelResult<HardwareTrace> {
    let mut parser = TraceParser::new();
    for (index, line) in reader.lines().enumerate() {
        parser.line(index + 1, &line?);
    }
    Ok(parser.finish())
}
