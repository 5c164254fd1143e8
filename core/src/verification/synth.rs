//! Model of the test-pattern data seen at the corner-turn output.
//!
//! The input pattern is a pure function of the absolute sample index, so
//! the delayed and derippled output can be predicted for any packet.

use crate::config::model::PolynomialConfig;
use crate::delay::evaluator::{
    evaluate_frame, FRAMES_PER_INTEGRATION, PACKETS_PER_FRAME, PRELOAD_PACKETS,
    REGULAR_PACKETS_PER_FRAME, SAMPLES_PER_PACKET,
};
use crate::prelude::{ModelError, ModelResult};
use crate::processing::deripple::DerippleFilter;
use crate::trace::parser::{PacketMetadata, TraceFormat, TraceSample, SAMPLE_COMPONENTS, TRACE_LANES};
use crate::verification::comparator::SweepConfig;
use std::io::Write;
use std::ops::Range;

/// Byte value the RFI flagger uses for blanked samples; it reads back as zero.
const RFI_BLANKED: u8 = 128;

/// Absolute input sample index feeding sample `k` of a packet, after the coarse delay.
pub fn absolute_sample_index(
    integration: u32,
    frame: u8,
    packet: u8,
    coarse_delay: i64,
    k: usize,
) -> i64 {
    let packet_index = (i64::from(integration) * i64::from(FRAMES_PER_INTEGRATION)
        + i64::from(frame))
        * REGULAR_PACKETS_PER_FRAME
        + i64::from(packet)
        - i64::from(PRELOAD_PACKETS);
    packet_index * SAMPLES_PER_PACKET as i64 + k as i64 + coarse_delay
}

fn lane_value(byte: u8) -> i32 {
    if byte == RFI_BLANKED {
        0
    } else {
        i32::from(byte as i8)
    }
}

/// Test pattern for one input sample: index bits 0..8, 8..16 and 16..24 in
/// the first three lanes, the channel id in the fourth.
pub fn pattern_sample(index: i64, virtual_channel: u32) -> [i32; SAMPLE_COMPONENTS] {
    [
        lane_value((index & 0xff) as u8),
        lane_value(((index >> 8) & 0xff) as u8),
        lane_value(((index >> 16) & 0xff) as u8),
        lane_value((virtual_channel & 0xff) as u8),
    ]
}

/// Expected derippled output for the first `count` samples of a packet.
pub fn expected_packet_samples(
    integration: u32,
    frame: u8,
    packet: u8,
    virtual_channel: u32,
    coarse_delay: i64,
    count: usize,
    filter: &DerippleFilter,
) -> Vec<[i32; SAMPLE_COMPONENTS]> {
    let span = DerippleFilter::half_span() as i64;
    let start = absolute_sample_index(integration, frame, packet, coarse_delay, 0) - span;
    let input: Vec<[i32; SAMPLE_COMPONENTS]> = (0..count as i64 + 2 * span)
        .map(|offset| pattern_sample(start + offset, virtual_channel))
        .collect();

    let mut output = vec![[0i32; SAMPLE_COMPONENTS]; count];
    for component in 0..SAMPLE_COMPONENTS {
        let lane: Vec<i32> = input.iter().map(|s| s[component]).collect();
        for (out, value) in output.iter_mut().zip(filter.filter(&lane)) {
            out[component] = value;
        }
    }
    output
}

fn saturate_i16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Writes the trace the hardware should produce for the sweep, restricted to
/// `packets`, with sample data derippled by `filter`.
///
/// Channels are interleaved four to a group in ascending id order. The model
/// does not predict the slope fields, so they are written as zero.
pub fn write_trace<W: Write>(
    writer: &mut W,
    config: &PolynomialConfig,
    sweep: &SweepConfig,
    packets: Range<u8>,
    filter: &DerippleFilter,
) -> ModelResult<()> {
    if packets.end > PACKETS_PER_FRAME {
        return Err(ModelError::InvalidInput(format!(
            "packet range {:?} exceeds {} packets per frame",
            packets, PACKETS_PER_FRAME
        )));
    }
    let channel_ids = config.channel_ids();

    for (integration, frame) in sweep.frames() {
        for group in channel_ids.chunks(TRACE_LANES) {
            let mut frame_results = Vec::with_capacity(group.len());
            for &vc in group {
                let entry = config.lookup(vc)?;
                frame_results.push(evaluate_frame(entry, integration, frame)?);
            }

            for packet in packets.clone() {
                let mut expected = Vec::with_capacity(group.len());
                for (lane, (&vc, results)) in group.iter().zip(&frame_results).enumerate() {
                    let result = results[usize::from(packet)];
                    let metadata = PacketMetadata {
                        integration,
                        frame,
                        packet,
                        virtual_channel: vc,
                        coarse_delay: result.coarse_delay as u32,
                        h_delay_offset: result.fine_delay_x,
                        h_phase_offset: result.phase_x,
                        v_delay_offset: result.fine_delay_y,
                        v_phase_offset: result.phase_y,
                        ..Default::default()
                    };
                    writeln!(writer, "{}", TraceFormat::metadata_line(lane, &metadata))?;
                    expected.push(expected_packet_samples(
                        integration,
                        frame,
                        packet,
                        vc,
                        result.coarse_delay,
                        SAMPLES_PER_PACKET,
                        filter,
                    ));
                }

                for k in 0..SAMPLES_PER_PACKET {
                    let mut lanes: [TraceSample; TRACE_LANES] = [[0; SAMPLE_COMPONENTS]; TRACE_LANES];
                    for (lane, samples) in expected.iter().enumerate() {
                        for (component, &value) in samples[k].iter().enumerate() {
                            lanes[lane][component] = saturate_i16(value);
                        }
                    }
                    writeln!(writer, "{}", TraceFormat::data_line(&lanes))?;
                }
            }
        }
    }
    Ok(())
}

/// In-memory variant of [`write_trace`].
pub fn synthesize_trace(
    config: &PolynomialConfig,
    sweep: &SweepConfig,
    packets: Range<u8>,
    filter: &DerippleFilter,
) -> ModelResult<String> {
    let mut buffer = Vec::new();
    write_trace(&mut buffer, config, sweep, packets, filter)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_lanes_follow_index_bytes() {
        assert_eq!(pattern_sample(0x0003_0201, 5), [1, 2, 3, 5]);
        assert_eq!(pattern_sample(0x00ff_7f81, 0x1ff), [-127, 127, -1, -1]);
    }

    #[test]
    fn blanked_byte_reads_as_zero() {
        assert_eq!(pattern_sample(0x0080_8080, 128), [0, 0, 0, 0]);
    }

    #[test]
    fn preload_packets_reach_back_into_previous_frame() {
        assert_eq!(absolute_sample_index(0, 0, 11, 0, 0), 0);
        assert_eq!(absolute_sample_index(0, 0, 0, 0, 0), -11 * 4096);
        assert_eq!(absolute_sample_index(0, 1, 11, 0, 0), 64 * 4096);
        assert_eq!(absolute_sample_index(1, 0, 11, 3, 2), 192 * 4096 + 5);
    }

    #[test]
    fn channel_lane_survives_deripple_unchanged() {
        let filter = DerippleFilter::new();
        let samples = expected_packet_samples(0, 0, 20, 42, 7, 64, &filter);
        assert_eq!(samples.len(), 64);
        assert!(samples.iter().all(|s| s[3] == 42));
    }

    #[test]
    fn upper_byte_lane_is_constant_within_a_packet() {
        // Index bits 16..24 only change every 65536 samples.
        let filter = DerippleFilter::new();
        let samples = expected_packet_samples(0, 0, 30, 1, 0, 128, &filter);
        let index = absolute_sample_index(0, 0, 30, 0, 0);
        let expected = lane_value(((index >> 16) & 0xff) as u8);
        assert!(samples.iter().all(|s| s[2] == expected));
    }
}
