//! Delay and phase evaluation at a packet coordinate.
//!
//! Evaluation is stateless. The coarse delay of a frame is always derived
//! from packet 0 of that frame, so the hardware's frozen-per-frame coarse
//! delay is reproduced regardless of the order packets are requested in.

use crate::config::model::{Slot, VirtualChannelConfig};
use crate::delay::fixed_point::{encode_fine_delay, encode_phase};
use crate::prelude::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};

pub const SAMPLE_PERIOD_NS: f64 = 1080.0;
pub const SAMPLES_PER_PACKET: usize = 4096;
pub const PACKETS_PER_FRAME: u8 = 75;
/// Packets 0..11 of each frame replay data from the previous frame.
pub const PRELOAD_PACKETS: u8 = 11;
pub const REGULAR_PACKETS_PER_FRAME: i64 = 64;
pub const FRAMES_PER_INTEGRATION: u8 = 3;

pub const PACKET_SECONDS: f64 = 0.00442368;
pub const FRAME_SECONDS: f64 = 0.283115520;
pub const INTEGRATION_SECONDS: f64 = 0.849346560;

/// The buffer chosen for an integration and its contents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedSlot<'a> {
    pub buffer: usize,
    pub slot: &'a Slot,
}

/// Picks the most recently validated slot whose validity integration has been reached.
///
/// Slot 1 wins when it is active and slot 0 is either inactive or older;
/// otherwise slot 0 is returned, even if it is itself inactive.
pub fn select_slot(entry: &VirtualChannelConfig, integration: u32) -> SelectedSlot<'_> {
    let slot0 = &entry.slot0;
    let slot1 = &entry.slot1;
    if slot1.is_active(integration)
        && (!slot0.is_active(integration)
            || slot1.validity_integration > slot0.validity_integration)
    {
        SelectedSlot {
            buffer: 1,
            slot: slot1,
        }
    } else {
        SelectedSlot {
            buffer: 0,
            slot: slot0,
        }
    }
}

/// Delay and phase for one packet of one virtual channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayResult {
    /// Whole-sample delay, fixed for the frame at packet 0.
    pub coarse_delay: i64,
    /// Fraction of a sample, 2^30 scale, wrapping.
    pub fine_delay_x: u32,
    pub fine_delay_y: u32,
    /// Fraction of a cycle, 2^32 scale.
    pub phase_x: u32,
    pub phase_y: u32,
    pub delay_x_ns: f64,
    pub delay_y_ns: f64,
    /// Polynomial evaluation time in seconds.
    pub time_s: f64,
    pub buffer: usize,
}

fn check_coordinate(frame: u8, packet: u8) -> ModelResult<()> {
    if frame >= FRAMES_PER_INTEGRATION {
        return Err(ModelError::InvalidInput(format!(
            "corner turn frame {} outside 0..{}",
            frame, FRAMES_PER_INTEGRATION
        )));
    }
    if packet >= PACKETS_PER_FRAME {
        return Err(ModelError::InvalidInput(format!(
            "packet {} outside 0..{}",
            packet, PACKETS_PER_FRAME
        )));
    }
    Ok(())
}

/// Seconds since the slot's epoch at which the polynomial is evaluated.
pub fn evaluation_time(slot: &Slot, integration: u32, frame: u8, packet: u8) -> f64 {
    let elapsed_integrations = i64::from(integration) - i64::from(slot.validity_integration);
    let mut t = slot.buffer_offset_s
        + f64::from(frame) * FRAME_SECONDS
        + elapsed_integrations as f64 * INTEGRATION_SECONDS;
    if packet >= PRELOAD_PACKETS {
        t += f64::from(packet - PRELOAD_PACKETS) * PACKET_SECONDS;
    }
    t
}

fn frame_coarse_delay(slot: &Slot, integration: u32, frame: u8) -> i64 {
    let t = evaluation_time(slot, integration, frame, 0);
    (slot.delay_ns(t) / SAMPLE_PERIOD_NS).floor() as i64
}

fn evaluate_with(
    selected: SelectedSlot<'_>,
    coarse_delay: i64,
    integration: u32,
    frame: u8,
    packet: u8,
) -> DelayResult {
    let slot = selected.slot;
    let time_s = evaluation_time(slot, integration, frame, packet);
    let delay_x_ns = slot.delay_ns(time_s);
    let delay_y_ns = delay_x_ns + slot.ypol_offset_ns;

    let coarse = coarse_delay as f64;
    let fine_x = delay_x_ns / SAMPLE_PERIOD_NS - coarse;
    let fine_y = delay_y_ns / SAMPLE_PERIOD_NS - coarse;

    DelayResult {
        coarse_delay,
        fine_delay_x: encode_fine_delay(fine_x),
        fine_delay_y: encode_fine_delay(fine_y),
        phase_x: encode_phase(delay_x_ns * slot.sky_freq_ghz),
        phase_y: encode_phase(delay_y_ns * slot.sky_freq_ghz),
        delay_x_ns,
        delay_y_ns,
        time_s,
        buffer: selected.buffer,
    }
}

/// Evaluates delay and phase for one packet coordinate.
pub fn evaluate(
    entry: &VirtualChannelConfig,
    integration: u32,
    frame: u8,
    packet: u8,
) -> ModelResult<DelayResult> {
    check_coordinate(frame, packet)?;
    let selected = select_slot(entry, integration);
    let coarse_delay = frame_coarse_delay(selected.slot, integration, frame);
    Ok(evaluate_with(selected, coarse_delay, integration, frame, packet))
}

/// Evaluates all packets of a frame.
pub fn evaluate_frame(
    entry: &VirtualChannelConfig,
    integration: u32,
    frame: u8,
) -> ModelResult<Vec<DelayResult>> {
    check_coordinate(frame, 0)?;
    let selected = select_slot(entry, integration);
    let coarse_delay = frame_coarse_delay(selected.slot, integration, frame);
    Ok((0..PACKETS_PER_FRAME)
        .map(|packet| evaluate_with(selected, coarse_delay, integration, frame, packet))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::fixed_point::FINE_DELAY_SCALE;

    fn slot(coefficients: [f64; 6], integration: u32, valid: bool) -> Slot {
        Slot {
            coefficients,
            sky_freq_ghz: 0.05,
            buffer_offset_s: 0.0,
            ypol_offset_ns: 0.0,
            validity_integration: integration,
            valid_word: i32::from(valid),
        }
    }

    fn constant_channel(c0: f64) -> VirtualChannelConfig {
        VirtualChannelConfig::new(
            0,
            slot([c0, 0.0, 0.0, 0.0, 0.0, 0.0], 0, true),
            Slot::default(),
        )
    }

    #[test]
    fn newer_slot_is_selected_once_reached() {
        let entry = VirtualChannelConfig::new(
            1,
            slot([0.0; 6], 10, true),
            slot([0.0; 6], 20, true),
        );
        assert_eq!(select_slot(&entry, 25).buffer, 1);
        assert_eq!(select_slot(&entry, 20).buffer, 1);
        assert_eq!(select_slot(&entry, 15).buffer, 0);
    }

    #[test]
    fn older_slot1_loses_to_newer_slot0() {
        let entry = VirtualChannelConfig::new(
            1,
            slot([0.0; 6], 30, true),
            slot([0.0; 6], 20, true),
        );
        assert_eq!(select_slot(&entry, 40).buffer, 0);
        assert_eq!(select_slot(&entry, 25).buffer, 1);
    }

    #[test]
    fn invalid_slot1_is_never_selected() {
        let entry = VirtualChannelConfig::new(
            1,
            slot([0.0; 6], 0, false),
            slot([0.0; 6], 0, false),
        );
        assert_eq!(select_slot(&entry, 100).buffer, 0);
    }

    #[test]
    fn time_zero_returns_constant_term() {
        let entry = VirtualChannelConfig::new(
            0,
            slot([1234.5, 17.0, -3.0, 9.0, 1.0, 2.0], 0, true),
            Slot::default(),
        );
        let result = evaluate(&entry, 0, 0, 0).unwrap();
        assert_eq!(result.time_s, 0.0);
        assert_eq!(result.delay_x_ns, 1234.5);
    }

    #[test]
    fn single_channel_reference_values() {
        let entry = constant_channel(1000.0);
        let result = evaluate(&entry, 0, 0, 0).unwrap();

        assert_eq!(result.delay_x_ns, 1000.0);
        assert_eq!(result.coarse_delay, 0);
        let expected_fine = ((1000.0 / 1080.0) * FINE_DELAY_SCALE).floor() as u32;
        assert_eq!(result.fine_delay_x, expected_fine);
        assert_eq!(result.fine_delay_y, expected_fine);
        assert_eq!(result.phase_x, encode_phase(1000.0 * 0.05));
    }

    #[test]
    fn coarse_delay_is_frozen_for_the_frame() {
        // 1079 ns at packet 0 rising 1 us/s; by the last packet the delay is
        // past one sample but the coarse value must stay at 0.
        let entry = VirtualChannelConfig::new(
            0,
            slot([1079.0, 1000.0, 0.0, 0.0, 0.0, 0.0], 0, true),
            Slot::default(),
        );
        let frame = evaluate_frame(&entry, 0, 0).unwrap();
        assert_eq!(frame.len(), 75);
        assert!(frame.iter().all(|r| r.coarse_delay == 0));

        let last = frame[74];
        assert!(last.delay_x_ns / SAMPLE_PERIOD_NS >= 1.0);
        assert!(last.fine_delay_x >= 1 << 30);
        assert_eq!(evaluate(&entry, 0, 0, 74).unwrap(), last);
    }

    #[test]
    fn preload_packets_share_frame_start_time() {
        let entry = constant_channel(0.0);
        let s = &entry.slot0;
        assert_eq!(evaluation_time(s, 0, 1, 0), evaluation_time(s, 0, 1, 10));
        assert_eq!(evaluation_time(s, 0, 1, 11), evaluation_time(s, 0, 1, 0));
        let step = evaluation_time(s, 0, 1, 12) - evaluation_time(s, 0, 1, 11);
        assert!((step - PACKET_SECONDS).abs() < 1e-15);
    }

    #[test]
    fn integrations_before_validity_give_negative_time() {
        let entry = VirtualChannelConfig::new(0, slot([0.0; 6], 5, true), Slot::default());
        let t = evaluation_time(&entry.slot0, 3, 0, 0);
        assert!((t + 2.0 * INTEGRATION_SECONDS).abs() < 1e-12);
    }

    #[test]
    fn negative_delay_floors_down() {
        let entry = constant_channel(-1.0);
        let result = evaluate(&entry, 0, 0, 0).unwrap();
        assert_eq!(result.coarse_delay, -1);
        assert!(result.fine_delay_x > 0);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let entry = constant_channel(0.0);
        assert!(evaluate(&entry, 0, 3, 0).is_err());
        assert!(evaluate(&entry, 0, 0, 75).is_err());
    }
}
