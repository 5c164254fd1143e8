//! Fixed-point encodings used by the corner-turn delay outputs.
//!
//! Both encodings truncate with `floor`, never round.

/// Fine delay is a fraction of a sample scaled by 2^30.
pub const FINE_DELAY_SCALE: f64 = (1u64 << 30) as f64;
/// Phase is a fraction of a cycle scaled by 2^32.
pub const PHASE_SCALE: f64 = (1u64 << 32) as f64;

const WRAP: u64 = 1 << 32;

/// Encodes a fractional sample delay as an unsigned 32-bit value.
///
/// Negative fractions wrap as two's complement: `2^32 - floor(-f * 2^30)`.
pub fn encode_fine_delay(fraction: f64) -> u32 {
    if fraction >= 0.0 {
        (fraction * FINE_DELAY_SCALE).floor() as u64 as u32
    } else {
        let magnitude = (-fraction * FINE_DELAY_SCALE).floor() as u64;
        WRAP.wrapping_sub(magnitude) as u32
    }
}

/// Fractional part of a cycle count, always in [0, 1).
pub fn phase_fraction(cycles: f64) -> f64 {
    cycles - cycles.floor()
}

/// Encodes the fractional part of `cycles` as an unsigned 32-bit phase.
pub fn encode_phase(cycles: f64) -> u32 {
    (PHASE_SCALE * phase_fraction(cycles)).floor() as u64 as u32
}
