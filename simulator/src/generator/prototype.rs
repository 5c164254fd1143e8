use std::f64::consts::PI;

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Hann-windowed sinc low-pass one channel wide, scaled by `peak`.
/// Used when no FIR file is supplied.
pub fn windowed_sinc(fft_length: usize, taps_per_window: usize, peak: f64) -> Vec<f64> {
    let length = fft_length * taps_per_window;
    if length == 0 {
        return Vec::new();
    }
    let centre = (length as f64 - 1.0) / 2.0;
    (0..length)
        .map(|n| {
            let offset = n as f64 - centre;
            let window = 0.5 - 0.5 * (2.0 * PI * n as f64 / (length as f64 - 1.0).max(1.0)).cos();
            peak * window * sinc(offset / fft_length as f64)
        })
        .collect()
}
