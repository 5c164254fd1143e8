use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Wraps a planned forward FFT together with its scratch buffer.
pub struct FftHelper {
    fft: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex64::default(); fft.get_inplace_scratch_len()];
        Self { fft, scratch }
    }

    /// Unnormalized forward transform in place. `buffer` must match the planned size.
    pub fn forward_in_place(&mut self, buffer: &mut [Complex64]) {
        self.fft.process_with_scratch(buffer, &mut self.scratch);
    }
}
