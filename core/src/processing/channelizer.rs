//! Polyphase filterbank channelizer.
//!
//! Each output time step takes a window of `taps_per_window * fft_length`
//! samples, weights it by the FIR, folds the `taps_per_window` segments
//! together and transforms the result. Windows advance by
//! `fft_length / oversample_ratio` samples, so an oversampled filterbank
//! carries a per-step phase ramp that `derotate` removes.

use crate::math::fft::FftHelper;
use crate::math::stats::StatsHelper;
use crate::prelude::{ModelError, ModelResult};
use log::{debug, warn};
use ndarray::Array2;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const SATURATION_HIGH: f64 = 32767.0;
const SATURATION_LOW: f64 = -32768.0;

/// Shape of the filterbank. Defaults describe the correlator's critically
/// sampled 4096-point filterbank with 12 taps per window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterbankConfig {
    pub fft_length: usize,
    pub taps_per_window: usize,
    pub oversample_numerator: u32,
    pub oversample_denominator: u32,
}

impl Default for FilterbankConfig {
    fn default() -> Self {
        Self {
            fft_length: 4096,
            taps_per_window: 12,
            oversample_numerator: 32,
            oversample_denominator: 32,
        }
    }
}

impl FilterbankConfig {
    pub fn window_length(&self) -> usize {
        self.fft_length * self.taps_per_window
    }

    /// Input samples consumed per output time step.
    pub fn sample_step(&self) -> usize {
        let ratio = f64::from(self.oversample_numerator) / f64::from(self.oversample_denominator);
        StatsHelper::round_half_even(self.fft_length as f64 / ratio) as usize
    }
}

/// Per-call processing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Output time steps; `None` uses all of the input.
    pub time_steps: Option<usize>,
    pub derotate: bool,
    /// Channels kept around DC.
    pub keep: usize,
    pub filter_scale: f64,
    pub fft_scale: f64,
    /// Clip to the signed 16-bit range.
    pub saturate: bool,
    /// Zeros prepended to the input, as the firmware preloads them.
    pub preload_zeros: usize,
    /// Run the correction filter over the input first.
    pub pre_filter: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            time_steps: None,
            derotate: false,
            keep: 3456,
            filter_scale: 512.0,
            fft_scale: 128.0,
            saturate: true,
            preload_zeros: 0,
            pre_filter: false,
        }
    }
}

/// What saturation did to the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SaturationReport {
    pub clipped: bool,
    /// Largest |re| before clipping.
    pub real_max: f64,
    /// Largest |im| before clipping.
    pub imag_max: f64,
}

#[derive(Debug, Clone)]
pub struct ChannelizerOutput {
    /// `[time_step][channel]`, DC in the middle.
    pub spectrogram: Array2<Complex64>,
    pub saturation: SaturationReport,
}

/// Parses whitespace separated FIR taps.
pub fn parse_fir_taps(text: &str) -> ModelResult<Vec<f64>> {
    text.split_whitespace()
        .enumerate()
        .map(|(index, token)| {
            token.parse::<f64>().map_err(|e| ModelError::Parse {
                line: index + 1,
                reason: format!("FIR tap {:?}: {}", token, e),
            })
        })
        .collect()
}

/// Causal FIR, `y[n] = sum_k b[k] x[n - k]`, same length as the input.
pub fn causal_fir(coefficients: &[f64], input: &[Complex64]) -> Vec<Complex64> {
    (0..input.len())
        .map(|n| {
            coefficients
                .iter()
                .take(n + 1)
                .enumerate()
                .map(|(k, &b)| input[n - k] * b)
                .sum()
        })
        .collect()
}

pub struct PolyphaseFilterbank {
    config: FilterbankConfig,
    fir: Vec<f64>,
    correction_filter: Option<Vec<f64>>,
    sample_step: usize,
}

impl PolyphaseFilterbank {
    /// Builds the filterbank. FIR taps are rounded to integers as the firmware stores them.
    pub fn new(
        config: FilterbankConfig,
        fir: Vec<f64>,
        correction_filter: Option<Vec<f64>>,
    ) -> ModelResult<Self> {
        if config.fft_length == 0 || config.taps_per_window == 0 {
            return Err(ModelError::InvalidInput(
                "filterbank needs a non-zero FFT length and tap count".into(),
            ));
        }
        if config.oversample_numerator == 0 || config.oversample_denominator == 0 {
            return Err(ModelError::InvalidInput(
                "oversample ratio terms must be non-zero".into(),
            ));
        }
        if fir.len() != config.window_length() {
            return Err(ModelError::InvalidInput(format!(
                "wrong number of FIR taps: got {}, expected {}",
                fir.len(),
                config.window_length()
            )));
        }
        let sample_step = config.sample_step();
        if sample_step == 0 {
            return Err(ModelError::InvalidInput("oversample ratio too large".into()));
        }

        let fir = fir.into_iter().map(StatsHelper::round_half_even).collect();
        Ok(Self {
            config,
            fir,
            correction_filter,
            sample_step,
        })
    }

    pub fn sample_step(&self) -> usize {
        self.sample_step
    }

    /// Time steps that fit in `input_len` samples.
    pub fn available_time_steps(&self, input_len: usize) -> usize {
        let preload_length = self.config.window_length().saturating_sub(self.sample_step);
        input_len.saturating_sub(preload_length) / self.sample_step
    }

    pub fn filter(
        &self,
        samples: &[Complex64],
        options: &FilterOptions,
    ) -> ModelResult<ChannelizerOutput> {
        let fft_length = self.config.fft_length;
        let window_length = self.config.window_length();

        if options.keep > fft_length {
            return Err(ModelError::InvalidInput(format!(
                "cannot keep {} channels of a {}-point FFT",
                options.keep, fft_length
            )));
        }

        let mut padded = vec![Complex64::default(); options.preload_zeros];
        padded.extend_from_slice(samples);

        let time_steps = options
            .time_steps
            .unwrap_or_else(|| self.available_time_steps(padded.len()));
        if time_steps > 0 {
            let needed = (time_steps - 1) * self.sample_step + window_length;
            if needed > padded.len() {
                return Err(ModelError::InvalidInput(format!(
                    "{} time steps need {} samples, only {} available",
                    time_steps,
                    needed,
                    padded.len()
                )));
            }
        }

        let input = if options.pre_filter {
            let correction = self.correction_filter.as_ref().ok_or_else(|| {
                ModelError::InvalidInput("pre_filter requested without a correction filter".into())
            })?;
            causal_fir(correction, &padded)
        } else {
            padded
        };

        let half = fft_length as f64 / 2.0;
        let keep_half = options.keep as f64 / 2.0;
        let first_kept = (half - keep_half) as usize;
        let end_kept = (half + keep_half) as usize;
        let shift = fft_length - fft_length / 2;
        let rotation = f64::from(self.config.oversample_denominator)
            / f64::from(self.config.oversample_numerator);

        let mut spectrogram = Array2::<Complex64>::zeros((time_steps, end_kept - first_kept));
        let mut fft = FftHelper::new(fft_length);
        let mut folded = vec![Complex64::default(); fft_length];

        for step in 0..time_steps {
            let start = step * self.sample_step;
            let window = &input[start..start + window_length];

            folded.iter_mut().for_each(|v| *v = Complex64::default());
            for (segment, taps) in window
                .chunks_exact(fft_length)
                .zip(self.fir.chunks_exact(fft_length))
            {
                for ((acc, &sample), &tap) in folded.iter_mut().zip(segment).zip(taps) {
                    *acc += sample * tap;
                }
            }
            folded.iter_mut().for_each(|v| *v /= options.filter_scale);

            fft.forward_in_place(&mut folded);

            let mut row = spectrogram.row_mut(step);
            for (column, out) in row.iter_mut().enumerate() {
                let bin = (first_kept + column + shift) % fft_length;
                let mut value = folded[bin] / options.fft_scale;
                if options.derotate {
                    let angle = -(bin as f64) * rotation * step as f64 * 2.0 * PI;
                    value *= Complex64::from_polar(1.0, angle);
                }
                *out = value;
            }
        }

        let mut saturation = SaturationReport {
            clipped: false,
            real_max: StatsHelper::max_abs(spectrogram.iter().map(|c| c.re)),
            imag_max: StatsHelper::max_abs(spectrogram.iter().map(|c| c.im)),
        };
        if options.saturate
            && (saturation.real_max > SATURATION_HIGH || saturation.imag_max > SATURATION_HIGH)
        {
            saturation.clipped = true;
            spectrogram.mapv_inplace(|c| {
                Complex64::new(
                    c.re.clamp(SATURATION_LOW, SATURATION_HIGH),
                    c.im.clamp(SATURATION_LOW, SATURATION_HIGH),
                )
            });
            warn!(
                "filterbank output clipped (real max {:.1}, imag max {:.1})",
                saturation.real_max, saturation.imag_max
            );
        }

        debug!(
            "filterbank produced {} time steps x {} channels",
            spectrogram.nrows(),
            spectrogram.ncols()
        );
        Ok(ChannelizerOutput {
            spectrogram,
            saturation,
        })
    }
}
