use num_complex::Complex64;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Synthetic filterbank input: one complex tone plus uniform noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulusConfig {
    pub samples: usize,
    /// Tone frequency in cycles per sample, in [-0.5, 0.5).
    pub tone_frequency: f64,
    pub amplitude: f64,
    /// Peak noise amplitude per component.
    pub noise: f64,
    pub seed: u64,
}

impl Default for StimulusConfig {
    fn default() -> Self {
        Self {
            samples: 4096 * 27,
            tone_frequency: 0.1,
            amplitude: 64.0,
            noise: 4.0,
            seed: 0,
        }
    }
}

pub fn build_stimulus(config: &StimulusConfig) -> anyhow::Result<Vec<Complex64>> {
    if !(-0.5..0.5).contains(&config.tone_frequency) {
        anyhow::bail!(
            "tone frequency {} outside [-0.5, 0.5) cycles per sample",
            config.tone_frequency
        );
    }
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut samples = Vec::with_capacity(config.samples);
    for n in 0..config.samples {
        let phase = 2.0 * PI * config.tone_frequency * n as f64;
        let mut value = Complex64::from_polar(config.amplitude, phase);
        if config.noise > 0.0 {
            value.re += rng.gen_range(-config.noise..config.noise);
            value.im += rng.gen_range(-config.noise..config.noise);
        }
        samples.push(value);
    }
    Ok(samples)
}
