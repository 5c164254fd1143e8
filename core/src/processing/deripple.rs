//! Fixed compensation filter for the upstream filterbank's passband ripple.

use crate::math::stats::StatsHelper;
use crate::prelude::{ModelError, ModelResult};

pub const DERIPPLE_LEN: usize = 31;

/// Default integer taps; they sum to 512 so the DC gain after scaling is one.
/// Hardware builds with a different table load theirs with [`DerippleFilter::with_taps`].
pub const DERIPPLE_TAPS: [i32; DERIPPLE_LEN] = [
    1, 0, -1, 1, -2, 2, -3, 4, -5, 6, -8, 10, -14, 22, -44, 574, -44, 22, -14, 10, -8, 6, -5, 4,
    -3, 2, -2, 1, -1, 0, 1,
];

pub const DERIPPLE_SCALE: f64 = 512.0;

#[derive(Debug, Clone)]
pub struct DerippleFilter {
    taps: [i32; DERIPPLE_LEN],
}

impl Default for DerippleFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl DerippleFilter {
    pub fn new() -> Self {
        Self::with_taps(DERIPPLE_TAPS)
    }

    /// Uses `taps` in place of the default table. The output is still divided by 512.
    pub fn with_taps(taps: [i32; DERIPPLE_LEN]) -> Self {
        Self { taps }
    }

    /// Reads a whitespace separated table of 31 integer taps.
    pub fn from_text(text: &str) -> ModelResult<Self> {
        let values = text
            .split_whitespace()
            .enumerate()
            .map(|(index, token)| {
                token.parse::<i32>().map_err(|e| ModelError::Parse {
                    line: index + 1,
                    reason: format!("deripple tap {:?}: {}", token, e),
                })
            })
            .collect::<ModelResult<Vec<i32>>>()?;
        let count = values.len();
        let taps: [i32; DERIPPLE_LEN] = values.try_into().map_err(|_| {
            ModelError::InvalidInput(format!(
                "deripple table has {} taps, expected {}",
                count, DERIPPLE_LEN
            ))
        })?;
        Ok(Self::with_taps(taps))
    }

    /// Samples of context needed on each side of an output sample.
    pub const fn half_span() -> usize {
        DERIPPLE_LEN / 2
    }

    pub fn taps(&self) -> &[i32; DERIPPLE_LEN] {
        &self.taps
    }

    /// Convolves over the fully overlapped region, so the output is
    /// `input.len() - 30` long and `output[k]` is centred on `input[k + 15]`.
    pub fn filter(&self, input: &[i32]) -> Vec<i32> {
        if input.len() < DERIPPLE_LEN {
            return Vec::new();
        }
        input
            .windows(DERIPPLE_LEN)
            .map(|window| {
                let acc: i64 = self
                    .taps
                    .iter()
                    .zip(window.iter().rev())
                    .map(|(&tap, &sample)| i64::from(tap) * i64::from(sample))
                    .sum();
                StatsHelper::round_half_even(acc as f64 / DERIPPLE_SCALE) as i32
            })
            .collect()
    }
}
