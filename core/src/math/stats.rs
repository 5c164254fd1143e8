pub struct StatsHelper;

impl StatsHelper {
    /// Rounds to the nearest integer, ties to even.
    pub fn round_half_even(value: f64) -> f64 {
        value.round_ties_even()
    }

    pub fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    /// Largest absolute value, 0 for an empty sequence.
    pub fn max_abs<I: IntoIterator<Item = f64>>(values: I) -> f64 {
        values.into_iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_round_to_even() {
        assert_eq!(StatsHelper::round_half_even(2.5), 2.0);
        assert_eq!(StatsHelper::round_half_even(3.5), 4.0);
        assert_eq!(StatsHelper::round_half_even(-2.5), -2.0);
        assert_eq!(StatsHelper::round_half_even(2.6), 3.0);
    }

    #[test]
    fn mean_of_empty_sequence_is_zero() {
        assert_eq!(StatsHelper::mean(&[]), 0.0);
        assert_eq!(StatsHelper::mean(&[1.0, 2.0, 6.0]), 3.0);
    }

    #[test]
    fn max_abs_sees_negative_peaks() {
        assert_eq!(StatsHelper::max_abs([1.0, -7.5, 3.0]), 7.5);
        assert_eq!(StatsHelper::max_abs(Vec::<f64>::new()), 0.0);
    }
}
