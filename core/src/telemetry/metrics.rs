use serde::{Deserialize, Serialize};

/// Mismatches kept in full per category; the rest are only counted.
pub const MAX_REPORTED_MISMATCHES: usize = 20;

/// Running match/mismatch counter for one comparison category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchTally<T> {
    matched: usize,
    mismatched: usize,
    first_mismatches: Vec<T>,
}

impl<T> MatchTally<T> {
    pub fn new() -> Self {
        Self {
            matched: 0,
            mismatched: 0,
            first_mismatches: Vec::new(),
        }
    }

    pub fn record_match(&mut self) {
        self.matched += 1;
    }

    /// Counts a mismatch. Returns true while details are still being retained.
    pub fn record_mismatch(&mut self, detail: T) -> bool {
        self.mismatched += 1;
        if self.first_mismatches.len() < MAX_REPORTED_MISMATCHES {
            self.first_mismatches.push(detail);
            true
        } else {
            false
        }
    }

    pub fn matched(&self) -> usize {
        self.matched
    }

    pub fn mismatched(&self) -> usize {
        self.mismatched
    }

    pub fn first_mismatches(&self) -> &[T] {
        &self.first_mismatches
    }
}

impl<T> Default for MatchTally<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_are_bounded_but_counts_are_not() {
        let mut tally = MatchTally::new();
        tally.record_match();
        for n in 0..25 {
            let kept = tally.record_mismatch(n);
            assert_eq!(kept, n < MAX_REPORTED_MISMATCHES);
        }
        assert_eq!(tally.matched(), 1);
        assert_eq!(tally.mismatched(), 25);
        assert_eq!(tally.first_mismatches().len(), MAX_REPORTED_MISMATCHES);
        assert_eq!(tally.first_mismatches()[0], 0);
    }
}
