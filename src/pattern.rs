//! Bar length and accent placement.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Numerator plus the set of accented beats within a bar.
///
/// The accent set is never empty and never holds an index `>= numerator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatPattern {
    numerator: u32,
    accents: BTreeSet<u32>,
}

impl BeatPattern {
    pub fn new(numerator: u32) -> Self {
        Self {
            numerator: numerator.max(1),
            accents: BTreeSet::from([0]),
        }
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn accents(&self) -> &BTreeSet<u32> {
        &self.accents
    }

    /// Changes the bar length, dropping accents that fall outside it.
    pub fn set_numerator(&mut self, numerator: u32) {
        self.numerator = numerator.max(1);
        let limit = self.numerator;
        self.accents.retain(|&beat| beat < limit);
        self.ensure_accent();
    }

    /// Flips the accent on `beat`. Out-of-range beats are ignored.
    pub fn toggle_accent(&mut self, beat: u32) -> bool {
        if beat >= self.numerator {
            return false;
        }
        if !self.accents.remove(&beat) {
            self.accents.insert(beat);
        }
        self.ensure_accent();
        true
    }

    /// Position-in-bar accent lookup for a run-relative beat index.
    pub fn is_accented(&self, beat_index: u64) -> bool {
        let beat = (beat_index % self.numerator as u64) as u32;
        self.accents.contains(&beat)
    }

    /// Position within the bar.
    pub fn beat_in_bar(&self, beat_index: u64) -> u32 {
        (beat_index % self.numerator as u64) as u32
    }

    fn ensure_accent(&mut self) {
        if self.accents.is_empty() {
            self.accents.insert(0);
        }
    }
}

impl Default for BeatPattern {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_accents_downbeat() {
        let pattern = BeatPattern::default();
        assert!(pattern.is_accented(0));
        assert!(!pattern.is_accented(1));
        assert!(pattern.is_accented(4));
        assert!(pattern.is_accented(8));
    }

    #[test]
    fn test_toggle_accent() {
        let mut pattern = BeatPattern::new(4);
        assert!(pattern.toggle_accent(2));
        assert!(pattern.is_accented(2));
        assert!(pattern.is_accented(6));
        assert!(pattern.toggle_accent(2));
        assert!(!pattern.is_accented(2));
    }

    #[test]
    fn test_toggle_out_of_range_is_ignored() {
        let mut pattern = BeatPattern::new(3);
        assert!(!pattern.toggle_accent(3));
        assert_eq!(pattern.accents(), &BTreeSet::from([0]));
    }

    #[test]
    fn test_removing_last_accent_restores_downbeat() {
        let mut pattern = BeatPattern::new(4);
        pattern.toggle_accent(0);
        assert_eq!(pattern.accents(), &BTreeSet::from([0]));
    }

    #[test]
    fn test_shrink_filters_and_force_accents() {
        let mut pattern = BeatPattern::new(7);
        pattern.toggle_accent(5);
        pattern.toggle_accent(0);
        assert_eq!(pattern.accents(), &BTreeSet::from([5]));

        pattern.set_numerator(4);
        assert_eq!(pattern.accents(), &BTreeSet::from([0]));
    }

    #[test]
    fn test_zero_numerator_becomes_one() {
        let mut pattern = BeatPattern::new(0);
        assert_eq!(pattern.numerator(), 1);
        pattern.set_numerator(0);
        assert_eq!(pattern.numerator(), 1);
        assert!(pattern.is_accented(17));
    }

    #[test]
    fn test_accent_set_never_empty_over_sequences() {
        let mut pattern = BeatPattern::new(5);
        let ops: [(bool, u32); 12] = [
            (false, 0),
            (false, 3),
            (true, 2),
            (false, 1),
            (false, 0),
            (true, 9),
            (false, 8),
            (true, 1),
            (false, 0),
            (true, 6),
            (false, 5),
            (false, 0),
        ];
        for (is_resize, value) in ops {
            if is_resize {
                pattern.set_numerator(value);
            } else {
                pattern.toggle_accent(value);
            }
            assert!(!pattern.accents().is_empty());
            assert!(pattern.accents().iter().all(|&b| b < pattern.numerator()));
        }
    }
}
