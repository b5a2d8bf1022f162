//! Tempo model: BPM range, time signature, tap tempo and tempo cues.

use serde::{Deserialize, Serialize};

use crate::config::TempoConfig;

pub mod cue;
pub mod tap;

pub use cue::{CueBoard, CueId, TempoChange, TempoCue};
pub use tap::TapTempoEstimator;

/// Allowed BPM interval. Out-of-range requests clamp at the boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoRange {
    pub min: f64,
    pub max: f64,
}

impl TempoRange {
    pub fn new(min: f64, max: f64) -> Self {
        let min = if min.is_finite() && min > 0.0 { min } else { 1.0 };
        let max = if max.is_finite() && max >= min { max } else { min };
        Self { min, max }
    }

    /// Clamped BPM, or `None` for NaN/infinite input (caller keeps its state).
    pub fn clamp(&self, bpm: f64) -> Option<f64> {
        if !bpm.is_finite() {
            return None;
        }
        Some(bpm.clamp(self.min, self.max))
    }
}

impl Default for TempoRange {
    fn default() -> Self {
        Self::new(40.0, 300.0)
    }
}

impl From<&TempoConfig> for TempoRange {
    fn from(config: &TempoConfig) -> Self {
        Self::new(config.min_bpm, config.max_bpm)
    }
}

/// Note value that gets one beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Denominator {
    Whole,
    Half,
    Quarter,
    Eighth,
}

impl Denominator {
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Denominator::Whole),
            2 => Some(Denominator::Half),
            4 => Some(Denominator::Quarter),
            8 => Some(Denominator::Eighth),
            _ => None,
        }
    }

    pub fn value(self) -> u32 {
        match self {
            Denominator::Whole => 1,
            Denominator::Half => 2,
            Denominator::Quarter => 4,
            Denominator::Eighth => 8,
        }
    }

    /// Tick-rate multiplier relative to the quarter-note baseline.
    pub fn tempo_factor(self) -> f64 {
        self.value() as f64 / 4.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    numerator: u32,
    denominator: Denominator,
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: Denominator) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator,
        }
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> Denominator {
        self.denominator
    }

    /// Clamps into `[1, max]`.
    pub fn with_numerator(self, numerator: u32, max: u32) -> Self {
        Self {
            numerator: numerator.clamp(1, max.max(1)),
            ..self
        }
    }

    pub fn with_denominator(self, denominator: Denominator) -> Self {
        Self {
            denominator,
            ..self
        }
    }

    /// Tick rate the scheduler runs at for a quarter-note `bpm`.
    pub fn effective_bpm(&self, bpm: f64) -> f64 {
        bpm * self.denominator.tempo_factor()
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, Denominator::Quarter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo_range_clamps() {
        let range = TempoRange::default();
        assert_eq!(range.clamp(10.0), Some(40.0));
        assert_eq!(range.clamp(500.0), Some(300.0));
        assert_eq!(range.clamp(128.5), Some(128.5));
        assert_eq!(range.clamp(-5.0), Some(40.0));
        assert_eq!(range.clamp(f64::NAN), None);
        assert_eq!(range.clamp(f64::INFINITY), None);
    }

    #[test]
    fn test_tempo_range_rejects_degenerate_bounds() {
        let range = TempoRange::new(0.0, -1.0);
        assert!(range.min > 0.0);
        assert!(range.max >= range.min);
    }

    #[test]
    fn test_denominator_values() {
        for value in [1, 2, 4, 8] {
            assert_eq!(Denominator::from_value(value).unwrap().value(), value);
        }
        assert!(Denominator::from_value(3).is_none());
        assert!(Denominator::from_value(16).is_none());
    }

    #[test]
    fn test_effective_bpm_rescaling() {
        let sig = TimeSignature::default();
        assert_eq!(sig.effective_bpm(120.0), 120.0);
        assert_eq!(sig.with_denominator(Denominator::Eighth).effective_bpm(120.0), 240.0);
        assert_eq!(sig.with_denominator(Denominator::Half).effective_bpm(120.0), 60.0);
        assert_eq!(sig.with_denominator(Denominator::Whole).effective_bpm(120.0), 30.0);
    }

    #[test]
    fn test_numerator_clamped() {
        let sig = TimeSignature::default();
        assert_eq!(sig.with_numerator(0, 16).numerator(), 1);
        assert_eq!(sig.with_numerator(40, 16).numerator(), 16);
        assert_eq!(sig.with_numerator(7, 16).numerator(), 7);
    }
}
