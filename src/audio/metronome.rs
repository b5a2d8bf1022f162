//! Metronome click synthesis and tempo arithmetic
//!
//! Key features:
//! - 20ms white noise burst click samples, louder for the accented voice
//! - Deterministic output per seed (fixed-seed RNG)
//! - Pure functions, no side effects

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::SoundRole;

/// Duration of metronome click in milliseconds
const CLICK_DURATION_MS: f32 = 20.0;

/// Peak level of the unaccented voice relative to the accented one
const LO_CLICK_GAIN: f32 = 0.6;

/// Generates a metronome click sample (20ms white noise burst with a linear decay).
///
/// # Arguments
/// * `sample_rate` - Sample rate in Hz (typically 48000)
/// * `role` - Accented clicks are generated at full scale, unaccented ones quieter
/// * `seed` - Noise seed, so different sound identifiers produce different clicks
///
/// # Returns
/// Exactly 20ms worth of samples in range [-1.0, 1.0]
pub fn generate_click_sample(sample_rate: u32, role: SoundRole, seed: u64) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * CLICK_DURATION_MS / 1000.0) as usize;
    let gain = match role {
        SoundRole::Hi => 1.0,
        SoundRole::Lo => LO_CLICK_GAIN,
    };

    let mut rng = StdRng::seed_from_u64(seed);

    let mut samples = Vec::with_capacity(num_samples);
    for i in 0..num_samples {
        let envelope = 1.0 - i as f32 / num_samples as f32;
        samples.push(rng.gen_range(-1.0..1.0) * gain * envelope);
    }

    samples
}

/// Stable seed derived from a sample identifier (FNV-1a).
pub fn seed_for_identifier(identifier: &str) -> u64 {
    identifier
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
            (hash ^ byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
        })
}

/// Seconds between consecutive beats: `60 / bpm`.
#[inline]
pub fn tick_period_secs(bpm: f64) -> f64 {
    60.0 / bpm
}
