// Audio module - click sample generation and the sink the scheduler fires into

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::HostTime;
use crate::error::AudioError;

pub mod metronome;
pub mod recording;

#[cfg(feature = "desktop-audio")]
pub mod cpal_sink;

#[cfg(feature = "desktop-audio")]
pub use cpal_sink::CpalSink;
pub use recording::{RecordingSink, TriggerRecord};

/// Which of the two click voices a beat uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundRole {
    /// Accented beat
    Hi,
    /// Unaccented beat
    Lo,
}

impl SoundRole {
    pub fn for_accent(accented: bool) -> Self {
        if accented {
            SoundRole::Hi
        } else {
            SoundRole::Lo
        }
    }
}

/// Platform audio output consumed by the scheduler.
///
/// `trigger` must be callable concurrently from several short-lived trigger
/// tasks. `at` is the host time the trigger was scheduled for; it is
/// informational, the sink plays immediately.
pub trait AudioSink: Send + Sync {
    fn load_sample(&self, role: SoundRole, identifier: &str) -> Result<(), AudioError>;
    fn trigger(&self, role: SoundRole, at: HostTime);
    fn set_volume(&self, role: SoundRole, level: f32);
    fn set_muted(&self, muted: bool);
    /// Issue whatever warm-up the engine needs before the first real click.
    fn prime(&self);
}

/// Sample identifiers for the two click voices of one sound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundPair {
    pub hi: String,
    pub lo: String,
}

/// Named sound pairs built from sample identifiers.
#[derive(Debug, Clone, Default)]
pub struct SoundLibrary {
    pairs: BTreeMap<String, SoundPair>,
}

impl SoundLibrary {
    /// Groups identifiers named `<name>_hi` / `<name>_lo` into pairs.
    ///
    /// A sound with only one half uses it for both voices. Identifiers
    /// without a `_hi`/`_lo` suffix are ignored.
    pub fn from_identifiers<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pairs: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();

        for identifier in identifiers {
            let identifier = identifier.as_ref();
            let Some((name, suffix)) = identifier.rsplit_once('_') else {
                continue;
            };
            let entry = pairs.entry(name.to_string()).or_default();
            match suffix {
                "hi" => entry.0 = Some(identifier.to_string()),
                "lo" => entry.1 = Some(identifier.to_string()),
                _ => {}
            }
        }

        let pairs = pairs
            .into_iter()
            .filter_map(|(name, (hi, lo))| {
                let hi_id = hi.clone().or_else(|| lo.clone())?;
                let lo_id = lo.or(hi)?;
                Some((name, SoundPair { hi: hi_id, lo: lo_id }))
            })
            .collect();

        Self { pairs }
    }

    pub fn get(&self, name: &str) -> Option<&SoundPair> {
        self.pairs.get(name)
    }

    /// Sound names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.pairs.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sound_role_for_accent() {
        assert_eq!(SoundRole::for_accent(true), SoundRole::Hi);
        assert_eq!(SoundRole::for_accent(false), SoundRole::Lo);
    }

    #[test]
    fn test_library_pairs_hi_and_lo() {
        let library =
            SoundLibrary::from_identifiers(["Glass_hi", "Glass_lo", "Wood_Block_hi", "Wood_Block_lo"]);
        assert_eq!(library.names(), vec!["Glass".to_string(), "Wood_Block".to_string()]);
        assert_eq!(
            library.get("Wood_Block"),
            Some(&SoundPair {
                hi: "Wood_Block_hi".to_string(),
                lo: "Wood_Block_lo".to_string()
            })
        );
    }

    #[test]
    fn test_library_mirrors_missing_half() {
        let library = SoundLibrary::from_identifiers(["Cowbell_lo", "Rim_hi"]);
        let cowbell = library.get("Cowbell").unwrap();
        assert_eq!(cowbell.hi, "Cowbell_lo");
        assert_eq!(cowbell.lo, "Cowbell_lo");
        let rim = library.get("Rim").unwrap();
        assert_eq!(rim.lo, "Rim_hi");
    }

    #[test]
    fn test_library_ignores_unsuffixed_identifiers() {
        let library = SoundLibrary::from_identifiers(["readme", "Clap_mid"]);
        assert!(library.is_empty());
        assert!(library.get("Clap").is_none());
    }
}
