//! Tempo cues: named BPM presets that can be queued to the next bar line.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CueId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoCue {
    pub id: CueId,
    pub label: String,
    pub bpm: f64,
}

/// Outcome of a tempo request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TempoChange {
    /// Apply now
    Immediate(f64),
    /// Parked until the last beat of the current bar
    Queued(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingTempo {
    bpm: f64,
    cue: Option<CueId>,
}

/// Cue list plus the single pending-tempo slot.
#[derive(Debug, Clone)]
pub struct CueBoard {
    cues: Vec<TempoCue>,
    next_id: u32,
    pending: Option<PendingTempo>,
}

impl CueBoard {
    pub fn empty() -> Self {
        Self {
            cues: Vec::new(),
            next_id: 1,
            pending: None,
        }
    }

    pub fn add(&mut self, label: impl Into<String>, bpm: f64) -> CueId {
        let id = CueId(self.next_id);
        self.next_id += 1;
        self.cues.push(TempoCue {
            id,
            label: label.into(),
            bpm,
        });
        id
    }

    pub fn update(&mut self, id: CueId, label: impl Into<String>, bpm: f64) -> bool {
        match self.cues.iter_mut().find(|cue| cue.id == id) {
            Some(cue) => {
                cue.label = label.into();
                cue.bpm = bpm;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: CueId) -> bool {
        let before = self.cues.len();
        self.cues.retain(|cue| cue.id != id);
        if self.pending.and_then(|p| p.cue) == Some(id) {
            self.pending = None;
        }
        self.cues.len() != before
    }

    pub fn get(&self, id: CueId) -> Option<&TempoCue> {
        self.cues.iter().find(|cue| cue.id == id)
    }

    pub fn cues(&self) -> &[TempoCue] {
        &self.cues
    }

    /// Decides whether `bpm` applies now or waits for the bar line.
    ///
    /// Queued only when the transport is running and queueing is enabled;
    /// a newer request replaces any pending one.
    pub fn request(
        &mut self,
        bpm: f64,
        cue: Option<CueId>,
        running: bool,
        queue_enabled: bool,
    ) -> TempoChange {
        if running && queue_enabled {
            self.pending = Some(PendingTempo { bpm, cue });
            TempoChange::Queued(bpm)
        } else {
            self.pending = None;
            TempoChange::Immediate(bpm)
        }
    }

    /// Takes the pending tempo if `beat` is the last beat of the bar.
    pub fn take_due(&mut self, beat: u32, numerator: u32) -> Option<f64> {
        if beat + 1 != numerator.max(1) {
            return None;
        }
        self.pending.take().map(|pending| pending.bpm)
    }

    pub fn pending_bpm(&self) -> Option<f64> {
        self.pending.map(|p| p.bpm)
    }

    pub fn queued_cue(&self) -> Option<CueId> {
        self.pending.and_then(|p| p.cue)
    }

    pub fn clear_pending(&mut self) {
        self.pending = None;
    }
}

impl Default for CueBoard {
    fn default() -> Self {
        let mut board = Self::empty();
        board.add("Slow", 90.0);
        board.add("Mid", 110.0);
        board.add("Base", 120.0);
        board.add("Fast", 180.0);
        board
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_board() {
        let board = CueBoard::default();
        let labels: Vec<&str> = board.cues().iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Slow", "Mid", "Base", "Fast"]);
        assert_eq!(board.get(CueId(4)).unwrap().bpm, 180.0);
    }

    #[test]
    fn test_add_update_remove() {
        let mut board = CueBoard::empty();
        let id = board.add("Verse", 96.0);
        assert!(board.update(id, "Verse 2", 98.0));
        assert_eq!(board.get(id).unwrap().label, "Verse 2");
        assert!(!board.update(CueId(99), "Nope", 1.0));
        assert!(board.remove(id));
        assert!(!board.remove(id));
        assert!(board.get(id).is_none());
    }

    #[test]
    fn test_request_while_stopped_applies_immediately() {
        let mut board = CueBoard::default();
        assert_eq!(board.request(90.0, Some(CueId(1)), false, true), TempoChange::Immediate(90.0));
        assert_eq!(board.pending_bpm(), None);
    }

    #[test]
    fn test_request_with_queueing_disabled_applies_immediately() {
        let mut board = CueBoard::default();
        assert_eq!(board.request(90.0, None, true, false), TempoChange::Immediate(90.0));
    }

    #[test]
    fn test_pending_released_only_on_last_beat() {
        let mut board = CueBoard::default();
        assert_eq!(board.request(180.0, Some(CueId(4)), true, true), TempoChange::Queued(180.0));
        assert_eq!(board.queued_cue(), Some(CueId(4)));

        assert_eq!(board.take_due(1, 4), None);
        assert_eq!(board.take_due(2, 4), None);
        assert_eq!(board.take_due(3, 4), Some(180.0));
        assert_eq!(board.pending_bpm(), None);
        assert_eq!(board.take_due(3, 4), None);
    }

    #[test]
    fn test_newer_request_replaces_pending() {
        let mut board = CueBoard::default();
        board.request(90.0, Some(CueId(1)), true, true);
        board.request(110.0, Some(CueId(2)), true, true);
        assert_eq!(board.take_due(3, 4), Some(110.0));
    }

    #[test]
    fn test_removing_queued_cue_clears_pending() {
        let mut board = CueBoard::default();
        board.request(90.0, Some(CueId(1)), true, true);
        board.remove(CueId(1));
        assert_eq!(board.pending_bpm(), None);
    }

    #[test]
    fn test_single_beat_bar_releases_every_beat() {
        let mut board = CueBoard::default();
        board.request(90.0, None, true, true);
        assert_eq!(board.take_due(0, 1), Some(90.0));
    }
}
