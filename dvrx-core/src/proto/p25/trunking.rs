//! Control-channel / voice-channel trunking state machine.
//!
//! One process-wide instance owns the tuned flag, the candidate list, the
//! hang timer and the per-slot audio gates. All tuning goes through the
//! [`Tuner`] capability, which tests replace with a double; the admission
//! policy (modes, holds, encryption lockout) lives in the MAC handler and
//! calls in here only once a grant has passed it.

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::errors::TuneError;

/// Device-tuning capability. `tune` may block on the order of 10 ms; the
/// DSP front-end tolerates the resulting sample gap by design (§ retune
/// semantics of the front-end).
pub trait Tuner {
    fn tune(&mut self, freq_hz: u64) -> Result<(), TuneError>;
}

#[derive(Debug)]
pub struct TrunkSm {
    tuned: bool,
    cc_freq: u64,
    vc_freq: u64,
    active_tg: u32,
    candidates: Vec<u64>,
    cursor: usize,
    last_active: Option<Instant>,
    hang: Duration,
    audio_allowed: [bool; 2],
}

impl TrunkSm {
    pub fn new(hang: Duration) -> Self {
        Self {
            tuned: false,
            cc_freq: 0,
            vc_freq: 0,
            active_tg: 0,
            candidates: Vec::new(),
            cursor: 0,
            last_active: None,
            hang,
            audio_allowed: [false; 2],
        }
    }

    /// Reset to the cold state: no candidates, not tuned.
    pub fn init(&mut self) {
        self.candidates.clear();
        self.cursor = 0;
        self.tuned = false;
        self.vc_freq = 0;
        self.active_tg = 0;
        self.last_active = None;
        self.audio_allowed = [false; 2];
    }

    pub fn set_cc_freq(&mut self, freq: u64) {
        self.cc_freq = freq;
    }

    pub fn cc_freq(&self) -> u64 {
        self.cc_freq
    }

    pub fn vc_freq(&self) -> u64 {
        self.vc_freq
    }

    pub fn tuned(&self) -> bool {
        self.tuned
    }

    pub fn active_tg(&self) -> u32 {
        self.active_tg
    }

    /// Follow a group grant. A grant while already tuned is a no-op.
    pub fn on_group_grant(
        &mut self,
        tuner: &mut dyn Tuner,
        freq: u64,
        tg: u32,
        src: u32,
    ) -> bool {
        if self.tuned {
            return false;
        }
        match tuner.tune(freq) {
            Ok(()) => {
                info!("voice grant: tg {} src {} -> {} Hz", tg, src, freq);
                self.tuned = true;
                self.vc_freq = freq;
                self.active_tg = tg;
                self.last_active = Some(Instant::now());
                true
            }
            Err(err) => {
                warn!("grant tune failed: {err}");
                false
            }
        }
    }

    /// Follow a unit-to-unit or data grant.
    pub fn on_indiv_grant(
        &mut self,
        tuner: &mut dyn Tuner,
        freq: u64,
        dst: u32,
        src: u32,
    ) -> bool {
        if self.tuned {
            return false;
        }
        match tuner.tune(freq) {
            Ok(()) => {
                info!("individual grant: dst {} src {} -> {} Hz", dst, src, freq);
                self.tuned = true;
                self.vc_freq = freq;
                self.active_tg = 0;
                self.last_active = Some(Instant::now());
                true
            }
            Err(err) => {
                warn!("grant tune failed: {err}");
                false
            }
        }
    }

    /// Return to the control channel. Re-entrant: releasing while already
    /// released does nothing. Returns whether a release actually happened
    /// so the caller can flush the per-slot jitter rings.
    pub fn on_release(&mut self, tuner: &mut dyn Tuner) -> bool {
        if !self.tuned {
            return false;
        }
        self.audio_allowed = [false; 2];
        self.vc_freq = 0;
        self.active_tg = 0;
        self.tuned = false;
        self.last_active = None;
        if let Err(err) = tuner.tune(self.cc_freq) {
            warn!("return to control channel failed: {err}");
            self.hunt_cc(tuner);
        }
        true
    }

    /// Merge neighbour frequencies into the candidate list, deduplicated,
    /// preserving arrival order.
    pub fn on_neighbor_update(&mut self, freqs: &[u64]) {
        for &f in freqs {
            if f != 0 && !self.candidates.contains(&f) {
                self.candidates.push(f);
            }
        }
    }

    pub fn candidates(&self) -> &[u64] {
        &self.candidates
    }

    /// Advance the round-robin cursor; `None` marks one full cycle.
    pub fn next_cc_candidate(&mut self) -> Option<u64> {
        if self.candidates.is_empty() {
            return None;
        }
        if self.cursor >= self.candidates.len() {
            self.cursor = 0;
            return None;
        }
        let f = self.candidates[self.cursor];
        self.cursor += 1;
        Some(f)
    }

    /// Control-channel hunt after a tune failure: walk the candidates,
    /// fall back to the saved CC frequency when the list is exhausted.
    pub fn hunt_cc(&mut self, tuner: &mut dyn Tuner) {
        while let Some(freq) = self.next_cc_candidate() {
            if tuner.tune(freq).is_ok() {
                self.cc_freq = freq;
                return;
            }
        }
        let _ = tuner.tune(self.cc_freq);
    }

    /// Voice activity on a slot refreshes the hang deadline.
    pub fn touch(&mut self) {
        if self.tuned {
            self.last_active = Some(Instant::now());
        }
    }

    pub fn set_audio_gate(&mut self, slot: u8, allowed: bool) {
        self.audio_allowed[usize::from(slot & 1)] = allowed;
    }

    pub fn audio_allowed(&self, slot: u8) -> bool {
        self.audio_allowed[usize::from(slot & 1)]
    }

    pub fn clear_audio_gates(&mut self) {
        self.audio_allowed = [false; 2];
    }

    /// Periodic driver: release when the hang deadline has passed with
    /// both slots idle.
    pub fn tick(&mut self, tuner: &mut dyn Tuner) {
        if !self.tuned {
            return;
        }
        if self.audio_allowed.iter().any(|&g| g) {
            return;
        }
        let expired = self
            .last_active
            .map(|t| t.elapsed() >= self.hang)
            .unwrap_or(true);
        if expired {
            info!("hang timer expired, returning to control channel");
            self.on_release(tuner);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeTuner;
    use super::*;

    fn sm() -> TrunkSm {
        let mut sm = TrunkSm::new(Duration::from_millis(0));
        sm.set_cc_freq(853_000_000);
        sm
    }

    #[test]
    fn grant_tunes_and_marks_active() {
        let mut sm = sm();
        let mut tuner = FakeTuner::default();
        assert!(sm.on_group_grant(&mut tuner, 851_825_000, 100, 9001));
        assert!(sm.tuned());
        assert_eq!(sm.active_tg(), 100);
        assert_eq!(tuner.tuned_to, vec![851_825_000]);
    }

    #[test]
    fn grant_while_tuned_is_a_no_op() {
        let mut sm = sm();
        let mut tuner = FakeTuner::default();
        sm.on_group_grant(&mut tuner, 851_825_000, 100, 9001);
        assert!(!sm.on_group_grant(&mut tuner, 852_000_000, 200, 9002));
        assert_eq!(sm.active_tg(), 100);
        assert_eq!(tuner.tuned_to.len(), 1);
    }

    #[test]
    fn release_returns_to_cc_and_is_idempotent() {
        let mut sm = sm();
        let mut tuner = FakeTuner::default();
        sm.on_group_grant(&mut tuner, 851_825_000, 100, 9001);
        sm.set_audio_gate(0, true);
        sm.set_audio_gate(1, true);

        assert!(sm.on_release(&mut tuner));
        assert!(!sm.tuned());
        assert!(!sm.audio_allowed(0) && !sm.audio_allowed(1));
        assert_eq!(tuner.tuned_to.last(), Some(&853_000_000));

        // Second release: nothing moves.
        let tunes = tuner.tuned_to.len();
        assert!(!sm.on_release(&mut tuner));
        assert_eq!(tuner.tuned_to.len(), tunes);
    }

    #[test]
    fn neighbor_merge_dedupes_preserving_order() {
        let mut sm = sm();
        sm.on_neighbor_update(&[851_0000, 852_0000]);
        sm.on_neighbor_update(&[852_0000, 853_0000, 0]);
        assert_eq!(sm.candidates(), &[851_0000, 852_0000, 853_0000]);
    }

    #[test]
    fn candidate_cursor_reports_exhaustion() {
        let mut sm = sm();
        sm.on_neighbor_update(&[1, 2]);
        assert_eq!(sm.next_cc_candidate(), Some(1));
        assert_eq!(sm.next_cc_candidate(), Some(2));
        assert_eq!(sm.next_cc_candidate(), None);
        assert_eq!(sm.next_cc_candidate(), Some(1));
    }

    #[test]
    fn hunt_skips_failing_candidates() {
        let mut sm = sm();
        sm.on_neighbor_update(&[111, 222]);
        let mut tuner = FakeTuner {
            fail: vec![111],
            ..FakeTuner::default()
        };
        sm.hunt_cc(&mut tuner);
        assert_eq!(sm.cc_freq(), 222);
        assert_eq!(tuner.tuned_to, vec![222]);
    }

    #[test]
    fn hunt_falls_back_to_saved_cc() {
        let mut sm = sm();
        sm.on_neighbor_update(&[111]);
        let mut tuner = FakeTuner {
            fail: vec![111],
            ..FakeTuner::default()
        };
        sm.hunt_cc(&mut tuner);
        assert_eq!(tuner.tuned_to, vec![853_000_000]);
    }

    #[test]
    fn tick_releases_after_hang_with_idle_slots() {
        let mut sm = sm();
        let mut tuner = FakeTuner::default();
        sm.on_group_grant(&mut tuner, 851_825_000, 100, 9001);
        // Zero hang: first tick with closed gates releases.
        sm.tick(&mut tuner);
        assert!(!sm.tuned());

        // Open gate holds the channel.
        sm.on_group_grant(&mut tuner, 851_825_000, 100, 9001);
        sm.set_audio_gate(1, true);
        sm.tick(&mut tuner);
        assert!(sm.tuned());
    }

    #[test]
    fn failed_grant_does_not_mark_tuned() {
        let mut sm = sm();
        let mut tuner = FakeTuner {
            fail: vec![851_825_000],
            ..FakeTuner::default()
        };
        assert!(!sm.on_group_grant(&mut tuner, 851_825_000, 100, 9001));
        assert!(!sm.tuned());
    }
}
