//! Martingale progression over fixed five-play windows.
//!
//! Each direction carries its own instance. A window accumulates
//! exactly [`WINDOW_SIZE`] placed bets; on close, the hit count picks
//! the transition: enough hits resets to level 1 (SUCESSO), a single
//! hit climbs one level (SUBINDO) unless already at the top, anything
//! else resets (STOP). Stake per play is `17 * 2^(level-1)` units.

use serde::{Deserialize, Serialize};

/// Plays per window.
pub const WINDOW_SIZE: u8 = 5;

/// Progression ceiling.
pub const MAX_LEVEL: u8 = 3;

/// Units staked per play at level 1.
pub const BASE_UNITS: u32 = 17;

/// Hits needed for a window to count as a success.
const SUCCESS_HITS: u8 = 2;

/// Window outcome announced when the fifth play resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transition {
    Sucesso,
    Subindo,
    Stop,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Transition::Sucesso => "SUCESSO",
            Transition::Subindo => "SUBINDO",
            Transition::Stop => "STOP",
        };
        f.write_str(s)
    }
}

/// Snapshot of one resolved play, emitted back to the caller so the
/// gale-window log can be kept in step with the in-memory state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MartingaleUpdate {
    pub level_before: u8,
    pub level_after: u8,
    pub window_hits: u8,
    pub window_count: u8,
    /// Set only on the play that closes the window.
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Martingale {
    level: u8,
    window_hits: u8,
    window_count: u8,
}

impl Default for Martingale {
    fn default() -> Self {
        Self::new()
    }
}

impl Martingale {
    pub fn new() -> Self {
        Self {
            level: 1,
            window_hits: 0,
            window_count: 0,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn window_hits(&self) -> u8 {
        self.window_hits
    }

    pub fn window_count(&self) -> u8 {
        self.window_count
    }

    /// Stake multiplier for the current level: 1, 2 or 4.
    pub fn multiplier(&self) -> u32 {
        1 << (self.level - 1)
    }

    /// Units to stake on the next play.
    pub fn bet_units(&self) -> u32 {
        BASE_UNITS * self.multiplier()
    }

    /// Compact progress label, e.g. `G2 1/3`.
    pub fn display(&self) -> String {
        format!("G{} {}/{}", self.level, self.window_hits, self.window_count)
    }

    /// Record one placed bet's outcome. Closes the window on the fifth
    /// play and applies the transition.
    pub fn record_play(&mut self, hit: bool) -> MartingaleUpdate {
        let level_before = self.level;
        self.window_count += 1;
        if hit {
            self.window_hits += 1;
        }
        let window_hits = self.window_hits;
        let window_count = self.window_count;

        let transition = if self.window_count >= WINDOW_SIZE {
            let t = self.close_window();
            Some(t)
        } else {
            None
        };

        MartingaleUpdate {
            level_before,
            level_after: self.level,
            window_hits,
            window_count,
            transition,
        }
    }

    fn close_window(&mut self) -> Transition {
        // Transition table over (hits, level): SUCESSO drops back to
        // level 1, SUBINDO climbs, STOP resets.
        let (transition, next_level) = match (self.window_hits, self.level) {
            (h, _) if h >= SUCCESS_HITS => (Transition::Sucesso, 1),
            (1, level) if level < MAX_LEVEL => (Transition::Subindo, level + 1),
            _ => (Transition::Stop, 1),
        };
        self.level = next_level;
        self.window_hits = 0;
        self.window_count = 0;
        transition
    }

    /// Drop the current window and progression, back to level 1.
    pub fn reset(&mut self) {
        self.level = 1;
        self.window_hits = 0;
        self.window_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play_window(m: &mut Martingale, outcomes: [bool; 5]) -> MartingaleUpdate {
        let mut last = None;
        for hit in outcomes {
            last = Some(m.record_play(hit));
        }
        last.unwrap()
    }

    #[test]
    fn test_stakes_per_level() {
        let mut m = Martingale::new();
        assert_eq!(m.bet_units(), 17);
        play_window(&mut m, [true, false, false, false, false]);
        assert_eq!(m.level(), 2);
        assert_eq!(m.bet_units(), 34);
        play_window(&mut m, [false, true, false, false, false]);
        assert_eq!(m.level(), 3);
        assert_eq!(m.bet_units(), 68);
    }

    #[test]
    fn test_single_hit_climbs_one_level() {
        // One hit then four misses at level 1.
        let mut m = Martingale::new();
        let update = play_window(&mut m, [true, false, false, false, false]);
        assert_eq!(update.transition, Some(Transition::Subindo));
        assert_eq!(update.level_before, 1);
        assert_eq!(update.level_after, 2);
        assert_eq!(update.window_hits, 1);
        assert_eq!(update.window_count, 5);
        assert_eq!(m.window_count(), 0);
    }

    #[test]
    fn test_two_hits_is_success() {
        let mut m = Martingale::new();
        play_window(&mut m, [true, false, false, false, false]);
        let update = play_window(&mut m, [true, true, false, false, false]);
        assert_eq!(update.transition, Some(Transition::Sucesso));
        assert_eq!(update.level_after, 1);
    }

    #[test]
    fn test_zero_hits_stops_and_resets() {
        let mut m = Martingale::new();
        play_window(&mut m, [true, false, false, false, false]);
        let update = play_window(&mut m, [false, false, false, false, false]);
        assert_eq!(update.transition, Some(Transition::Stop));
        assert_eq!(update.level_after, 1);
    }

    #[test]
    fn test_single_hit_at_top_level_stops() {
        // Level 3 never climbs to a fourth level.
        let mut m = Martingale::new();
        play_window(&mut m, [true, false, false, false, false]);
        play_window(&mut m, [true, false, false, false, false]);
        assert_eq!(m.level(), 3);
        let update = play_window(&mut m, [true, false, false, false, false]);
        assert_eq!(update.transition, Some(Transition::Stop));
        assert_eq!(update.level_after, 1);
    }

    #[test]
    fn test_mid_window_reports_no_transition() {
        let mut m = Martingale::new();
        let update = m.record_play(true);
        assert_eq!(update.transition, None);
        assert_eq!(update.window_hits, 1);
        assert_eq!(update.window_count, 1);
        assert_eq!(m.display(), "G1 1/1");
    }

    #[test]
    fn test_reset_clears_progression() {
        let mut m = Martingale::new();
        play_window(&mut m, [true, false, false, false, false]);
        m.record_play(true);
        m.reset();
        assert_eq!(m.level(), 1);
        assert_eq!(m.window_count(), 0);
        assert_eq!(m.display(), "G1 0/0");
    }
}
