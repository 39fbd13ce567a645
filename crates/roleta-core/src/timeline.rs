//! Bounded per-direction histories.
//!
//! Both sequences are newest-first: index 0 is the most recent entry.
//! The caps (45 forces, 12 performance slots) are enforced on insert,
//! never lazily.

use serde::{Deserialize, Serialize};

use crate::wheel::Direction;

/// Maximum forces kept per direction.
pub const MAX_TIMELINE: usize = 45;

/// Maximum placed-bet results kept per direction.
pub const MAX_PERFORMANCE: usize = 12;

/// Newest-first sequence of forces for one direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub direction: Direction,
    forces: Vec<u8>,
}

impl Timeline {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            forces: Vec::new(),
        }
    }

    /// Restore from a persisted snapshot, re-applying the length cap.
    pub fn from_forces(direction: Direction, mut forces: Vec<u8>) -> Self {
        forces.truncate(MAX_TIMELINE);
        Self { direction, forces }
    }

    /// Prepend the newest force, dropping the oldest past the cap.
    pub fn push(&mut self, force: u8) {
        self.forces.insert(0, force);
        self.forces.truncate(MAX_TIMELINE);
    }

    /// The `n` newest forces, newest-first. Shorter if fewer exist.
    pub fn last_n(&self, n: usize) -> &[u8] {
        &self.forces[..n.min(self.forces.len())]
    }

    pub fn forces(&self) -> &[u8] {
        &self.forces
    }

    pub fn len(&self) -> usize {
        self.forces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forces.is_empty()
    }

    pub fn clear(&mut self) {
        self.forces.clear();
    }
}

/// Newest-first hit/miss history of bets actually placed on one
/// direction. Vetoed suggestions never consume a slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceHistory {
    results: Vec<bool>,
}

impl PerformanceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_results(mut results: Vec<bool>) -> Self {
        results.truncate(MAX_PERFORMANCE);
        Self { results }
    }

    pub fn push(&mut self, hit: bool) {
        self.results.insert(0, hit);
        self.results.truncate(MAX_PERFORMANCE);
    }

    pub fn results(&self) -> &[bool] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.results.iter().filter(|h| **h).count()
    }

    /// Hit rate over the `window` newest results, falling back to the
    /// full history when shorter. Zero for an empty history.
    pub fn rate(&self, window: usize) -> f64 {
        let slice = &self.results[..window.min(self.results.len())];
        if slice.is_empty() {
            return 0.0;
        }
        slice.iter().filter(|h| **h).count() as f64 / slice.len() as f64
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wheel::Direction;

    #[test]
    fn test_timeline_newest_first() {
        let mut tl = Timeline::new(Direction::Clockwise);
        tl.push(5);
        tl.push(9);
        tl.push(30);
        assert_eq!(tl.forces(), &[30, 9, 5]);
        assert_eq!(tl.last_n(2), &[30, 9]);
    }

    #[test]
    fn test_timeline_cap_enforced_on_insert() {
        let mut tl = Timeline::new(Direction::Counterclockwise);
        for f in 0..60u8 {
            tl.push(f % 37 + 1);
            assert!(tl.len() <= MAX_TIMELINE);
        }
        assert_eq!(tl.len(), MAX_TIMELINE);
        // Newest survives, oldest dropped.
        assert_eq!(tl.forces()[0], 59 % 37 + 1);
    }

    #[test]
    fn test_timeline_last_n_short_history() {
        let mut tl = Timeline::new(Direction::Clockwise);
        tl.push(4);
        assert_eq!(tl.last_n(5), &[4]);
        assert_eq!(tl.last_n(0), &[] as &[u8]);
    }

    #[test]
    fn test_performance_cap() {
        let mut perf = PerformanceHistory::new();
        for i in 0..20 {
            perf.push(i % 2 == 0);
        }
        assert_eq!(perf.len(), MAX_PERFORMANCE);
    }

    #[test]
    fn test_performance_rate_windows() {
        // Newest-first: 4 misses then 8 hits.
        let perf = PerformanceHistory::from_results(vec![
            false, false, false, false, true, true, true, true, true, true, true, true,
        ]);
        assert_eq!(perf.rate(4), 0.0);
        assert!((perf.rate(6) - 2.0 / 6.0).abs() < 1e-9);
        assert!((perf.rate(12) - 8.0 / 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_performance_rate_falls_back_to_available() {
        let perf = PerformanceHistory::from_results(vec![true, false]);
        assert!((perf.rate(6) - 0.5).abs() < 1e-9);
        assert_eq!(PerformanceHistory::new().rate(4), 0.0);
    }
}
