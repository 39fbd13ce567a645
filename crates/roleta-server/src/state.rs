//! Authoritative in-memory game state.
//!
//! One instance per process, mutated only inside the per-spin pipeline
//! critical section. A versioned JSON snapshot is rewritten after every
//! spin and reloaded at startup so a restart resumes mid-session.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use roleta_core::{
    Calibration, Confidence, Direction, Martingale, PerformanceHistory, Timeline,
};

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 2;

/// One spin outcome as received from the table.
#[derive(Debug, Clone)]
pub struct Spin {
    pub numero: u8,
    pub direction: Direction,
    /// Client timestamp in milliseconds.
    pub timestamp_ms: i64,
}

impl Spin {
    /// Second-granularity identity used for duplicate suppression.
    pub fn dedup_key(&self) -> (u8, i64) {
        (self.numero, self.timestamp_ms / 1000)
    }
}

/// A suggestion awaiting resolution by the next spin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub numbers: Vec<u8>,
    pub center: u8,
    pub direction: Direction,
    pub predicted_force: u8,
    pub tr_confidence: Confidence,
    pub tr_reason: String,
    pub sda_score: u8,
}

impl Prediction {
    pub fn contains(&self, numero: u8) -> bool {
        self.numbers.contains(&numero)
    }
}

/// The outstanding prediction, if any. A shadow prediction is one the
/// advisor vetoed; it is resolved and logged like a placed bet but
/// never touches performance history or the Martingale tracker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pending {
    #[default]
    None,
    Bet(Prediction),
    Shadow(Prediction),
}

impl Pending {
    pub fn is_none(&self) -> bool {
        matches!(self, Pending::None)
    }

    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            Pending::None => None,
            Pending::Bet(p) | Pending::Shadow(p) => Some(p),
        }
    }
}

/// Per-direction aggregate over placed bets.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DirectionStats {
    pub bets: usize,
    pub hits: usize,
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PerformanceStats {
    pub horario: DirectionStats,
    pub anti_horario: DirectionStats,
}

/// Everything the pipeline owns. Field pairs are indexed by direction
/// through the accessor methods.
#[derive(Debug)]
pub struct GameState {
    pub last_number: Option<u8>,
    pub last_direction: Option<Direction>,
    timeline_cw: Timeline,
    timeline_ccw: Timeline,
    performance_cw: PerformanceHistory,
    performance_ccw: PerformanceHistory,
    martingale_cw: Martingale,
    martingale_ccw: Martingale,
    calibration_cw: Calibration,
    calibration_ccw: Calibration,
    pub pending: Pending,
    /// Dedup key of the last accepted spin. Not persisted.
    last_spin_key: Option<(u8, i64)>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        Self {
            last_number: None,
            last_direction: None,
            timeline_cw: Timeline::new(Direction::Clockwise),
            timeline_ccw: Timeline::new(Direction::Counterclockwise),
            performance_cw: PerformanceHistory::new(),
            performance_ccw: PerformanceHistory::new(),
            martingale_cw: Martingale::new(),
            martingale_ccw: Martingale::new(),
            calibration_cw: Calibration::new(),
            calibration_ccw: Calibration::new(),
            pending: Pending::None,
            last_spin_key: None,
        }
    }

    pub fn timeline(&self, direction: Direction) -> &Timeline {
        match direction {
            Direction::Clockwise => &self.timeline_cw,
            Direction::Counterclockwise => &self.timeline_ccw,
        }
    }

    pub fn timeline_mut(&mut self, direction: Direction) -> &mut Timeline {
        match direction {
            Direction::Clockwise => &mut self.timeline_cw,
            Direction::Counterclockwise => &mut self.timeline_ccw,
        }
    }

    pub fn performance(&self, direction: Direction) -> &PerformanceHistory {
        match direction {
            Direction::Clockwise => &self.performance_cw,
            Direction::Counterclockwise => &self.performance_ccw,
        }
    }

    pub fn performance_mut(&mut self, direction: Direction) -> &mut PerformanceHistory {
        match direction {
            Direction::Clockwise => &mut self.performance_cw,
            Direction::Counterclockwise => &mut self.performance_ccw,
        }
    }

    pub fn martingale(&self, direction: Direction) -> &Martingale {
        match direction {
            Direction::Clockwise => &self.martingale_cw,
            Direction::Counterclockwise => &self.martingale_ccw,
        }
    }

    pub fn martingale_mut(&mut self, direction: Direction) -> &mut Martingale {
        match direction {
            Direction::Clockwise => &mut self.martingale_cw,
            Direction::Counterclockwise => &mut self.martingale_ccw,
        }
    }

    pub fn calibration(&self, direction: Direction) -> &Calibration {
        match direction {
            Direction::Clockwise => &self.calibration_cw,
            Direction::Counterclockwise => &self.calibration_ccw,
        }
    }

    pub fn calibration_mut(&mut self, direction: Direction) -> &mut Calibration {
        match direction {
            Direction::Clockwise => &mut self.calibration_cw,
            Direction::Counterclockwise => &mut self.calibration_ccw,
        }
    }

    /// True if the spin repeats the previous one within the same
    /// second. Accepting records the new key.
    pub fn is_duplicate(&self, spin: &Spin) -> bool {
        self.last_spin_key == Some(spin.dedup_key())
    }

    pub fn note_spin_key(&mut self, spin: &Spin) {
        self.last_spin_key = Some(spin.dedup_key());
    }

    /// Clear everything except calibration, optionally preserving the
    /// anchor number so history ingest is not required to resume.
    pub fn reset_session(&mut self, keep_last_number: bool) {
        if !keep_last_number {
            self.last_number = None;
            self.last_direction = None;
        }
        self.timeline_cw.clear();
        self.timeline_ccw.clear();
        self.performance_cw.clear();
        self.performance_ccw.clear();
        self.martingale_cw.reset();
        self.martingale_ccw.reset();
        self.pending = Pending::None;
        self.last_spin_key = None;
    }

    /// Drop timelines and the anchor number ahead of a history replay.
    pub fn clear_history(&mut self) {
        self.timeline_cw.clear();
        self.timeline_ccw.clear();
        self.last_number = None;
        self.last_direction = None;
        self.pending = Pending::None;
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        PerformanceStats {
            horario: direction_stats(&self.performance_cw),
            anti_horario: direction_stats(&self.performance_ccw),
        }
    }

    // Snapshot persistence.

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            version: SNAPSHOT_VERSION,
            last_number: self.last_number,
            last_direction: self.last_direction,
            timeline_cw: self.timeline_cw.clone(),
            timeline_ccw: self.timeline_ccw.clone(),
            performance_cw: self.performance_cw.results().to_vec(),
            performance_ccw: self.performance_ccw.results().to_vec(),
            pending_prediction: self.pending.clone(),
            calibration_cw: self.calibration_cw.offset(),
            calibration_ccw: self.calibration_ccw.offset(),
            martingale_cw: self.martingale_cw.clone(),
            martingale_ccw: self.martingale_ccw.clone(),
        }
    }

    pub fn from_snapshot(snap: StateSnapshot) -> Self {
        let mut state = Self::new();
        state.last_number = snap.last_number;
        state.last_direction = snap.last_direction;
        state.timeline_cw = snap.timeline_cw;
        state.timeline_ccw = snap.timeline_ccw;
        state.performance_cw = PerformanceHistory::from_results(snap.performance_cw);
        state.performance_ccw = PerformanceHistory::from_results(snap.performance_ccw);
        state.pending = snap.pending_prediction;
        state.calibration_cw = Calibration::with_offset(snap.calibration_cw);
        state.calibration_ccw = Calibration::with_offset(snap.calibration_ccw);
        state.martingale_cw = snap.martingale_cw;
        state.martingale_ccw = snap.martingale_ccw;
        state
    }

    /// Write the snapshot to disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create state dir: {:?}", parent))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.snapshot())
            .context("Failed to serialize state snapshot")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write state snapshot: {:?}", path))?;
        Ok(())
    }

    /// Load the snapshot if present. Missing file or unreadable content
    /// yields a fresh state with a warning; a corrupt snapshot must not
    /// keep the server down.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read state snapshot, starting empty");
                return Self::new();
            }
        };
        match serde_json::from_str::<StateSnapshot>(&content) {
            Ok(snap) if snap.version <= SNAPSHOT_VERSION => Self::from_snapshot(snap),
            Ok(snap) => {
                warn!(
                    version = snap.version,
                    supported = SNAPSHOT_VERSION,
                    "State snapshot from a newer version, starting empty"
                );
                Self::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt state snapshot, starting empty");
                Self::new()
            }
        }
    }
}

fn direction_stats(history: &PerformanceHistory) -> DirectionStats {
    let bets = history.len();
    let hits = history.hits();
    DirectionStats {
        bets,
        hits,
        rate: if bets == 0 {
            0.0
        } else {
            hits as f64 / bets as f64
        },
    }
}

/// Persisted layout of [`GameState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub last_number: Option<u8>,
    pub last_direction: Option<Direction>,
    pub timeline_cw: Timeline,
    pub timeline_ccw: Timeline,
    pub performance_cw: Vec<bool>,
    pub performance_ccw: Vec<bool>,
    pub pending_prediction: Pending,
    pub calibration_cw: i16,
    pub calibration_ccw: i16,
    pub martingale_cw: Martingale,
    pub martingale_ccw: Martingale,
}

#[cfg(test)]
mod tests {
    use super::*;
    use roleta_core::Confidence;

    fn sample_state() -> GameState {
        let mut state = GameState::new();
        state.last_number = Some(17);
        state.last_direction = Some(Direction::Clockwise);
        state.timeline_mut(Direction::Clockwise).push(5);
        state.timeline_mut(Direction::Clockwise).push(12);
        state.timeline_mut(Direction::Counterclockwise).push(30);
        state.performance_mut(Direction::Clockwise).push(true);
        state.performance_mut(Direction::Clockwise).push(false);
        state.calibration_mut(Direction::Counterclockwise).update(10);
        state.pending = Pending::Bet(Prediction {
            numbers: vec![4, 21, 2, 25, 17],
            center: 2,
            direction: Direction::Counterclockwise,
            predicted_force: 19,
            tr_confidence: Confidence::Alta,
            tr_reason: "crescente".to_string(),
            sda_score: 5,
        });
        state
    }

    #[test]
    fn test_snapshot_round_trip_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = sample_state();
        state.save(&path).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();

        let reloaded = GameState::load_or_default(&path);
        reloaded.save(&path).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(reloaded.last_number, Some(17));
        assert_eq!(reloaded.timeline(Direction::Clockwise).forces(), &[12, 5]);
        assert!(matches!(reloaded.pending, Pending::Bet(_)));
    }

    #[test]
    fn test_missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = GameState::load_or_default(dir.path().join("absent.json"));
        assert!(state.last_number.is_none());
        assert!(state.pending.is_none());
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let state = GameState::load_or_default(&path);
        assert!(state.last_number.is_none());
    }

    #[test]
    fn test_reset_session_keeps_calibration() {
        let mut state = sample_state();
        let offset = state.calibration(Direction::Counterclockwise).offset();
        assert_ne!(offset, 0);

        state.reset_session(true);
        assert_eq!(state.last_number, Some(17));
        assert!(state.timeline(Direction::Clockwise).is_empty());
        assert!(state.performance(Direction::Clockwise).is_empty());
        assert!(state.pending.is_none());
        assert_eq!(state.calibration(Direction::Counterclockwise).offset(), offset);

        state.reset_session(false);
        assert!(state.last_number.is_none());
    }

    #[test]
    fn test_duplicate_detection_second_bucket() {
        let mut state = GameState::new();
        let spin = Spin {
            numero: 17,
            direction: Direction::Clockwise,
            timestamp_ms: 1_700_000_000_400,
        };
        assert!(!state.is_duplicate(&spin));
        state.note_spin_key(&spin);

        let repeat = Spin {
            timestamp_ms: 1_700_000_000_900,
            ..spin.clone()
        };
        assert!(state.is_duplicate(&repeat));

        let next_second = Spin {
            timestamp_ms: 1_700_000_001_100,
            ..spin
        };
        assert!(!state.is_duplicate(&next_second));
    }

    #[test]
    fn test_performance_stats() {
        let state = sample_state();
        let stats = state.performance_stats();
        assert_eq!(stats.horario.bets, 2);
        assert_eq!(stats.horario.hits, 1);
        assert!((stats.horario.rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.anti_horario.bets, 0);
        assert_eq!(stats.anti_horario.rate, 0.0);
    }
}
