//! Row types for the decision log.

use chrono::{DateTime, Utc};
use roleta_core::Direction;

/// A decision row before insertion. Outcome columns start null and are
/// back-filled by the next spin.
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub session_id: String,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    pub numero: u8,
    pub direcao: Direction,
    pub force: Option<u8>,
    pub target_direction: Direction,

    pub sda_should_bet: bool,
    pub sda_reason: Option<String>,
    pub predicted_force: Option<u8>,
    pub raw_force: Option<u8>,
    pub sda_center: Option<u8>,
    pub sda_numbers: Vec<u8>,
    pub sda_score: u8,
    pub trend: Option<String>,
    pub slope: Option<f64>,

    pub tr_should_bet: bool,
    pub tr_confidence: String,
    pub tr_reason: String,
    pub c4_rate: f64,
    pub m6_rate: f64,
    pub l12_rate: f64,

    pub final_action: String,
    pub action_reason: String,
    pub bet_placed: bool,
    pub gale_level: u8,
    pub bet_units: u32,
    pub calibration_offset: i16,
    /// Newest-first target-direction performance at decision time.
    pub performance_snapshot: Vec<bool>,
}

/// Outcome written onto the previous decision by the next spin.
#[derive(Debug, Clone, Copy)]
pub struct DecisionOutcome {
    pub hit: bool,
    pub actual_number: u8,
    pub actual_force: Option<u8>,
    pub calibration_error: Option<i16>,
}

/// A Martingale window row opened on its first play.
#[derive(Debug, Clone)]
pub struct NewGaleWindow {
    pub session_id: String,
    pub direction: Direction,
    pub starting_level: u8,
    pub opened_at: DateTime<Utc>,
    /// Target-direction rates and calibration at window open, as JSON.
    pub features_at_start: serde_json::Value,
}

/// One placed bet inside a window.
#[derive(Debug, Clone)]
pub struct NewWindowPlay {
    pub window_id: i64,
    pub play_number: u8,
    pub hit: bool,
    pub numero: u8,
    pub direcao: Direction,
    pub predicted_force: u8,
    pub sda_score: u8,
    pub tr_confidence: String,
    pub created_at: DateTime<Utc>,
}

/// How a window closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowResult {
    Success,
    Escalated,
    Stop,
    /// Left open by a crash or reset; closed without a verdict.
    Orphan,
}

impl WindowResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowResult::Success => "success",
            WindowResult::Escalated => "escalated",
            WindowResult::Stop => "stop",
            WindowResult::Orphan => "orphan",
        }
    }
}

// Analytics projections.

/// Aggregate over decisions, optionally scoped to a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionStats {
    pub decisions: i64,
    pub bets: i64,
    pub hits: i64,
    pub hit_rate: f64,
}

/// Hit rate per Martingale level.
#[derive(Debug, Clone, Copy)]
pub struct GaleLevelStats {
    pub level: u8,
    pub bets: i64,
    pub hits: i64,
    pub hit_rate: f64,
}

/// How the Triple Rate veto performed: of the suggestions it blocked,
/// how many would have hit anyway.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripleRateStats {
    pub vetoed: i64,
    pub vetoed_would_hit: i64,
    pub vetoed_would_miss: i64,
}

/// Hit rate per direction.
#[derive(Debug, Clone)]
pub struct DirectionBreakdown {
    pub direcao: String,
    pub bets: i64,
    pub hits: i64,
    pub hit_rate: f64,
}

/// One closed or open Martingale window, newest first, for the
/// state_sync heartbeat.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RecentWindow {
    pub direcao: String,
    pub starting_level: u8,
    pub result: Option<String>,
    pub opened_at: String,
}

/// Hit rate per calibration offset in force at decision time.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationStats {
    pub offset: i16,
    pub bets: i64,
    pub hits: i64,
    pub hit_rate: f64,
}
