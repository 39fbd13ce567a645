//! SDA-17 force predictor.
//!
//! Fits an ordinary least-squares line through the five newest forces
//! of the target-direction timeline (in chronological order), predicts
//! the next force, applies the calibration offset, and projects the
//! result from the last number into a 17-number neighbourhood.

use serde::{Deserialize, Serialize};

use crate::timeline::Timeline;
use crate::wheel::{self, WheelError, FULL_LAP};

/// Forces consumed per prediction.
pub const FORCES_ANALYZED: usize = 5;

/// Neighbours taken either side of the projected center (17 total).
pub const REGION_RADIUS: u8 = 8;

/// Maximum confidence score.
pub const MAX_SCORE: u8 = 6;

/// Historical forces within this circular distance of the raw
/// prediction each add one point of confidence.
const SCORE_RADIUS: u8 = 8;

/// A newest force this close to the prediction earns the bonus point.
const BONUS_RADIUS: u8 = 4;

/// Trend label derived from the regression slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Acelerando,
    Estavel,
    Freando,
}

impl Trend {
    fn from_slope(slope: f64) -> Trend {
        if slope > 1.0 {
            Trend::Acelerando
        } else if slope < -1.0 {
            Trend::Freando
        } else {
            Trend::Estavel
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Trend::Acelerando => "acelerando",
            Trend::Estavel => "estavel",
            Trend::Freando => "freando",
        };
        f.write_str(s)
    }
}

/// Full output of one predictor pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdaAnalysis {
    /// Whether the predictor recommends betting at all.
    pub should_bet: bool,
    /// Why not, when `should_bet` is false.
    pub reason: Option<String>,
    /// The 17 suggested numbers in wheel order; empty when skipping.
    pub numbers: Vec<u8>,
    /// Projected center number.
    pub center: u8,
    /// Confidence score 0-6. Advisory only; never gates the bet.
    pub score: u8,
    /// Presentation form of the region.
    pub visual: String,
    /// Predicted force after calibration, clamped to [1, 37].
    pub predicted_force: u8,
    /// Predicted force before calibration.
    pub raw_force: u8,
    /// Slope-derived trend label.
    pub trend: Trend,
    /// Regression slope over the chronological window.
    pub slope: f64,
}

impl SdaAnalysis {
    fn skip(reason: String) -> Self {
        Self {
            should_bet: false,
            reason: Some(reason),
            numbers: Vec::new(),
            center: 0,
            score: 0,
            visual: String::new(),
            predicted_force: 0,
            raw_force: 0,
            trend: Trend::Estavel,
            slope: 0.0,
        }
    }
}

/// Predict the next force for `timeline`'s direction and project the
/// betting region from `last_number`.
///
/// `calibration` is the signed per-direction offset added to the
/// predicted force before projection.
pub fn analyze(
    timeline: &Timeline,
    last_number: u8,
    calibration: i16,
) -> Result<SdaAnalysis, WheelError> {
    wheel::validate(last_number)?;

    if timeline.len() < FORCES_ANALYZED {
        return Ok(SdaAnalysis::skip(format!(
            "forcas insuficientes ({}/{})",
            timeline.len(),
            FORCES_ANALYZED
        )));
    }

    let forces = timeline.last_n(FORCES_ANALYZED);

    // Chronological order for the fit: oldest first.
    let y: Vec<f64> = forces.iter().rev().map(|f| *f as f64).collect();
    let (slope, intercept) = least_squares(&y);

    let raw = (intercept + slope * FORCES_ANALYZED as f64).round();
    let raw_force = clamp_force(raw as i32);
    let predicted_force = clamp_force(raw_force as i32 + calibration as i32);

    let center = wheel::project(last_number, predicted_force, timeline.direction)?;
    let numbers = wheel::neighbours(center, REGION_RADIUS)?;
    let visual = wheel::visual_region(center, &numbers);
    let score = confidence_score(forces, raw_force);

    Ok(SdaAnalysis {
        should_bet: true,
        reason: None,
        numbers,
        center,
        score,
        visual,
        predicted_force,
        raw_force,
        trend: Trend::from_slope(slope),
        slope,
    })
}

/// Ordinary least squares over `y` with `x = 0..n`. Returns
/// `(slope, intercept)`; slope falls back to zero on a degenerate fit.
fn least_squares(y: &[f64]) -> (f64, f64) {
    let n = y.len() as f64;
    let x_mean = (y.len() - 1) as f64 / 2.0;
    let y_mean = y.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, yi) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (yi - y_mean);
        den += dx * dx;
    }

    // x is fixed at 0..n so den is never zero in practice; guard anyway.
    let slope = if den.abs() < f64::EPSILON { 0.0 } else { num / den };
    (slope, y_mean - slope * x_mean)
}

fn clamp_force(value: i32) -> u8 {
    value.clamp(1, FULL_LAP as i32) as u8
}

/// Score 0-6: one point per historical force within circular distance
/// 8 of the raw prediction, plus a bonus point when the newest force
/// is within 4.
fn confidence_score(forces: &[u8], raw_force: u8) -> u8 {
    let mut score = forces
        .iter()
        .filter(|f| wheel::force_distance(**f, raw_force) <= SCORE_RADIUS)
        .count() as u8;

    if let Some(newest) = forces.first() {
        if wheel::force_distance(*newest, raw_force) <= BONUS_RADIUS {
            score += 1;
        }
    }

    score.min(MAX_SCORE)
}
