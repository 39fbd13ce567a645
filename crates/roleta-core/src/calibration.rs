//! Momentum force calibration.
//!
//! Tracks a per-direction offset applied to the raw regression force.
//! Updated after every resolved prediction from the signed wrapped
//! error between predicted and actual force, with an acceleration term
//! from the previous error.

use serde::{Deserialize, Serialize};

/// Offset is clamped to this magnitude.
pub const MAX_OFFSET: i16 = 8;

const ERROR_WEIGHT: f64 = 0.3;
const ACCEL_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Calibration {
    offset: i16,
    last_error: Option<i16>,
}

impl Calibration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a persisted offset. The error history does not
    /// survive a restart; the next update treats its error as fresh.
    pub fn with_offset(offset: i16) -> Self {
        Self {
            offset: offset.clamp(-MAX_OFFSET, MAX_OFFSET),
            last_error: None,
        }
    }

    pub fn offset(&self) -> i16 {
        self.offset
    }

    pub fn last_error(&self) -> Option<i16> {
        self.last_error
    }

    /// Fold one signed force error into the offset. Returns the new
    /// offset.
    pub fn update(&mut self, error: i16) -> i16 {
        // No acceleration until a previous error exists.
        let accel = self.last_error.map(|prev| error - prev).unwrap_or(0);
        let delta = (ERROR_WEIGHT * f64::from(error) + ACCEL_WEIGHT * f64::from(accel)).trunc();
        self.offset = (self.offset + delta as i16).clamp(-MAX_OFFSET, MAX_OFFSET);
        self.last_error = Some(error);
        self.offset
    }

    pub fn reset(&mut self) {
        self.offset = 0;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_has_no_acceleration() {
        let mut cal = Calibration::new();
        // error 6 with no history: delta = trunc(0.3*6) = 1.
        assert_eq!(cal.update(6), 1);
        assert_eq!(cal.last_error(), Some(6));
    }

    #[test]
    fn test_repeat_error_keeps_accel_zero() {
        let mut cal = Calibration::new();
        cal.update(6);
        // Same error again: accel 0, delta = trunc(1.8) = 1.
        assert_eq!(cal.update(6), 2);
    }

    #[test]
    fn test_growing_error_adds_acceleration() {
        let mut cal = Calibration::new();
        cal.update(2);
        // error 7, accel 5: delta = trunc(0.3*7 + 0.2*5) = 3.
        assert_eq!(cal.update(7), 3);
    }

    #[test]
    fn test_restored_offset_starts_without_error_history() {
        let mut cal = Calibration::with_offset(4);
        // Behaves like a first update: accel 0, delta = trunc(1.8) = 1.
        assert_eq!(cal.update(6), 5);
    }

    #[test]
    fn test_offset_clamped_at_bounds() {
        let mut cal = Calibration::new();
        for _ in 0..10 {
            cal.update(18);
        }
        assert_eq!(cal.offset(), MAX_OFFSET);
        for _ in 0..20 {
            cal.update(-18);
        }
        assert_eq!(cal.offset(), -MAX_OFFSET);
    }

    #[test]
    fn test_small_errors_truncate_to_zero() {
        let mut cal = Calibration::new();
        // error 1: delta = trunc(0.3 + 0.2) = 0.
        assert_eq!(cal.update(1), 0);
    }

    #[test]
    fn test_reset() {
        let mut cal = Calibration::new();
        cal.update(10);
        cal.reset();
        assert_eq!(cal.offset(), 0);
        assert_eq!(cal.last_error(), None);
    }
}
