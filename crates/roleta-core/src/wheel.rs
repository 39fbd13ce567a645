//! Physical geometry of the European roulette wheel.
//!
//! The wheel is a process-wide constant: 37 slots in a fixed circular
//! order. All distance ("force") arithmetic is modular over that
//! order. Numbers outside [0, 36] are rejected up front; nothing in
//! this module silently wraps an invalid number.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Physical slot order of a European wheel, clockwise from zero.
pub const WHEEL_SEQUENCE: [u8; 37] = [
    0, 32, 15, 19, 4, 21, 2, 25, 17, 34, 6, 27, 13, 36, 11, 30, 8, 23, 10, 5, 24, 16, 33, 1, 20,
    14, 31, 9, 22, 18, 29, 7, 28, 12, 35, 3, 26,
];

/// Total number of slots.
pub const WHEEL_SIZE: u8 = 37;

/// A force of 37 means a full lap: the ball landed on the same number.
pub const FULL_LAP: u8 = 37;

const RED_NUMBERS: [u8; 18] = [1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36];

/// Inverse of `WHEEL_SEQUENCE`: number -> slot index.
const POSITIONS: [u8; 37] = build_positions();

const fn build_positions() -> [u8; 37] {
    let mut map = [0u8; 37];
    let mut i = 0;
    while i < 37 {
        map[WHEEL_SEQUENCE[i] as usize] = i as u8;
        i += 1;
    }
    map
}

/// Errors from wheel arithmetic. All of these mean a caller fed in a
/// value that cannot exist on a physical wheel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WheelError {
    #[error("numero invalido: {0} (deve ser 0-36)")]
    InvalidNumber(u16),

    #[error("forca invalida: {0} (deve ser 1-37)")]
    InvalidForce(u16),
}

/// Spin direction as the croupier sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "horario")]
    Clockwise,
    #[serde(rename = "anti-horario")]
    Counterclockwise,
}

impl Direction {
    /// The opposite direction; the croupier alternates every spin, so
    /// this is also the target direction for the next prediction.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Clockwise => Direction::Counterclockwise,
            Direction::Counterclockwise => Direction::Clockwise,
        }
    }

    /// Short key used in persistence and log output.
    pub fn key(self) -> &'static str {
        match self {
            Direction::Clockwise => "cw",
            Direction::Counterclockwise => "ccw",
        }
    }

    /// Wire-format name (`horario` / `anti-horario`).
    pub fn wire_name(self) -> &'static str {
        match self {
            Direction::Clockwise => "horario",
            Direction::Counterclockwise => "anti-horario",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "horario" | "clockwise" | "cw" => Ok(Direction::Clockwise),
            "anti-horario" | "counterclockwise" | "ccw" => Ok(Direction::Counterclockwise),
            other => Err(format!("direcao desconhecida: {other}")),
        }
    }
}

/// Pocket colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Vermelho,
    Preto,
    Verde,
}

/// Colour of a pocket.
pub fn color(number: u8) -> Result<Color, WheelError> {
    validate(number)?;
    if number == 0 {
        Ok(Color::Verde)
    } else if RED_NUMBERS.contains(&number) {
        Ok(Color::Vermelho)
    } else {
        Ok(Color::Preto)
    }
}

/// Reject anything outside the physical wheel.
pub fn validate(number: u8) -> Result<(), WheelError> {
    if number > 36 {
        return Err(WheelError::InvalidNumber(number as u16));
    }
    Ok(())
}

fn position_of(number: u8) -> Result<u8, WheelError> {
    validate(number)?;
    Ok(POSITIONS[number as usize])
}

fn number_at(position: i32) -> u8 {
    let idx = position.rem_euclid(WHEEL_SIZE as i32) as usize;
    WHEEL_SEQUENCE[idx]
}

/// Slot distance from `from` to `to` travelling in `direction`.
///
/// Result is in [1, 37]; a distance of zero slots is reported as a
/// full lap of 37 (the ball landed where it started).
pub fn force(from: u8, to: u8, direction: Direction) -> Result<u8, WheelError> {
    let from_pos = position_of(from)? as i32;
    let to_pos = position_of(to)? as i32;

    let distance = match direction {
        Direction::Clockwise => (to_pos - from_pos).rem_euclid(WHEEL_SIZE as i32),
        Direction::Counterclockwise => (from_pos - to_pos).rem_euclid(WHEEL_SIZE as i32),
    };

    if distance == 0 {
        Ok(FULL_LAP)
    } else {
        Ok(distance as u8)
    }
}

/// Number reached by travelling `force` slots from `from` in
/// `direction`. Inverse of [`force`] for forces in [1, 37].
pub fn project(from: u8, force: u8, direction: Direction) -> Result<u8, WheelError> {
    if force == 0 || force > FULL_LAP {
        return Err(WheelError::InvalidForce(force as u16));
    }
    let from_pos = position_of(from)? as i32;

    let target = match direction {
        Direction::Clockwise => from_pos + force as i32,
        Direction::Counterclockwise => from_pos - force as i32,
    };

    Ok(number_at(target))
}

/// The `2 * radius + 1` numbers centred on `center` in wheel order.
pub fn neighbours(center: u8, radius: u8) -> Result<Vec<u8>, WheelError> {
    let center_pos = position_of(center)? as i32;
    let radius = radius as i32;

    Ok((-radius..=radius)
        .map(|offset| number_at(center_pos + offset))
        .collect())
}

/// Presentation form of a region, with the center bracketed.
/// Example: `"4, 21, [2], 25, 17"`.
pub fn visual_region(center: u8, numbers: &[u8]) -> String {
    numbers
        .iter()
        .map(|n| {
            if *n == center {
                format!("[{n}]")
            } else {
                n.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Circular distance between two forces in the 37-slot universe.
pub fn force_distance(a: u8, b: u8) -> u8 {
    let linear = a.abs_diff(b);
    linear.min(WHEEL_SIZE - linear)
}

/// Signed circular error `actual - predicted`, wrapped into
/// [-18, +18]. Positive means the ball travelled further than
/// predicted; feeds the calibration offset.
pub fn signed_force_error(predicted: u8, actual: u8) -> i16 {
    let mut diff = actual as i16 - predicted as i16;
    if diff > 18 {
        diff -= WHEEL_SIZE as i16;
    } else if diff < -18 {
        diff += WHEEL_SIZE as i16;
    }
    diff
}
