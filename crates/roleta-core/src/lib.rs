//! Core domain logic for the roulette advisory service.
//!
//! Everything in this crate is pure computation over the physical
//! European wheel: no I/O, no clocks, no locks. The server crate owns
//! orchestration and persistence.
//!
//! ## Modules
//!
//! - `wheel`: the immutable wheel geometry and force primitives
//! - `timeline`: bounded per-direction force and performance histories
//! - `predictor`: the SDA-17 regression-based force predictor
//! - `advisor`: the Triple Rate Advisor veto layer
//! - `martingale`: the 5-play window state machine
//! - `calibration`: per-direction force offset with momentum updates

pub mod advisor;
pub mod calibration;
pub mod martingale;
pub mod predictor;
pub mod timeline;
pub mod wheel;

pub use advisor::{BetAdvice, Confidence, TripleRateAdvisor};
pub use calibration::Calibration;
pub use martingale::{Martingale, MartingaleUpdate, Transition};
pub use predictor::{SdaAnalysis, Trend, FORCES_ANALYZED, REGION_RADIUS};
pub use timeline::{PerformanceHistory, Timeline, MAX_PERFORMANCE, MAX_TIMELINE};
pub use wheel::{Color, Direction, WheelError, FULL_LAP, WHEEL_SEQUENCE, WHEEL_SIZE};
