//! Decision log persistence.
//!
//! Every pipeline pass inserts one decision row; the next spin writes
//! the outcome back onto it. Sessions, Martingale windows and their
//! plays live in sibling tables. The store sits behind a trait so the
//! pipeline never sees SQL.

pub mod models;
pub mod sqlite;

use async_trait::async_trait;
use roleta_core::Direction;

pub use models::{
    CalibrationStats, DecisionOutcome, DecisionStats, DirectionBreakdown, GaleLevelStats,
    NewDecision, NewGaleWindow, NewWindowPlay, RecentWindow, TripleRateStats, WindowResult,
};
pub use sqlite::SqliteDecisionLog;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable store for decisions, sessions and gale windows.
#[async_trait]
pub trait DecisionRepository: Send + Sync {
    // Sessions.
    async fn create_session(&self, session_id: &str) -> RepoResult<()>;
    async fn end_session(&self, session_id: &str) -> RepoResult<()>;
    /// Fold one resolved spin into the session counters.
    async fn bump_session(
        &self,
        session_id: &str,
        bet_placed: bool,
        hit: bool,
        gale_level: u8,
        stopped: bool,
    ) -> RepoResult<()>;

    // Decisions.
    async fn insert_decision(&self, decision: &NewDecision) -> RepoResult<i64>;
    async fn update_decision_outcome(
        &self,
        decision_id: i64,
        outcome: &DecisionOutcome,
    ) -> RepoResult<()>;

    // Gale windows.
    async fn open_gale_window(&self, window: &NewGaleWindow) -> RepoResult<i64>;
    async fn close_gale_window(
        &self,
        window_id: i64,
        result: WindowResult,
        next_level: Option<u8>,
    ) -> RepoResult<()>;
    async fn insert_window_play(&self, play: &NewWindowPlay) -> RepoResult<()>;
    /// Id of the open window for a direction, if any survived a
    /// restart.
    async fn find_open_window(&self, direction: Direction) -> RepoResult<Option<i64>>;
    /// Newest windows first, for the heartbeat broadcast.
    async fn recent_windows(&self, limit: i64) -> RepoResult<Vec<RecentWindow>>;

    // Analytics (off the hot path).
    async fn decision_stats(&self, session_id: Option<&str>) -> RepoResult<DecisionStats>;
    async fn gale_level_stats(&self) -> RepoResult<Vec<GaleLevelStats>>;
    async fn triple_rate_stats(&self) -> RepoResult<TripleRateStats>;
    async fn direction_breakdown(&self) -> RepoResult<Vec<DirectionBreakdown>>;
    async fn calibration_stats(&self) -> RepoResult<Vec<CalibrationStats>>;
}
