//! Maps Martingale window events onto the gale_windows and
//! window_plays tables.
//!
//! The in-memory state machine is authoritative; this service only
//! mirrors it into the log. A window row opens on the first play,
//! collects one row per play, and closes when the transition fires.
//! Windows left open by a crash or session reset are closed as
//! orphans.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use roleta_core::{Direction, MartingaleUpdate, Transition};

use crate::repo::{
    DecisionRepository, NewGaleWindow, NewWindowPlay, RepoResult, WindowResult,
};

/// Spin context attached to each window play.
#[derive(Debug, Clone)]
pub struct PlayContext {
    pub numero: u8,
    pub direction: Direction,
    pub predicted_force: u8,
    pub sda_score: u8,
    pub tr_confidence: String,
    /// Advisor rates and calibration at decision time; stored with the
    /// window when it opens.
    pub features: serde_json::Value,
}

#[derive(Debug, Default)]
struct ActiveWindows {
    cw: Option<i64>,
    ccw: Option<i64>,
}

impl ActiveWindows {
    fn slot(&mut self, direction: Direction) -> &mut Option<i64> {
        match direction {
            Direction::Clockwise => &mut self.cw,
            Direction::Counterclockwise => &mut self.ccw,
        }
    }
}

pub struct GaleTracker {
    repo: Arc<dyn DecisionRepository>,
    session_id: Mutex<String>,
    active: Mutex<ActiveWindows>,
}

impl GaleTracker {
    pub fn new(repo: Arc<dyn DecisionRepository>, session_id: String) -> Self {
        Self {
            repo,
            session_id: Mutex::new(session_id),
            active: Mutex::new(ActiveWindows::default()),
        }
    }

    /// Point subsequent windows at a new session.
    pub fn set_session(&self, session_id: String) {
        *self.session_id.lock() = session_id;
    }

    /// Pick up windows left open by a previous run so their plays keep
    /// appending to the same row.
    pub async fn restore(&self) -> RepoResult<()> {
        let cw = self.repo.find_open_window(Direction::Clockwise).await?;
        let ccw = self.repo.find_open_window(Direction::Counterclockwise).await?;
        let mut active = self.active.lock();
        active.cw = cw;
        active.ccw = ccw;
        Ok(())
    }

    /// Record one resolved placed bet.
    pub async fn on_play(
        &self,
        hit: bool,
        update: &MartingaleUpdate,
        ctx: &PlayContext,
    ) -> RepoResult<()> {
        let direction = ctx.direction;

        if update.window_count == 1 {
            // A fresh window. Anything still open for this direction
            // never saw its transition.
            let stale = self.active.lock().slot(direction).take();
            if let Some(window_id) = stale {
                self.repo
                    .close_gale_window(window_id, WindowResult::Orphan, None)
                    .await?;
            }
            // Clone out of the lock before the await; the guard must
            // not live across a suspension point.
            let session_id = self.session_id.lock().clone();
            let window_id = self
                .repo
                .open_gale_window(&NewGaleWindow {
                    session_id,
                    direction,
                    starting_level: update.level_before,
                    opened_at: Utc::now(),
                    features_at_start: ctx.features.clone(),
                })
                .await?;
            *self.active.lock().slot(direction) = Some(window_id);
        }

        let window_id = match *self.active.lock().slot(direction) {
            Some(id) => id,
            // Restored mid-window with no row to append to; skip
            // silently rather than invent a partial window.
            None => return Ok(()),
        };

        self.repo
            .insert_window_play(&NewWindowPlay {
                window_id,
                play_number: update.window_count,
                hit,
                numero: ctx.numero,
                direcao: direction,
                predicted_force: ctx.predicted_force,
                sda_score: ctx.sda_score,
                tr_confidence: ctx.tr_confidence.clone(),
                created_at: Utc::now(),
            })
            .await?;

        if let Some(transition) = update.transition {
            let result = match transition {
                Transition::Sucesso => WindowResult::Success,
                Transition::Subindo => WindowResult::Escalated,
                Transition::Stop => WindowResult::Stop,
            };
            self.repo
                .close_gale_window(window_id, result, Some(update.level_after))
                .await?;
            *self.active.lock().slot(direction) = None;
        }
        Ok(())
    }

    /// Close any open windows, e.g. on session reset or shutdown.
    pub async fn close_orphans(&self) -> RepoResult<()> {
        let (cw, ccw) = {
            let mut active = self.active.lock();
            (active.cw.take(), active.ccw.take())
        };
        for window_id in [cw, ccw].into_iter().flatten() {
            self.repo
                .close_gale_window(window_id, WindowResult::Orphan, None)
                .await?;
        }
        Ok(())
    }
}
