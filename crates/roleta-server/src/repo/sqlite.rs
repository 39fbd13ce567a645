//! SQLite implementation of the decision log.
//!
//! A single-connection pool keeps writes serialized, matching the one
//! pipeline pass in flight at a time. Array-valued columns are stored
//! as JSON text.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use roleta_core::Direction;

use super::models::{
    CalibrationStats, DecisionOutcome, DecisionStats, DirectionBreakdown, GaleLevelStats,
    NewDecision, NewGaleWindow, NewWindowPlay, RecentWindow, TripleRateStats, WindowResult,
};
use super::{DecisionRepository, RepoResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id              TEXT PRIMARY KEY,
    started_at      TEXT NOT NULL,
    ended_at        TEXT,
    spins           INTEGER NOT NULL DEFAULT 0,
    bets            INTEGER NOT NULL DEFAULT 0,
    hits            INTEGER NOT NULL DEFAULT 0,
    max_gale_level  INTEGER NOT NULL DEFAULT 1,
    stops           INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS decisions (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id           TEXT NOT NULL,
    trace_id             TEXT NOT NULL,
    created_at           TEXT NOT NULL,
    numero               INTEGER NOT NULL,
    direcao              TEXT NOT NULL,
    force                INTEGER,
    target_direction     TEXT NOT NULL,
    sda_should_bet       INTEGER NOT NULL,
    sda_reason           TEXT,
    predicted_force      INTEGER,
    raw_force            INTEGER,
    sda_center           INTEGER,
    sda_numbers          TEXT NOT NULL,
    sda_score            INTEGER NOT NULL,
    trend                TEXT,
    slope                REAL,
    tr_should_bet        INTEGER NOT NULL,
    tr_confidence        TEXT NOT NULL,
    tr_reason            TEXT NOT NULL,
    c4_rate              REAL NOT NULL,
    m6_rate              REAL NOT NULL,
    l12_rate             REAL NOT NULL,
    final_action         TEXT NOT NULL,
    action_reason        TEXT NOT NULL,
    bet_placed           INTEGER NOT NULL,
    gale_level           INTEGER NOT NULL,
    bet_units            INTEGER NOT NULL,
    calibration_offset   INTEGER NOT NULL,
    performance_snapshot TEXT NOT NULL,
    result_hit           INTEGER,
    actual_number        INTEGER,
    actual_force         INTEGER,
    calibration_error    INTEGER
);

CREATE INDEX IF NOT EXISTS idx_decisions_session ON decisions (session_id);
CREATE INDEX IF NOT EXISTS idx_decisions_created ON decisions (created_at);
CREATE INDEX IF NOT EXISTS idx_decisions_action ON decisions (final_action);
CREATE INDEX IF NOT EXISTS idx_decisions_gale ON decisions (gale_level);

CREATE TABLE IF NOT EXISTS gale_windows (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id        TEXT NOT NULL,
    direction         TEXT NOT NULL,
    starting_level    INTEGER NOT NULL,
    opened_at         TEXT NOT NULL,
    closed_at         TEXT,
    result            TEXT,
    next_level        INTEGER,
    features_at_start TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_gale_windows_open ON gale_windows (direction, result);

CREATE TABLE IF NOT EXISTS window_plays (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    window_id       INTEGER NOT NULL REFERENCES gale_windows (id),
    play_number     INTEGER NOT NULL,
    hit             INTEGER NOT NULL,
    numero          INTEGER NOT NULL,
    direcao         TEXT NOT NULL,
    predicted_force INTEGER NOT NULL,
    sda_score       INTEGER NOT NULL,
    tr_confidence   TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_window_plays_window ON window_plays (window_id);
"#;

/// Decision log backed by a local SQLite file.
pub struct SqliteDecisionLog {
    pool: SqlitePool,
}

impl SqliteDecisionLog {
    /// Open (creating if missing) the database and apply the schema.
    pub async fn connect<P: AsRef<Path>>(path: P) -> RepoResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!(path = %path.display(), "Decision log ready");
        Ok(Self { pool })
    }

    /// In-memory database, handy for tests.
    pub async fn connect_in_memory() -> RepoResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl DecisionRepository for SqliteDecisionLog {
    async fn create_session(&self, session_id: &str) -> RepoResult<()> {
        sqlx::query("INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?, ?)")
            .bind(session_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn end_session(&self, session_id: &str) -> RepoResult<()> {
        sqlx::query("UPDATE sessions SET ended_at = ? WHERE id = ? AND ended_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn bump_session(
        &self,
        session_id: &str,
        bet_placed: bool,
        hit: bool,
        gale_level: u8,
        stopped: bool,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE sessions SET
                spins = spins + 1,
                bets = bets + ?,
                hits = hits + ?,
                max_gale_level = MAX(max_gale_level, ?),
                stops = stops + ?
             WHERE id = ?",
        )
        .bind(bet_placed as i64)
        .bind((bet_placed && hit) as i64)
        .bind(gale_level as i64)
        .bind(stopped as i64)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_decision(&self, d: &NewDecision) -> RepoResult<i64> {
        let sda_numbers = serde_json::to_string(&d.sda_numbers)?;
        let performance = serde_json::to_string(&d.performance_snapshot)?;
        let result = sqlx::query(
            "INSERT INTO decisions (
                session_id, trace_id, created_at, numero, direcao, force,
                target_direction, sda_should_bet, sda_reason, predicted_force,
                raw_force, sda_center, sda_numbers, sda_score, trend, slope,
                tr_should_bet, tr_confidence, tr_reason, c4_rate, m6_rate,
                l12_rate, final_action, action_reason, bet_placed, gale_level,
                bet_units, calibration_offset, performance_snapshot
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&d.session_id)
        .bind(&d.trace_id)
        .bind(d.created_at.to_rfc3339())
        .bind(d.numero as i64)
        .bind(d.direcao.wire_name())
        .bind(d.force.map(|f| f as i64))
        .bind(d.target_direction.wire_name())
        .bind(d.sda_should_bet)
        .bind(&d.sda_reason)
        .bind(d.predicted_force.map(|f| f as i64))
        .bind(d.raw_force.map(|f| f as i64))
        .bind(d.sda_center.map(|c| c as i64))
        .bind(sda_numbers)
        .bind(d.sda_score as i64)
        .bind(&d.trend)
        .bind(d.slope)
        .bind(d.tr_should_bet)
        .bind(&d.tr_confidence)
        .bind(&d.tr_reason)
        .bind(d.c4_rate)
        .bind(d.m6_rate)
        .bind(d.l12_rate)
        .bind(&d.final_action)
        .bind(&d.action_reason)
        .bind(d.bet_placed)
        .bind(d.gale_level as i64)
        .bind(d.bet_units as i64)
        .bind(d.calibration_offset as i64)
        .bind(performance)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_decision_outcome(
        &self,
        decision_id: i64,
        outcome: &DecisionOutcome,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE decisions SET
                result_hit = ?, actual_number = ?, actual_force = ?,
                calibration_error = ?
             WHERE id = ? AND result_hit IS NULL",
        )
        .bind(outcome.hit)
        .bind(outcome.actual_number as i64)
        .bind(outcome.actual_force.map(|f| f as i64))
        .bind(outcome.calibration_error.map(i64::from))
        .bind(decision_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn open_gale_window(&self, w: &NewGaleWindow) -> RepoResult<i64> {
        let features = serde_json::to_string(&w.features_at_start)?;
        let result = sqlx::query(
            "INSERT INTO gale_windows (
                session_id, direction, starting_level, opened_at, features_at_start
            ) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&w.session_id)
        .bind(w.direction.wire_name())
        .bind(w.starting_level as i64)
        .bind(w.opened_at.to_rfc3339())
        .bind(features)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn close_gale_window(
        &self,
        window_id: i64,
        result: WindowResult,
        next_level: Option<u8>,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE gale_windows SET closed_at = ?, result = ?, next_level = ?
             WHERE id = ? AND result IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(result.as_str())
        .bind(next_level.map(|l| l as i64))
        .bind(window_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_window_play(&self, p: &NewWindowPlay) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO window_plays (
                window_id, play_number, hit, numero, direcao, predicted_force,
                sda_score, tr_confidence, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(p.window_id)
        .bind(p.play_number as i64)
        .bind(p.hit)
        .bind(p.numero as i64)
        .bind(p.direcao.wire_name())
        .bind(p.predicted_force as i64)
        .bind(p.sda_score as i64)
        .bind(&p.tr_confidence)
        .bind(p.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_open_window(&self, direction: Direction) -> RepoResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT id FROM gale_windows
             WHERE direction = ? AND result IS NULL
             ORDER BY id DESC LIMIT 1",
        )
        .bind(direction.wire_name())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn recent_windows(&self, limit: i64) -> RepoResult<Vec<RecentWindow>> {
        let rows = sqlx::query(
            "SELECT direction, starting_level, result, opened_at
             FROM gale_windows ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| RecentWindow {
                direcao: r.get::<String, _>("direction"),
                starting_level: r.get::<i64, _>("starting_level") as u8,
                result: r.get::<Option<String>, _>("result"),
                opened_at: r.get::<String, _>("opened_at"),
            })
            .collect())
    }

    async fn decision_stats(&self, session_id: Option<&str>) -> RepoResult<DecisionStats> {
        let row = match session_id {
            Some(id) => {
                sqlx::query(
                    "SELECT COUNT(*) AS decisions,
                            COALESCE(SUM(bet_placed), 0) AS bets,
                            COALESCE(SUM(CASE WHEN bet_placed = 1 AND result_hit = 1 THEN 1 ELSE 0 END), 0) AS hits
                     FROM decisions WHERE session_id = ?",
                )
                .bind(id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT COUNT(*) AS decisions,
                            COALESCE(SUM(bet_placed), 0) AS bets,
                            COALESCE(SUM(CASE WHEN bet_placed = 1 AND result_hit = 1 THEN 1 ELSE 0 END), 0) AS hits
                     FROM decisions",
                )
                .fetch_one(&self.pool)
                .await?
            }
        };
        let decisions: i64 = row.get("decisions");
        let bets: i64 = row.get("bets");
        let hits: i64 = row.get("hits");
        Ok(DecisionStats {
            decisions,
            bets,
            hits,
            hit_rate: rate(hits, bets),
        })
    }

    async fn gale_level_stats(&self) -> RepoResult<Vec<GaleLevelStats>> {
        let rows = sqlx::query(
            "SELECT gale_level,
                    COUNT(*) AS bets,
                    COALESCE(SUM(CASE WHEN result_hit = 1 THEN 1 ELSE 0 END), 0) AS hits
             FROM decisions
             WHERE bet_placed = 1 AND result_hit IS NOT NULL
             GROUP BY gale_level ORDER BY gale_level",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let bets: i64 = r.get("bets");
                let hits: i64 = r.get("hits");
                GaleLevelStats {
                    level: r.get::<i64, _>("gale_level") as u8,
                    bets,
                    hits,
                    hit_rate: rate(hits, bets),
                }
            })
            .collect())
    }

    async fn triple_rate_stats(&self) -> RepoResult<TripleRateStats> {
        // Vetoed rows: predictor wanted to bet, advisor said no, and
        // the shadow prediction got an outcome.
        let row = sqlx::query(
            "SELECT COUNT(*) AS vetoed,
                    COALESCE(SUM(CASE WHEN result_hit = 1 THEN 1 ELSE 0 END), 0) AS would_hit
             FROM decisions
             WHERE sda_should_bet = 1 AND tr_should_bet = 0
               AND bet_placed = 0 AND result_hit IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        let vetoed: i64 = row.get("vetoed");
        let would_hit: i64 = row.get("would_hit");
        Ok(TripleRateStats {
            vetoed,
            vetoed_would_hit: would_hit,
            vetoed_would_miss: vetoed - would_hit,
        })
    }

    async fn direction_breakdown(&self) -> RepoResult<Vec<DirectionBreakdown>> {
        let rows = sqlx::query(
            "SELECT target_direction AS direcao,
                    COUNT(*) AS bets,
                    COALESCE(SUM(CASE WHEN result_hit = 1 THEN 1 ELSE 0 END), 0) AS hits
             FROM decisions
             WHERE bet_placed = 1 AND result_hit IS NOT NULL
             GROUP BY target_direction",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let bets: i64 = r.get("bets");
                let hits: i64 = r.get("hits");
                DirectionBreakdown {
                    direcao: r.get("direcao"),
                    bets,
                    hits,
                    hit_rate: rate(hits, bets),
                }
            })
            .collect())
    }

    async fn calibration_stats(&self) -> RepoResult<Vec<CalibrationStats>> {
        let rows = sqlx::query(
            "SELECT calibration_offset,
                    COUNT(*) AS bets,
                    COALESCE(SUM(CASE WHEN result_hit = 1 THEN 1 ELSE 0 END), 0) AS hits
             FROM decisions
             WHERE bet_placed = 1 AND result_hit IS NOT NULL
             GROUP BY calibration_offset ORDER BY calibration_offset",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let bets: i64 = r.get("bets");
                let hits: i64 = r.get("hits");
                CalibrationStats {
                    offset: r.get::<i64, _>("calibration_offset") as i16,
                    bets,
                    hits,
                    hit_rate: rate(hits, bets),
                }
            })
            .collect())
    }
}

fn rate(hits: i64, bets: i64) -> f64 {
    if bets == 0 {
        0.0
    } else {
        hits as f64 / bets as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_decision(session_id: &str, bet_placed: bool) -> NewDecision {
        NewDecision {
            session_id: session_id.to_string(),
            trace_id: "t-1".to_string(),
            created_at: Utc::now(),
            numero: 30,
            direcao: Direction::Clockwise,
            force: Some(12),
            target_direction: Direction::Counterclockwise,
            sda_should_bet: true,
            sda_reason: None,
            predicted_force: Some(19),
            raw_force: Some(19),
            sda_center: Some(11),
            sda_numbers: vec![11, 30, 8],
            sda_score: 4,
            trend: Some("estavel".to_string()),
            slope: Some(0.5),
            tr_should_bet: bet_placed,
            tr_confidence: "alta".to_string(),
            tr_reason: "crescente".to_string(),
            c4_rate: 0.75,
            m6_rate: 0.5,
            l12_rate: 0.4,
            final_action: if bet_placed { "APOSTAR" } else { "PULAR" }.to_string(),
            action_reason: "crescente".to_string(),
            bet_placed,
            gale_level: 1,
            bet_units: 17,
            calibration_offset: 0,
            performance_snapshot: vec![true, false],
        }
    }

    #[tokio::test]
    async fn test_decision_insert_and_back_update() {
        let repo = SqliteDecisionLog::connect_in_memory().await.unwrap();
        repo.create_session("s1").await.unwrap();

        let id = repo.insert_decision(&sample_decision("s1", true)).await.unwrap();
        assert!(id > 0);

        repo.update_decision_outcome(
            id,
            &DecisionOutcome {
                hit: true,
                actual_number: 11,
                actual_force: Some(19),
                calibration_error: Some(0),
            },
        )
        .await
        .unwrap();

        let stats = repo.decision_stats(Some("s1")).await.unwrap();
        assert_eq!(stats.decisions, 1);
        assert_eq!(stats.bets, 1);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_outcome_written_only_once() {
        let repo = SqliteDecisionLog::connect_in_memory().await.unwrap();
        repo.create_session("s1").await.unwrap();
        let id = repo.insert_decision(&sample_decision("s1", true)).await.unwrap();

        let first = DecisionOutcome {
            hit: true,
            actual_number: 11,
            actual_force: Some(19),
            calibration_error: None,
        };
        let second = DecisionOutcome {
            hit: false,
            actual_number: 0,
            actual_force: Some(5),
            calibration_error: None,
        };
        repo.update_decision_outcome(id, &first).await.unwrap();
        repo.update_decision_outcome(id, &second).await.unwrap();

        let stats = repo.decision_stats(None).await.unwrap();
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_triple_rate_effectiveness() {
        let repo = SqliteDecisionLog::connect_in_memory().await.unwrap();
        repo.create_session("s1").await.unwrap();

        // Two vetoed decisions, one of which would have hit.
        for hit in [true, false] {
            let id = repo.insert_decision(&sample_decision("s1", false)).await.unwrap();
            repo.update_decision_outcome(
                id,
                &DecisionOutcome {
                    hit,
                    actual_number: 11,
                    actual_force: None,
                    calibration_error: None,
                },
            )
            .await
            .unwrap();
        }

        let stats = repo.triple_rate_stats().await.unwrap();
        assert_eq!(stats.vetoed, 2);
        assert_eq!(stats.vetoed_would_hit, 1);
        assert_eq!(stats.vetoed_would_miss, 1);
    }

    #[tokio::test]
    async fn test_gale_window_lifecycle() {
        let repo = SqliteDecisionLog::connect_in_memory().await.unwrap();
        repo.create_session("s1").await.unwrap();

        let window_id = repo
            .open_gale_window(&NewGaleWindow {
                session_id: "s1".to_string(),
                direction: Direction::Clockwise,
                starting_level: 1,
                opened_at: Utc::now(),
                features_at_start: serde_json::json!({"c4": 0.5}),
            })
            .await
            .unwrap();

        assert_eq!(
            repo.find_open_window(Direction::Clockwise).await.unwrap(),
            Some(window_id)
        );
        assert_eq!(repo.find_open_window(Direction::Counterclockwise).await.unwrap(), None);

        for play in 1..=5u8 {
            repo.insert_window_play(&NewWindowPlay {
                window_id,
                play_number: play,
                hit: play == 1,
                numero: 5,
                direcao: Direction::Clockwise,
                predicted_force: 10,
                sda_score: 3,
                tr_confidence: "media".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        repo.close_gale_window(window_id, WindowResult::Escalated, Some(2))
            .await
            .unwrap();
        assert_eq!(repo.find_open_window(Direction::Clockwise).await.unwrap(), None);

        let recent = repo.recent_windows(5).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].direcao, "horario");
        assert_eq!(recent[0].result.as_deref(), Some("escalated"));
    }

    #[tokio::test]
    async fn test_session_counters() {
        let repo = SqliteDecisionLog::connect_in_memory().await.unwrap();
        repo.create_session("s1").await.unwrap();
        repo.bump_session("s1", true, true, 2, false).await.unwrap();
        repo.bump_session("s1", true, false, 3, true).await.unwrap();
        repo.bump_session("s1", false, false, 1, false).await.unwrap();
        repo.end_session("s1").await.unwrap();

        let row = sqlx::query("SELECT * FROM sessions WHERE id = 's1'")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("spins"), 3);
        assert_eq!(row.get::<i64, _>("bets"), 2);
        assert_eq!(row.get::<i64, _>("hits"), 1);
        assert_eq!(row.get::<i64, _>("max_gale_level"), 3);
        assert_eq!(row.get::<i64, _>("stops"), 1);
        assert!(row.get::<Option<String>, _>("ended_at").is_some());
    }

    #[tokio::test]
    async fn test_gale_level_stats() {
        let repo = SqliteDecisionLog::connect_in_memory().await.unwrap();
        repo.create_session("s1").await.unwrap();

        for (level, hit) in [(1u8, true), (1, false), (2, true)] {
            let mut d = sample_decision("s1", true);
            d.gale_level = level;
            let id = repo.insert_decision(&d).await.unwrap();
            repo.update_decision_outcome(
                id,
                &DecisionOutcome {
                    hit,
                    actual_number: 11,
                    actual_force: None,
                    calibration_error: None,
                },
            )
            .await
            .unwrap();
        }

        let stats = repo.gale_level_stats().await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].level, 1);
        assert_eq!(stats[0].bets, 2);
        assert_eq!(stats[0].hits, 1);
        assert_eq!(stats[1].level, 2);
        assert!((stats[1].hit_rate - 1.0).abs() < 1e-9);
    }
}
