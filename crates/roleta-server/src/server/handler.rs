//! Inbound message dispatch.
//!
//! Parses client frames, enforces the master role, runs the pipeline
//! under the state lock and mirrors every pass into the decision log.
//! I/O failures downstream of the pipeline degrade to warnings; the
//! in-memory state stays authoritative.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use roleta_core::{wheel, Color, Direction, Transition};

use crate::gale_tracker::{GaleTracker, PlayContext};
use crate::pipeline::{self, Action, SpinOutcome};
use crate::repo::{DecisionOutcome, DecisionRepository, NewDecision};
use crate::state::{GameState, Spin};
use crate::trace::TraceContext;

use super::connection::ConnectionManager;
use super::message::{
    now_ms, BetAdviceWire, HistoryEntry, Inbound, Outbound, RatesWire, SugestaoData,
    CODE_NOT_MASTER, CODE_VALIDATION,
};

/// State guarded by the pipeline critical section.
struct Inner {
    game: GameState,
    /// Decision row awaiting its outcome, present only while a pending
    /// prediction is outstanding.
    last_decision_id: Option<i64>,
}

pub struct MessageHandler {
    inner: Mutex<Inner>,
    repo: Arc<dyn DecisionRepository>,
    tracker: GaleTracker,
    connections: Arc<ConnectionManager>,
    session_id: RwLock<String>,
    state_path: PathBuf,
    persist_timeout: Duration,
}

impl MessageHandler {
    pub fn new(
        game: GameState,
        repo: Arc<dyn DecisionRepository>,
        connections: Arc<ConnectionManager>,
        session_id: String,
        state_path: PathBuf,
        persist_timeout: Duration,
    ) -> Self {
        let tracker = GaleTracker::new(repo.clone(), session_id.clone());
        Self {
            inner: Mutex::new(Inner {
                game,
                last_decision_id: None,
            }),
            repo,
            tracker,
            connections,
            session_id: RwLock::new(session_id),
            state_path,
            persist_timeout,
        }
    }

    pub fn current_session(&self) -> String {
        self.session_id.read().clone()
    }

    /// Resume open gale windows from a previous run.
    pub async fn restore_tracker(&self) {
        if let Err(e) = self.tracker.restore().await {
            warn!(error = %e, "Failed to restore open gale windows");
        }
    }

    /// Entry point for every text frame received from a client.
    pub async fn handle_message(&self, client_id: Uuid, text: &str) {
        let inbound = match serde_json::from_str::<Inbound>(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Malformed message");
                self.connections.send_to(
                    client_id,
                    &Outbound::error(CODE_VALIDATION, format!("mensagem invalida: {e}"), None),
                );
                return;
            }
        };

        if inbound.requires_master() && !self.connections.is_master(client_id) {
            self.connections.send_to(
                client_id,
                &Outbound::error(CODE_NOT_MASTER, "apenas o master envia dados", None),
            );
            return;
        }

        match inbound {
            Inbound::NovoResultado {
                numero,
                direcao,
                timestamp,
                trace_id,
            } => {
                self.on_novo_resultado(client_id, numero, direcao, timestamp, trace_id)
                    .await;
            }
            Inbound::HistoricoInicial { resultados } => {
                self.on_history(client_id, resultados, false).await;
            }
            Inbound::CorrecaoHistorico { resultados } => {
                self.on_history(client_id, resultados, true).await;
            }
            Inbound::NovaSessao { manter_ultimo } => {
                self.on_nova_sessao(client_id, manter_ultimo.unwrap_or(false))
                    .await;
            }
            Inbound::GetState {} => {
                self.on_get_state(client_id).await;
            }
        }
    }

    async fn on_novo_resultado(
        &self,
        client_id: Uuid,
        numero: u16,
        direcao: Direction,
        timestamp: i64,
        trace_id: Option<String>,
    ) {
        let mut trace = TraceContext::new(trace_id);
        trace.mark("received");

        if numero > 36 {
            self.connections.send_to(
                client_id,
                &Outbound::error(
                    CODE_VALIDATION,
                    format!("numero invalido: {numero}"),
                    Some(trace.trace_id.clone()),
                ),
            );
            return;
        }
        let spin = Spin {
            numero: numero as u8,
            direction: direcao,
            timestamp_ms: timestamp,
        };

        let mut inner = self.inner.lock().await;

        if inner.game.is_duplicate(&spin) {
            debug!(numero, "Duplicate spin dropped");
            return;
        }

        let outcome = match pipeline::handle_spin(&mut inner.game, &spin) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.connections.send_to(
                    client_id,
                    &Outbound::error(
                        CODE_VALIDATION,
                        e.to_string(),
                        Some(trace.trace_id.clone()),
                    ),
                );
                return;
            }
        };
        trace.mark("processed");
        trace.mark("triple_rate");

        self.persist_snapshot(&inner.game).await;
        trace.mark("saved");

        let session_id = self.current_session();
        let mut stopped = false;

        if let Some(res) = &outcome.resolution {
            if let Some(decision_id) = inner.last_decision_id.take() {
                let row = DecisionOutcome {
                    hit: res.hit,
                    actual_number: spin.numero,
                    actual_force: outcome.force,
                    calibration_error: res.calibration_error,
                };
                if let Err(e) = self.repo.update_decision_outcome(decision_id, &row).await {
                    warn!(decision_id, error = %e, "Failed to back-fill decision outcome");
                }
            }

            if let Some(update) = &res.martingale {
                stopped = update.transition == Some(Transition::Stop);
                let ctx = PlayContext {
                    numero: spin.numero,
                    direction: res.prediction.direction,
                    predicted_force: res.prediction.predicted_force,
                    sda_score: res.prediction.sda_score,
                    tr_confidence: res.prediction.tr_confidence.to_string(),
                    features: serde_json::json!({
                        "tr_reason": res.prediction.tr_reason,
                        "calibration_offset": res.calibration_offset,
                    }),
                };
                if let Err(e) = self.tracker.on_play(res.hit, update, &ctx).await {
                    warn!(error = %e, "Failed to record gale window play");
                }
            }
        }

        let (bet_resolved, hit) = outcome
            .resolution
            .as_ref()
            .map(|r| (r.bet_placed, r.hit))
            .unwrap_or((false, false));
        let gale_level = inner.game.martingale(outcome.target_direction).level();
        if let Err(e) = self
            .repo
            .bump_session(&session_id, bet_resolved, bet_resolved && hit, gale_level, stopped)
            .await
        {
            warn!(error = %e, "Failed to update session counters");
        }

        let decision = self.build_decision(&session_id, &trace.trace_id, &spin, &inner.game, &outcome);
        match self.repo.insert_decision(&decision).await {
            Ok(id) => {
                inner.last_decision_id = (!inner.game.pending.is_none()).then_some(id);
            }
            Err(e) => {
                inner.last_decision_id = None;
                warn!(error = %e, "Failed to insert decision");
            }
        }
        trace.mark("analyzed");

        let suggestion = build_suggestion(&inner.game, &spin, &outcome, &trace.trace_id);
        let performance = serde_json::to_value(inner.game.performance_stats())
            .unwrap_or(serde_json::Value::Null);
        let state_summary = serde_json::json!({
            "last_number": inner.game.last_number,
            "pending": !inner.game.pending.is_none(),
            "timeline_cw": inner.game.timeline(Direction::Clockwise).len(),
            "timeline_ccw": inner.game.timeline(Direction::Counterclockwise).len(),
        });
        drop(inner);

        self.connections.broadcast(&suggestion);
        trace.mark("sent");

        self.connections.broadcast(&Outbound::Trace {
            trace_id: trace.trace_id.clone(),
            steps: trace.steps().to_vec(),
            total_ms: trace.total_ms(),
            spin: serde_json::json!({
                "numero": spin.numero,
                "direcao": spin.direction.wire_name(),
                "timestamp": spin.timestamp_ms,
            }),
            result: serde_json::json!({
                "acao": outcome.action.as_str(),
                "action_reason": outcome.action_reason,
                "force": outcome.force,
            }),
            performance,
            state: state_summary,
        });
    }

    async fn on_history(&self, client_id: Uuid, resultados: Vec<HistoryEntry>, clear: bool) {
        if let Some(bad) = resultados.iter().find(|e| e.numero > 36) {
            self.connections.send_to(
                client_id,
                &Outbound::error(
                    CODE_VALIDATION,
                    format!("numero invalido no historico: {}", bad.numero),
                    None,
                ),
            );
            return;
        }
        let entries: Vec<(u8, Direction)> = resultados
            .iter()
            .map(|e| (e.numero as u8, e.direcao))
            .collect();

        let mut inner = self.inner.lock().await;
        if clear {
            // The corrected history voids the outstanding prediction;
            // its decision row stays outcome-less.
            inner.game.clear_history();
            inner.last_decision_id = None;
        }
        let applied = match pipeline::replay_history(&mut inner.game, &entries) {
            Ok(n) => n,
            Err(e) => {
                self.connections.send_to(
                    client_id,
                    &Outbound::error(CODE_VALIDATION, e.to_string(), None),
                );
                return;
            }
        };
        self.persist_snapshot(&inner.game).await;
        drop(inner);

        info!(applied, corrected = clear, "History ingested");
        self.connections.send_to(
            client_id,
            &Outbound::Ack {
                received: applied,
                message: "historico processado".to_string(),
                t_server: now_ms(),
            },
        );
    }

    async fn on_nova_sessao(&self, client_id: Uuid, manter_ultimo: bool) {
        let mut inner = self.inner.lock().await;

        if let Err(e) = self.tracker.close_orphans().await {
            warn!(error = %e, "Failed to close open gale windows on reset");
        }

        let old_session = self.current_session();
        if let Err(e) = self.repo.end_session(&old_session).await {
            warn!(session = %old_session, error = %e, "Failed to end session");
        }

        let new_session = Uuid::new_v4().to_string();
        if let Err(e) = self.repo.create_session(&new_session).await {
            warn!(session = %new_session, error = %e, "Failed to create session");
        }
        *self.session_id.write() = new_session.clone();
        self.tracker.set_session(new_session.clone());

        inner.game.reset_session(manter_ultimo);
        inner.last_decision_id = None;
        self.persist_snapshot(&inner.game).await;
        drop(inner);

        info!(session = %new_session, manter_ultimo, "Session reset");
        self.connections.send_to(
            client_id,
            &Outbound::SessaoResetada {
                session_id: new_session,
                manter_ultimo,
                t_server: now_ms(),
            },
        );
    }

    async fn on_get_state(&self, client_id: Uuid) {
        let inner = self.inner.lock().await;
        let data = serde_json::to_value(inner.game.snapshot()).unwrap_or(serde_json::Value::Null);
        drop(inner);
        self.connections.send_to(client_id, &Outbound::State { data });
    }

    /// Heartbeat payload broadcast to every client on a timer.
    pub async fn heartbeat(&self) -> Outbound {
        let recent_windows = match self.repo.recent_windows(5).await {
            Ok(windows) => windows,
            Err(e) => {
                warn!(error = %e, "Failed to load recent gale windows");
                Vec::new()
            }
        };
        let inner = self.inner.lock().await;
        let game = &inner.game;
        let target = game.last_direction.map(|d| d.opposite());
        let data = serde_json::json!({
            "last_number": game.last_number,
            "target_direction": target.map(|d| d.wire_name()),
            "martingale": {
                "horario": game.martingale(Direction::Clockwise).display(),
                "anti_horario": game.martingale(Direction::Counterclockwise).display(),
            },
            "pending": game.pending,
            "performance": game.performance_stats(),
            "recent_windows": recent_windows,
            "t_server": now_ms(),
        });
        Outbound::StateSync { data }
    }

    /// Synchronous state flush for shutdown.
    pub async fn flush_state(&self) -> anyhow::Result<()> {
        let inner = self.inner.lock().await;
        inner.game.save(&self.state_path)
    }

    async fn persist_snapshot(&self, game: &GameState) {
        let json = match serde_json::to_string_pretty(&game.snapshot()) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "Failed to serialize state snapshot");
                return;
            }
        };
        let write = async {
            if let Some(parent) = self.state_path.parent() {
                if !parent.as_os_str().is_empty() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
            }
            tokio::fs::write(&self.state_path, json).await
        };
        match tokio::time::timeout(self.persist_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(path = %self.state_path.display(), error = %e, "State snapshot write failed");
            }
            Err(_) => {
                warn!(path = %self.state_path.display(), "State snapshot write timed out");
            }
        }
    }

    fn build_decision(
        &self,
        session_id: &str,
        trace_id: &str,
        spin: &Spin,
        game: &GameState,
        outcome: &SpinOutcome,
    ) -> NewDecision {
        let analysis = &outcome.analysis;
        let advice = &outcome.advice;
        let martingale = game.martingale(outcome.target_direction);
        NewDecision {
            session_id: session_id.to_string(),
            trace_id: trace_id.to_string(),
            created_at: Utc::now(),
            numero: spin.numero,
            direcao: spin.direction,
            force: outcome.force,
            target_direction: outcome.target_direction,
            sda_should_bet: analysis.should_bet,
            sda_reason: analysis.reason.clone(),
            predicted_force: analysis.should_bet.then_some(analysis.predicted_force),
            raw_force: analysis.should_bet.then_some(analysis.raw_force),
            sda_center: analysis.should_bet.then_some(analysis.center),
            sda_numbers: analysis.numbers.clone(),
            sda_score: analysis.score,
            trend: analysis.should_bet.then(|| analysis.trend.to_string()),
            slope: analysis.should_bet.then_some(analysis.slope),
            tr_should_bet: advice.should_bet,
            tr_confidence: advice.confidence.to_string(),
            tr_reason: advice.reason.clone(),
            c4_rate: advice.c4_rate,
            m6_rate: advice.m6_rate,
            l12_rate: advice.l12_rate,
            final_action: outcome.action.as_str().to_string(),
            action_reason: outcome.action_reason.clone(),
            bet_placed: outcome.action == Action::Apostar,
            gale_level: martingale.level(),
            bet_units: martingale.bet_units(),
            calibration_offset: game.calibration(outcome.target_direction).offset(),
            performance_snapshot: game.performance(outcome.target_direction).results().to_vec(),
        }
    }
}

fn build_suggestion(
    game: &GameState,
    spin: &Spin,
    outcome: &SpinOutcome,
    trace_id: &str,
) -> Outbound {
    let analysis = &outcome.analysis;
    let advice = &outcome.advice;
    let martingale = game.martingale(outcome.target_direction);
    let confianca = (analysis.score as u32 * 100 / roleta_core::predictor::MAX_SCORE as u32) as u8;

    Outbound::Sugestao {
        data: SugestaoData {
            acao: outcome.action.as_str().to_string(),
            numeros: analysis.numbers.clone(),
            centro: (!analysis.numbers.is_empty()).then_some(analysis.center),
            regiao: analysis.visual.clone(),
            ultimo_numero: spin.numero,
            cor: wheel::color(spin.numero).unwrap_or(Color::Verde),
            confianca,
            martingale: format!(
                "Nivel {} ({} fichas)",
                martingale.level(),
                martingale.bet_units()
            ),
            aposta: martingale.bet_units(),
            gale_level: martingale.level(),
            gale_display: martingale.display(),
            estrategia: "SDA-17".to_string(),
            trace_id: trace_id.to_string(),
            t_server: now_ms(),
            bet_advice: BetAdviceWire {
                should_bet: advice.should_bet,
                confidence: advice.confidence.to_string(),
                reason: advice.reason.clone(),
                rates: RatesWire {
                    c4: advice.c4_rate,
                    m6: advice.m6_rate,
                    l12: advice.l12_rate,
                },
            },
            action_reason: outcome.action_reason.clone(),
        },
    }
}
