//! Wire protocol: line-delimited JSON messages tagged by `type`.
//!
//! Field names stay in Portuguese to match the table-side client.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use roleta_core::{Color, Direction};

use crate::trace::TraceStep;

/// Error codes carried by `error` messages.
pub const CODE_VALIDATION: u16 = 400;
pub const CODE_NOT_MASTER: u16 = 403;

/// One history entry in a bulk seed, newest-first on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub numero: u16,
    pub direcao: Direction,
}

/// Messages accepted from clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    NovoResultado {
        numero: u16,
        direcao: Direction,
        timestamp: i64,
        #[serde(default)]
        trace_id: Option<String>,
    },
    HistoricoInicial {
        resultados: Vec<HistoryEntry>,
    },
    CorrecaoHistorico {
        resultados: Vec<HistoryEntry>,
    },
    NovaSessao {
        #[serde(default)]
        manter_ultimo: Option<bool>,
    },
    GetState {},
}

impl Inbound {
    /// Whether the message mutates game state and therefore requires
    /// the master role.
    pub fn requires_master(&self) -> bool {
        !matches!(self, Inbound::GetState {})
    }
}

/// Advisor block embedded in every suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct BetAdviceWire {
    pub should_bet: bool,
    pub confidence: String,
    pub reason: String,
    pub rates: RatesWire,
}

#[derive(Debug, Clone, Serialize)]
pub struct RatesWire {
    pub c4: f64,
    pub m6: f64,
    pub l12: f64,
}

/// Payload of a `sugestao` message.
#[derive(Debug, Clone, Serialize)]
pub struct SugestaoData {
    pub acao: String,
    pub numeros: Vec<u8>,
    pub centro: Option<u8>,
    pub regiao: String,
    pub ultimo_numero: u8,
    pub cor: Color,
    /// Predictor score scaled to 0-100.
    pub confianca: u8,
    pub martingale: String,
    pub aposta: u32,
    pub gale_level: u8,
    pub gale_display: String,
    pub estrategia: String,
    pub trace_id: String,
    pub t_server: i64,
    pub bet_advice: BetAdviceWire,
    pub action_reason: String,
}

/// Messages emitted to clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Sugestao {
        data: SugestaoData,
    },
    Ack {
        received: usize,
        message: String,
        t_server: i64,
    },
    Trace {
        trace_id: String,
        steps: Vec<TraceStep>,
        total_ms: u64,
        spin: serde_json::Value,
        result: serde_json::Value,
        performance: serde_json::Value,
        state: serde_json::Value,
    },
    RoleAssigned {
        role: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    RoleChanged {
        role: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    SessaoResetada {
        session_id: String,
        manter_ultimo: bool,
        t_server: i64,
    },
    StateSync {
        data: serde_json::Value,
    },
    State {
        data: serde_json::Value,
    },
    Error {
        code: u16,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
        t_server: i64,
    },
}

impl Outbound {
    pub fn error(code: u16, message: impl Into<String>, trace_id: Option<String>) -> Self {
        Outbound::Error {
            code,
            message: message.into(),
            trace_id,
            t_server: now_ms(),
        }
    }

    pub fn to_json(&self) -> String {
        // The outbound enum contains only serializable primitives.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":500,"message":"serialization failure"}"#.to_string()
        })
    }
}

/// Server wall clock in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
