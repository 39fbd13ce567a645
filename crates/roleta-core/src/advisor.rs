//! Triple Rate Advisor.
//!
//! Trend analysis over three hit-rate windows of the target-direction
//! performance history: C4 (newest 4), M6 (newest 6), L12 (newest 12).
//! The advisor can veto a bet the predictor recommended; it never
//! forces one.

use serde::{Deserialize, Serialize};

use crate::timeline::PerformanceHistory;

/// Minimum results required for a meaningful analysis.
const MIN_DATA: usize = 4;

/// Hit rate under which the short window counts as a cold streak.
const COLD_THRESHOLD: f64 = 0.25;

/// Advisor confidence grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Alta,
    Media,
    Baixa,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Confidence::Alta => "alta",
            Confidence::Media => "media",
            Confidence::Baixa => "baixa",
        };
        f.write_str(s)
    }
}

/// Result of one advisor pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetAdvice {
    pub should_bet: bool,
    pub confidence: Confidence,
    pub reason: String,
    pub c4_rate: f64,
    pub m6_rate: f64,
    pub l12_rate: f64,
}

/// Stateless trend analyzer over a performance history.
#[derive(Debug, Default, Clone, Copy)]
pub struct TripleRateAdvisor;

impl TripleRateAdvisor {
    pub fn new() -> Self {
        Self
    }

    /// Analyze the newest-first performance history of the target
    /// direction and recommend bet or skip.
    pub fn analyze(&self, history: &PerformanceHistory) -> BetAdvice {
        if history.len() < MIN_DATA {
            return BetAdvice {
                should_bet: true,
                confidence: Confidence::Baixa,
                reason: "dados insuficientes para analise".to_string(),
                c4_rate: 0.0,
                m6_rate: 0.0,
                l12_rate: 0.0,
            };
        }

        let c4 = history.rate(4);
        let m6 = history.rate(6);
        let l12 = history.rate(12);

        if c4 < COLD_THRESHOLD {
            return BetAdvice {
                should_bet: false,
                confidence: Confidence::Baixa,
                reason: format!("cold streak ({:.0}% taxa muito baixa)", c4 * 100.0),
                c4_rate: c4,
                m6_rate: m6,
                l12_rate: l12,
            };
        }

        if c4 >= m6 && m6 >= l12 && c4 > 0.0 {
            BetAdvice {
                should_bet: true,
                confidence: Confidence::Alta,
                reason: format!(
                    "crescente ({:.0}% >= {:.0}% >= {:.0}%)",
                    c4 * 100.0,
                    m6 * 100.0,
                    l12 * 100.0
                ),
                c4_rate: c4,
                m6_rate: m6,
                l12_rate: l12,
            }
        } else if c4 >= m6 {
            BetAdvice {
                should_bet: true,
                confidence: Confidence::Media,
                reason: format!("estavel ({:.0}% >= {:.0}%)", c4 * 100.0, m6 * 100.0),
                c4_rate: c4,
                m6_rate: m6,
                l12_rate: l12,
            }
        } else {
            BetAdvice {
                should_bet: false,
                confidence: Confidence::Baixa,
                reason: format!("decrescente ({:.0}% < {:.0}%)", c4 * 100.0, m6 * 100.0),
                c4_rate: c4,
                m6_rate: m6,
                l12_rate: l12,
            }
        }
    }
}
