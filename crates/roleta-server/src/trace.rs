//! Per-message trace context.
//!
//! Each spin message carries (or is assigned) a trace id; the handler
//! marks named steps as the pipeline progresses and the finished trace
//! is broadcast to observer clients for latency debugging.

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub name: &'static str,
    /// Milliseconds since the trace started.
    pub at_ms: u64,
}

#[derive(Debug)]
pub struct TraceContext {
    pub trace_id: String,
    started: Instant,
    steps: Vec<TraceStep>,
}

impl TraceContext {
    /// Start a trace, reusing the client-supplied id when present.
    pub fn new(trace_id: Option<String>) -> Self {
        Self {
            trace_id: trace_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            started: Instant::now(),
            steps: Vec::new(),
        }
    }

    pub fn mark(&mut self, name: &'static str) {
        self.steps.push(TraceStep {
            name,
            at_ms: self.started.elapsed().as_millis() as u64,
        });
    }

    pub fn total_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }
}
