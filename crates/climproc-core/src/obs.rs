//! Run lifecycle events.
//!
//! Every pipeline run is wrapped in a `climproc.run` span tagged with the
//! run id; the emitters below log the milestones inside it.

use tracing::{info, warn, Span};

use crate::runner::ToolStatus;
use crate::state::Stage;

/// Span owner for one run.
///
/// Synchronous callers hold the guard from [`RunSpan::enter`]; async code
/// instruments its future with [`RunSpan::span`] instead, since an entered
/// span must not be held across an await point.
pub struct RunSpan {
    span: Span,
}

impl RunSpan {
    pub fn new(run_id: &str, diagnostic: &str) -> Self {
        Self {
            span: tracing::info_span!("climproc.run", run_id = %run_id, diagnostic = %diagnostic),
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn enter(self) -> tracing::span::EnteredSpan {
        self.span.entered()
    }
}

pub fn emit_run_started(run_id: &str, diagnostic: &str) {
    info!(event = "run.started", run_id = %run_id, diagnostic = %diagnostic);
}

pub fn emit_stage_entered(run_id: &str, stage: Stage) {
    info!(event = "run.stage_entered", run_id = %run_id, stage = %stage);
}

/// Logs at `warn!` unless the tool succeeded.
pub fn emit_tool_finished(run_id: &str, status: &ToolStatus, duration_ms: u64) {
    if status.is_success() {
        info!(event = "tool.finished", run_id = %run_id, status = %status, duration_ms);
    } else {
        warn!(event = "tool.finished", run_id = %run_id, status = %status, duration_ms);
    }
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, output: &str) {
    info!(event = "run.finished", run_id = %run_id, duration_ms, output = %output);
}

pub fn emit_run_failed(run_id: &str, stage: Stage, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, stage = %stage, error = %error);
}
