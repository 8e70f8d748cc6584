//! Recording helpers over the raw Prometheus statics.

use super::prometheus::{
    AGENT_CALLS_TOTAL, QUESTIONS_RESERVED_TOTAL, RUNS_IN_PROGRESS, RUNS_TOTAL, RUN_DURATION,
};
use crate::simulation::port::AgentCallTrace;
use crate::simulation::types::SimulationRun;

/// Stateless handle used by the engine and scheduler to record metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Records a finished (completed or paused) run.
    pub fn record_run(&self, run: &SimulationRun, duration_secs: f64) {
        let status = run.status.as_str();
        let outcome = run.outcome.as_str();

        if let Some(runs_total) = RUNS_TOTAL.get() {
            runs_total.with_label_values(&[status, outcome]).inc();
        }

        if let Some(run_duration) = RUN_DURATION.get() {
            run_duration.observe(duration_secs);
        }

        tracing::trace!(
            status = status,
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded run metric"
        );
    }

    pub fn record_question_reserved(&self) {
        if let Some(questions) = QUESTIONS_RESERVED_TOTAL.get() {
            questions.inc();
        }
    }

    pub fn record_agent_call(&self, trace: &AgentCallTrace) {
        let status = if trace.is_fail() { "FAIL" } else { "PASS" };
        if let Some(agent_calls) = AGENT_CALLS_TOTAL.get() {
            agent_calls
                .with_label_values(&[trace.agent_name.as_str(), status])
                .inc();
        }
    }

    pub fn inc_runs_in_progress(&self) {
        if let Some(in_progress) = RUNS_IN_PROGRESS.get() {
            in_progress.inc();
        }
    }

    pub fn dec_runs_in_progress(&self) {
        if let Some(in_progress) = RUNS_IN_PROGRESS.get() {
            in_progress.dec();
        }
    }
}
