//! Prometheus metrics registration and export.
//!
//! Metrics live in process-wide `OnceLock` statics. Until [`init_metrics`]
//! has run, every recording call is a no-op.

use prometheus::{CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all negot-sim metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Finished runs, labeled by status (COMPLETED/PAUSED) and outcome.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Clarifying questions successfully reserved from a session budget.
pub static QUESTIONS_RESERVED_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Agent invocations, labeled by agent name and validation status.
pub static AGENT_CALLS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock duration of one engine invocation.
pub static RUN_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Runs currently holding a worker slot.
pub static RUNS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless: later calls build a fresh
/// registry but the statics keep the first one.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let runs_total = CounterVec::new(
        Opts::new("negot_runs_total", "Total number of simulation runs finished"),
        &["status", "outcome"],
    )?;

    let questions_reserved = IntCounter::new(
        "negot_questions_reserved_total",
        "Clarifying questions reserved from session budgets",
    )?;

    let agent_calls_total = CounterVec::new(
        Opts::new("negot_agent_calls_total", "Total agent invocations"),
        &["agent", "status"],
    )?;

    let run_duration = Histogram::with_opts(
        HistogramOpts::new(
            "negot_run_duration_seconds",
            "Simulation run duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
    )?;

    let runs_in_progress = Gauge::new(
        "negot_runs_in_progress",
        "Number of runs currently executing",
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(questions_reserved.clone()))?;
    registry.register(Box::new(agent_calls_total.clone()))?;
    registry.register(Box::new(run_duration.clone()))?;
    registry.register(Box::new(runs_in_progress.clone()))?;

    // Already-set statics mean an earlier init won; keep it.
    let _ = REGISTRY.set(registry);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = QUESTIONS_RESERVED_TOTAL.set(questions_reserved);
    let _ = AGENT_CALLS_TOTAL.set(agent_calls_total);
    let _ = RUN_DURATION.set(run_duration);
    let _ = RUNS_IN_PROGRESS.set(runs_in_progress);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        let _ = init_metrics();
        if let Some(counter) = QUESTIONS_RESERVED_TOTAL.get() {
            counter.inc();
        }
        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("negot_questions_reserved_total"));
    }
}
