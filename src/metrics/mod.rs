//! Prometheus metrics for simulation runs.
//!
//! ```ignore
//! use negot_sim::metrics::{export_metrics, init_metrics};
//!
//! init_metrics()?;
//! // ... run simulations ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{
    export_metrics, init_metrics, AGENT_CALLS_TOTAL, QUESTIONS_RESERVED_TOTAL, REGISTRY,
    RUNS_IN_PROGRESS, RUNS_TOTAL, RUN_DURATION,
};
