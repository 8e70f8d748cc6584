//! Run scheduler: fans a case out into N independent runs.
//!
//! Runs share one session budget and a bounded pool of worker slots. Results
//! come back through a [`RunStream`] in completion order. Dropping the stream,
//! or calling [`RunStream::cancel`], aborts every run still in flight.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{FutureExt, Stream, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{info, warn};
use uuid::Uuid;

use super::budget::QuestionBudget;
use super::case::CaseSnapshot;
use super::config::SimulationConfig;
use super::engine::{RunParams, TurnEngine};
use super::error::{ResumeError, RunFailure};
use super::pause::ResumeRequest;
use super::port::SimulationAgents;
use super::strategy::StrategySuggestionProvider;
use super::types::SimulationResult;
use crate::metrics::MetricsCollector;

/// Item yielded by a [`RunStream`].
pub type RunOutcome = Result<SimulationResult, RunFailure>;

/// Deterministic base seed for a case.
///
/// UUID case ids map to their 128-bit value modulo 2^31; anything else to
/// the first four bytes of its SHA-256 digest.
pub fn base_seed(case_id: &str) -> u64 {
    if let Ok(uuid) = Uuid::parse_str(case_id) {
        return (uuid.as_u128() % (1u128 << 31)) as u64;
    }
    let digest = Sha256::digest(case_id.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as u64
}

/// Parameters for one batch of runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationRequest {
    pub runs: u32,
    pub max_turns: u32,
    pub max_questions: u32,
    /// Session to charge questions to; a new one is minted when absent.
    pub session_id: Option<String>,
}

impl SimulationRequest {
    pub fn from_config(config: &SimulationConfig, runs: u32) -> Self {
        Self {
            runs,
            max_turns: config.max_turns,
            max_questions: config.max_questions,
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Launches runs with bounded concurrency.
pub struct RunScheduler {
    agents: SimulationAgents,
    strategies: Arc<dyn StrategySuggestionProvider>,
    max_parallel_runs: usize,
}

impl RunScheduler {
    pub fn new(
        agents: SimulationAgents,
        strategies: Arc<dyn StrategySuggestionProvider>,
        max_parallel_runs: usize,
    ) -> Self {
        Self {
            agents,
            strategies,
            max_parallel_runs: max_parallel_runs.max(1),
        }
    }

    pub fn max_parallel_runs(&self) -> usize {
        self.max_parallel_runs
    }

    /// Starts `request.runs` runs (at least one) and returns their results
    /// as a stream. Must be called within a tokio runtime.
    pub fn run_stream(&self, case: Arc<CaseSnapshot>, request: SimulationRequest) -> RunStream {
        let total_runs = request.runs.max(1);
        let base = base_seed(&case.case_id);
        let session_id = request
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let budget = Arc::new(QuestionBudget::new(request.max_questions));
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_runs));
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            case_id = %case.case_id,
            session_id = %session_id,
            runs = total_runs,
            max_parallel = self.max_parallel_runs,
            max_turns = request.max_turns,
            max_questions = request.max_questions,
            base_seed = base,
            "Starting simulation runs"
        );

        let mut tasks = JoinSet::new();
        let mut task_runs = HashMap::with_capacity(total_runs as usize);
        let mut run_ids = Vec::with_capacity(total_runs as usize);
        for offset in 0..total_runs {
            let seed = base + offset as u64;
            let run_id = Uuid::new_v4().to_string();
            run_ids.push(run_id.clone());

            let engine = TurnEngine::new(
                Arc::clone(&case),
                self.agents.clone(),
                Arc::clone(&budget),
                RunParams {
                    run_id: run_id.clone(),
                    seed,
                    session_id: session_id.clone(),
                    max_turns: request.max_turns,
                },
                self.strategies.suggestions(seed),
            );

            let handle = tasks.spawn(run_task(
                engine,
                run_id.clone(),
                Arc::clone(&semaphore),
                shutdown_tx.subscribe(),
            ));
            task_runs.insert(handle.id(), run_id);
        }

        RunStream {
            tasks,
            task_runs,
            shutdown_tx,
            session_id,
            run_ids,
            cancelled: false,
        }
    }

    /// Runs everything and collects results in completion order.
    pub async fn run_all(
        &self,
        case: Arc<CaseSnapshot>,
        request: SimulationRequest,
    ) -> Vec<RunOutcome> {
        self.run_stream(case, request).collect().await
    }

    /// Continues a paused run with the caller's view of the session budget.
    pub async fn resume(
        &self,
        case: Arc<CaseSnapshot>,
        request: ResumeRequest,
    ) -> Result<SimulationResult, ResumeError> {
        let engine = TurnEngine::resume(case, self.agents.clone(), request)?;
        Ok(engine.run().await)
    }
}

/// Decrements the in-progress gauge however the run ends.
struct InProgressGuard(MetricsCollector);

impl InProgressGuard {
    fn enter(metrics: MetricsCollector) -> Self {
        metrics.inc_runs_in_progress();
        Self(metrics)
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.0.dec_runs_in_progress();
    }
}

async fn run_task(
    engine: TurnEngine,
    run_id: String,
    semaphore: Arc<Semaphore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> RunOutcome {
    let work = async {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return Err(RunFailure::Cancelled {
                run_id: run_id.clone(),
            });
        };
        let _in_progress = InProgressGuard::enter(MetricsCollector::new());

        AssertUnwindSafe(engine.run())
            .catch_unwind()
            .await
            .map_err(|panic| {
                let message = panic_message(panic.as_ref());
                warn!(run_id = %run_id, error = %message, "Run task panicked");
                RunFailure::Panicked {
                    run_id: run_id.clone(),
                    message,
                }
            })
    };

    tokio::select! {
        biased;
        _ = shutdown_rx.recv() => Err(RunFailure::Cancelled { run_id: run_id.clone() }),
        outcome = work => outcome,
    }
}

fn aborted_failure(run_id: String, join_err: &JoinError) -> RunFailure {
    let reason = if join_err.is_cancelled() {
        "task aborted".to_string()
    } else {
        format!("task panicked: {}", join_err)
    };
    RunFailure::Aborted { run_id, reason }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Results of one batch of runs, in completion order.
pub struct RunStream {
    tasks: JoinSet<RunOutcome>,
    /// Run id of every task not yet joined.
    task_runs: HashMap<Id, String>,
    shutdown_tx: broadcast::Sender<()>,
    session_id: String,
    run_ids: Vec<String>,
    cancelled: bool,
}

impl RunStream {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run ids in submission order.
    pub fn run_ids(&self) -> &[String] {
        &self.run_ids
    }

    /// Runs not yet yielded.
    pub fn remaining(&self) -> usize {
        if self.cancelled {
            0
        } else {
            self.tasks.len()
        }
    }

    /// Stops every outstanding run. Later polls yield `None`.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        let _ = self.shutdown_tx.send(());
        let outstanding = self.tasks.len();
        self.tasks.abort_all();
        if outstanding > 0 {
            info!(
                session_id = %self.session_id,
                outstanding = outstanding,
                "Cancelled outstanding simulation runs"
            );
        }
    }
}

impl Stream for RunStream {
    type Item = RunOutcome;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(None);
        }
        match this.tasks.poll_join_next_with_id(cx) {
            Poll::Ready(Some(Ok((id, outcome)))) => {
                this.task_runs.remove(&id);
                Poll::Ready(Some(outcome))
            }
            // Runs catch their own panics, so this is an abort or a panic
            // raised outside the run's guard.
            Poll::Ready(Some(Err(join_err))) => {
                let run_id = this.task_runs.remove(&join_err.id()).unwrap_or_default();
                warn!(run_id = %run_id, error = %join_err, "Run task ended abnormally");
                Poll::Ready(Some(Err(aborted_failure(run_id, &join_err))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RunStream {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        self.tasks.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_seed_uuid_case_id() {
        let id = "6f1c2f4e-8a5b-4c3d-9e2f-1a2b3c4d5e6f";
        let expected = (Uuid::parse_str(id).expect("uuid").as_u128() % (1u128 << 31)) as u64;
        assert_eq!(base_seed(id), expected);
        assert!(base_seed(id) < (1 << 31));
    }

    #[test]
    fn test_base_seed_plain_case_id_is_stable() {
        let seed = base_seed("salary-negotiation-42");
        assert_eq!(seed, base_seed("salary-negotiation-42"));
        assert_ne!(seed, base_seed("salary-negotiation-43"));
        assert!(seed <= u32::MAX as u64);

        let digest = Sha256::digest(b"salary-negotiation-42");
        let expected = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as u64;
        assert_eq!(seed, expected);
    }

    #[tokio::test]
    async fn test_task_dying_outside_run_guard_is_yielded_as_failure() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks: JoinSet<RunOutcome> = JoinSet::new();
        let mut task_runs = HashMap::new();

        let handle = tasks.spawn(async { panic!("escaped the run guard") });
        task_runs.insert(handle.id(), "run-escaped".to_string());
        let handle = tasks.spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Err(RunFailure::Cancelled {
                run_id: "run-slow".to_string(),
            })
        });
        task_runs.insert(handle.id(), "run-slow".to_string());
        handle.abort();

        let mut stream = RunStream {
            tasks,
            task_runs,
            shutdown_tx,
            session_id: "session".to_string(),
            run_ids: vec!["run-escaped".to_string(), "run-slow".to_string()],
            cancelled: false,
        };

        let mut failures: Vec<RunFailure> = Vec::new();
        while let Some(outcome) = stream.next().await {
            failures.push(outcome.expect_err("both tasks died"));
        }
        failures.sort_by(|a, b| a.run_id().cmp(b.run_id()));

        assert_eq!(failures.len(), 2);
        match &failures[0] {
            RunFailure::Aborted { run_id, reason } => {
                assert_eq!(run_id, "run-escaped");
                assert!(reason.starts_with("task panicked"));
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        assert_eq!(
            failures[1],
            RunFailure::Aborted {
                run_id: "run-slow".to_string(),
                reason: "task aborted".to_string(),
            }
        );
        assert!(stream.task_runs.is_empty());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
