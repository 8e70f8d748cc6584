//! Aggregate analytics over finished runs.
//!
//! Paused runs are excluded everywhere: they have no final outcome yet.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::types::{Outcome, SimulationRun};

/// Share of runs ending in each outcome. All zero for an empty set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRates {
    #[serde(rename = "PASS")]
    pub pass: f64,
    #[serde(rename = "FAIL")]
    pub fail: f64,
    #[serde(rename = "NEUTRAL")]
    pub neutral: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaRates {
    pub persona_id: String,
    pub rates: OutcomeRates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentedOutcomeRates {
    pub overall: OutcomeRates,
    /// One entry per persona, in order of first appearance.
    pub by_persona: Vec<PersonaRates>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyUsage {
    pub strategy_id: String,
    /// Runs in which the strategy was used at least once.
    pub total_runs: usize,
    pub pass_rate: f64,
    pub fail_rate: f64,
    pub neutral_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub outcome_rates: SegmentedOutcomeRates,
    pub utility_distribution: Vec<f64>,
    pub turns_to_termination: Vec<usize>,
    pub strategy_usage_summary: Vec<StrategyUsage>,
}

fn completed<'a>(runs: impl IntoIterator<Item = &'a SimulationRun>) -> Vec<&'a SimulationRun> {
    runs.into_iter().filter(|run| !run.is_paused()).collect()
}

#[derive(Default)]
struct OutcomeCounts {
    total: usize,
    pass: usize,
    fail: usize,
    neutral: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Pass => self.pass += 1,
            Outcome::Fail => self.fail += 1,
            Outcome::Neutral => self.neutral += 1,
        }
    }

    fn rates(&self) -> OutcomeRates {
        let total = self.total.max(1) as f64;
        OutcomeRates {
            pass: self.pass as f64 / total,
            fail: self.fail as f64 / total,
            neutral: self.neutral as f64 / total,
        }
    }
}

pub fn outcome_rates<'a>(runs: impl IntoIterator<Item = &'a SimulationRun>) -> OutcomeRates {
    let mut counts = OutcomeCounts::default();
    for run in completed(runs) {
        counts.add(run.outcome);
    }
    counts.rates()
}

pub fn segmented_outcome_rates(runs: &[SimulationRun]) -> SegmentedOutcomeRates {
    let runs = completed(runs);
    let mut order: Vec<&str> = Vec::new();
    let mut by_persona: HashMap<&str, OutcomeCounts> = HashMap::new();
    for run in &runs {
        let persona = run.persona_id.as_str();
        by_persona
            .entry(persona)
            .or_insert_with(|| {
                order.push(persona);
                OutcomeCounts::default()
            })
            .add(run.outcome);
    }

    SegmentedOutcomeRates {
        overall: outcome_rates(runs.iter().copied()),
        by_persona: order
            .into_iter()
            .map(|persona_id| PersonaRates {
                persona_id: persona_id.to_string(),
                rates: by_persona
                    .get(persona_id)
                    .map(OutcomeCounts::rates)
                    .unwrap_or_default(),
            })
            .collect(),
    }
}

pub fn utility_distribution(runs: &[SimulationRun]) -> Vec<f64> {
    completed(runs).iter().map(|run| run.user_utility).collect()
}

pub fn turns_to_termination(runs: &[SimulationRun]) -> Vec<usize> {
    completed(runs).iter().map(|run| run.turns.len()).collect()
}

/// Per-strategy outcome rates, most used first (ties by strategy id).
pub fn strategy_usage_summary(runs: &[SimulationRun]) -> Vec<StrategyUsage> {
    let mut stats: HashMap<String, OutcomeCounts> = HashMap::new();
    for run in completed(runs) {
        let used: BTreeSet<&str> = run
            .turns
            .iter()
            .filter_map(|turn| turn.used_strategies.as_ref())
            .flatten()
            .map(String::as_str)
            .collect();
        for strategy_id in used {
            stats
                .entry(strategy_id.to_string())
                .or_default()
                .add(run.outcome);
        }
    }

    let mut summary: Vec<StrategyUsage> = stats
        .into_iter()
        .map(|(strategy_id, counts)| {
            let rates = counts.rates();
            StrategyUsage {
                strategy_id,
                total_runs: counts.total,
                pass_rate: rates.pass,
                fail_rate: rates.fail,
                neutral_rate: rates.neutral,
            }
        })
        .collect();
    summary.sort_by(|a, b| {
        b.total_runs
            .cmp(&a.total_runs)
            .then_with(|| a.strategy_id.cmp(&b.strategy_id))
    });
    summary
}

pub fn compute_insights(runs: &[SimulationRun]) -> Insights {
    Insights {
        outcome_rates: segmented_outcome_rates(runs),
        utility_distribution: utility_distribution(runs),
        turns_to_termination: turns_to_termination(runs),
        strategy_usage_summary: strategy_usage_summary(runs),
    }
}
