//! Strategy suggestions shown to agents as hint text.
//!
//! A run draws its suggestions once, from its seed, and keeps them for its
//! whole life (including across a pause).

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

/// Default number of suggestions drawn per run.
pub const DEFAULT_SAMPLE_SIZE: usize = 4;

/// Summary of one strategy as shown to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySuggestion {
    pub strategy_id: String,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Strategy directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to walk strategy directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid strategy file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of per-run strategy suggestions.
pub trait StrategySuggestionProvider: Send + Sync {
    /// Same seed, same suggestions.
    fn suggestions(&self, seed: u64) -> Vec<StrategySuggestion>;
}

/// Samples a fixed-size subset of a strategy pool with a seeded RNG.
#[derive(Debug, Clone, Default)]
pub struct SeededStrategySampler {
    pool: Vec<StrategySuggestion>,
    sample_size: usize,
}

impl SeededStrategySampler {
    pub fn new(pool: Vec<StrategySuggestion>) -> Self {
        Self {
            pool,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Loads every `*.json` file directly inside `dir`, in file-name order.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, StrategyError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(StrategyError::DirectoryNotFound(dir.to_path_buf()));
        }

        let mut pool = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let content = std::fs::read_to_string(path).map_err(|source| StrategyError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let strategy: StrategySuggestion =
                serde_json::from_str(&content).map_err(|source| StrategyError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            pool.push(strategy);
        }

        tracing::debug!(dir = %dir.display(), strategies = pool.len(), "Loaded strategy pool");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &[StrategySuggestion] {
        &self.pool
    }
}

impl StrategySuggestionProvider for SeededStrategySampler {
    fn suggestions(&self, seed: u64) -> Vec<StrategySuggestion> {
        if self.pool.is_empty() || self.sample_size == 0 {
            return Vec::new();
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut indices: Vec<usize> = (0..self.pool.len()).collect();
        indices.shuffle(&mut rng);
        indices.truncate(self.sample_size.min(self.pool.len()));

        indices.into_iter().map(|i| self.pool[i].clone()).collect()
    }
}

/// One bullet per suggestion, or `None` when there are none.
pub fn suggestions_text(suggestions: &[StrategySuggestion]) -> String {
    if suggestions.is_empty() {
        return "None".to_string();
    }

    suggestions
        .iter()
        .map(|s| {
            let mut line = format!("- {}: {}. {}", s.strategy_id, s.name, s.summary)
                .trim()
                .to_string();
            if let Some(category) = s.category.as_deref().filter(|c| !c.is_empty()) {
                line.push_str(&format!(" Category: {}.", category));
            }
            if let Some(goal) = s.goal.as_deref().filter(|g| !g.is_empty()) {
                line.push_str(&format!(" Goal: {}.", goal));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
