//! CLI command definitions for negot-sim.
//!
//! Drives simulations from case files on disk and prints results as JSON
//! lines, one `SimulationResult` per line.

use crate::agents::{llm_simulation_agents, LlmAgentConfig, PromptRegistry};
use crate::llm::OpenRouterProvider;
use crate::metrics::{export_metrics, init_metrics};
use crate::simulation::{
    compute_insights, CaseSnapshot, ResumeRequest, RunScheduler, SeededStrategySampler,
    SimulationAgents, SimulationConfig, SimulationRequest, SimulationResult, SimulationRun,
    StrategySuggestionProvider,
};
use clap::Parser;
use futures::StreamExt;
use serde_json::Value;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Negotiation simulation orchestrator.
#[derive(Parser)]
#[command(name = "negot-sim")]
#[command(about = "Run multi-turn negotiation simulations against LLM agents")]
#[command(version)]
#[command(
    long_about = "negot-sim plays a negotiation case many times between a user proxy and a counterparty, refereed by a world agent.\n\nExample usage:\n  negot-sim simulate --case case.yaml --runs 10 --max-questions 1 --output runs.jsonl\n  negot-sim insights --results runs.jsonl"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run N simulations of a case and stream results as JSON lines.
    #[command(alias = "sim")]
    Simulate(SimulateArgs),

    /// Answer a paused run's question and continue it.
    Resume(ResumeArgs),

    /// Aggregate outcome rates and strategy usage over stored results.
    Insights(InsightsArgs),
}

/// Model and prompt options shared by commands that call agents.
#[derive(clap::Args, Debug, Clone)]
pub struct AgentArgs {
    /// LLM model used by all agents (overrides NEGOT_MODEL).
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Directory of prompt template overrides (*.md).
    #[arg(long)]
    pub prompts: Option<PathBuf>,

    /// OpenRouter API key (can also be set via OPENROUTER_API_KEY env var).
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

/// Arguments for `negot-sim simulate`.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Case file (.json, .yaml or .yml).
    #[arg(short = 'c', long)]
    pub case: PathBuf,

    /// Number of runs.
    #[arg(short = 'n', long, default_value = "1")]
    pub runs: u32,

    /// Turn limit per run (overrides NEGOT_MAX_TURNS).
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Clarifying questions allowed across the session (overrides NEGOT_MAX_QUESTIONS).
    #[arg(long)]
    pub max_questions: Option<u32>,

    /// Runs in flight at once (overrides NEGOT_MAX_PARALLEL_RUNS).
    #[arg(short = 'p', long)]
    pub max_parallel: Option<usize>,

    /// Session to charge questions to; generated when omitted.
    #[arg(long)]
    pub session_id: Option<String>,

    /// Directory of strategy JSON files to sample suggestions from.
    #[arg(long)]
    pub strategies: Option<PathBuf>,

    /// Stop after this many results and cancel the remaining runs.
    #[arg(long)]
    pub first: Option<usize>,

    /// Write JSON lines here instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Print Prometheus metrics to stderr when done.
    #[arg(long)]
    pub metrics: bool,

    #[command(flatten)]
    pub agent: AgentArgs,
}

/// Arguments for `negot-sim resume`.
#[derive(Parser, Debug)]
pub struct ResumeArgs {
    /// Case file the run was started from.
    #[arg(short = 'c', long)]
    pub case: PathBuf,

    /// File holding the paused SimulationResult as JSON.
    #[arg(short = 'r', long)]
    pub result: PathBuf,

    /// Answer to the pending question. Parsed as JSON when possible.
    #[arg(short = 'a', long)]
    pub answer: String,

    /// Questions already used in the session, including this one.
    #[arg(long)]
    pub budget_used: u32,

    /// Continue with a different turn limit.
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Write the JSON result here instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub agent: AgentArgs,
}

/// Arguments for `negot-sim insights`.
#[derive(Parser, Debug)]
pub struct InsightsArgs {
    /// JSON lines file of results (or bare runs) from `simulate`/`resume`.
    #[arg(short = 'r', long)]
    pub results: PathBuf,
}

/// Parse CLI arguments without running any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Simulate(args) => run_simulate_command(args).await,
        Commands::Resume(args) => run_resume_command(args).await,
        Commands::Insights(args) => run_insights_command(args),
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

fn load_config(agent: &AgentArgs) -> anyhow::Result<SimulationConfig> {
    let mut config = SimulationConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    if let Some(model) = &agent.model {
        config = config.with_model(model.clone());
    }
    Ok(config)
}

fn load_case(path: &Path) -> anyhow::Result<CaseSnapshot> {
    CaseSnapshot::load(path)
        .map_err(|e| anyhow::anyhow!("Failed to load case {}: {}", path.display(), e))
}

fn build_agents(agent: &AgentArgs, config: &SimulationConfig) -> anyhow::Result<SimulationAgents> {
    let api_key = agent
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "OPENROUTER_API_KEY is required but not set.\n\
                 Set the environment variable or pass --api-key."
            )
        })?;

    let prompts = match &agent.prompts {
        Some(dir) => PromptRegistry::load_dir(dir)
            .map_err(|e| anyhow::anyhow!("Failed to load prompts: {}", e))?,
        None => PromptRegistry::builtin(),
    };

    let provider = Arc::new(OpenRouterProvider::with_model(api_key, config.model.clone()));
    info!(
        model = %config.model,
        api_key = %provider.api_key_masked(),
        "Using OpenRouter provider"
    );

    Ok(llm_simulation_agents(
        provider,
        Arc::new(prompts),
        LlmAgentConfig::from_simulation_config(config),
    ))
}

fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = fs::File::create(path).map_err(|e| {
                anyhow::anyhow!("Failed to create output {}: {}", path.display(), e)
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(std::io::stdout()))),
    }
}

/// Parses `--answer` as JSON, falling back to the raw string.
fn parse_answer(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Reads runs from a JSON lines file of results or bare runs.
fn read_runs(path: &Path) -> anyhow::Result<Vec<SimulationRun>> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let mut runs = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(result) = serde_json::from_str::<SimulationResult>(line) {
            runs.push(result.run);
            continue;
        }
        let run: SimulationRun = serde_json::from_str(line).map_err(|e| {
            anyhow::anyhow!("{}:{}: not a result or run: {}", path.display(), line_no + 1, e)
        })?;
        runs.push(run);
    }
    Ok(runs)
}

// ============================================================================
// Commands
// ============================================================================

async fn run_simulate_command(args: SimulateArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args.agent)?;
    if let Some(max_turns) = args.max_turns {
        config = config.with_max_turns(max_turns);
    }
    if let Some(max_questions) = args.max_questions {
        config = config.with_max_questions(max_questions);
    }
    if let Some(max_parallel) = args.max_parallel {
        config = config.with_max_parallel_runs(max_parallel);
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let case = Arc::new(load_case(&args.case)?);
    let agents = build_agents(&args.agent, &config)?;

    let strategies: Arc<dyn StrategySuggestionProvider> = match &args.strategies {
        Some(dir) => Arc::new(
            SeededStrategySampler::load_dir(dir)
                .map_err(|e| anyhow::anyhow!("Failed to load strategies: {}", e))?
                .with_sample_size(config.strategy_sample_size),
        ),
        None => Arc::new(SeededStrategySampler::default()),
    };

    if args.metrics {
        init_metrics().map_err(|e| anyhow::anyhow!("Failed to init metrics: {}", e))?;
    }

    let mut request = SimulationRequest::from_config(&config, args.runs);
    if let Some(session_id) = &args.session_id {
        request = request.with_session_id(session_id.clone());
    }

    let scheduler = RunScheduler::new(agents, strategies, config.max_parallel_runs);
    let mut stream = scheduler.run_stream(Arc::clone(&case), request);
    info!(
        case_id = %case.case_id,
        session_id = %stream.session_id(),
        runs = args.runs,
        "Simulation started"
    );

    let mut out = open_output(args.output.as_deref())?;
    let mut written = 0usize;
    let mut failed = 0usize;
    let mut paused = 0usize;

    while let Some(outcome) = stream.next().await {
        match outcome {
            Ok(result) => {
                if result.run.is_paused() {
                    paused += 1;
                }
                serde_json::to_writer(&mut out, &result)?;
                writeln!(out)?;
                written += 1;
            }
            Err(failure) => {
                warn!(run_id = %failure.run_id(), error = %failure, "Run failed");
                failed += 1;
            }
        }

        if args.first.is_some_and(|k| written >= k) {
            stream.cancel();
            break;
        }
    }
    out.flush()?;

    info!(
        written = written,
        paused = paused,
        failed = failed,
        "Simulation finished"
    );

    if args.metrics {
        eprintln!("{}", export_metrics());
    }
    Ok(())
}

async fn run_resume_command(args: ResumeArgs) -> anyhow::Result<()> {
    let config = load_config(&args.agent)?;
    let case = load_case(&args.case)?;

    let content = fs::read_to_string(&args.result)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.result.display(), e))?;
    let stored: SimulationResult = serde_json::from_str(content.trim())
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", args.result.display(), e))?;

    let question = stored
        .pending_question
        .as_ref()
        .map(|q| q.question.clone())
        .ok_or_else(|| anyhow::anyhow!("Run {} has no pending question", stored.run.run_id))?;

    let mut request = ResumeRequest::from_result(&stored, args.budget_used)
        .map_err(|e| anyhow::anyhow!("Cannot resume: {}", e))?;
    if let Some(max_turns) = args.max_turns {
        request = request
            .with_max_turns(max_turns)
            .map_err(|e| anyhow::anyhow!("Cannot resume: {}", e))?;
    }

    let case = Arc::new(case.with_clarification(question, parse_answer(&args.answer)));
    let agents = build_agents(&args.agent, &config)?;
    let scheduler = RunScheduler::new(
        agents,
        Arc::new(SeededStrategySampler::default()),
        config.max_parallel_runs,
    );

    info!(
        run_id = %request.run_id,
        next_turn_index = request.pause_state.next_turn_index(),
        budget_used = request.budget_used,
        "Resuming run"
    );
    let result = scheduler
        .resume(case, request)
        .await
        .map_err(|e| anyhow::anyhow!("Cannot resume: {}", e))?;

    let mut out = open_output(args.output.as_deref())?;
    serde_json::to_writer(&mut out, &result)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn run_insights_command(args: InsightsArgs) -> anyhow::Result<()> {
    let runs = read_runs(&args.results)?;
    info!(runs = runs.len(), "Computing insights");
    let insights = compute_insights(&runs);
    println!("{}", serde_json::to_string_pretty(&insights)?);
    Ok(())
}
