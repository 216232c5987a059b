//! PoolLab CLI: supervised portfolio backtests over a position pool.
//!
//! Commands:
//! - `smart`: evaluate every unit, search every subset in a size range, rank
//! - `specified`: evaluate every unit and compose the whole pool once
//! - `simple`: one-line instruction, e.g. `组合回测 多RB,空I,多CU-NI 3年 2-3`
//! - `replay`: push the fallback journal to the configured ledger
//!
//! Exit code: 0 completed, 2 halted, 1 failed.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use poollab_core::data::{
    CircuitBreaker, HttpPriceSource, ParquetPriceSource, PriceSource, SyntheticPriceSource,
};
use poollab_core::domain::{ComboRange, TaskRequest};
use poollab_core::skills::{ComposerRegistry, HistoryCoverage, ThresholdStrategy};
use poollab_runner::{
    init_logging, parse_instruction, CsvReportGenerator, EventSink, FallbackJournal, HttpLedger,
    Ledger, LedgerRecorder, LogFormat, MemoryLedger, Operator, Orchestrator, PolicyOperator,
    PoolLabConfig, PromptOperator, SearchEngine, SearchSettings, TaskOutcome,
};

/// Subset sizes searched when `smart` gets no `--combo-range`.
const DEFAULT_COMBO_RANGE: (usize, usize) = (3, 5);

#[derive(Parser)]
#[command(
    name = "poollab",
    about = "PoolLab CLI: supervised backtests and portfolio search over a position pool"
)]
struct Cli {
    #[command(flatten)]
    flags: GlobalFlags,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalFlags {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Read prices from Parquet files in this directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use synthetic prices (no network, no files).
    #[arg(long, global = true, default_value_t = false)]
    synthetic: bool,

    /// Record to an in-memory ledger instead of the remote one.
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,

    /// Resolve escalations with `app.on_escalate` instead of prompting.
    #[arg(long, global = true, default_value_t = false)]
    non_interactive: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search every subset of the pool within a size range and rank them.
    Smart {
        /// Comma-separated positions, e.g. 多RB,空I,多CU-NI.
        #[arg(long, value_delimiter = ',', required = true)]
        positions: Vec<String>,

        /// Comma-separated periods.
        #[arg(long, value_delimiter = ',', default_value = "3y,5y,10y")]
        periods: Vec<String>,

        /// Subset size range a-b. Defaults to 3-5, clamped to the pool size.
        #[arg(long)]
        combo_range: Option<ComboRange>,

        /// Comma-separated portfolio models.
        #[arg(long, value_delimiter = ',', default_value = "mean_variance,equal_weight")]
        portfolio_models: Vec<String>,

        /// Portfolios kept per period.
        #[arg(long, default_value_t = 10)]
        top_n: usize,

        /// Parameter candidates per (unit, period). Defaults to `app.strategy_max_evals`.
        #[arg(long)]
        strategy_max_evals: Option<usize>,
    },
    /// Compose the whole pool once per period with one model.
    Specified {
        /// Comma-separated positions, e.g. 多AU,空AG.
        #[arg(long, value_delimiter = ',', required = true)]
        positions: Vec<String>,

        /// Look-back period, e.g. 5y.
        #[arg(long)]
        period: String,

        /// Portfolio model.
        #[arg(long, default_value = "mean_variance")]
        portfolio_model: String,

        /// Parameter candidates per unit. Defaults to `app.strategy_max_evals`.
        #[arg(long)]
        strategy_max_evals: Option<usize>,
    },
    /// Run a one-line instruction, e.g. "回测 多RB,多CU-NI 3年,5年 2000次".
    Simple {
        #[arg(required = true)]
        instruction: Vec<String>,
    },
    /// Replay the fallback journal against the configured ledger.
    Replay,
}

fn main() -> Result<()> {
    let Cli { flags, command } = Cli::parse();

    let mut config = PoolLabConfig::load(flags.config.as_deref())?;
    if flags.non_interactive {
        config.app.non_interactive = true;
    }
    init_logging(&config.app.log_level, LogFormat::from_name(&config.app.log_format));
    tracing::debug!(settings = %config.snapshot(), "configuration loaded");

    let default_evals = config.app.strategy_max_evals;
    let request = match command {
        Commands::Smart {
            positions,
            periods,
            combo_range,
            portfolio_models,
            top_n,
            strategy_max_evals,
        } => {
            let range = match combo_range {
                Some(range) => range,
                None => default_combo_range(positions.len())?,
            };
            TaskRequest::smart(positions, periods, range, portfolio_models, top_n)
                .with_max_evals(strategy_max_evals.unwrap_or(default_evals))
        }
        Commands::Specified {
            positions,
            period,
            portfolio_model,
            strategy_max_evals,
        } => TaskRequest::specified(positions, period, portfolio_model)
            .with_max_evals(strategy_max_evals.unwrap_or(default_evals)),
        Commands::Simple { instruction } => {
            let text = instruction.join(" ");
            let parsed = parse_instruction(&text)?;
            println!(
                "Instruction: {} position(s), periods {}",
                parsed.positions.len(),
                parsed.periods.join(",")
            );
            parsed.into_request(default_evals)
        }
        Commands::Replay => return run_replay(&flags, &config),
    };

    let code = run_task(&flags, &config, &request)?;
    std::process::exit(code);
}

/// `3-5`, with both bounds clamped to `1..=pool_size`.
fn default_combo_range(pool_size: usize) -> Result<ComboRange> {
    let (min, max) = DEFAULT_COMBO_RANGE;
    let clamp = |k: usize| k.min(pool_size).max(1);
    Ok(ComboRange::new(clamp(min), clamp(max))?)
}

fn run_task(flags: &GlobalFlags, config: &PoolLabConfig, request: &TaskRequest) -> Result<i32> {
    let prices = price_source(flags, config)?;
    let ledger = ledger(flags, config)?;
    let journal = Arc::new(FallbackJournal::new(config.journal_path()));

    let recorder: Arc<dyn EventSink> = Arc::new(
        LedgerRecorder::spawn(
            Arc::clone(&ledger),
            Arc::clone(&journal),
            Duration::from_secs(config.app.breaker_cooldown_secs),
        )
        .context("failed to start event recorder")?,
    );

    let operator: Arc<dyn Operator> = if config.app.non_interactive {
        Arc::new(PolicyOperator::new(config.app.on_escalate))
    } else {
        Arc::new(PromptOperator::stdio())
    };

    let coverage = Arc::new(HistoryCoverage::new(Arc::clone(&prices)));
    let engine = SearchEngine::new(
        Arc::new(ThresholdStrategy::new(prices)),
        ComposerRegistry::with_defaults(),
        SearchSettings {
            max_combinations: config.app.max_combinations,
            concurrency: config.effective_concurrency(),
        },
    )?;

    let orchestrator = Orchestrator::new(
        engine,
        ledger,
        recorder,
        Arc::new(CsvReportGenerator::new(&config.app.output_dir)),
    )
    .with_operator(operator)
    .with_data_validator(coverage)
    .with_journal(Arc::clone(&journal))
    .with_config(config);

    let outcome = orchestrator.run(request);
    // joins the recorder thread once the last handle goes
    drop(orchestrator);

    print_summary(&outcome);
    if !journal.is_empty().unwrap_or(false) {
        println!(
            "NOTE: ledger writes pending in {}; run `poollab replay` once the ledger is reachable",
            journal.path().display()
        );
    }
    Ok(outcome.exit_code())
}

fn run_replay(flags: &GlobalFlags, config: &PoolLabConfig) -> Result<()> {
    if flags.dry_run {
        bail!("replay needs a real ledger; drop --dry-run");
    }
    let ledger = ledger(flags, config)?;
    let journal = FallbackJournal::new(config.journal_path());
    let pending = journal.len()?;
    if pending == 0 {
        println!("Nothing to replay: {}", journal.path().display());
        return Ok(());
    }

    let summary = journal.replay(ledger.as_ref())?;
    println!("Replayed {} ({pending} entries)", journal.path().display());
    println!("  applied: {}", summary.applied);
    println!("  kept:    {}", summary.kept);
    println!("  dropped: {}", summary.dropped);
    if summary.kept > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn price_source(flags: &GlobalFlags, config: &PoolLabConfig) -> Result<Arc<dyn PriceSource>> {
    if flags.synthetic {
        let today = chrono::Local::now().date_naive();
        return Ok(Arc::new(SyntheticPriceSource::with_end_date(today)));
    }
    if let Some(dir) = &flags.data_dir {
        if !dir.is_dir() {
            bail!("data directory does not exist: {}", dir.display());
        }
        return Ok(Arc::new(ParquetPriceSource::new(dir)));
    }
    let Some(url) = &config.ledger.read_url else {
        bail!("no price source: pass --data-dir or --synthetic, or set ledger.read_url");
    };
    let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(
        config.app.breaker_cooldown_secs,
    )));
    let source = HttpPriceSource::new(
        url.as_str(),
        Duration::from_secs(config.ledger.timeout_secs),
        breaker,
    )?
    .with_token(config.ledger.token.clone());
    Ok(Arc::new(source))
}

fn ledger(flags: &GlobalFlags, config: &PoolLabConfig) -> Result<Arc<dyn Ledger>> {
    match (&config.ledger.write_url, flags.dry_run) {
        (Some(url), false) => {
            let ledger = HttpLedger::new(
                url.as_str(),
                Duration::from_secs(config.ledger.timeout_secs),
            )?
            .with_token(config.ledger.token.clone());
            tracing::info!(url = ledger.base_url(), "recording to remote ledger");
            Ok(Arc::new(ledger))
        }
        (_, dry_run) => {
            if !dry_run {
                tracing::warn!("ledger.write_url is not set; results are kept in memory only");
            }
            Ok(Arc::new(MemoryLedger::new()))
        }
    }
}

fn print_summary(outcome: &TaskOutcome) {
    let task = &outcome.task;
    println!();
    println!("=== PoolLab Task ===");
    println!("Task:        {}", task.task_id);
    println!("Mode:        {}", task.mode);
    println!("Status:      {}", task.status);
    if let Some(message) = &task.error_message {
        println!("Reason:      {message}");
    }
    println!(
        "Evaluations: {} attempted, {} succeeded, {} skipped",
        outcome.stats.evaluations_attempted,
        outcome.stats.evaluations_succeeded,
        outcome.stats.evaluations_skipped
    );
    println!("Results:     {}", outcome.results.len());
    if let Some(path) = &outcome.report_path {
        println!("Report:      {}", path.display());
    }

    let mut portfolios: Vec<_> = outcome.portfolio_results().collect();
    if portfolios.is_empty() {
        println!();
        return;
    }
    portfolios.sort_by(|a, b| {
        a.period
            .cmp(&b.period)
            .then(a.rank.unwrap_or(usize::MAX).cmp(&b.rank.unwrap_or(usize::MAX)))
    });

    println!();
    println!(
        "{:<5} {:<6} {:<14} {:>8} {:>9}  {}",
        "Rank", "Period", "Model", "Sharpe", "MaxDD", "Portfolio"
    );
    println!("{}", "-".repeat(72));
    for r in portfolios {
        let weights = r
            .portfolio_positions
            .iter()
            .flatten()
            .zip(r.weights())
            .map(|(name, w)| format!("{name}({w:+.2})"))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:<5} {:<6} {:<14} {:>8.3} {:>8.2}%  {}",
            r.rank.map(|k| k.to_string()).unwrap_or_else(|| "-".into()),
            r.period,
            r.portfolio_model.as_deref().unwrap_or(""),
            r.metrics.sharpe_ratio,
            r.metrics.max_drawdown * 100.0,
            weights
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use poollab_core::skills::{EqualWeight, MeanVariance};

    #[test]
    fn smart_flags_parse() {
        let cli = Cli::try_parse_from([
            "poollab",
            "--synthetic",
            "smart",
            "--positions",
            "多RB,空I,多CU-NI",
            "--combo-range",
            "2-3",
        ])
        .unwrap();
        assert!(cli.flags.synthetic);
        match cli.command {
            Commands::Smart {
                positions,
                periods,
                combo_range,
                portfolio_models,
                top_n,
                ..
            } => {
                assert_eq!(positions, vec!["多RB", "空I", "多CU-NI"]);
                assert_eq!(periods, vec!["3y", "5y", "10y"]);
                assert_eq!(combo_range, Some(ComboRange::new(2, 3).unwrap()));
                assert_eq!(
                    portfolio_models,
                    vec![MeanVariance::MODEL.to_string(), EqualWeight::MODEL.to_string()]
                );
                assert_eq!(top_n, 10);
            }
            _ => panic!("expected smart"),
        }
    }

    #[test]
    fn smart_without_combo_range_searches_three_to_five() {
        let cli = Cli::try_parse_from(["poollab", "smart", "--positions", "多RB,空I"]).unwrap();
        match cli.command {
            Commands::Smart { combo_range, .. } => assert_eq!(combo_range, None),
            _ => panic!("expected smart"),
        }
        assert_eq!(default_combo_range(20).unwrap(), ComboRange::new(3, 5).unwrap());
        assert_eq!(default_combo_range(4).unwrap(), ComboRange::new(3, 4).unwrap());
        assert_eq!(default_combo_range(2).unwrap(), ComboRange::new(2, 2).unwrap());
        assert_eq!(default_combo_range(1).unwrap(), ComboRange::new(1, 1).unwrap());
    }

    #[test]
    fn specified_requires_period() {
        assert!(Cli::try_parse_from(["poollab", "specified", "--positions", "多AU"]).is_err());
        let cli = Cli::try_parse_from([
            "poollab",
            "specified",
            "--positions",
            "多AU,空AG",
            "--period",
            "5y",
            "--portfolio-model",
            "equal_weight",
            "--dry-run",
        ])
        .unwrap();
        assert!(cli.flags.dry_run);
    }

    #[test]
    fn simple_joins_words() {
        let cli = Cli::try_parse_from(["poollab", "simple", "回测", "多RB", "3年"]).unwrap();
        match cli.command {
            Commands::Simple { instruction } => assert_eq!(instruction.join(" "), "回测 多RB 3年"),
            _ => panic!("expected simple"),
        }
    }

    #[test]
    fn bad_combo_range_is_rejected_by_clap() {
        assert!(Cli::try_parse_from([
            "poollab",
            "smart",
            "--positions",
            "多RB",
            "--combo-range",
            "3-1",
        ])
        .is_err());
    }
}
