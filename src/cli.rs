//! CLI definition and dispatch.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::jsonl_sink_adapter::JsonlSink;
use crate::domain::backtest::{HistoricalReplay, run_backtest};
use crate::domain::bar::PriceSource;
use crate::domain::config_validation::{data_directory, load_engine_config, output_settings};
use crate::domain::context::Context;
use crate::domain::decision::TradeDecision;
use crate::domain::error::{AppError, DslError};
use crate::domain::indicator::{Frame, IndicatorKind, IndicatorType};
use crate::domain::instruction::IndicatorParams;
use crate::domain::interpreter::{EngineConfig, Interpreter};
use crate::domain::strategy::Strategy;
use crate::domain::strategy_parser::parse_strategy_document;
use crate::ports::config_port::ConfigPort;
use crate::ports::decision_port::DecisionSink;
use crate::ports::market_data_port::{MarketDataProvider, ProviderError};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(
    name = "tradelang",
    version,
    about = "Trading strategy DSL: validate, backtest and run strategies"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse and statically check a strategy document
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
    },
    /// Replay CSV history through a strategy
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: PathBuf,
        /// Decision log (JSON lines); stdout if neither this nor [output] path is set
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        interval: Option<String>,
    },
    /// Run a strategy against live Binance klines
    Live {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
        /// Seconds between ticks
        #[arg(long, default_value_t = 60)]
        poll_secs: u64,
    },
    /// Print bars from CSV with indicator columns attached
    Indicators {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        interval: String,
        /// `name[:arg,...]`, e.g. `rsi:14`, `macd:12,26,9`, `bollinger:20,2`, `vwap:session`
        #[arg(short = 'i', long = "indicator", required = true)]
        indicators: Vec<String>,
        /// Price column the indicators read
        #[arg(long, default_value = "close")]
        source: String,
        /// Only print the last N rows
        #[arg(long)]
        tail: Option<usize>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Validate { strategy } => run_validate(&strategy),
        Command::Backtest {
            config,
            strategy,
            output,
            symbol,
            interval,
        } => run_backtest_command(
            &config,
            &strategy,
            output.as_deref(),
            symbol.as_deref(),
            interval.as_deref(),
        ),
        Command::Live {
            config,
            strategy,
            output,
            ticks,
            poll_secs,
        } => run_live(&config, &strategy, output.as_deref(), ticks, poll_secs),
        Command::Indicators {
            config,
            symbol,
            interval,
            indicators,
            source,
            tail,
        } => run_indicators(&config, &symbol, &interval, &indicators, &source, tail),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, AppError> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path)
}

/// Read, parse and validate a strategy document.
pub fn load_strategy(path: &Path) -> Result<Strategy, AppError> {
    eprintln!("Loading strategy from {}", path.display());
    let source = fs::read_to_string(path)?;
    let strategy = parse_strategy_document(&source)?;
    let report = strategy.validate();
    if !report.is_empty() {
        for issue in report.issues() {
            eprintln!("  {}", issue);
        }
        return Err(DslError::Validation(report).into());
    }
    Ok(strategy)
}

fn run_validate(strategy_path: &Path) -> Result<(), AppError> {
    let strategy = load_strategy(strategy_path)?;
    eprintln!(
        "Strategy '{}' is valid ({} instructions)",
        strategy.name,
        strategy.definition.node_count()
    );
    if !strategy.description.is_empty() {
        eprintln!("  {}", strategy.description);
    }
    Ok(())
}

/// Engine settings from config and strategy metadata, with CLI overrides.
pub fn resolve_engine_config(
    config: &dyn ConfigPort,
    strategy: &Strategy,
    symbol_override: Option<&str>,
    interval_override: Option<&str>,
) -> Result<EngineConfig, AppError> {
    let mut overridden = strategy.clone();
    if let Some(symbol) = symbol_override {
        overridden.symbol = Some(symbol.to_string());
    }
    if let Some(interval) = interval_override {
        overridden.interval = Some(interval.to_string());
    }
    let mut engine = load_engine_config(config, &overridden)?;
    if let Some(symbol) = symbol_override {
        engine.symbol = symbol.to_string();
    }
    if let Some(interval) = interval_override {
        engine.interval = interval.to_string();
    }
    Ok(engine)
}

/// Decision sink: CLI path, then `[output] path`, then stdout.
pub fn open_sink(config: &dyn ConfigPort, cli_path: Option<&Path>) -> Result<JsonlSink, AppError> {
    let settings = output_settings(config);
    match cli_path.map(Path::to_path_buf).or(settings.path) {
        Some(path) => {
            eprintln!("Writing decisions to {}", path.display());
            Ok(JsonlSink::open(path, settings.append)?)
        }
        None => Ok(JsonlSink::stdout()),
    }
}

fn data_error(e: ProviderError) -> AppError {
    AppError::Data {
        reason: e.to_string(),
    }
}

fn run_backtest_command(
    config_path: &Path,
    strategy_path: &Path,
    output: Option<&Path>,
    symbol: Option<&str>,
    interval: Option<&str>,
) -> Result<(), AppError> {
    let adapter = load_config(config_path)?;
    let strategy = load_strategy(strategy_path)?;
    let engine = resolve_engine_config(&adapter, &strategy, symbol, interval)?;

    let csv = CsvAdapter::new(data_directory(&adapter)?);
    let bars = csv
        .load_all(&engine.symbol, &engine.interval)
        .map_err(data_error)?;
    if bars.is_empty() {
        return Err(AppError::Data {
            reason: format!("no bars for {} {}", engine.symbol, engine.interval),
        });
    }
    eprintln!(
        "Replaying {} bars of {} {} through '{}'",
        bars.len(),
        engine.symbol,
        engine.interval,
        strategy.name
    );

    let replay = HistoricalReplay::new(engine.symbol.clone(), engine.interval.clone(), bars);
    let interpreter = Interpreter::new(engine);
    let report = run_backtest(&interpreter, &strategy.definition, &replay);

    let mut sink = open_sink(&adapter, output)?;
    record_all(&mut sink, &report.decisions)?;

    eprintln!("\n=== Backtest Summary ===");
    eprintln!("Ticks:            {}", report.ticks);
    eprintln!("Decisions:        {}", report.decisions.len());
    eprintln!("Failed ticks:     {}", report.failures.len());
    if let Some(first) = report.failures.first() {
        eprintln!("First failure:    {} ({})", first.error, first.timestamp);
    }
    if report.ended_paused {
        eprintln!("Strategy was waiting when the history ended");
    }
    Ok(())
}

fn record_all(sink: &mut dyn DecisionSink, decisions: &[TradeDecision]) -> Result<(), AppError> {
    for decision in decisions {
        sink.record(decision)?;
    }
    sink.flush()
}

/// Drive the interpreter against `provider`, polling up to `ticks` times.
///
/// A poll only runs the strategy when the provider has a bar newer than the
/// last one processed.
pub fn run_ticks(
    interpreter: &Interpreter,
    strategy: &Strategy,
    provider: &dyn MarketDataProvider,
    sink: &mut dyn DecisionSink,
    ticks: Option<u64>,
    pause: impl Fn(),
) -> Result<u64, AppError> {
    let config = interpreter.config();
    let mut ctx = Context::new();
    let mut last_seen: Option<DateTime<Utc>> = None;
    let mut done = 0u64;
    while ticks.is_none_or(|limit| done < limit) {
        if done > 0 {
            pause();
        }
        done += 1;

        let latest = match provider.get_bars(&config.symbol, &config.interval, 1) {
            Ok(bars) => bars.last().map(|b| b.timestamp),
            Err(e) => {
                warn!(tick = done, error = %e, "tick failed");
                continue;
            }
        };
        if latest.is_some_and(|t| last_seen.is_some_and(|prev| t <= prev)) {
            debug!(tick = done, "no new bar");
            continue;
        }
        last_seen = latest.or(last_seen);

        match interpreter.run(&strategy.definition, &mut ctx, provider) {
            Ok(outcome) => record_all(sink, &outcome.decisions)?,
            Err(e) => warn!(tick = done, error = %e, "tick failed"),
        }
    }
    Ok(done)
}

#[cfg(feature = "binance")]
fn run_live(
    config_path: &Path,
    strategy_path: &Path,
    output: Option<&Path>,
    ticks: Option<u64>,
    poll_secs: u64,
) -> Result<(), AppError> {
    use crate::adapters::binance_adapter::BinanceAdapter;
    use crate::domain::config_validation::binance_settings;

    let adapter = load_config(config_path)?;
    let strategy = load_strategy(strategy_path)?;
    let engine = resolve_engine_config(&adapter, &strategy, None, None)?;
    let provider = BinanceAdapter::new(&binance_settings(&adapter)?).map_err(data_error)?;
    let mut sink = open_sink(&adapter, output)?;

    eprintln!(
        "Running '{}' on {} {} every {}s",
        strategy.name, engine.symbol, engine.interval, poll_secs
    );
    let interpreter = Interpreter::new(engine);
    let pause = || std::thread::sleep(std::time::Duration::from_secs(poll_secs));
    let done = run_ticks(&interpreter, &strategy, &provider, &mut sink, ticks, pause)?;
    eprintln!("Stopped after {} ticks", done);
    Ok(())
}

#[cfg(not(feature = "binance"))]
fn run_live(
    _config_path: &Path,
    _strategy_path: &Path,
    _output: Option<&Path>,
    _ticks: Option<u64>,
    _poll_secs: u64,
) -> Result<(), AppError> {
    Err(AppError::Data {
        reason: "binance feature is required for live".to_string(),
    })
}

/// Parse `name[:arg,...]` into an indicator type.
///
/// Positional arguments map to `period` (ATR, EMA, RSI), `fast,slow,signal`
/// (MACD), `period,multiplier` (Bollinger) and `mode` or `window` (VWAP).
pub fn parse_indicator_spec(spec: &str) -> Result<IndicatorType, String> {
    let (name, args) = match spec.split_once(':') {
        Some((name, args)) => (name, args.split(',').map(str::trim).collect::<Vec<_>>()),
        None => (spec, Vec::new()),
    };
    let kind =
        IndicatorKind::from_name(name).ok_or_else(|| format!("unknown indicator '{}'", name))?;

    let int = |s: &&str| -> Result<i64, String> {
        s.parse::<i64>()
            .map_err(|_| format!("'{}' is not an integer in '{}'", s, spec))
    };
    let mut params = IndicatorParams::default();
    match (kind, args.as_slice()) {
        (_, []) => {}
        (IndicatorKind::Atr | IndicatorKind::Ema | IndicatorKind::Rsi, [period]) => {
            params.period = Some(int(period)?)
        }
        (IndicatorKind::Macd, [fast, slow, signal]) => {
            params.fast = Some(int(fast)?);
            params.slow = Some(int(slow)?);
            params.signal = Some(int(signal)?);
        }
        (IndicatorKind::Bollinger, [period, rest @ ..]) if rest.len() <= 1 => {
            params.period = Some(int(period)?);
            if let Some(mult) = rest.first() {
                params.multiplier = Some(
                    mult.parse::<f64>()
                        .map_err(|_| format!("'{}' is not a number in '{}'", mult, spec))?,
                );
            }
        }
        (IndicatorKind::Vwap, [arg]) => match arg.parse::<i64>() {
            Ok(window) => params.window = Some(window),
            Err(_) => params.mode = Some(arg.to_string()),
        },
        _ => return Err(format!("wrong number of arguments in '{}'", spec)),
    }
    kind.configure(&params)
}

fn run_indicators(
    config_path: &Path,
    symbol: &str,
    interval: &str,
    specs: &[String],
    source: &str,
    tail: Option<usize>,
) -> Result<(), AppError> {
    let invalid = |key: &str, reason: String| AppError::ConfigInvalid {
        section: "cli".to_string(),
        key: key.to_string(),
        reason,
    };
    let source: PriceSource = source.parse().map_err(|e| invalid("source", e))?;
    let indicators = specs
        .iter()
        .map(|spec| parse_indicator_spec(spec).map(|t| (t, source)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid("indicator", e))?;

    let adapter = load_config(config_path)?;
    let csv = CsvAdapter::new(data_directory(&adapter)?);
    let bars = csv.load_all(symbol, interval).map_err(data_error)?;
    let frame = Frame::with_indicators(bars, &indicators)?;

    let columns: Vec<String> = frame.column_names().map(str::to_string).collect();
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    let mut header = vec!["timestamp".to_string(), "close".to_string()];
    header.extend(columns.iter().cloned());
    write_row(&mut writer, &header)?;

    let skip = tail.map_or(0, |n| frame.len().saturating_sub(n));
    for (i, bar) in frame.bars().iter().enumerate().skip(skip) {
        let mut row = vec![bar.timestamp.to_rfc3339(), bar.close.to_string()];
        for name in &columns {
            let cell = frame
                .column(name)
                .and_then(|c| c.get(i).copied().flatten())
                .map(|v| format!("{:.6}", v))
                .unwrap_or_default();
            row.push(cell);
        }
        write_row(&mut writer, &row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_row<W: std::io::Write>(writer: &mut csv::Writer<W>, row: &[String]) -> Result<(), AppError> {
    writer
        .write_record(row)
        .map_err(|e| AppError::Io(std::io::Error::other(e)))
}
