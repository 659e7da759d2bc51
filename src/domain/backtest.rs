//! Historical replay.
//!
//! [`HistoricalReplay`] serves a stored bar history as if it were arriving
//! live, one bar per tick; [`run_backtest`] drives the interpreter across the
//! whole history and collects the decisions.

use crate::domain::bar::Bar;
use crate::domain::context::Context;
use crate::domain::decision::TradeDecision;
use crate::domain::error::DslError;
use crate::domain::instruction::Instruction;
use crate::domain::interpreter::{Interpreter, RunStatus};
use crate::ports::market_data_port::{MarketDataProvider, ProviderError};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// In-memory provider exposing bars up to a movable cursor.
#[derive(Debug)]
pub struct HistoricalReplay {
    symbol: String,
    interval: String,
    bars: Vec<Bar>,
    cursor: AtomicUsize,
}

impl HistoricalReplay {
    /// `bars` must be oldest first. The cursor starts on the first bar.
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            bars,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Index of the newest visible bar.
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn seek(&self, index: usize) {
        self.cursor
            .store(index.min(self.bars.len().saturating_sub(1)), Ordering::SeqCst);
    }

    /// Move to the next bar; `false` once the history is exhausted.
    pub fn advance(&self) -> bool {
        let next = self.position() + 1;
        if next >= self.bars.len() {
            return false;
        }
        self.cursor.store(next, Ordering::SeqCst);
        true
    }

    pub fn current(&self) -> Option<&Bar> {
        self.bars.get(self.position())
    }
}

impl MarketDataProvider for HistoricalReplay {
    fn get_bars(
        &self,
        symbol: &str,
        interval: &str,
        count: usize,
    ) -> Result<Vec<Bar>, ProviderError> {
        if !symbol.eq_ignore_ascii_case(&self.symbol) || interval != self.interval {
            return Err(ProviderError::UnknownSymbol {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
            });
        }
        if self.bars.is_empty() {
            return Err(ProviderError::Unavailable(format!(
                "no bars loaded for {} {}",
                self.symbol, self.interval
            )));
        }
        let end = self.position() + 1;
        let start = end.saturating_sub(count);
        Ok(self.bars[start..end].to_vec())
    }
}

/// A tick that failed and was skipped.
#[derive(Debug, Clone)]
pub struct TickFailure {
    pub timestamp: DateTime<Utc>,
    pub error: DslError,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestReport {
    pub ticks: usize,
    pub decisions: Vec<TradeDecision>,
    pub failures: Vec<TickFailure>,
    /// Whether the strategy was suspended after the last tick.
    pub ended_paused: bool,
}

/// Run `tree` once per bar of `replay`, oldest first.
///
/// Failed ticks are logged and skipped; the context carries over from tick
/// to tick.
pub fn run_backtest(
    interpreter: &Interpreter,
    tree: &Instruction,
    replay: &HistoricalReplay,
) -> BacktestReport {
    let mut report = BacktestReport::default();
    if replay.is_empty() {
        warn!("backtest has no bars to replay");
        return report;
    }

    let mut ctx = Context::new();
    replay.seek(0);
    loop {
        let Some(bar) = replay.current() else { break };
        let timestamp = bar.timestamp;
        report.ticks += 1;

        match interpreter.run(tree, &mut ctx, replay) {
            Ok(outcome) => {
                report.ended_paused = matches!(outcome.status, RunStatus::Paused { .. });
                report.decisions.extend(outcome.decisions);
            }
            Err(error) => {
                match &error {
                    DslError::InsufficientData { .. } => {
                        debug!(%timestamp, error = %error, "skipping tick during warm-up")
                    }
                    _ => warn!(%timestamp, error = %error, "skipping failed tick"),
                }
                report.ended_paused = false;
                report.failures.push(TickFailure { timestamp, error });
            }
        }

        if !replay.advance() {
            break;
        }
    }

    info!(
        ticks = report.ticks,
        decisions = report.decisions.len(),
        failures = report.failures.len(),
        "backtest complete"
    );
    report
}
