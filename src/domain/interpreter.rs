//! Strategy interpreter.
//!
//! Walks an instruction tree depth-first against a [`Context`] and a
//! [`MarketDataProvider`], producing trade decisions. A `Wait` suspends the
//! run: the context records where, and the next invocation resumes from there
//! once the wait is satisfied. The engine never sleeps.
//!
//! # Per-invocation flow
//!
//! 1. Fetch `history_bars` bars and install them as the market snapshot
//! 2. Resume the pending suspension, or start a new cycle at the root
//! 3. Return the decisions with `Completed` or `Paused { at }`
//!
//! On error the invocation's decisions are discarded and the suspension is
//! cleared; bindings already made stay in the context.

use crate::domain::bar::{Bar, PriceSource};
use crate::domain::context::{Context, MarketSnapshot, Suspension, WaitState};
use crate::domain::decision::{Side, TradeDecision};
use crate::domain::error::DslError;
use crate::domain::expr_eval::{evaluate, evaluate_bool, evaluate_number};
use crate::domain::indicator::{IndicatorKind, IndicatorSeries, IndicatorType, compute};
use crate::domain::instruction::{
    IndicatorInstruction, Instruction, InstructionPath, PathSegment, TradeInstruction,
    WaitCondition,
};
use crate::domain::value::Value;
use crate::ports::market_data_port::MarketDataProvider;
use chrono::TimeDelta;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, info_span, warn};

pub const DEFAULT_HISTORY_BARS: usize = 500;
pub const DEFAULT_MAX_STEPS: usize = 10_000;

/// Whether variables survive from one completed cycle to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContextPolicy {
    #[default]
    Persist,
    ResetEachCycle,
}

impl FromStr for ContextPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "persist" => Ok(ContextPolicy::Persist),
            "reset" | "reset_each_cycle" => Ok(ContextPolicy::ResetEachCycle),
            other => Err(format!(
                "unknown context policy '{}' (expected persist or reset)",
                other
            )),
        }
    }
}

impl fmt::Display for ContextPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextPolicy::Persist => f.write_str("persist"),
            ContextPolicy::ResetEachCycle => f.write_str("reset"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub symbol: String,
    pub interval: String,
    pub history_bars: usize,
    pub max_steps: usize,
    pub context_policy: ContextPolicy,
}

impl EngineConfig {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            history_bars: DEFAULT_HISTORY_BARS,
            max_steps: DEFAULT_MAX_STEPS,
            context_policy: ContextPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed,
    Paused { at: InstructionPath },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub decisions: Vec<TradeDecision>,
    pub status: RunStatus,
}

impl RunOutcome {
    pub fn is_paused(&self) -> bool {
        matches!(self.status, RunStatus::Paused { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Interpreter {
    config: EngineConfig,
}

enum Flow {
    Continue,
    Pause(InstructionPath),
}

impl Interpreter {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one tick of `tree`.
    pub fn run(
        &self,
        tree: &Instruction,
        ctx: &mut Context,
        provider: &dyn MarketDataProvider,
    ) -> Result<RunOutcome, DslError> {
        let span = info_span!(
            "strategy_run",
            symbol = %self.config.symbol,
            interval = %self.config.interval
        );
        let _guard = span.enter();

        let result = self.tick(tree, ctx, provider);
        match &result {
            Ok(outcome) => debug!(
                decisions = outcome.decisions.len(),
                paused = outcome.is_paused(),
                "run finished"
            ),
            Err(e) => {
                ctx.clear_suspension();
                warn!(error = %e, "run aborted");
            }
        }
        result
    }

    fn tick(
        &self,
        tree: &Instruction,
        ctx: &mut Context,
        provider: &dyn MarketDataProvider,
    ) -> Result<RunOutcome, DslError> {
        let bars = fetch_bars(&self.config, provider, self.config.history_bars)?;
        ctx.set_snapshot(MarketSnapshot {
            symbol: self.config.symbol.clone(),
            interval: self.config.interval.clone(),
            bars,
        });

        let suspension = ctx.take_suspension();
        let mut run = Run {
            config: &self.config,
            provider,
            ctx,
            decisions: Vec::new(),
            steps: 0,
            series: HashMap::new(),
        };

        let flow = match suspension {
            Some(suspension) => run.resume(tree, suspension)?,
            None => {
                if self.config.context_policy == ContextPolicy::ResetEachCycle {
                    run.ctx.clear_variables();
                }
                debug!("starting new cycle");
                run.exec(tree, &InstructionPath::root())?
            }
        };

        let status = match flow {
            Flow::Continue => RunStatus::Completed,
            Flow::Pause(at) => RunStatus::Paused { at },
        };
        Ok(RunOutcome {
            decisions: run.decisions,
            status,
        })
    }
}

fn fetch_bars(
    config: &EngineConfig,
    provider: &dyn MarketDataProvider,
    count: usize,
) -> Result<Vec<Bar>, DslError> {
    provider
        .get_bars(&config.symbol, &config.interval, count)
        .map_err(|e| {
            DslError::evaluation(format!(
                "market data for {} {}: {}",
                config.symbol, config.interval, e
            ))
        })
}

/// State of a single invocation.
struct Run<'a> {
    config: &'a EngineConfig,
    provider: &'a dyn MarketDataProvider,
    ctx: &'a mut Context,
    decisions: Vec<TradeDecision>,
    steps: usize,
    series: HashMap<(IndicatorType, PriceSource), IndicatorSeries>,
}

impl Run<'_> {
    fn step(&mut self) -> Result<(), DslError> {
        self.steps += 1;
        if self.steps > self.config.max_steps {
            return Err(DslError::Timeout {
                limit: self.config.max_steps,
            });
        }
        Ok(())
    }

    fn exec(&mut self, node: &Instruction, path: &InstructionPath) -> Result<Flow, DslError> {
        self.step()?;
        debug!(path = %path, kind = node.kind_name(), "exec");
        match node {
            Instruction::Compound(children) => self.exec_children(children, 0, path),
            Instruction::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if evaluate_bool(condition, self.ctx)? {
                    self.exec(then_branch, &path.then_branch())
                } else if let Some(else_branch) = else_branch {
                    self.exec(else_branch, &path.else_branch())
                } else {
                    Ok(Flow::Continue)
                }
            }
            Instruction::Indicator(indicator) => {
                self.indicator(indicator)?;
                Ok(Flow::Continue)
            }
            Instruction::Operation { target, expr } => {
                let value = evaluate(expr, self.ctx)?;
                self.ctx.set(target.clone(), value);
                Ok(Flow::Continue)
            }
            Instruction::Trade(trade) => {
                self.trade(trade)?;
                Ok(Flow::Continue)
            }
            Instruction::Wait(condition) => self.enter_wait(condition, path),
        }
    }

    fn exec_children(
        &mut self,
        children: &[Instruction],
        from: usize,
        path: &InstructionPath,
    ) -> Result<Flow, DslError> {
        for (i, child) in children.iter().enumerate().skip(from) {
            if let Flow::Pause(at) = self.exec(child, &path.child(i))? {
                return Ok(Flow::Pause(at));
            }
        }
        Ok(Flow::Continue)
    }

    fn enter_wait(
        &mut self,
        condition: &WaitCondition,
        path: &InstructionPath,
    ) -> Result<Flow, DslError> {
        let state = match condition {
            WaitCondition::Bars(n) => {
                let remaining = u64::try_from(*n)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| {
                        DslError::evaluation(format!("wait bars must be positive, got {}", n))
                    })?;
                WaitState::Bars { remaining }
            }
            WaitCondition::Duration(delta) => {
                if *delta <= TimeDelta::zero() {
                    return Err(DslError::evaluation(format!(
                        "wait duration must be positive, got {}s",
                        delta.num_seconds()
                    )));
                }
                let now = self
                    .ctx
                    .latest_bar()
                    .map(|b| b.timestamp)
                    .ok_or_else(|| DslError::evaluation("wait duration needs market data"))?;
                let deadline = now
                    .checked_add_signed(*delta)
                    .ok_or_else(|| DslError::evaluation("wait deadline is out of range"))?;
                WaitState::Deadline(deadline)
            }
            WaitCondition::Until(expr) => {
                if evaluate_bool(expr, self.ctx)? {
                    return Ok(Flow::Continue);
                }
                WaitState::Until
            }
        };
        info!(path = %path, state = ?state, "suspending");
        self.ctx.suspend(Suspension {
            at: path.clone(),
            state,
        });
        Ok(Flow::Pause(path.clone()))
    }

    /// Check a pending wait; if satisfied continue after it, otherwise stay
    /// suspended.
    fn resume(&mut self, tree: &Instruction, suspension: Suspension) -> Result<Flow, DslError> {
        let Suspension { at, state } = suspension;
        let Some(Instruction::Wait(condition)) = tree.at(&at) else {
            return Err(DslError::evaluation(format!(
                "suspended at {} which is not a wait",
                at
            )));
        };
        self.step()?;

        let pending = match (state, condition) {
            (WaitState::Bars { remaining }, _) => {
                let remaining = remaining.saturating_sub(1);
                (remaining > 0).then_some(WaitState::Bars { remaining })
            }
            (WaitState::Deadline(deadline), _) => {
                let reached = self
                    .ctx
                    .latest_bar()
                    .is_some_and(|b| b.timestamp >= deadline);
                (!reached).then_some(WaitState::Deadline(deadline))
            }
            (WaitState::Until, WaitCondition::Until(expr)) => {
                (!evaluate_bool(expr, self.ctx)?).then_some(WaitState::Until)
            }
            (WaitState::Until, _) => {
                return Err(DslError::evaluation(format!(
                    "wait at {} has no condition to re-check",
                    at
                )));
            }
        };

        if let Some(state) = pending {
            debug!(path = %at, state = ?state, "still waiting");
            self.ctx.suspend(Suspension {
                at: at.clone(),
                state,
            });
            return Ok(Flow::Pause(at));
        }

        info!(path = %at, "resuming");
        self.continue_after(tree, &InstructionPath::root(), at.segments())
    }

    /// Descend along `rest` to the satisfied wait, then run whatever follows
    /// it on the way back up. Conditions on the way down are not re-evaluated.
    fn continue_after(
        &mut self,
        node: &Instruction,
        path: &InstructionPath,
        rest: &[PathSegment],
    ) -> Result<Flow, DslError> {
        let Some((segment, rest)) = rest.split_first() else {
            return Ok(Flow::Continue);
        };
        match (segment, node) {
            (PathSegment::Child(i), Instruction::Compound(children)) => {
                let child = children.get(*i).ok_or_else(|| stale_path(path))?;
                if let Flow::Pause(at) = self.continue_after(child, &path.child(*i), rest)? {
                    return Ok(Flow::Pause(at));
                }
                self.exec_children(children, i + 1, path)
            }
            (PathSegment::Then, Instruction::If { then_branch, .. }) => {
                self.continue_after(then_branch, &path.then_branch(), rest)
            }
            (PathSegment::Else, Instruction::If { else_branch, .. }) => {
                let branch = else_branch.as_deref().ok_or_else(|| stale_path(path))?;
                self.continue_after(branch, &path.else_branch(), rest)
            }
            _ => Err(stale_path(path)),
        }
    }

    fn indicator(&mut self, indicator: &IndicatorInstruction) -> Result<(), DslError> {
        let kind =
            IndicatorKind::from_name(&indicator.name).ok_or_else(|| DslError::UnknownIndicator {
                name: indicator.name.clone(),
            })?;
        let indicator_type = kind.configure(&indicator.params).map_err(|reason| {
            DslError::evaluation(format!("{}: {}", indicator.name, reason))
        })?;
        let source = indicator.params.source;
        let key = (indicator_type.clone(), source);

        if !self.series.contains_key(&key) {
            let minimum = indicator_type.min_bars();
            let series = if self.config.history_bars < minimum {
                debug!(indicator = %indicator_type, minimum, "refetching longer window");
                let bars = fetch_bars(self.config, self.provider, minimum)?;
                compute(&indicator_type, &bars, source)?
            } else {
                let bars = self
                    .ctx
                    .snapshot()
                    .map(|s| s.bars.as_slice())
                    .unwrap_or_default();
                compute(&indicator_type, bars, source)?
            };
            self.series.insert(key.clone(), series);
        }

        let point = self
            .series
            .get(&key)
            .and_then(IndicatorSeries::current)
            .ok_or_else(|| {
                DslError::evaluation(format!(
                    "{} has no valid value at the latest bar",
                    indicator_type
                ))
            })?;
        for (name, value) in point.value.bindings(&indicator.target) {
            self.ctx.set(name, Value::Number(value));
        }
        Ok(())
    }

    fn trade(&mut self, trade: &TradeInstruction) -> Result<(), DslError> {
        let timestamp = self
            .ctx
            .latest_bar()
            .map(|b| b.timestamp)
            .ok_or_else(|| DslError::trade("no market snapshot to timestamp the decision"))?;
        let side: Side = trade.side.parse()?;
        let size = evaluate_number(&trade.size, self.ctx)?;
        let price = trade
            .price
            .as_ref()
            .map(|e| evaluate_number(e, self.ctx))
            .transpose()?;
        let stop = trade
            .stop
            .as_ref()
            .map(|e| evaluate_number(e, self.ctx))
            .transpose()?;

        let decision = TradeDecision::new(&trade.symbol, side, size, price, stop, timestamp)?;
        info!(decision = %decision, "trade decision");
        self.decisions.push(decision);
        Ok(())
    }
}

fn stale_path(path: &InstructionPath) -> DslError {
    DslError::evaluation(format!("suspension path does not match the tree at {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;
    use crate::domain::expr::Expr;
    use crate::domain::expr_parser::parse;
    use crate::domain::indicator::test_support::make_bars;
    use crate::domain::instruction::IndicatorParams;
    use crate::ports::market_data_port::ProviderError;
    use std::sync::Mutex;

    /// Serves a growing prefix of `bars`, one more bar per call.
    struct Feed {
        bars: Vec<Bar>,
        cursor: Mutex<usize>,
    }

    impl Feed {
        fn new(prices: &[f64]) -> Self {
            Self {
                bars: make_bars(prices),
                cursor: Mutex::new(0),
            }
        }

        fn advance(&self) {
            let mut c = self.cursor.lock().unwrap();
            *c += 1;
        }
    }

    impl MarketDataProvider for Feed {
        fn get_bars(&self, _: &str, _: &str, count: usize) -> Result<Vec<Bar>, ProviderError> {
            let end = (*self.cursor.lock().unwrap() + 1).min(self.bars.len());
            let start = end.saturating_sub(count);
            Ok(self.bars[start..end].to_vec())
        }
    }

    struct Broken;

    impl MarketDataProvider for Broken {
        fn get_bars(&self, _: &str, _: &str, _: usize) -> Result<Vec<Bar>, ProviderError> {
            Err(ProviderError::Network("connection reset".into()))
        }
    }

    fn op(target: &str, src: &str) -> Instruction {
        Instruction::Operation {
            target: target.into(),
            expr: parse(src).unwrap(),
        }
    }

    fn buy(size: &str) -> Instruction {
        Instruction::Trade(TradeInstruction {
            symbol: "BTCUSDT".into(),
            side: "buy".into(),
            size: parse(size).unwrap(),
            price: None,
            stop: None,
        })
    }

    fn wait_bars(n: i64) -> Instruction {
        Instruction::Wait(WaitCondition::Bars(n))
    }

    fn interpreter() -> Interpreter {
        Interpreter::new(EngineConfig::new("BTCUSDT", "1d"))
    }

    #[test]
    fn operations_bind_in_order() {
        let tree = Instruction::Compound(vec![op("a", "2"), op("b", "a * close")]);
        let feed = Feed::new(&[10.0]);
        let mut ctx = Context::new();
        let outcome = interpreter().run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(ctx.get("b").unwrap(), Value::Number(20.0));
    }

    #[test]
    fn trade_uses_bar_timestamp() {
        let tree = Instruction::Compound(vec![buy("1.5")]);
        let feed = Feed::new(&[10.0, 11.0]);
        feed.advance();
        let mut ctx = Context::new();
        let outcome = interpreter().run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(outcome.decisions[0].size, 1.5);
        assert_eq!(outcome.decisions[0].timestamp, feed.bars[1].timestamp);
    }

    #[test]
    fn wait_mid_compound_pauses_and_resumes() {
        let tree = Instruction::Compound(vec![op("a", "1"), wait_bars(1), op("b", "a + 1")]);
        let feed = Feed::new(&[1.0, 2.0, 3.0]);
        let interp = interpreter();
        let mut ctx = Context::new();

        let first = interp.run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(
            first.status,
            RunStatus::Paused {
                at: InstructionPath::root().child(1)
            }
        );
        assert!(ctx.is_suspended());
        assert!(ctx.get("b").is_err());

        feed.advance();
        let second = interp.run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(ctx.get("b").unwrap(), Value::Number(2.0));
        assert!(!ctx.is_suspended());
    }

    #[test]
    fn wait_bars_counts_invocations() {
        let tree = Instruction::Compound(vec![wait_bars(3), op("done", "true")]);
        let feed = Feed::new(&[1.0; 5]);
        let interp = interpreter();
        let mut ctx = Context::new();
        let mut statuses = Vec::new();
        for _ in 0..4 {
            statuses.push(interp.run(&tree, &mut ctx, &feed).unwrap().is_paused());
            feed.advance();
        }
        assert_eq!(statuses, vec![true, true, true, false]);
        assert_eq!(ctx.get("done").unwrap(), Value::Bool(true));
    }

    #[test]
    fn resume_does_not_reevaluate_branch_condition() {
        let tree = Instruction::Compound(vec![
            Instruction::If {
                condition: parse("close < 5").unwrap(),
                then_branch: Box::new(Instruction::Compound(vec![wait_bars(1), buy("1")])),
                else_branch: None,
            },
            op("after", "1"),
        ]);
        let feed = Feed::new(&[1.0, 100.0]);
        let interp = interpreter();
        let mut ctx = Context::new();

        let first = interp.run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(
            first.status,
            RunStatus::Paused {
                at: InstructionPath::root().child(0).then_branch().child(0)
            }
        );
        feed.advance();
        let second = interp.run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(second.decisions.len(), 1);
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(ctx.get("after").unwrap(), Value::Number(1.0));
    }

    #[test]
    fn wait_until_holds_immediately() {
        let tree = Instruction::Compound(vec![
            Instruction::Wait(WaitCondition::Until(parse("close > 0").unwrap())),
            op("x", "1"),
        ]);
        let feed = Feed::new(&[5.0]);
        let outcome = interpreter().run(&tree, &mut Context::new(), &feed).unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
    }

    #[test]
    fn wait_until_resumes_when_condition_holds() {
        let tree = Instruction::Compound(vec![
            Instruction::Wait(WaitCondition::Until(parse("close > 10").unwrap())),
            buy("1"),
        ]);
        let feed = Feed::new(&[5.0, 7.0, 12.0]);
        let interp = interpreter();
        let mut ctx = Context::new();
        assert!(interp.run(&tree, &mut ctx, &feed).unwrap().is_paused());
        feed.advance();
        assert!(interp.run(&tree, &mut ctx, &feed).unwrap().is_paused());
        feed.advance();
        let outcome = interp.run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(outcome.decisions.len(), 1);
    }

    #[test]
    fn wait_duration_uses_bar_clock() {
        let tree = Instruction::Compound(vec![
            Instruction::Wait(WaitCondition::Duration(TimeDelta::hours(36))),
            op("x", "1"),
        ]);
        let feed = Feed::new(&[1.0, 1.0, 1.0]);
        let interp = interpreter();
        let mut ctx = Context::new();
        assert!(interp.run(&tree, &mut ctx, &feed).unwrap().is_paused());
        feed.advance();
        assert!(interp.run(&tree, &mut ctx, &feed).unwrap().is_paused());
        feed.advance();
        let outcome = interp.run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
    }

    #[test]
    fn decisions_before_pause_are_returned() {
        let tree = Instruction::Compound(vec![buy("1"), wait_bars(1), buy("2")]);
        let feed = Feed::new(&[1.0, 2.0]);
        let interp = interpreter();
        let mut ctx = Context::new();
        let first = interp.run(&tree, &mut ctx, &feed).unwrap();
        assert!(first.is_paused());
        assert_eq!(first.decisions.len(), 1);
        feed.advance();
        let second = interp.run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(second.decisions.len(), 1);
        assert_eq!(second.decisions[0].size, 2.0);
    }

    #[test]
    fn error_discards_decisions_and_clears_suspension() {
        let tree = Instruction::Compound(vec![buy("1"), op("y", "missing + 1")]);
        let feed = Feed::new(&[1.0]);
        let mut ctx = Context::new();
        let err = interpreter().run(&tree, &mut ctx, &feed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownVariable);
        assert!(!ctx.is_suspended());
    }

    #[test]
    fn provider_failure_is_evaluation_error() {
        let tree = Instruction::Compound(vec![op("x", "1")]);
        let err = interpreter()
            .run(&tree, &mut Context::new(), &Broken)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Evaluation);
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn trade_errors() {
        let feed = Feed::new(&[1.0]);
        let interp = interpreter();
        let zero = Instruction::Compound(vec![buy("close - 1")]);
        let err = interp.run(&zero, &mut Context::new(), &feed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Trade);

        let bad_side = Instruction::Compound(vec![Instruction::Trade(TradeInstruction {
            symbol: "X".into(),
            side: "hold".into(),
            size: Expr::Number(1.0),
            price: None,
            stop: None,
        })]);
        let err = interp.run(&bad_side, &mut Context::new(), &feed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Trade);
    }

    #[test]
    fn step_limit() {
        let children: Vec<Instruction> = (0..20).map(|i| op(&format!("v{}", i), "1")).collect();
        let tree = Instruction::Compound(children);
        let mut config = EngineConfig::new("BTCUSDT", "1d");
        config.max_steps = 10;
        let err = Interpreter::new(config)
            .run(&tree, &mut Context::new(), &Feed::new(&[1.0]))
            .unwrap_err();
        assert!(matches!(err, DslError::Timeout { limit: 10 }));
    }

    #[test]
    fn indicator_binds_latest_value() {
        let tree = Instruction::Compound(vec![Instruction::Indicator(IndicatorInstruction {
            name: "ema".into(),
            params: IndicatorParams {
                period: Some(3),
                ..Default::default()
            },
            target: "fast".into(),
        })]);
        let feed = Feed::new(&[1.0, 2.0, 3.0, 4.0]);
        for _ in 0..3 {
            feed.advance();
        }
        let mut ctx = Context::new();
        interpreter().run(&tree, &mut ctx, &feed).unwrap();
        // seed 2.0, then 2.0 + 0.5 * (4.0 - 2.0)
        assert_eq!(ctx.get("fast").unwrap(), Value::Number(3.0));
    }

    #[test]
    fn indicator_refetches_when_history_is_short() {
        let tree = Instruction::Compound(vec![Instruction::Indicator(IndicatorInstruction {
            name: "ema".into(),
            params: IndicatorParams {
                period: Some(3),
                ..Default::default()
            },
            target: "e".into(),
        })]);
        let feed = Feed::new(&[1.0, 2.0, 3.0]);
        feed.advance();
        feed.advance();
        let mut config = EngineConfig::new("BTCUSDT", "1d");
        config.history_bars = 1;
        let mut ctx = Context::new();
        Interpreter::new(config).run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(ctx.snapshot().unwrap().bars.len(), 1);
        assert_eq!(ctx.get("e").unwrap(), Value::Number(2.0));
    }

    #[test]
    fn indicator_invalid_at_latest_bar_is_not_bound() {
        let tree = Instruction::Compound(vec![Instruction::Indicator(IndicatorInstruction {
            name: "vwap".into(),
            params: IndicatorParams {
                mode: Some("session".into()),
                ..Default::default()
            },
            target: "v".into(),
        })]);
        // Daily bars: every bar opens a new session, the last one without volume.
        let mut feed = Feed::new(&[10.0, 20.0, 30.0]);
        feed.bars[2].volume = 0.0;
        feed.advance();
        let mut ctx = Context::new();
        interpreter().run(&tree, &mut ctx, &feed).unwrap();
        assert_eq!(ctx.get("v").unwrap(), Value::Number(20.0));

        feed.advance();
        let err = interpreter().run(&tree, &mut ctx, &feed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Evaluation);
        assert!(err.to_string().contains("latest bar"));
        assert_eq!(ctx.get("v").unwrap(), Value::Number(20.0));
    }

    #[test]
    fn unknown_indicator_at_runtime() {
        let tree = Instruction::Compound(vec![Instruction::Indicator(IndicatorInstruction {
            name: "ichimoku".into(),
            params: IndicatorParams::default(),
            target: "i".into(),
        })]);
        let err = interpreter()
            .run(&tree, &mut Context::new(), &Feed::new(&[1.0]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownIndicator);
    }

    #[test]
    fn reset_policy_clears_between_cycles() {
        let tree = Instruction::Compound(vec![Instruction::If {
            condition: parse("close > 1").unwrap(),
            then_branch: Box::new(op("seen", "true")),
            else_branch: None,
        }]);
        let feed = Feed::new(&[2.0, 1.0]);
        let mut config = EngineConfig::new("BTCUSDT", "1d");
        config.context_policy = ContextPolicy::ResetEachCycle;
        let interp = Interpreter::new(config);
        let mut ctx = Context::new();
        interp.run(&tree, &mut ctx, &feed).unwrap();
        assert!(ctx.get("seen").is_ok());
        feed.advance();
        interp.run(&tree, &mut ctx, &feed).unwrap();
        assert!(ctx.get("seen").is_err());
    }

    #[test]
    fn context_policy_parsing() {
        assert_eq!("persist".parse::<ContextPolicy>().unwrap(), ContextPolicy::Persist);
        assert_eq!("RESET".parse::<ContextPolicy>().unwrap(), ContextPolicy::ResetEachCycle);
        assert!("sometimes".parse::<ContextPolicy>().is_err());
    }
}
