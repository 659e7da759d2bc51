//! Static strategy validation.
//!
//! Walks an instruction tree without executing it and reports every problem
//! found. Each branch of an `If` starts from its parent's bound names; after
//! the `If` only the names bound on every path stay bound.

use crate::domain::bar::MARKET_FIELDS;
use crate::domain::decision::Side;
use crate::domain::error::DslError;
use crate::domain::expr::Expr;
use crate::domain::indicator::IndicatorKind;
use crate::domain::instruction::{
    IndicatorInstruction, Instruction, InstructionPath, TradeInstruction, WaitCondition,
};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    UnboundVariable,
    UnknownIndicator,
    InvalidParameter,
    InvalidTrade,
    InvalidNesting,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueKind::UnboundVariable => "unbound variable",
            IssueKind::UnknownIndicator => "unknown indicator",
            IssueKind::InvalidParameter => "invalid parameter",
            IssueKind::InvalidTrade => "invalid trade",
            IssueKind::InvalidNesting => "invalid nesting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub path: InstructionPath,
    pub kind: IssueKind,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.path, self.kind, self.message)
    }
}

/// Ordered list of issues; empty means the strategy is accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// `Ok` if accepted, otherwise the report as a validation error.
    pub fn into_result(self) -> Result<(), DslError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DslError::Validation(self))
        }
    }

    fn push(&mut self, path: &InstructionPath, kind: IssueKind, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.clone(),
            kind,
            message: message.into(),
        });
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  {}", issue)?;
        }
        Ok(())
    }
}

/// Check `tree` before it is run. Never fails; problems go into the report.
pub fn validate(tree: &Instruction) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut bound: BTreeSet<String> = MARKET_FIELDS.iter().map(|s| s.to_string()).collect();
    walk(tree, &InstructionPath::root(), &mut bound, &mut report);
    debug!(issues = report.len(), "validated strategy");
    report
}

fn walk(
    node: &Instruction,
    path: &InstructionPath,
    bound: &mut BTreeSet<String>,
    report: &mut ValidationReport,
) {
    match node {
        Instruction::Compound(children) => {
            if children.is_empty() {
                report.push(path, IssueKind::InvalidNesting, "empty block");
            }
            for (i, child) in children.iter().enumerate() {
                walk(child, &path.child(i), bound, report);
            }
        }
        Instruction::If {
            condition,
            then_branch,
            else_branch,
        } => {
            check_reads(condition, path, bound, report);
            if only_waits(then_branch) && else_branch.as_deref().is_none_or(only_waits) {
                report.push(
                    path,
                    IssueKind::InvalidNesting,
                    "conditional whose only effect is a wait",
                );
            }

            let mut then_bound = bound.clone();
            walk(then_branch, &path.then_branch(), &mut then_bound, report);
            let mut else_bound = bound.clone();
            if let Some(else_branch) = else_branch {
                walk(else_branch, &path.else_branch(), &mut else_bound, report);
            }
            *bound = then_bound.intersection(&else_bound).cloned().collect();
        }
        Instruction::Indicator(indicator) => check_indicator(indicator, path, bound, report),
        Instruction::Operation { target, expr } => {
            check_reads(expr, path, bound, report);
            bound.insert(target.clone());
        }
        Instruction::Trade(trade) => check_trade(trade, path, bound, report),
        Instruction::Wait(condition) => match condition {
            WaitCondition::Bars(n) if *n <= 0 => report.push(
                path,
                IssueKind::InvalidParameter,
                format!("wait bars must be positive, got {}", n),
            ),
            WaitCondition::Duration(d) if *d <= chrono::TimeDelta::zero() => report.push(
                path,
                IssueKind::InvalidParameter,
                format!("wait duration must be positive, got {}s", d.num_seconds()),
            ),
            WaitCondition::Until(expr) => check_reads(expr, path, bound, report),
            _ => {}
        },
    }
}

fn only_waits(node: &Instruction) -> bool {
    match node {
        Instruction::Wait(_) => true,
        Instruction::Compound(children) => {
            !children.is_empty() && children.iter().all(only_waits)
        }
        _ => false,
    }
}

fn check_reads(
    expr: &Expr,
    path: &InstructionPath,
    bound: &BTreeSet<String>,
    report: &mut ValidationReport,
) {
    for name in expr.variables() {
        if !bound.contains(&name) {
            report.push(
                path,
                IssueKind::UnboundVariable,
                format!("'{}' is read before it is bound", name),
            );
        }
    }
}

fn check_indicator(
    indicator: &IndicatorInstruction,
    path: &InstructionPath,
    bound: &mut BTreeSet<String>,
    report: &mut ValidationReport,
) {
    match IndicatorKind::from_name(&indicator.name) {
        Some(kind) => {
            if let Err(reason) = kind.configure(&indicator.params) {
                report.push(path, IssueKind::InvalidParameter, reason);
            }
            bound.extend(kind.bound_names(&indicator.target));
        }
        None => {
            report.push(
                path,
                IssueKind::UnknownIndicator,
                format!("unknown indicator '{}'", indicator.name),
            );
            bound.insert(indicator.target.clone());
        }
    }
}

fn check_trade(
    trade: &TradeInstruction,
    path: &InstructionPath,
    bound: &BTreeSet<String>,
    report: &mut ValidationReport,
) {
    if trade.symbol.trim().is_empty() {
        report.push(path, IssueKind::InvalidTrade, "symbol must not be empty");
    }
    if let Err(e) = trade.side.parse::<Side>() {
        let message = match e {
            DslError::Trade { reason } => reason,
            other => other.to_string(),
        };
        report.push(path, IssueKind::InvalidTrade, message);
    }

    let quantities = [
        ("size", Some(&trade.size)),
        ("price", trade.price.as_ref()),
        ("stop", trade.stop.as_ref()),
    ];
    for (field, expr) in quantities {
        let Some(expr) = expr else { continue };
        check_reads(expr, path, bound, report);
        if let Some(value) = expr.as_constant() {
            if value <= 0.0 {
                report.push(
                    path,
                    IssueKind::InvalidTrade,
                    format!("{} must be positive, got {}", field, value),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::expr_parser::parse;
    use crate::domain::instruction::IndicatorParams;
    use chrono::TimeDelta;
    use proptest::prelude::*;

    fn op(target: &str, src: &str) -> Instruction {
        Instruction::Operation {
            target: target.into(),
            expr: parse(src).unwrap(),
        }
    }

    fn if_(cond: &str, then: Instruction, otherwise: Option<Instruction>) -> Instruction {
        Instruction::If {
            condition: parse(cond).unwrap(),
            then_branch: Box::new(then),
            else_branch: otherwise.map(Box::new),
        }
    }

    fn trade(side: &str, size: &str) -> Instruction {
        Instruction::Trade(TradeInstruction {
            symbol: "BTCUSDT".into(),
            side: side.into(),
            size: parse(size).unwrap(),
            price: None,
            stop: None,
        })
    }

    fn indicator(name: &str, target: &str, params: IndicatorParams) -> Instruction {
        Instruction::Indicator(IndicatorInstruction {
            name: name.into(),
            params,
            target: target.into(),
        })
    }

    fn kinds(report: &ValidationReport) -> Vec<IssueKind> {
        report.issues().iter().map(|i| i.kind).collect()
    }

    #[test]
    fn accepts_well_formed_strategy() {
        let tree = Instruction::Compound(vec![
            indicator("RSI", "rsi", IndicatorParams::default()),
            op("threshold", "30"),
            if_("rsi < threshold and close > 0", trade("buy", "1"), None),
        ]);
        let report = validate(&tree);
        assert!(report.is_empty(), "{}", report);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn flags_read_before_bind() {
        let tree = Instruction::Compound(vec![op("y", "x + 1"), op("x", "2")]);
        let report = validate(&tree);
        assert_eq!(kinds(&report), vec![IssueKind::UnboundVariable]);
        assert_eq!(report.issues()[0].path.to_string(), "root.children[0]");
    }

    #[test]
    fn else_branch_cannot_see_then_bindings() {
        let tree = Instruction::Compound(vec![if_(
            "close > 100",
            op("x", "1"),
            Some(op("y", "x + 1")),
        )]);
        let report = validate(&tree);
        assert_eq!(kinds(&report), vec![IssueKind::UnboundVariable]);
        assert_eq!(report.issues()[0].path.to_string(), "root.children[0].else");
    }

    #[test]
    fn only_bindings_on_every_path_survive_an_if() {
        let both = Instruction::Compound(vec![
            if_("close > 1", op("x", "1"), Some(op("x", "2"))),
            op("z", "x"),
        ]);
        assert!(validate(&both).is_empty());

        let one = Instruction::Compound(vec![if_("close > 1", op("x", "1"), None), op("z", "x")]);
        let report = validate(&one);
        assert_eq!(kinds(&report), vec![IssueKind::UnboundVariable]);
        assert_eq!(report.issues()[0].path.to_string(), "root.children[1]");
    }

    #[test]
    fn multi_output_indicators_bind_suffixed_names() {
        let tree = Instruction::Compound(vec![
            indicator("macd", "m", IndicatorParams::default()),
            indicator("bollinger", "bb", IndicatorParams::default()),
            op("spread", "m - m_signal + m_histogram"),
            op("width", "bb_upper - bb_lower + bb_middle - bb"),
        ]);
        assert!(validate(&tree).is_empty());
    }

    #[test]
    fn flags_unknown_indicator_and_bad_params() {
        let tree = Instruction::Compound(vec![
            indicator("ichimoku", "i", IndicatorParams::default()),
            indicator(
                "rsi",
                "r",
                IndicatorParams {
                    period: Some(0),
                    ..Default::default()
                },
            ),
            indicator(
                "macd",
                "m",
                IndicatorParams {
                    fast: Some(30),
                    slow: Some(10),
                    ..Default::default()
                },
            ),
            op("sum", "i + r + m"),
        ]);
        let report = validate(&tree);
        assert_eq!(
            kinds(&report),
            vec![
                IssueKind::UnknownIndicator,
                IssueKind::InvalidParameter,
                IssueKind::InvalidParameter
            ]
        );
    }

    #[test]
    fn flags_malformed_trades() {
        let mut empty_symbol = trade("buy", "1");
        if let Instruction::Trade(t) = &mut empty_symbol {
            t.symbol = " ".into();
        }
        let tree = Instruction::Compound(vec![
            trade("hold", "1"),
            trade("sell", "0"),
            trade("buy", "-2"),
            empty_symbol,
            trade("buy", "qty"),
        ]);
        let report = validate(&tree);
        assert_eq!(
            kinds(&report),
            vec![
                IssueKind::InvalidTrade,
                IssueKind::InvalidTrade,
                IssueKind::InvalidTrade,
                IssueKind::InvalidTrade,
                IssueKind::UnboundVariable
            ]
        );
    }

    #[test]
    fn flags_invalid_nesting_and_waits() {
        let tree = Instruction::Compound(vec![
            Instruction::Compound(vec![]),
            if_("close > 1", Instruction::Wait(WaitCondition::Bars(1)), None),
            Instruction::Wait(WaitCondition::Bars(0)),
            Instruction::Wait(WaitCondition::Duration(TimeDelta::seconds(-5))),
            Instruction::Wait(WaitCondition::Until(parse("ready").unwrap())),
        ]);
        let report = validate(&tree);
        assert_eq!(
            kinds(&report),
            vec![
                IssueKind::InvalidNesting,
                IssueKind::InvalidNesting,
                IssueKind::InvalidParameter,
                IssueKind::InvalidParameter,
                IssueKind::UnboundVariable
            ]
        );
    }

    #[test]
    fn wait_in_else_with_real_then_is_fine() {
        let tree = Instruction::Compound(vec![if_(
            "close > 1",
            trade("buy", "1"),
            Some(Instruction::Wait(WaitCondition::Bars(1))),
        )]);
        assert!(validate(&tree).is_empty());
    }

    #[test]
    fn report_becomes_validation_error() {
        let report = validate(&Instruction::Compound(vec![]));
        let err = report.into_result().unwrap_err();
        assert_eq!(err.kind(), crate::domain::error::ErrorKind::Validation);
        assert!(err.to_string().contains("root: invalid nesting: empty block"));
    }

    fn arb_tree() -> impl Strategy<Value = Instruction> {
        let names = prop::sample::select(vec!["a", "b", "close", "x"]);
        let leaf = prop_oneof![
            (names.clone(), names.clone()).prop_map(|(t, v)| op(t, v)),
            (-2i64..3).prop_map(|n| Instruction::Wait(WaitCondition::Bars(n))),
            names.clone().prop_map(|t| indicator("ema", t, IndicatorParams::default())),
            Just(trade("buy", "1")),
        ];
        leaf.prop_recursive(4, 32, 4, move |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Instruction::Compound),
                (inner.clone(), prop::option::of(inner)).prop_map(|(t, e)| if_(
                    "close > 1",
                    t,
                    e
                )),
            ]
        })
    }

    proptest! {
        #[test]
        fn validate_never_panics(tree in arb_tree()) {
            let report = validate(&tree);
            for issue in report.issues() {
                prop_assert!(tree.at(&issue.path).is_some());
            }
        }
    }
}
