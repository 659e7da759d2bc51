//! Instruction tree data structures.
//!
//! A strategy is a tree of instructions rooted at a `Compound`:
//! - `Compound`: ordered children
//! - `If`: condition with a `then` branch and an optional `else` branch
//! - `Indicator`: compute an indicator and bind its latest value
//! - `Operation`: evaluate an expression and bind the result
//! - `Trade`: emit a trade decision
//! - `Wait`: suspend the run until a condition is met
//!
//! Trees are immutable once parsed; execution state lives in the context.

use crate::domain::bar::PriceSource;
use crate::domain::expr::Expr;
use chrono::TimeDelta;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Compound(Vec<Instruction>),
    If {
        condition: Expr,
        then_branch: Box<Instruction>,
        else_branch: Option<Box<Instruction>>,
    },
    Indicator(IndicatorInstruction),
    Operation {
        target: String,
        expr: Expr,
    },
    Trade(TradeInstruction),
    Wait(WaitCondition),
}

impl Instruction {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Instruction::Compound(_) => "compound",
            Instruction::If { .. } => "if",
            Instruction::Indicator(_) => "indicator",
            Instruction::Operation { .. } => "operation",
            Instruction::Trade(_) => "trade",
            Instruction::Wait(_) => "wait",
        }
    }

    /// Follow `path` from this node.
    pub fn at(&self, path: &InstructionPath) -> Option<&Instruction> {
        let mut node = self;
        for segment in path.segments() {
            node = match (segment, node) {
                (PathSegment::Child(i), Instruction::Compound(children)) => children.get(*i)?,
                (PathSegment::Then, Instruction::If { then_branch, .. }) => &**then_branch,
                (PathSegment::Else, Instruction::If { else_branch, .. }) => {
                    else_branch.as_deref()?
                }
                _ => return None,
            };
        }
        Some(node)
    }

    /// Total number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        match self {
            Instruction::Compound(children) => {
                1 + children.iter().map(Instruction::node_count).sum::<usize>()
            }
            Instruction::If {
                then_branch,
                else_branch,
                ..
            } => {
                1 + then_branch.node_count()
                    + else_branch.as_ref().map(|e| e.node_count()).unwrap_or(0)
            }
            _ => 1,
        }
    }
}

/// Raw indicator parameters as written in the definition.
///
/// Integer parameters are kept signed so the validator can report
/// non-positive values instead of the parser rejecting them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorParams {
    pub period: Option<i64>,
    pub fast: Option<i64>,
    pub slow: Option<i64>,
    pub signal: Option<i64>,
    pub multiplier: Option<f64>,
    pub mode: Option<String>,
    pub window: Option<i64>,
    pub source: PriceSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorInstruction {
    pub name: String,
    pub params: IndicatorParams,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeInstruction {
    pub symbol: String,
    pub side: String,
    pub size: Expr,
    pub price: Option<Expr>,
    pub stop: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaitCondition {
    /// Resume after this many further ticks.
    Bars(i64),
    /// Resume once the market clock has advanced by this much.
    Duration(TimeDelta),
    /// Resume on the first tick where the expression holds.
    Until(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Child(usize),
    Then,
    Else,
}

/// Location of a node in the tree, rendered as `root.children[2].then`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InstructionPath {
    segments: Vec<PathSegment>,
}

impl InstructionPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn push(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    pub fn child(&self, index: usize) -> Self {
        self.push(PathSegment::Child(index))
    }

    pub fn then_branch(&self) -> Self {
        self.push(PathSegment::Then)
    }

    pub fn else_branch(&self) -> Self {
        self.push(PathSegment::Else)
    }
}

impl fmt::Display for InstructionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("root")?;
        for segment in &self.segments {
            match segment {
                PathSegment::Child(i) => write!(f, ".children[{}]", i)?,
                PathSegment::Then => f.write_str(".then")?,
                PathSegment::Else => f.write_str(".else")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait(n: i64) -> Instruction {
        Instruction::Wait(WaitCondition::Bars(n))
    }

    fn sample_tree() -> Instruction {
        Instruction::Compound(vec![
            Instruction::Operation {
                target: "x".into(),
                expr: Expr::Number(1.0),
            },
            Instruction::If {
                condition: Expr::Bool(true),
                then_branch: Box::new(Instruction::Compound(vec![wait(1), wait(2)])),
                else_branch: Some(Box::new(wait(3))),
            },
        ])
    }

    #[test]
    fn path_display() {
        let path = InstructionPath::root().child(2).then_branch().child(0);
        assert_eq!(path.to_string(), "root.children[2].then.children[0]");
        assert_eq!(InstructionPath::root().to_string(), "root");
        assert_eq!(
            InstructionPath::root().child(1).else_branch().to_string(),
            "root.children[1].else"
        );
    }

    #[test]
    fn follow_path() {
        let tree = sample_tree();
        let path = InstructionPath::root().child(1).then_branch().child(1);
        assert_eq!(tree.at(&path), Some(&wait(2)));
        let path = InstructionPath::root().child(1).else_branch();
        assert_eq!(tree.at(&path), Some(&wait(3)));
        assert_eq!(tree.at(&InstructionPath::root()), Some(&tree));
    }

    #[test]
    fn follow_path_mismatch() {
        let tree = sample_tree();
        assert_eq!(tree.at(&InstructionPath::root().child(5)), None);
        assert_eq!(tree.at(&InstructionPath::root().then_branch()), None);
        assert_eq!(
            tree.at(&InstructionPath::root().child(0).child(0)),
            None
        );
    }

    #[test]
    fn node_count_and_kind() {
        let tree = sample_tree();
        assert_eq!(tree.node_count(), 7);
        assert_eq!(tree.kind_name(), "compound");
        assert_eq!(wait(1).kind_name(), "wait");
    }
}
