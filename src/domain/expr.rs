//! Expression AST for the sandboxed evaluator.
//!
//! This module defines the closed expression language used in conditions,
//! operations and trade fields:
//! - `Expr`: literals, variables, arithmetic, comparisons, logic, builtin calls
//! - `Builtin`: the fixed registry of callable functions
//! - `BinaryOp` / `CompareOp` / `UnaryOp`: operator tags

use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Min,
    Max,
    Abs,
    Implies,
    Iff,
    Xor,
    Nand,
    Nor,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Builtin::Min),
            "max" => Some(Builtin::Max),
            "abs" => Some(Builtin::Abs),
            "implies" => Some(Builtin::Implies),
            "iff" => Some(Builtin::Iff),
            "xor" => Some(Builtin::Xor),
            "nand" => Some(Builtin::Nand),
            "nor" => Some(Builtin::Nor),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Implies => "implies",
            Builtin::Iff => "iff",
            Builtin::Xor => "xor",
            Builtin::Nand => "nand",
            Builtin::Nor => "nor",
        }
    }

    /// Accepted argument counts as (min, max); `None` means unbounded.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Builtin::Min | Builtin::Max => (1, None),
            Builtin::Abs => (1, Some(1)),
            Builtin::Implies | Builtin::Iff | Builtin::Xor | Builtin::Nand | Builtin::Nor => {
                (2, Some(2))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Text(String),
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `a < b <= c` holds when every adjacent pair holds.
    Compare {
        first: Box<Expr>,
        rest: Vec<(CompareOp, Expr)>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Variable names this expression reads, in sorted order.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) | Expr::Bool(_) | Expr::Text(_) => {}
            Expr::Variable(name) => {
                out.insert(name.clone());
            }
            Expr::Unary { operand, .. } => operand.collect_variables(out),
            Expr::Binary { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::Compare { first, rest } => {
                first.collect_variables(out);
                for (_, e) in rest {
                    e.collect_variables(out);
                }
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.collect_variables(out);
                }
            }
        }
    }

    /// The numeric value of a constant expression such as `5` or `-2.5`.
    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expr::Number(n) => Some(*n),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => operand.as_constant().map(|n| -n),
            Expr::Unary {
                op: UnaryOp::Plus,
                operand,
            } => operand.as_constant(),
            _ => None,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
        };
        f.write_str(s)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Text(s) => write!(f, "\"{}\"", s),
            Expr::Variable(name) => f.write_str(name),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg => write!(f, "-({})", operand),
                UnaryOp::Plus => write!(f, "+({})", operand),
                UnaryOp::Not => write!(f, "not ({})", operand),
            },
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Compare { first, rest } => {
                write!(f, "({}", first)?;
                for (op, e) in rest {
                    write!(f, " {} {}", op, e)?;
                }
                f.write_str(")")
            }
            Expr::And(l, r) => write!(f, "({} and {})", l, r),
            Expr::Or(l, r) => write!(f, "({} or {})", l, r),
            Expr::Call { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                f.write_str(")")
            }
        }
    }
}
