//! Core domain types and logic.

pub mod backtest;
pub mod bar;
pub mod config_validation;
pub mod context;
pub mod decision;
pub mod error;
pub mod expr;
pub mod expr_eval;
pub mod expr_parser;
pub mod indicator;
pub mod instruction;
pub mod interpreter;
pub mod strategy;
pub mod strategy_parser;
pub mod validator;
pub mod value;
