//! Domain error types.

use crate::domain::validator::ValidationReport;
use std::fmt;

/// A parse error with position information for expression parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let column = input
            .get(..self.position)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(self.position);
        let caret = " ".repeat(column) + "^";
        format!("{input}\n{caret}\n{err}", err = self)
    }
}

/// Coarse classification of a [`DslError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    Validation,
    Evaluation,
    UnknownVariable,
    UnknownIndicator,
    Trade,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Validation => "validation",
            ErrorKind::Evaluation => "evaluation",
            ErrorKind::UnknownVariable => "unknown_variable",
            ErrorKind::UnknownIndicator => "unknown_indicator",
            ErrorKind::Trade => "trade",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Errors raised while parsing, validating or executing a strategy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DslError {
    #[error("parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error(transparent)]
    Expression(#[from] ParseError),

    #[error("strategy rejected: {0}")]
    Validation(ValidationReport),

    #[error("evaluation error: {message}")]
    Evaluation { message: String },

    #[error("insufficient data for {indicator}: have {bars} bars, need {minimum}")]
    InsufficientData {
        indicator: String,
        bars: usize,
        minimum: usize,
    },

    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("unknown indicator '{name}'")]
    UnknownIndicator { name: String },

    #[error("invalid trade: {reason}")]
    Trade { reason: String },

    #[error("step limit of {limit} instructions exceeded")]
    Timeout { limit: usize },
}

impl DslError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DslError::Parse { .. } | DslError::Expression(_) => ErrorKind::Parse,
            DslError::Validation(_) => ErrorKind::Validation,
            DslError::Evaluation { .. } | DslError::InsufficientData { .. } => {
                ErrorKind::Evaluation
            }
            DslError::UnknownVariable { .. } => ErrorKind::UnknownVariable,
            DslError::UnknownIndicator { .. } => ErrorKind::UnknownIndicator,
            DslError::Trade { .. } => ErrorKind::Trade,
            DslError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        DslError::Evaluation {
            message: message.into(),
        }
    }

    pub(crate) fn trade(reason: impl Into<String>) -> Self {
        DslError::Trade {
            reason: reason.into(),
        }
    }
}

/// Top-level error type for the tradelang binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Dsl(#[from] DslError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&AppError> for std::process::ExitCode {
    fn from(err: &AppError) -> Self {
        let code: u8 = match err {
            AppError::Io(_) => 1,
            AppError::ConfigParse { .. }
            | AppError::ConfigMissing { .. }
            | AppError::ConfigInvalid { .. } => 2,
            AppError::Data { .. } => 3,
            AppError::Dsl(e) => match e.kind() {
                ErrorKind::Parse | ErrorKind::Validation => 4,
                _ => 5,
            },
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_context_places_caret() {
        let err = ParseError {
            message: "unexpected character '.'".into(),
            position: 5,
        };
        let shown = err.display_with_context("close.x");
        let lines: Vec<&str> = shown.lines().collect();
        assert_eq!(lines[0], "close.x");
        assert_eq!(lines[1], "     ^");
        assert!(lines[2].contains("position 5"));
    }

    #[test]
    fn kinds() {
        assert_eq!(
            DslError::InsufficientData {
                indicator: "RSI(14)".into(),
                bars: 3,
                minimum: 15
            }
            .kind(),
            ErrorKind::Evaluation
        );
        assert_eq!(
            DslError::from(ParseError {
                message: "x".into(),
                position: 0
            })
            .kind(),
            ErrorKind::Parse
        );
        assert_eq!(DslError::Timeout { limit: 10 }.kind(), ErrorKind::Timeout);
        assert_eq!(DslError::trade("bad").kind(), ErrorKind::Trade);
    }

    #[test]
    fn exit_codes_distinguish_categories() {
        use std::process::ExitCode;

        let parse: AppError = DslError::Parse {
            path: "root".into(),
            message: "bad".into(),
        }
        .into();
        assert_eq!(format!("{:?}", ExitCode::from(&parse)), format!("{:?}", ExitCode::from(4)));

        let eval: AppError = DslError::evaluation("boom").into();
        assert_eq!(format!("{:?}", ExitCode::from(&eval)), format!("{:?}", ExitCode::from(5)));

        let cfg = AppError::ConfigMissing {
            section: "engine".into(),
            key: "symbol".into(),
        };
        assert_eq!(format!("{:?}", ExitCode::from(&cfg)), format!("{:?}", ExitCode::from(2)));
    }

    #[test]
    fn messages() {
        let err = DslError::UnknownVariable { name: "rsi".into() };
        assert_eq!(err.to_string(), "unknown variable 'rsi'");
        let err = AppError::ConfigInvalid {
            section: "engine".into(),
            key: "history_bars".into(),
            reason: "must be positive".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid config value [engine] history_bars: must be positive"
        );
    }
}
