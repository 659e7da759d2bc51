//! Trade decisions emitted by the interpreter.

use crate::domain::error::DslError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl FromStr for Side {
    type Err = DslError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Ok(Side::Buy),
            "sell" | "short" => Ok(Side::Sell),
            other => Err(DslError::trade(format!(
                "unknown side '{}' (expected buy or sell)",
                other
            ))),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

/// An order intent for an external execution layer. Never an executed order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeDecision {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl TradeDecision {
    /// Build a decision, rejecting empty symbols and non-positive or
    /// non-finite quantities.
    pub fn new(
        symbol: &str,
        side: Side,
        size: f64,
        price: Option<f64>,
        stop: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, DslError> {
        if symbol.trim().is_empty() {
            return Err(DslError::trade("symbol must not be empty"));
        }
        check_positive("size", size)?;
        if let Some(p) = price {
            check_positive("price", p)?;
        }
        if let Some(s) = stop {
            check_positive("stop", s)?;
        }
        Ok(Self {
            symbol: symbol.trim().to_string(),
            side,
            size,
            price,
            stop,
            timestamp,
        })
    }
}

fn check_positive(field: &str, value: f64) -> Result<(), DslError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DslError::trade(format!(
            "{} must be a positive finite number, got {}",
            field, value
        )));
    }
    Ok(())
}

impl fmt::Display for TradeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.side, self.size, self.symbol)?;
        if let Some(p) = self.price {
            write!(f, " @ {}", p)?;
        }
        if let Some(s) = self.stop {
            write!(f, " stop {}", s)?;
        }
        write!(f, " ({})", self.timestamp.to_rfc3339())
    }
}
