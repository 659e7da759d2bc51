//! Technical indicator implementations.
//!
//! This module provides types for representing indicator values and series:
//! - `IndicatorPoint`: A single point in an indicator time series
//! - `IndicatorValue`: Enum for different indicator output shapes
//! - `IndicatorType`: Enum for indicator identity + parameters (serves as HashMap key)
//! - `IndicatorSeries`: A time series of indicator values
//! - `IndicatorKind`: Indicator family as named in a strategy definition
//!
//! [`compute`] is the single entry point used by the interpreter; it checks
//! the bar count against [`IndicatorType::min_bars`] before dispatching.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod frame;
pub mod macd;
pub mod rsi;
pub mod vwap;

pub use atr::calculate_atr;
pub use bollinger::calculate_bollinger;
pub use ema::{EmaState, calculate_ema};
pub use frame::Frame;
pub use macd::calculate_macd;
pub use rsi::calculate_rsi;
pub use vwap::calculate_vwap;

use crate::domain::bar::{Bar, PriceSource};
use crate::domain::error::DslError;
use crate::domain::instruction::IndicatorParams;
use chrono::{DateTime, Utc};
use std::fmt;

pub const DEFAULT_PERIOD: usize = 14;
pub const DEFAULT_BOLLINGER_PERIOD: usize = 20;
pub const DEFAULT_BOLLINGER_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

impl IndicatorValue {
    /// Values in the order of [`IndicatorType::field_names`].
    pub fn components(&self) -> Vec<f64> {
        match self {
            IndicatorValue::Simple(v) => vec![*v],
            IndicatorValue::Macd {
                line,
                signal,
                histogram,
            } => vec![*line, *signal, *histogram],
            IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
            } => vec![*upper, *lower, *middle],
        }
    }

    /// Variable bindings produced for `target`.
    ///
    /// Multi-output indicators bind the primary value to `target` and the
    /// remaining outputs under suffixed names.
    pub fn bindings(&self, target: &str) -> Vec<(String, f64)> {
        match self {
            IndicatorValue::Simple(v) => vec![(target.to_string(), *v)],
            IndicatorValue::Macd {
                line,
                signal,
                histogram,
            } => vec![
                (target.to_string(), *line),
                (format!("{}_signal", target), *signal),
                (format!("{}_histogram", target), *histogram),
            ],
            IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
            } => vec![
                (target.to_string(), *middle),
                (format!("{}_upper", target), *upper),
                (format!("{}_lower", target), *lower),
                (format!("{}_middle", target), *middle),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VwapMode {
    /// Over every bar in the window.
    Cumulative,
    /// Reset at each UTC day boundary.
    Session,
    /// Over the trailing `n` bars.
    Rolling(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Ema(usize),
    Rsi(usize),
    Atr(usize),
    Vwap(VwapMode),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

impl IndicatorType {
    /// Fewest bars that yield at least one valid point.
    pub fn min_bars(&self) -> usize {
        match self {
            IndicatorType::Ema(period) | IndicatorType::Atr(period) => *period,
            IndicatorType::Rsi(period) => period + 1,
            IndicatorType::Vwap(VwapMode::Rolling(window)) => *window,
            IndicatorType::Vwap(_) => 1,
            IndicatorType::Macd { fast, slow, signal } => {
                (*fast).max(*slow) + signal.saturating_sub(1)
            }
            IndicatorType::Bollinger { period, .. } => *period,
        }
    }

    /// Output column names, matching [`IndicatorValue::components`].
    pub fn field_names(&self) -> Vec<String> {
        match self {
            IndicatorType::Ema(period) => vec![format!("EMA_{}", period)],
            IndicatorType::Rsi(_) => vec!["RSI".to_string()],
            IndicatorType::Atr(_) => vec!["ATR".to_string()],
            IndicatorType::Vwap(_) => vec!["VWAP".to_string()],
            IndicatorType::Macd { .. } => vec![
                "MACD".to_string(),
                "MACD_Signal".to_string(),
                "MACD_Histogram".to_string(),
            ],
            IndicatorType::Bollinger { .. } => vec![
                "Upper_Band".to_string(),
                "Lower_Band".to_string(),
                "Middle_Band".to_string(),
            ],
        }
    }

    fn has_zero_parameter(&self) -> bool {
        match self {
            IndicatorType::Ema(p) | IndicatorType::Rsi(p) | IndicatorType::Atr(p) => *p == 0,
            IndicatorType::Vwap(VwapMode::Rolling(w)) => *w == 0,
            IndicatorType::Vwap(_) => false,
            IndicatorType::Macd { fast, slow, signal } => *fast == 0 || *slow == 0 || *signal == 0,
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => *period == 0 || *stddev_mult_x100 == 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    /// Point at the last bar, if it is valid.
    pub fn current(&self) -> Option<&IndicatorPoint> {
        self.values.last().filter(|p| p.valid)
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Atr(period) => write!(f, "ATR({})", period),
            IndicatorType::Vwap(VwapMode::Cumulative) => write!(f, "VWAP"),
            IndicatorType::Vwap(VwapMode::Session) => write!(f, "VWAP(session)"),
            IndicatorType::Vwap(VwapMode::Rolling(n)) => write!(f, "VWAP({})", n),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}

/// Indicator family as named in a strategy definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorKind {
    Atr,
    Bollinger,
    Ema,
    Macd,
    Rsi,
    Vwap,
}

impl IndicatorKind {
    /// Case-insensitive lookup; `-`, `_` and spaces are ignored.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "atr" => Some(IndicatorKind::Atr),
            "bollinger" | "bollingerbands" | "bb" => Some(IndicatorKind::Bollinger),
            "ema" => Some(IndicatorKind::Ema),
            "macd" => Some(IndicatorKind::Macd),
            "rsi" => Some(IndicatorKind::Rsi),
            "vwap" => Some(IndicatorKind::Vwap),
            _ => None,
        }
    }

    /// Names bound when this indicator writes to `target`.
    pub fn bound_names(&self, target: &str) -> Vec<String> {
        let suffixes: &[&str] = match self {
            IndicatorKind::Macd => &["", "_signal", "_histogram"],
            IndicatorKind::Bollinger => &["", "_upper", "_lower", "_middle"],
            _ => &[""],
        };
        suffixes
            .iter()
            .map(|s| format!("{}{}", target, s))
            .collect()
    }

    fn accepts(&self, param: &str) -> bool {
        match self {
            IndicatorKind::Atr | IndicatorKind::Ema | IndicatorKind::Rsi => param == "period",
            IndicatorKind::Bollinger => matches!(param, "period" | "multiplier"),
            IndicatorKind::Macd => matches!(param, "fast" | "slow" | "signal"),
            IndicatorKind::Vwap => matches!(param, "mode" | "window"),
        }
    }

    /// Resolve raw parameters into a concrete [`IndicatorType`].
    ///
    /// Returns a human-readable reason on the first invalid parameter.
    /// Bollinger multipliers are keyed in hundredths, so a multiplier with
    /// more than two decimal places is rejected rather than rounded.
    pub fn configure(&self, params: &IndicatorParams) -> Result<IndicatorType, String> {
        let supplied = [
            ("period", params.period.is_some()),
            ("fast", params.fast.is_some()),
            ("slow", params.slow.is_some()),
            ("signal", params.signal.is_some()),
            ("multiplier", params.multiplier.is_some()),
            ("mode", params.mode.is_some()),
            ("window", params.window.is_some()),
        ];
        for (name, present) in supplied {
            if present && !self.accepts(name) {
                return Err(format!("parameter '{}' does not apply to {:?}", name, self));
            }
        }

        match self {
            IndicatorKind::Ema => Ok(IndicatorType::Ema(positive(
                "period",
                params.period,
                DEFAULT_PERIOD,
            )?)),
            IndicatorKind::Rsi => Ok(IndicatorType::Rsi(positive(
                "period",
                params.period,
                DEFAULT_PERIOD,
            )?)),
            IndicatorKind::Atr => Ok(IndicatorType::Atr(positive(
                "period",
                params.period,
                DEFAULT_PERIOD,
            )?)),
            IndicatorKind::Macd => {
                let fast = positive("fast", params.fast, macd::DEFAULT_FAST)?;
                let slow = positive("slow", params.slow, macd::DEFAULT_SLOW)?;
                let signal = positive("signal", params.signal, macd::DEFAULT_SIGNAL)?;
                if fast >= slow {
                    return Err(format!(
                        "fast period ({}) must be shorter than slow period ({})",
                        fast, slow
                    ));
                }
                Ok(IndicatorType::Macd { fast, slow, signal })
            }
            IndicatorKind::Bollinger => {
                let period = positive("period", params.period, DEFAULT_BOLLINGER_PERIOD)?;
                if period < 2 {
                    return Err(format!("period must be at least 2, got {}", period));
                }
                let multiplier = params.multiplier.unwrap_or(DEFAULT_BOLLINGER_MULTIPLIER);
                if !multiplier.is_finite() || multiplier <= 0.0 {
                    return Err(format!("multiplier must be positive, got {}", multiplier));
                }
                let scaled = multiplier * 100.0;
                let stddev_mult_x100 = scaled.round();
                if (scaled - stddev_mult_x100).abs() > 1e-6 {
                    return Err(format!(
                        "multiplier {} has more than two decimal places",
                        multiplier
                    ));
                }
                if stddev_mult_x100 < 1.0 || stddev_mult_x100 > u32::MAX as f64 {
                    return Err(format!("multiplier {} is out of range", multiplier));
                }
                Ok(IndicatorType::Bollinger {
                    period,
                    stddev_mult_x100: stddev_mult_x100 as u32,
                })
            }
            IndicatorKind::Vwap => {
                let mode = params
                    .mode
                    .as_deref()
                    .map(|m| m.trim().to_ascii_lowercase());
                match (mode.as_deref(), params.window) {
                    (None, None) | (Some("cumulative"), None) => {
                        Ok(IndicatorType::Vwap(VwapMode::Cumulative))
                    }
                    (Some("session"), None) => Ok(IndicatorType::Vwap(VwapMode::Session)),
                    (None, Some(w)) | (Some("rolling"), Some(w)) => {
                        let window = positive("window", Some(w), 0)?;
                        Ok(IndicatorType::Vwap(VwapMode::Rolling(window)))
                    }
                    (Some("rolling"), None) => {
                        Err("rolling VWAP requires a 'window' parameter".to_string())
                    }
                    (Some(m), None) => Err(format!(
                        "unknown VWAP mode '{}' (expected cumulative, session or rolling)",
                        m
                    )),
                    (Some(m), Some(_)) => {
                        Err(format!("'window' only applies to rolling VWAP, not '{}'", m))
                    }
                }
            }
        }
    }
}

fn positive(name: &str, value: Option<i64>, default: usize) -> Result<usize, String> {
    match value {
        None => Ok(default),
        Some(v) if v > 0 => usize::try_from(v).map_err(|_| format!("{} {} is too large", name, v)),
        Some(v) => Err(format!("{} must be positive, got {}", name, v)),
    }
}

/// Compute `indicator_type` over `bars`, reading prices from `source`.
pub fn compute(
    indicator_type: &IndicatorType,
    bars: &[Bar],
    source: PriceSource,
) -> Result<IndicatorSeries, DslError> {
    if indicator_type.has_zero_parameter() {
        return Err(DslError::evaluation(format!(
            "{} has a zero-length parameter",
            indicator_type
        )));
    }
    let minimum = indicator_type.min_bars();
    if bars.len() < minimum {
        return Err(DslError::InsufficientData {
            indicator: indicator_type.to_string(),
            bars: bars.len(),
            minimum,
        });
    }

    let series = match indicator_type {
        IndicatorType::Ema(period) => calculate_ema(bars, *period, source),
        IndicatorType::Rsi(period) => calculate_rsi(bars, *period, source),
        IndicatorType::Atr(period) => calculate_atr(bars, *period),
        IndicatorType::Vwap(mode) => calculate_vwap(bars, *mode, source),
        IndicatorType::Macd { fast, slow, signal } => {
            calculate_macd(bars, *fast, *slow, *signal, source)
        }
        IndicatorType::Bollinger {
            period,
            stddev_mult_x100,
        } => calculate_bollinger(bars, *period, *stddev_mult_x100, source),
    };
    Ok(series)
}
