//! Configuration loading and validation.
//!
//! Reads the INI sections the binary needs and turns them into typed
//! settings, failing on the first missing or invalid value.
//!
//! ```ini
//! [engine]
//! symbol = BTCUSDT
//! interval = 1h
//! history_bars = 500
//! max_steps = 10000
//! context_policy = persist
//!
//! [data]
//! directory = data
//!
//! [binance]
//! base_url = https://api.binance.com
//! timeout_secs = 10
//!
//! [output]
//! path = decisions.jsonl
//! append = false
//! ```

use crate::domain::error::AppError;
use crate::domain::interpreter::{
    ContextPolicy, DEFAULT_HISTORY_BARS, DEFAULT_MAX_STEPS, EngineConfig,
};
use crate::domain::strategy::Strategy;
use crate::ports::config_port::ConfigPort;
use std::path::PathBuf;

pub const DEFAULT_BINANCE_URL: &str = "https://api.binance.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct BinanceSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub path: Option<PathBuf>,
    pub append: bool,
}

/// Build the engine settings from `[engine]`.
///
/// `symbol` and `interval` fall back to the strategy document's metadata.
pub fn load_engine_config(
    config: &dyn ConfigPort,
    strategy: &Strategy,
) -> Result<EngineConfig, AppError> {
    let symbol = non_empty(config, "engine", "symbol")
        .or_else(|| strategy.symbol.clone())
        .ok_or_else(|| missing("engine", "symbol"))?;
    let interval = non_empty(config, "engine", "interval")
        .or_else(|| strategy.interval.clone())
        .ok_or_else(|| missing("engine", "interval"))?;

    let context_policy = match non_empty(config, "engine", "context_policy") {
        Some(value) => value
            .parse::<ContextPolicy>()
            .map_err(|reason| invalid("engine", "context_policy", reason))?,
        None => ContextPolicy::default(),
    };

    Ok(EngineConfig {
        symbol,
        interval,
        history_bars: positive_int(config, "engine", "history_bars", DEFAULT_HISTORY_BARS)?,
        max_steps: positive_int(config, "engine", "max_steps", DEFAULT_MAX_STEPS)?,
        context_policy,
    })
}

/// Directory of `<SYMBOL>_<INTERVAL>.csv` files from `[data]`.
pub fn data_directory(config: &dyn ConfigPort) -> Result<PathBuf, AppError> {
    non_empty(config, "data", "directory")
        .map(PathBuf::from)
        .ok_or_else(|| missing("data", "directory"))
}

pub fn binance_settings(config: &dyn ConfigPort) -> Result<BinanceSettings, AppError> {
    let base_url =
        non_empty(config, "binance", "base_url").unwrap_or_else(|| DEFAULT_BINANCE_URL.into());
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(invalid(
            "binance",
            "base_url",
            format!("'{}' is not an http(s) URL", base_url),
        ));
    }
    let timeout_secs =
        positive_int(config, "binance", "timeout_secs", DEFAULT_TIMEOUT_SECS as usize)? as u64;
    Ok(BinanceSettings {
        base_url: base_url.trim_end_matches('/').to_string(),
        timeout_secs,
    })
}

pub fn output_settings(config: &dyn ConfigPort) -> OutputSettings {
    OutputSettings {
        path: non_empty(config, "output", "path").map(PathBuf::from),
        append: config.get_bool("output", "append", false),
    }
}

fn non_empty(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn positive_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, AppError> {
    let Some(raw) = non_empty(config, section, key) else {
        return Ok(default);
    };
    let value: i64 = raw
        .parse()
        .map_err(|_| invalid(section, key, format!("'{}' is not an integer", raw)))?;
    if value <= 0 {
        return Err(invalid(section, key, format!("{} must be positive", key)));
    }
    usize::try_from(value).map_err(|_| invalid(section, key, format!("{} is too large", value)))
}

fn missing(section: &str, key: &str) -> AppError {
    AppError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> AppError {
    AppError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}
