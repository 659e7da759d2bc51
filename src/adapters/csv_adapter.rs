//! CSV file market data adapter.
//!
//! Reads `<SYMBOL>_<INTERVAL>.csv` from a base directory. Columns are
//! `timestamp,open,high,low,close,volume` with a header row. Timestamps may be
//! RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), `YYYY-MM-DD`, or Unix seconds.

use crate::domain::bar::Bar;
use crate::ports::market_data_port::{MarketDataProvider, ProviderError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, interval: &str) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", symbol, interval))
    }

    /// Every bar in the file, oldest first.
    pub fn load_all(&self, symbol: &str, interval: &str) -> Result<Vec<Bar>, ProviderError> {
        let path = self.csv_path(symbol, interval);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProviderError::UnknownSymbol {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
            },
            _ => ProviderError::Unavailable(format!("failed to read {}: {}", path.display(), e)),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (row, result) in rdr.records().enumerate() {
            let record = result
                .map_err(|e| ProviderError::Malformed(format!("CSV parse error: {}", e)))?;
            let line = row + 2;

            let raw_ts = record.get(0).ok_or_else(|| {
                ProviderError::Malformed(format!("line {}: missing timestamp column", line))
            })?;
            let timestamp = parse_timestamp(raw_ts).ok_or_else(|| {
                ProviderError::Malformed(format!("line {}: invalid timestamp '{}'", line, raw_ts))
            })?;

            let number = |index: usize, name: &str| -> Result<f64, ProviderError> {
                let raw = record.get(index).ok_or_else(|| {
                    ProviderError::Malformed(format!("line {}: missing {} column", line, name))
                })?;
                raw.trim().parse::<f64>().map_err(|e| {
                    ProviderError::Malformed(format!(
                        "line {}: invalid {} value '{}': {}",
                        line, name, raw, e
                    ))
                })
            };

            bars.push(Bar {
                timestamp,
                open: number(1, "open")?,
                high: number(2, "high")?,
                low: number(3, "low")?,
                close: number(4, "close")?,
                volume: number(5, "volume")?,
            });
        }

        bars.sort_by_key(|b| b.timestamp);
        debug!(symbol, interval, bars = bars.len(), path = %path.display(), "loaded CSV bars");
        Ok(bars)
    }

    /// Symbols with a file for `interval`, sorted.
    pub fn list_symbols(&self, interval: &str) -> Result<Vec<String>, ProviderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            ProviderError::Unavailable(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let suffix = format!("_{}.csv", interval);
        let mut symbols = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| {
                ProviderError::Unavailable(format!("directory entry error: {}", e))
            })?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            if let Some(symbol) = name_str.strip_suffix(&suffix) {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

impl MarketDataProvider for CsvAdapter {
    fn get_bars(
        &self,
        symbol: &str,
        interval: &str,
        count: usize,
    ) -> Result<Vec<Bar>, ProviderError> {
        let mut bars = self.load_all(symbol, interval)?;
        if bars.is_empty() {
            return Err(ProviderError::Unavailable(format!(
                "{} has no rows",
                self.csv_path(symbol, interval).display()
            )));
        }
        let start = bars.len().saturating_sub(count);
        Ok(bars.split_off(start))
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
