//! Binance REST market data adapter.
//!
//! Fetches klines from `GET /api/v3/klines`. Each kline is a JSON array:
//! `[open_time_ms, "open", "high", "low", "close", "volume", close_time_ms, ...]`.
//! Bars are stamped with the kline open time. The newest kline is usually
//! still forming; klines whose close time is in the future are dropped, so
//! only closed bars reach a strategy. One request returns at most 1000
//! klines.

use crate::domain::bar::Bar;
use crate::domain::config_validation::BinanceSettings;
use crate::ports::market_data_port::{MarketDataProvider, ProviderError};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const MAX_KLINES: usize = 1000;

/// Error body returned by the exchange on 4xx responses.
#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// Binance error code for an unknown trading pair.
const INVALID_SYMBOL: i64 = -1121;

pub struct BinanceAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
    timeout_secs: u64,
}

impl BinanceAdapter {
    pub fn new(settings: &BinanceSettings) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(concat!("tradelang/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            timeout_secs: settings.timeout_secs,
        })
    }

    fn klines_url(&self, symbol: &str, interval: &str, limit: usize) -> String {
        format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol.to_ascii_uppercase(),
            interval,
            limit
        )
    }
}

impl MarketDataProvider for BinanceAdapter {
    fn get_bars(
        &self,
        symbol: &str,
        interval: &str,
        count: usize,
    ) -> Result<Vec<Bar>, ProviderError> {
        // One extra for the kline that may still be open.
        let limit = count.saturating_add(1).clamp(2, MAX_KLINES);
        if limit <= count {
            warn!(requested = count, limit, "kline request capped");
        }
        let url = self.klines_url(symbol, interval, limit);
        debug!(%url, "fetching klines");

        let resp = self.client.get(&url).send().map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    seconds: self.timeout_secs,
                }
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::Auth(format!("HTTP {} from {}", status, self.base_url)));
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(match serde_json::from_str::<ApiError>(&body) {
                Ok(api) if api.code == INVALID_SYMBOL => ProviderError::UnknownSymbol {
                    symbol: symbol.to_string(),
                    interval: interval.to_string(),
                },
                Ok(api) => ProviderError::Network(format!("HTTP {}: {} ({})", status, api.msg, api.code)),
                Err(_) => ProviderError::Network(format!("HTTP {}", status)),
            });
        }

        let body: Value = resp
            .json()
            .map_err(|e| ProviderError::Malformed(format!("failed to parse klines: {}", e)))?;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        let mut bars = parse_klines(&body, now_ms)?;
        let excess = bars.len().saturating_sub(count);
        bars.drain(..excess);
        if bars.is_empty() {
            return Err(ProviderError::Unavailable(format!(
                "no klines for {} {}",
                symbol, interval
            )));
        }
        Ok(bars)
    }
}

/// Convert a klines response body into closed bars, oldest first.
///
/// A kline whose close time is after `now_ms` is still open and skipped.
pub fn parse_klines(body: &Value, now_ms: i64) -> Result<Vec<Bar>, ProviderError> {
    let rows = body
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("klines response is not an array".into()))?;

    let mut bars = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let fields = row
            .as_array()
            .filter(|f| f.len() >= 6)
            .ok_or_else(|| ProviderError::Malformed(format!("kline {} has fewer than 6 fields", i)))?;

        let open_time = fields[0]
            .as_i64()
            .ok_or_else(|| ProviderError::Malformed(format!("kline {}: bad open time", i)))?;
        let timestamp = DateTime::from_timestamp_millis(open_time).ok_or_else(|| {
            ProviderError::Malformed(format!("kline {}: open time {} out of range", i, open_time))
        })?;

        if let Some(close_time) = fields
            .get(6)
            .and_then(Value::as_i64)
            .filter(|&t| t > now_ms)
        {
            debug!(kline = i, close_time, "skipping open kline");
            continue;
        }

        let number = |index: usize, name: &str| -> Result<f64, ProviderError> {
            let parsed = match &fields[index] {
                Value::String(s) => s.parse::<f64>().ok(),
                Value::Number(n) => n.as_f64(),
                _ => None,
            };
            parsed.ok_or_else(|| ProviderError::Malformed(format!("kline {}: bad {}", i, name)))
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
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    // 2024-01-01T02:00:00Z
    const NOW: i64 = 1704074400000;

    #[test]
    fn parses_klines() {
        let body = json!([
            [1704067200000i64, "42000.1", "42500.0", "41800.5", "42300.0", "123.45",
             1704070799999i64, "0", 100, "0", "0", "0"],
            [1704070800000i64, "42300.0", "42400.0", "42100.0", "42200.0", "98.7",
             1704074399999i64, "0", 80, "0", "0", "0"]
        ]);
        let bars = parse_klines(&body, NOW).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(
            bars[0].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(bars[0].open, 42000.1);
        assert_eq!(bars[0].volume, 123.45);
        assert_eq!(bars[1].close, 42200.0);
    }

    #[test]
    fn skips_open_kline() {
        let body = json!([
            [1704067200000i64, "1", "2", "0.5", "1.5", "10", 1704070799999i64],
            [1704070800000i64, "1.5", "2", "1", "1.8", "5", 1704074399999i64],
            [1704074400000i64, "1.8", "1.9", "1.7", "1.75", "0.2", 1704077999999i64]
        ]);
        let bars = parse_klines(&body, NOW).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 1.8);

        let later = parse_klines(&body, 1704078000000).unwrap();
        assert_eq!(later.len(), 3);
    }

    #[test]
    fn rejects_malformed_klines() {
        assert!(matches!(
            parse_klines(&json!({"code": -1121}), NOW),
            Err(ProviderError::Malformed(_))
        ));
        assert!(parse_klines(&json!([[1, "2", "3"]]), NOW).is_err());
        assert!(parse_klines(&json!([[1704067200000i64, "x", "1", "1", "1", "1"]]), NOW).is_err());
    }

    #[test]
    fn builds_request_url() {
        let adapter = BinanceAdapter::new(&BinanceSettings {
            base_url: "http://localhost:9000".into(),
            timeout_secs: 1,
        })
        .unwrap();
        assert_eq!(
            adapter.klines_url("btcusdt", "1h", 500),
            "http://localhost:9000/api/v3/klines?symbol=BTCUSDT&interval=1h&limit=500"
        );
    }
}
