#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
pub use tradelang::domain::bar::Bar;
use tradelang::ports::market_data_port::{MarketDataProvider, ProviderError};

/// Serves fixed bars per symbol. `with_feed` makes a symbol reveal one more
/// bar on every call; `with_stepped_feed` reveals one more bar per `step()`.
pub struct MockProvider {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, ProviderError>,
    feeds: Mutex<HashMap<String, Feed>>,
    pub calls: Mutex<usize>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
            feeds: Mutex::new(HashMap::new()),
            calls: Mutex::new(0),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_feed(self, symbol: &str, bars: Vec<Bar>) -> Self {
        let feed = Feed { seen: 0, auto: true };
        self.feeds.lock().unwrap().insert(symbol.to_string(), feed);
        self.with_bars(symbol, bars)
    }

    /// Starts with one visible bar.
    pub fn with_stepped_feed(self, symbol: &str, bars: Vec<Bar>) -> Self {
        let feed = Feed { seen: 1, auto: false };
        self.feeds.lock().unwrap().insert(symbol.to_string(), feed);
        self.with_bars(symbol, bars)
    }

    /// Reveal the next bar on every stepped feed.
    pub fn step(&self) {
        for feed in self.feeds.lock().unwrap().values_mut() {
            if !feed.auto {
                feed.seen += 1;
            }
        }
    }

    pub fn with_error(mut self, symbol: &str, error: ProviderError) -> Self {
        self.errors.insert(symbol.to_string(), error);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

struct Feed {
    seen: usize,
    auto: bool,
}

impl MarketDataProvider for MockProvider {
    fn get_bars(
        &self,
        symbol: &str,
        interval: &str,
        count: usize,
    ) -> Result<Vec<Bar>, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(error) = self.errors.get(symbol) {
            return Err(error.clone());
        }
        let bars = self
            .data
            .get(symbol)
            .ok_or_else(|| ProviderError::UnknownSymbol {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
            })?;

        let mut feeds = self.feeds.lock().unwrap();
        let visible = match feeds.get_mut(symbol) {
            Some(feed) => {
                if feed.auto {
                    feed.seen += 1;
                }
                feed.seen = feed.seen.min(bars.len());
                &bars[..feed.seen]
            }
            None => bars.as_slice(),
        };
        let start = visible.len().saturating_sub(count);
        Ok(visible[start..].to_vec())
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn make_bar(index: usize, close: f64) -> Bar {
    Bar {
        timestamp: start() + Duration::hours(index as i64),
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1000.0,
    }
}

/// Hourly bars starting 2024-01-01T00:00Z.
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| make_bar(i, c))
        .collect()
}

/// Flat market that drops sharply on bar 14, then recovers.
///
/// RSI(14) first becomes valid on bar 14 at about 20.6 and stays above 30
/// afterwards.
pub const OVERSOLD_CLOSES: [f64; 20] = [
    100.0, 101.0, 100.0, 101.0, 100.0, 101.0, 100.0, 101.0, 100.0, 101.0, 100.0, 101.0, 100.0,
    101.0, 80.0, 100.0, 110.0, 115.0, 118.0, 120.0,
];

pub const RSI_STRATEGY: &str = r#"{
    "name": "RSI dip buyer",
    "description": "Buy one unit when RSI(14) is oversold",
    "symbol": "BTCUSDT",
    "interval": "1h",
    "definition": {
        "type": "compound",
        "children": [
            {"type": "indicator", "name": "RSI", "target": "rsi", "params": {"period": 14}},
            {
                "type": "if",
                "condition": "rsi < 30",
                "then": {"type": "trade", "symbol": "BTCUSDT", "side": "buy", "size": 1},
                "else": {"type": "wait", "bars": 1}
            }
        ]
    }
}"#;

/// Render bars as a CSV file body.
pub fn bars_csv(bars: &[Bar]) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp.to_rfc3339(),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    out
}
