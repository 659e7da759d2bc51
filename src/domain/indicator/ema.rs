//! Exponential Moving Average indicator.
//!
//! k = 2/(n+1), seed with first SMA, then EMA[i] = P[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) points hold the running SMA and are invalid.

use crate::domain::bar::{Bar, PriceSource};
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

/// Incremental EMA, fed one price at a time.
#[derive(Debug, Clone)]
pub struct EmaState {
    period: usize,
    k: f64,
    count: usize,
    sum: f64,
    ema: f64,
}

impl EmaState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            k: 2.0 / (period as f64 + 1.0),
            count: 0,
            sum: 0.0,
            ema: 0.0,
        }
    }

    /// Feed the next price; returns `(valid, value)` for it.
    pub fn update(&mut self, price: f64) -> (bool, f64) {
        self.count += 1;
        if self.count < self.period {
            self.sum += price;
            (false, self.sum / self.count as f64)
        } else if self.count == self.period {
            self.sum += price;
            self.ema = self.sum / self.period as f64;
            (true, self.ema)
        } else {
            self.ema = price * self.k + self.ema * (1.0 - self.k);
            (true, self.ema)
        }
    }

    pub fn is_ready(&self) -> bool {
        self.period > 0 && self.count >= self.period
    }
}

/// Raw EMA values over `prices`, warmup points holding the running SMA.
pub(crate) fn ema_values(prices: &[f64], period: usize) -> Vec<f64> {
    let mut state = EmaState::new(period);
    prices.iter().map(|&p| state.update(p).1).collect()
}

pub fn calculate_ema(bars: &[Bar], period: usize, source: PriceSource) -> IndicatorSeries {
    if period == 0 || bars.is_empty() {
        return IndicatorSeries {
            indicator_type: IndicatorType::Ema(period),
            values: Vec::new(),
        };
    }

    let mut state = EmaState::new(period);
    let values = bars
        .iter()
        .map(|bar| {
            let (valid, value) = state.update(bar.price(source));
            IndicatorPoint {
                timestamp: bar.timestamp,
                valid,
                value: IndicatorValue::Simple(value),
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Ema(period),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;
    use approx::assert_relative_eq;

    fn simple(point: &IndicatorPoint) -> f64 {
        match point.value {
            IndicatorValue::Simple(v) => v,
            _ => panic!("Expected Simple value"),
        }
    }

    #[test]
    fn ema_warmup() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3, PriceSource::Close);

        assert_eq!(series.values.len(), bars.len());
        assert!(!series.values[0].valid);
        assert!(!series.values[1].valid);
        assert!(series.values[2].valid);
        assert!(series.values[4].valid);
    }

    #[test]
    fn ema_warmup_holds_running_sma() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 3, PriceSource::Close);
        assert_relative_eq!(simple(&series.values[0]), 10.0);
        assert_relative_eq!(simple(&series.values[1]), 15.0);
    }

    #[test]
    fn ema_seed_is_sma() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 3, PriceSource::Close);
        assert_relative_eq!(simple(&series.values[2]), 20.0);
    }

    #[test]
    fn ema_recursive_calculation() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3, PriceSource::Close);

        let k = 2.0 / 4.0;
        let sma = 20.0;
        let ema_3 = 40.0 * k + sma * (1.0 - k);
        let ema_4 = 50.0 * k + ema_3 * (1.0 - k);
        assert_relative_eq!(simple(&series.values[3]), ema_3);
        assert_relative_eq!(simple(&series.values[4]), ema_4);
    }

    #[test]
    fn ema_period_1_tracks_price() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 1, PriceSource::Close);
        for (point, bar) in series.values.iter().zip(&bars) {
            assert!(point.valid);
            assert_relative_eq!(simple(point), bar.close);
        }
    }

    #[test]
    fn incremental_matches_batch() {
        let prices = [3.0, 7.5, 2.0, 9.0, 4.4, 6.1, 8.8, 1.2, 5.5];
        let bars = make_bars(&prices);
        let batch = calculate_ema(&bars, 4, PriceSource::Close);

        let mut state = EmaState::new(4);
        for (i, &p) in prices.iter().enumerate() {
            let (valid, value) = state.update(p);
            assert_eq!(valid, batch.values[i].valid);
            assert_relative_eq!(value, simple(&batch.values[i]), epsilon = 1e-12);
        }
        assert!(state.is_ready());
    }

    #[test]
    fn ema_reads_selected_source() {
        let mut bars = make_bars(&[10.0, 10.0]);
        bars[0].high = 12.0;
        bars[1].high = 14.0;
        let series = calculate_ema(&bars, 2, PriceSource::High);
        assert_relative_eq!(simple(&series.values[1]), 13.0);
    }

    #[test]
    fn ema_empty_and_zero_period() {
        assert!(calculate_ema(&[], 3, PriceSource::Close).values.is_empty());
        let bars = make_bars(&[10.0, 20.0]);
        assert!(calculate_ema(&bars, 0, PriceSource::Close).values.is_empty());
    }

    #[test]
    fn ema_indicator_type() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 5, PriceSource::Close);
        assert_eq!(series.indicator_type, IndicatorType::Ema(5));
    }
}
