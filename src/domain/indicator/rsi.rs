//! RSI (Relative Strength Index) indicator.
//!
//! Uses Wilder's smoothing for average gain/loss calculation:
//! - First average: simple mean of gains/losses over first n changes
//! - Subsequent: avg = (prev_avg * (n-1) + current) / n
//!
//! Formula: RSI = 100 - (100 / (1 + avg_gain / avg_loss))
//! If avg_loss == 0: RSI = 100
//!
//! Warmup: first n bars are invalid (need n price changes for the first average).

use crate::domain::bar::{Bar, PriceSource};
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

fn rsi_from(avg_gain: f64, avg_loss: f64) -> f64 {
    let rsi = if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
    };
    rsi.clamp(0.0, 100.0)
}

pub fn calculate_rsi(bars: &[Bar], period: usize, source: PriceSource) -> IndicatorSeries {
    let invalid = |bar: &Bar| IndicatorPoint {
        timestamp: bar.timestamp,
        valid: false,
        value: IndicatorValue::Simple(0.0),
    };

    if period == 0 || bars.len() < 2 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Rsi(period),
            values: bars.iter().map(invalid).collect(),
        };
    }

    let mut values = Vec::with_capacity(bars.len());
    values.push(invalid(&bars[0]));

    let mut sum_gain = 0.0;
    let mut sum_loss = 0.0;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for (i, pair) in bars.windows(2).enumerate() {
        let change = pair[1].price(source) - pair[0].price(source);
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { -change } else { 0.0 };

        if i < period - 1 {
            sum_gain += gain;
            sum_loss += loss;
            values.push(invalid(&pair[1]));
            continue;
        }

        if i == period - 1 {
            avg_gain = (sum_gain + gain) / period as f64;
            avg_loss = (sum_loss + loss) / period as f64;
        } else {
            avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
            avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        }

        values.push(IndicatorPoint {
            timestamp: pair[1].timestamp,
            valid: true,
            value: IndicatorValue::Simple(rsi_from(avg_gain, avg_loss)),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Rsi(period),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn simple(point: &IndicatorPoint) -> f64 {
        match point.value {
            IndicatorValue::Simple(v) => v,
            _ => panic!("Expected Simple value"),
        }
    }

    #[test]
    fn rsi_warmup() {
        let bars = make_bars(&[44.0, 44.5, 43.5, 44.0, 44.5]);
        let series = calculate_rsi(&bars, 3, PriceSource::Close);
        assert_eq!(series.values.len(), 5);
        assert!(!series.values[0].valid);
        assert!(!series.values[2].valid);
        assert!(series.values[3].valid);
        assert!(series.values[4].valid);
    }

    #[test]
    fn rsi_first_value_uses_simple_average() {
        // changes: +0.5, -1.0, +0.5 → avg gain 1/3, avg loss 1/3 → 50
        let bars = make_bars(&[44.0, 44.5, 43.5, 44.0]);
        let series = calculate_rsi(&bars, 3, PriceSource::Close);
        assert_relative_eq!(simple(&series.values[3]), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn rsi_wilder_smoothing() {
        // seed: gains 1/3, losses 1/3; next change +1.0
        // avg_gain = (1/3*2 + 1)/3 = 5/9, avg_loss = (1/3*2)/3 = 2/9 → rs = 2.5
        let bars = make_bars(&[44.0, 44.5, 43.5, 44.0, 45.0]);
        let series = calculate_rsi(&bars, 3, PriceSource::Close);
        let expected = 100.0 - 100.0 / 3.5;
        assert_relative_eq!(simple(&series.values[4]), expected, epsilon = 1e-9);
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let bars = make_bars(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let series = calculate_rsi(&bars, 3, PriceSource::Close);
        assert_relative_eq!(simple(&series.values[4]), 100.0);
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let bars = make_bars(&[5.0, 4.0, 3.0, 2.0, 1.0]);
        let series = calculate_rsi(&bars, 3, PriceSource::Close);
        assert_relative_eq!(simple(&series.values[4]), 0.0);
    }

    #[test]
    fn rsi_flat_prices_is_100() {
        let bars = make_bars(&[7.0; 6]);
        let series = calculate_rsi(&bars, 3, PriceSource::Close);
        assert_relative_eq!(simple(&series.values[5]), 100.0);
    }

    #[test]
    fn rsi_short_input_is_all_invalid() {
        let bars = make_bars(&[1.0]);
        let series = calculate_rsi(&bars, 14, PriceSource::Close);
        assert_eq!(series.values.len(), 1);
        assert!(!series.values[0].valid);
    }

    proptest! {
        #[test]
        fn rsi_stays_in_bounds(prices in proptest::collection::vec(1.0f64..1000.0, 16..80)) {
            let bars = make_bars(&prices);
            let series = calculate_rsi(&bars, 14, PriceSource::Close);
            prop_assert_eq!(series.values.len(), prices.len());
            for point in series.values.iter().filter(|p| p.valid) {
                let v = simple(point);
                prop_assert!((0.0..=100.0).contains(&v));
            }
        }
    }
}
