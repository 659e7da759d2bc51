//! Bollinger Bands indicator.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! Where StdDev is the sample standard deviation (divides by N-1).
//!
//! Default parameters: period=20, multiplier=2.0
//! Warmup: first (period-1) bars are invalid.

use crate::domain::bar::{Bar, PriceSource};
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub fn calculate_bollinger(
    bars: &[Bar],
    period: usize,
    stddev_mult_x100: u32,
    source: PriceSource,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Bollinger {
        period,
        stddev_mult_x100,
    };
    if period < 2 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let prices: Vec<f64> = bars.iter().map(|b| b.price(source)).collect();
    let mult = stddev_mult_x100 as f64 / 100.0;
    let warmup = period - 1;
    let mut values = Vec::with_capacity(bars.len());

    for (i, bar) in bars.iter().enumerate() {
        let valid = i >= warmup;

        let value = if valid {
            let window = &prices[i + 1 - period..=i];
            let middle = window.iter().sum::<f64>() / period as f64;
            let variance = window
                .iter()
                .map(|p| {
                    let diff = p - middle;
                    diff * diff
                })
                .sum::<f64>()
                / (period - 1) as f64;
            let stddev = variance.sqrt();

            IndicatorValue::Bollinger {
                upper: middle + mult * stddev,
                middle,
                lower: middle - mult * stddev,
            }
        } else {
            IndicatorValue::Bollinger {
                upper: 0.0,
                middle: 0.0,
                lower: 0.0,
            }
        };

        values.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid,
            value,
        });
    }

    IndicatorSeries {
        indicator_type,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;
    use approx::assert_relative_eq;

    fn bands(point: &IndicatorPoint) -> (f64, f64, f64) {
        match point.value {
            IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
            } => (upper, middle, lower),
            _ => panic!("Expected Bollinger value"),
        }
    }

    #[test]
    fn bollinger_sample_stddev() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_bollinger(&bars, 3, 200, PriceSource::Close);

        assert!(!series.values[0].valid);
        assert!(!series.values[1].valid);

        let expected = [(40.0, 20.0, 0.0), (50.0, 30.0, 10.0), (60.0, 40.0, 20.0)];
        for (i, (upper, middle, lower)) in expected.iter().enumerate() {
            let (u, m, l) = bands(&series.values[i + 2]);
            assert!(series.values[i + 2].valid);
            assert_relative_eq!(u, *upper, epsilon = 1e-9);
            assert_relative_eq!(m, *middle, epsilon = 1e-9);
            assert_relative_eq!(l, *lower, epsilon = 1e-9);
        }
    }

    #[test]
    fn bollinger_fractional_multiplier() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_bollinger(&bars, 3, 150, PriceSource::Close);
        let (u, _, l) = bands(&series.values[2]);
        assert_relative_eq!(u, 35.0, epsilon = 1e-9);
        assert_relative_eq!(l, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn bollinger_constant_prices_collapse() {
        let bars = make_bars(&[100.0; 5]);
        let series = calculate_bollinger(&bars, 3, 200, PriceSource::Close);
        let (u, m, l) = bands(&series.values[4]);
        assert_relative_eq!(u, 100.0);
        assert_relative_eq!(m, 100.0);
        assert_relative_eq!(l, 100.0);
    }

    #[test]
    fn bollinger_period_below_two_is_empty() {
        let bars = make_bars(&[1.0, 2.0]);
        assert!(calculate_bollinger(&bars, 1, 200, PriceSource::Close).values.is_empty());
    }
}
