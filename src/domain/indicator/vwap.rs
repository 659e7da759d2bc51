//! Volume Weighted Average Price indicator.
//!
//! VWAP = Σ(price × volume) / Σ(volume) over a span that depends on the mode:
//! the whole window, the current UTC day, or the trailing n bars.
//! A span with zero total volume yields an invalid point.

use crate::domain::bar::{Bar, PriceSource};
use crate::domain::indicator::{
    IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue, VwapMode,
};

pub fn calculate_vwap(bars: &[Bar], mode: VwapMode, source: PriceSource) -> IndicatorSeries {
    let indicator_type = IndicatorType::Vwap(mode);
    if let VwapMode::Rolling(0) = mode {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let weighted: Vec<f64> = bars.iter().map(|b| b.price(source) * b.volume).collect();
    let mut values = Vec::with_capacity(bars.len());
    let mut sum_pv = 0.0;
    let mut sum_v = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        let (window_full, pv, v) = match mode {
            VwapMode::Rolling(n) => {
                // Summed per window; a running sum leaves residue once volume leaves it.
                let start = (i + 1).saturating_sub(n);
                let pv: f64 = weighted[start..=i].iter().sum();
                let v: f64 = bars[start..=i].iter().map(|b| b.volume).sum();
                (i + 1 >= n, pv, v)
            }
            VwapMode::Cumulative | VwapMode::Session => {
                let new_session = matches!(mode, VwapMode::Session)
                    && (i == 0 || bars[i - 1].timestamp.date_naive() != bar.timestamp.date_naive());
                if new_session {
                    sum_pv = 0.0;
                    sum_v = 0.0;
                }
                sum_pv += weighted[i];
                sum_v += bar.volume;
                (true, sum_pv, sum_v)
            }
        };

        let valid = window_full && v > 0.0;
        values.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid,
            value: IndicatorValue::Simple(if valid { pv / v } else { 0.0 }),
        });
    }

    IndicatorSeries {
        indicator_type,
        values,
    }
}
