//! Bars augmented with named indicator columns.

use crate::domain::bar::{Bar, PriceSource};
use crate::domain::error::DslError;
use crate::domain::indicator::{IndicatorSeries, IndicatorType, compute};
use std::collections::BTreeMap;

/// A bar sequence with indicator output columns attached by field name
/// (`RSI`, `EMA_20`, `Upper_Band`, ...). Invalid points are `None`.
#[derive(Debug, Clone)]
pub struct Frame {
    bars: Vec<Bar>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl Frame {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            bars,
            columns: BTreeMap::new(),
        }
    }

    /// Attach every output field of `series`.
    ///
    /// Returns an error if the series does not line up with the bars.
    pub fn augment(&mut self, series: &IndicatorSeries) -> Result<(), DslError> {
        if series.values.len() != self.bars.len() {
            return Err(DslError::evaluation(format!(
                "{} has {} points for {} bars",
                series.indicator_type,
                series.values.len(),
                self.bars.len()
            )));
        }
        let names = series.indicator_type.field_names();
        let mut columns: Vec<Vec<Option<f64>>> =
            vec![Vec::with_capacity(self.bars.len()); names.len()];
        for point in &series.values {
            for (col, v) in columns.iter_mut().zip(point.value.components()) {
                col.push(if point.valid { Some(v) } else { None });
            }
        }
        for (name, col) in names.into_iter().zip(columns) {
            self.columns.insert(name, col);
        }
        Ok(())
    }

    /// Compute each indicator over the bars and attach its columns.
    pub fn with_indicators(
        bars: Vec<Bar>,
        indicators: &[(IndicatorType, PriceSource)],
    ) -> Result<Self, DslError> {
        let mut frame = Frame::new(bars);
        for (indicator_type, source) in indicators {
            let series = compute(indicator_type, &frame.bars, *source)?;
            frame.augment(&series)?;
        }
        Ok(frame)
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Value of `name` at the last bar.
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.column(name).and_then(|c| c.last().copied().flatten())
    }
}
