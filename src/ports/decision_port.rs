//! Outbound port for trade decisions.

use crate::domain::decision::TradeDecision;
use crate::domain::error::AppError;

/// Receives decisions in the order the interpreter produced them.
pub trait DecisionSink {
    fn record(&mut self, decision: &TradeDecision) -> Result<(), AppError>;

    fn flush(&mut self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Keeps decisions in memory.
impl DecisionSink for Vec<TradeDecision> {
    fn record(&mut self, decision: &TradeDecision) -> Result<(), AppError> {
        self.push(decision.clone());
        Ok(())
    }
}
