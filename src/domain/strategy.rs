//! Strategy document: a definition tree plus descriptive metadata.

use crate::domain::instruction::Instruction;
use crate::domain::validator::{ValidationReport, validate};

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub name: String,
    pub description: String,
    /// Symbol the strategy was written for; the engine config wins if both
    /// are set.
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub definition: Instruction,
}

impl Strategy {
    pub fn new(name: impl Into<String>, definition: Instruction) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            symbol: None,
            interval: None,
            definition,
        }
    }

    pub fn validate(&self) -> ValidationReport {
        validate(&self.definition)
    }
}
