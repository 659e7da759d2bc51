//! Execution context threaded through a strategy run.
//!
//! Holds the variable bindings, the market snapshot for the current tick and,
//! when a run is paused on a `Wait`, the point to resume from.

use crate::domain::bar::{Bar, MARKET_FIELDS};
use crate::domain::error::DslError;
use crate::domain::instruction::InstructionPath;
use crate::domain::value::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Most recent bars for the configured symbol/interval, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub interval: String,
    pub bars: Vec<Bar>,
}

impl MarketSnapshot {
    pub fn latest(&self) -> Option<&Bar> {
        self.bars.last()
    }
}

/// What a paused `Wait` is waiting for.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitState {
    Bars { remaining: u64 },
    Deadline(DateTime<Utc>),
    Until,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suspension {
    pub at: InstructionPath,
    pub state: WaitState,
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    variables: BTreeMap<String, Value>,
    snapshot: Option<MarketSnapshot>,
    suspension: Option<Suspension>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a variable; market fields of the latest bar are readable
    /// unless shadowed by an explicit binding.
    pub fn get(&self, name: &str) -> Result<Value, DslError> {
        if let Some(v) = self.variables.get(name) {
            return Ok(v.clone());
        }
        if MARKET_FIELDS.contains(&name) {
            if let Some(value) = self.latest_bar().and_then(|bar| bar.field(name)) {
                return Ok(Value::Number(value));
            }
        }
        Err(DslError::UnknownVariable {
            name: name.to_string(),
        })
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    pub fn clear_variables(&mut self) {
        self.variables.clear();
    }

    pub fn snapshot(&self) -> Option<&MarketSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn set_snapshot(&mut self, snapshot: MarketSnapshot) {
        self.snapshot = Some(snapshot);
    }

    pub fn latest_bar(&self) -> Option<&Bar> {
        self.snapshot.as_ref().and_then(MarketSnapshot::latest)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension.is_some()
    }

    /// Path of the `Wait` a paused run will resume from.
    pub fn suspended_at(&self) -> Option<&InstructionPath> {
        self.suspension.as_ref().map(|s| &s.at)
    }

    pub(crate) fn suspend(&mut self, suspension: Suspension) {
        self.suspension = Some(suspension);
    }

    pub(crate) fn take_suspension(&mut self) -> Option<Suspension> {
        self.suspension.take()
    }

    pub(crate) fn clear_suspension(&mut self) {
        self.suspension = None;
    }
}
