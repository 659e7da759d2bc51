//! tradelang — a small declarative DSL for trading strategies.
//!
//! Strategies are JSON instruction trees evaluated one tick at a time
//! against market data. Hexagonal architecture: domain logic in [`domain`],
//! port traits in [`ports`], concrete implementations in [`adapters`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
