//! Port traits: the narrow interfaces between the core and the outside world.

pub mod config_port;
pub mod decision_port;
pub mod market_data_port;
