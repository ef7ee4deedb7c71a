//! Port traits the engine consumes; adapters implement them.

pub mod bar_store;
pub mod config_port;
