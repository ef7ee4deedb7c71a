//! Concrete adapter implementations for ports.

pub mod csv_bars;
pub mod file_config_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_bars;
