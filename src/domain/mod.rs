//! Core domain types and logic.

pub mod query;
pub mod timeframe;
pub mod bar;
pub mod calendar;
pub mod catalog;
pub mod resolve;
pub mod validate;
pub mod plan;
pub mod enrich;
pub mod patterns;
pub mod ops;
pub mod executor;
pub mod config_validation;
pub mod error;
