//! Configuration validation.
//!
//! Validates all config fields before the engine touches the store.

use crate::domain::error::EngineError;
use crate::domain::query::parse_clock;
use crate::ports::config_port::ConfigPort;
use chrono::{NaiveDate, NaiveTime};

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), EngineError> {
    validate_data_kind(config)?;
    validate_data_path(config)?;
    validate_symbol(config)?;
    validate_session_config(config)?;
    Ok(())
}

/// The store-independent half: session clock and holiday calendar.
pub fn validate_session_config(config: &dyn ConfigPort) -> Result<(), EngineError> {
    validate_session_times(config)?;
    validate_extra_holidays(config)?;
    Ok(())
}

fn validate_data_kind(config: &dyn ConfigPort) -> Result<(), EngineError> {
    let kind = match config.get_string("data", "kind") {
        Some(s) if !s.trim().is_empty() => s,
        _ => {
            return Err(EngineError::ConfigMissing {
                section: "data".to_string(),
                key: "kind".to_string(),
            });
        }
    };
    match kind.trim() {
        "csv" | "sqlite" => Ok(()),
        other => Err(EngineError::ConfigInvalid {
            section: "data".to_string(),
            key: "kind".to_string(),
            reason: format!("unknown store kind '{}', expected csv or sqlite", other),
        }),
    }
}

fn validate_data_path(config: &dyn ConfigPort) -> Result<(), EngineError> {
    match config.get_string("data", "path") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(EngineError::ConfigMissing {
            section: "data".to_string(),
            key: "path".to_string(),
        }),
    }
}

fn validate_symbol(config: &dyn ConfigPort) -> Result<(), EngineError> {
    match config.get_string("engine", "symbol") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(EngineError::ConfigMissing {
            section: "engine".to_string(),
            key: "symbol".to_string(),
        }),
    }
}

fn validate_session_times(config: &dyn ConfigPort) -> Result<(), EngineError> {
    let rth_open = parse_clock_key(config, "rth_open")?
        .unwrap_or_else(|| NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN));
    let rth_close = parse_clock_key(config, "rth_close")?
        .unwrap_or_else(|| NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN));
    parse_clock_key(config, "day_open")?;

    if rth_open >= rth_close {
        return Err(EngineError::ConfigInvalid {
            section: "session".to_string(),
            key: "rth_open".to_string(),
            reason: "rth_open must be before rth_close".to_string(),
        });
    }
    Ok(())
}

/// A `[session]` clock key: absent is fine, present must parse.
fn parse_clock_key(
    config: &dyn ConfigPort,
    key: &str,
) -> Result<Option<NaiveTime>, EngineError> {
    match config.get_string("session", key) {
        None => Ok(None),
        Some(s) => parse_clock(&s)
            .map(Some)
            .ok_or_else(|| EngineError::ConfigInvalid {
                section: "session".to_string(),
                key: key.to_string(),
                reason: format!("invalid time '{}', expected HH:MM", s),
            }),
    }
}

fn validate_extra_holidays(config: &dyn ConfigPort) -> Result<(), EngineError> {
    let Some(list) = config.get_string("calendar", "extra_holidays") else {
        return Ok(());
    };
    for item in list.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if NaiveDate::parse_from_str(item, "%Y-%m-%d").is_err() {
            return Err(EngineError::ConfigInvalid {
                section: "calendar".to_string(),
                key: "extra_holidays".to_string(),
                reason: format!("invalid date '{}', expected YYYY-MM-DD", item),
            });
        }
    }
    Ok(())
}
