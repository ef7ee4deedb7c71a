//! Query description data structures.
//!
//! This module defines the structured form a query arrives in:
//! - `Step`: one unit of work (operation + atoms + params + optional dependency)
//! - `Atom`: the smallest query unit (when + what + filter + group + timeframe)
//! - `TimeExpr`: absolute or relative period expression
//! - `FilterExpr`: tagged filter union, exactly one variant per value
//! - `Params`: optional per-operation parameters
//!
//! The producer upstream is unreliable, so everything here is the *candidate*
//! shape: names may be aliases, combinations may be illegal. The validator
//! repairs or rejects; nothing in this module judges legality.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    List,
    Count,
    Compare,
    Correlation,
    Around,
    Streak,
    Distribution,
    Probability,
    Formation,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::List => "list",
            OperationKind::Count => "count",
            OperationKind::Compare => "compare",
            OperationKind::Correlation => "correlation",
            OperationKind::Around => "around",
            OperationKind::Streak => "streak",
            OperationKind::Distribution => "distribution",
            OperationKind::Probability => "probability",
            OperationKind::Formation => "formation",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparator shared by comparison, consecutive and time-of-day filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Cmp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
            Cmp::Eq => "==",
        }
    }

    pub fn holds_f64(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Cmp::Lt => lhs < rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Ge => lhs >= rhs,
            Cmp::Eq => lhs == rhs,
        }
    }

    pub fn holds_usize(&self, lhs: usize, rhs: usize) -> bool {
        match self {
            Cmp::Lt => lhs < rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Ge => lhs >= rhs,
            Cmp::Eq => lhs == rhs,
        }
    }

    pub fn holds_time(&self, lhs: NaiveTime, rhs: NaiveTime) -> bool {
        match self {
            Cmp::Lt => lhs < rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Ge => lhs >= rhs,
            Cmp::Eq => lhs == rhs,
        }
    }
}

impl fmt::Display for Cmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Green,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKey {
    Weekday,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extremum {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Hour,
    HalfHour,
}

/// Period expression, resolved by the planner against a reference date and
/// the trading calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeExpr {
    Year { year: i32 },
    Quarter { year: i32, quarter: u32 },
    Month { year: i32, month: u32 },
    Between { start: NaiveDate, end: NaiveDate },
    LastDays { days: u32 },
    Yesterday,
}

/// Filter expression. Exactly one variant is active per value; what the
/// filter *means* for a given operation is decided by the semantics matrix,
/// not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterExpr {
    Categorical {
        name: String,
    },
    Comparison {
        metric: String,
        cmp: Cmp,
        value: f64,
    },
    Consecutive {
        color: Color,
        cmp: Cmp,
        length: u32,
    },
    TimeOfDay {
        cmp: Cmp,
        #[serde(with = "hhmm")]
        time: NaiveTime,
    },
    Pattern {
        name: String,
    },
}

impl FilterExpr {
    /// Short label for plan output and group naming.
    pub fn label(&self) -> String {
        match self {
            FilterExpr::Categorical { name } => name.clone(),
            FilterExpr::Comparison { metric, cmp, value } => {
                format!("{}{}{}", metric, cmp, value)
            }
            FilterExpr::Consecutive { color, cmp, length } => {
                let color = match color {
                    Color::Green => "green",
                    Color::Red => "red",
                };
                format!("{}x{}{}", color, cmp, length)
            }
            FilterExpr::TimeOfDay { cmp, time } => format!("time{}{}", cmp, time.format("%H:%M")),
            FilterExpr::Pattern { name } => name.clone(),
        }
    }
}

/// Parse a clock string as `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_clock(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid clock time '{}'", s)))
    }
}

/// Optional per-operation parameters. Defaults are filled by the validator
/// from the operation's declared defaults, so downstream code can rely on
/// the fields it needs being present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Params {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortDir>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bins: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extremum: Option<Extremum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<Bucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FilterExpr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_len: Option<u32>,
}

/// Smallest unit of a query: which period, which metric, optionally filtered,
/// grouped and at which granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub when: TimeExpr,
    pub what: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupKey>,
    #[serde(default)]
    pub timeframe: Timeframe,
}

/// One unit of work. `depends_on` lets a step consume the materialized rows
/// of an earlier step instead of a fresh store fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub id: String,
    pub operation: OperationKind,
    pub atoms: Vec<Atom>,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
}
