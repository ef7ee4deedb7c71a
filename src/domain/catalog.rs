//! Rule catalog: the static domain knowledge every other component consults.
//!
//! Four tables, built once at startup and read-only afterwards:
//! - `OperationSpec`: per-operation arity, fixed timeframe, default params
//! - filter registry: canonical filter names, aliases, timeframe requirements
//! - metric map: metric names and aliases to enriched column names
//! - semantics matrix: operation x filter-kind to the filter's role
//!
//! The matrix is the single source of truth for what a filter *means* under a
//! given operation. The executor must resolve roles here before applying
//! anything as a row filter.

use std::collections::HashMap;

use crate::domain::query::{Cmp, FilterExpr, OperationKind, Params, SortDir};
use crate::domain::timeframe::Timeframe;

/// How a filter is interpreted for a given operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Plain row selection before the operation runs.
    Where,
    /// Handed to the operation as its condition (streak tagging,
    /// probability conditioning).
    Condition,
    /// Handed to the operation as its event marker (around, event
    /// distribution).
    Event,
    /// The pair is meaningless; the validator rejects it.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Weekday,
    Session,
    Event,
    Comparison,
    Consecutive,
    TimeOfDay,
    Pattern,
}

/// Registry entry for a named (categorical or pattern) filter.
#[derive(Debug, Clone, Copy)]
pub struct FilterEntry {
    pub name: &'static str,
    pub kind: FilterKind,
    /// Coarsest bar granularity the filter still works at. A session tag is
    /// invisible on daily bars, so sessions cap at 30 minutes.
    pub max_timeframe: Timeframe,
}

/// Per-operation constraints.
#[derive(Debug, Clone, Copy)]
pub struct OperationSpec {
    pub min_atoms: usize,
    pub max_atoms: usize,
    /// Some operations only make sense at one granularity (formation scans
    /// intraday bars for the daily extremum).
    pub fixed_timeframe: Option<Timeframe>,
    /// A lone atom is acceptable only when it carries a group key.
    pub lone_atom_needs_group: bool,
}

const WEEKDAYS: &[(&str, &[&str])] = &[
    ("monday", &["mon"]),
    ("tuesday", &["tue", "tues"]),
    ("wednesday", &["wed"]),
    ("thursday", &["thu", "thurs"]),
    ("friday", &["fri"]),
];

const SESSIONS: &[(&str, &[&str])] = &[
    ("rth", &["regular", "regular_hours", "day_session"]),
    ("eth", &["overnight", "globex", "extended", "after_hours"]),
];

const EVENTS: &[(&str, &[&str])] = &[
    ("opex", &["options_expiry", "expiration_friday", "witching"]),
    ("month_start", &["first_of_month"]),
    ("month_end", &["eom", "last_of_month"]),
    ("quarter_end", &["eoq"]),
];

const PATTERNS: &[(&str, &[&str])] = &[
    ("doji", &[]),
    ("hammer", &[]),
    ("shooting_star", &[]),
    ("engulfing_bull", &["bullish_engulfing"]),
    ("engulfing_bear", &["bearish_engulfing"]),
    ("inside_day", &["inside_bar"]),
    ("outside_day", &["outside_bar"]),
    ("gap_up", &[]),
    ("gap_down", &[]),
    ("opening_range_break", &["orb", "opening_range_breakout"]),
];

/// metric name -> enriched column
const METRICS: &[(&str, &str)] = &[
    ("change", "change_pct"),
    ("volatility", "range_pct"),
    ("range", "range_abs"),
    ("gap", "gap_pct"),
    ("volume", "volume"),
    ("open", "open"),
    ("high", "high"),
    ("low", "low"),
    ("close", "close"),
];

/// metric alias -> canonical metric
const METRIC_ALIASES: &[(&str, &str)] = &[
    ("return", "change"),
    ("pct_change", "change"),
    ("percent_change", "change"),
    ("performance", "change"),
    ("move", "change"),
    ("true_range", "range"),
    ("turnover", "volume"),
];

/// The metric the validator substitutes for an unknown name.
pub const DEFAULT_METRIC: &str = "change";

#[derive(Debug)]
pub struct Catalog {
    filters: HashMap<&'static str, FilterEntry>,
    filter_aliases: HashMap<&'static str, &'static str>,
    metrics: HashMap<&'static str, &'static str>,
    metric_aliases: HashMap<&'static str, &'static str>,
}

impl Catalog {
    pub fn new() -> Self {
        let mut filters = HashMap::new();
        let mut filter_aliases = HashMap::new();

        let mut insert = |table: &[(&'static str, &[&'static str])],
                          kind: FilterKind,
                          max_timeframe: Timeframe| {
            for (name, aliases) in table {
                filters.insert(
                    *name,
                    FilterEntry {
                        name: *name,
                        kind,
                        max_timeframe,
                    },
                );
                for alias in *aliases {
                    filter_aliases.insert(*alias, *name);
                }
            }
        };

        insert(WEEKDAYS, FilterKind::Weekday, Timeframe::Day1);
        insert(SESSIONS, FilterKind::Session, Timeframe::Min30);
        insert(EVENTS, FilterKind::Event, Timeframe::Day1);
        insert(PATTERNS, FilterKind::Pattern, Timeframe::Day1);

        // The opening-range break is the one pattern that needs intraday bars.
        if let Some(entry) = filters.get_mut("opening_range_break") {
            entry.max_timeframe = Timeframe::Min30;
        }

        let metrics = METRICS.iter().copied().collect();
        let metric_aliases = METRIC_ALIASES.iter().copied().collect();

        Catalog {
            filters,
            filter_aliases,
            metrics,
            metric_aliases,
        }
    }

    /// Canonical name for a categorical/pattern filter name or alias.
    pub fn canonical_filter(&self, name: &str) -> Option<&'static str> {
        let lowered = name.trim().to_lowercase();
        if let Some(entry) = self.filters.get(lowered.as_str()) {
            return Some(entry.name);
        }
        self.filter_aliases.get(lowered.as_str()).copied()
    }

    pub fn filter_entry(&self, canonical: &str) -> Option<&FilterEntry> {
        self.filters.get(canonical)
    }

    /// Canonical metric name for a name or alias, if known.
    pub fn canonical_metric(&self, name: &str) -> Option<&'static str> {
        let lowered = name.trim().to_lowercase();
        if self.metrics.contains_key(lowered.as_str()) {
            // Keys are 'static; re-resolve to get the static str back.
            return self.metrics.get_key_value(lowered.as_str()).map(|(k, _)| *k);
        }
        self.metric_aliases.get(lowered.as_str()).copied()
    }

    /// Enriched column backing a canonical metric name.
    pub fn metric_column(&self, canonical: &str) -> Option<&'static str> {
        self.metrics.get(canonical).copied()
    }

    /// Kind of a filter expression. `None` only for unknown categorical or
    /// pattern names, which the validator rejects up front.
    pub fn filter_kind(&self, filter: &FilterExpr) -> Option<FilterKind> {
        match filter {
            FilterExpr::Categorical { name } => {
                let canonical = self.canonical_filter(name)?;
                self.filter_entry(canonical).map(|e| e.kind)
            }
            FilterExpr::Pattern { name } => {
                self.canonical_filter(name).map(|_| FilterKind::Pattern)
            }
            FilterExpr::Comparison { .. } => Some(FilterKind::Comparison),
            FilterExpr::Consecutive { .. } => Some(FilterKind::Consecutive),
            FilterExpr::TimeOfDay { .. } => Some(FilterKind::TimeOfDay),
        }
    }

    /// Coarsest bar granularity at which the filter still works.
    pub fn filter_max_timeframe(&self, filter: &FilterExpr) -> Timeframe {
        match filter {
            FilterExpr::Categorical { name } | FilterExpr::Pattern { name } => self
                .canonical_filter(name)
                .and_then(|c| self.filter_entry(c))
                .map(|e| e.max_timeframe)
                .unwrap_or(Timeframe::Day1),
            FilterExpr::TimeOfDay { .. } => Timeframe::Min30,
            FilterExpr::Comparison { .. } | FilterExpr::Consecutive { .. } => Timeframe::Day1,
        }
    }

    /// Consecutive runs are a daily-color concept; they pin the timeframe to
    /// daily bars outright.
    pub fn filter_pins_daily(&self, filter: &FilterExpr) -> bool {
        matches!(filter, FilterExpr::Consecutive { .. })
    }

    pub fn operation_spec(&self, op: OperationKind) -> OperationSpec {
        match op {
            OperationKind::Compare => OperationSpec {
                min_atoms: 1,
                max_atoms: 4,
                fixed_timeframe: None,
                lone_atom_needs_group: true,
            },
            OperationKind::Correlation => OperationSpec {
                min_atoms: 2,
                max_atoms: 2,
                fixed_timeframe: None,
                lone_atom_needs_group: false,
            },
            OperationKind::Formation => OperationSpec {
                min_atoms: 1,
                max_atoms: 1,
                fixed_timeframe: Some(Timeframe::Min5),
                lone_atom_needs_group: false,
            },
            _ => OperationSpec {
                min_atoms: 1,
                max_atoms: 1,
                fixed_timeframe: None,
                lone_atom_needs_group: false,
            },
        }
    }

    /// Declared default parameters, merged in by the validator's final rule.
    pub fn default_params(&self, op: OperationKind) -> Params {
        let mut params = Params::default();
        match op {
            OperationKind::List => {
                params.n = Some(5);
                params.sort = Some(SortDir::Desc);
            }
            OperationKind::Around => {
                params.offset = Some(1);
            }
            OperationKind::Distribution => {
                params.bins = Some(10);
            }
            OperationKind::Probability => {
                params.offset = Some(1);
                params.outcome = Some(FilterExpr::Comparison {
                    metric: "change".to_string(),
                    cmp: Cmp::Gt,
                    value: 0.0,
                });
            }
            OperationKind::Formation => {
                params.extremum = Some(crate::domain::query::Extremum::High);
                params.bucket = Some(crate::domain::query::Bucket::Hour);
            }
            OperationKind::Streak => {
                params.min_len = Some(2);
            }
            OperationKind::Count | OperationKind::Compare | OperationKind::Correlation => {}
        }
        params
    }

    /// Where an operation cannot keep its fixed timeframe alongside a filter,
    /// this is the operation it degrades to.
    pub fn downgrade_for(&self, op: OperationKind) -> Option<OperationKind> {
        match op {
            OperationKind::Formation => Some(OperationKind::Distribution),
            _ => None,
        }
    }

    /// The semantics matrix.
    pub fn role(&self, op: OperationKind, kind: FilterKind) -> Role {
        use FilterKind::*;
        use OperationKind::*;
        match (op, kind) {
            (Streak, Comparison | Consecutive | Pattern) => Role::Condition,
            (Streak, Event) => Role::Invalid,
            (Around, Comparison | Consecutive | Pattern | Event) => Role::Event,
            (Probability, Comparison | Consecutive | Pattern | Event) => Role::Condition,
            (Distribution, Pattern | Event) => Role::Event,
            (Formation, Consecutive) => Role::Invalid,
            _ => Role::Where,
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::new()
    }
}
