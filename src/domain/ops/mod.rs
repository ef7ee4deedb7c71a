//! The analytical operations. Each one is a pure function from prepared
//! series to an [`OperationResult`]; fetching, enrichment and where-filtering
//! happen upstream in the executor.

pub mod around;
pub mod compare;
pub mod correlation;
pub mod count;
pub mod distribution;
pub mod formation;
pub mod list;
pub mod probability;
pub mod streak;

use std::cmp::Ordering;

use chrono::{NaiveTime, Timelike};
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::domain::catalog::Catalog;
use crate::domain::enrich::{BarTable, EnrichedBar};
use crate::domain::error::EngineError;
use crate::domain::plan::{PlanMode, resolve_predicate};
use crate::domain::query::{Bucket, Color, FilterExpr, GroupKey, OperationKind, Params};
use crate::domain::resolve::{ResolvedPredicate, SessionSpec, time_in_window};

/// What an operation hands back: JSON-shaped rows, a keyed scalar summary,
/// and the full match count (rows may be truncated, `row_count` never is).
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub rows: Vec<Map<String, Value>>,
    pub summary: Map<String, Value>,
    pub row_count: usize,
}

/// One fetched series with its where-filtering already applied.
pub struct Series<'a> {
    pub label: String,
    pub table: &'a BarTable,
    /// Indices into `table.rows` that passed the request predicates, in order.
    pub selected: Vec<usize>,
}

pub struct OpInput<'a> {
    pub mode: PlanMode,
    pub series: Vec<Series<'a>>,
    /// One metric column per planned atom.
    pub metrics: &'a [String],
    pub params: &'a Params,
    pub condition: Option<&'a FilterExpr>,
    pub event: Option<&'a FilterExpr>,
    pub group: Option<GroupKey>,
    pub catalog: &'a Catalog,
    pub session: &'a SessionSpec,
}

impl OpInput<'_> {
    pub(crate) fn primary(&self) -> Result<&Series<'_>, EngineError> {
        self.series.first().ok_or_else(|| EngineError::Operation {
            reason: "no series to operate on".to_string(),
        })
    }

    pub(crate) fn metric_column(&self, idx: usize) -> &str {
        self.metrics
            .get(idx)
            .map(|s| s.as_str())
            .unwrap_or("change_pct")
    }
}

pub fn dispatch(op: OperationKind, input: &OpInput) -> Result<OperationResult, EngineError> {
    match op {
        OperationKind::List => list::run(input),
        OperationKind::Count => count::run(input),
        OperationKind::Compare => compare::run(input),
        OperationKind::Correlation => correlation::run(input),
        OperationKind::Around => around::run(input),
        OperationKind::Streak => streak::run(input),
        OperationKind::Distribution => distribution::run(input),
        OperationKind::Probability => probability::run(input),
        OperationKind::Formation => formation::run(input),
    }
}

/// Evaluate a filter expression to a per-row mask over the whole table.
pub(crate) fn filter_mask(
    table: &BarTable,
    filter: &FilterExpr,
    catalog: &Catalog,
    session: &SessionSpec,
) -> Result<Vec<bool>, EngineError> {
    let kind = catalog
        .filter_kind(filter)
        .ok_or_else(|| EngineError::Operation {
            reason: format!("filter '{}' is not recognised", filter.label()),
        })?;
    let pred = resolve_predicate(filter, kind, catalog, session)?;
    Ok(predicate_mask(table, &pred))
}

pub(crate) fn predicate_mask(table: &BarTable, pred: &ResolvedPredicate) -> Vec<bool> {
    match pred {
        ResolvedPredicate::Weekday { day } => {
            table.rows.iter().map(|r| r.weekday == day).collect()
        }
        ResolvedPredicate::TimeWindow { start, end, .. } => table
            .rows
            .iter()
            .map(|r| time_in_window(*start, *end, r.bar.ts.time()))
            .collect(),
        ResolvedPredicate::TimeCmp { cmp, time } => table
            .rows
            .iter()
            .map(|r| cmp.holds_time(r.bar.ts.time(), *time))
            .collect(),
        ResolvedPredicate::Metric { column, cmp, value } => table
            .rows
            .iter()
            .map(|r| r.metric(column).map(|v| cmp.holds_f64(v, *value)).unwrap_or(false))
            .collect(),
        ResolvedPredicate::Flag { name } => table
            .flag(name)
            .map(|f| f.to_vec())
            .unwrap_or_else(|| vec![false; table.len()]),
        ResolvedPredicate::ConsecutiveRun { color, cmp, length } => {
            run_ending_lengths(table, *color)
                .into_iter()
                .map(|len| len > 0 && cmp.holds_usize(len as usize, *length as usize))
                .collect()
        }
    }
}

/// Length of the same-color run ending at each row, zero where the row does
/// not show the color. A run of three reds yields 1, 2, 3 on those rows.
pub(crate) fn run_ending_lengths(table: &BarTable, color: Color) -> Vec<u32> {
    let mut out = vec![0u32; table.len()];
    let mut run = 0u32;
    for (i, row) in table.rows.iter().enumerate() {
        let hit = match color {
            Color::Green => row.bar.is_green(),
            Color::Red => row.bar.is_red(),
        };
        run = if hit { run + 1 } else { 0 };
        out[i] = run;
    }
    out
}

/// Metric values for the selected rows, dropping rows where the column is
/// undefined (gap on anything but the first bar of a day).
pub(crate) fn metric_values(table: &BarTable, selected: &[usize], column: &str) -> Vec<f64> {
    selected
        .iter()
        .filter_map(|&i| table.metric(i, column))
        .collect()
}

pub(crate) fn metric_points(
    table: &BarTable,
    selected: &[usize],
    column: &str,
) -> Vec<(usize, f64)> {
    selected
        .iter()
        .filter_map(|&i| table.metric(i, column).map(|v| (i, v)))
        .collect()
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub(crate) fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let mut iter = values.iter();
    let first = *iter.next()?;
    Some(iter.fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))))
}

/// Mean, min and max as JSON values, null where the set is empty.
pub(crate) fn stat_values(values: &[f64]) -> (Value, Value, Value) {
    let avg = mean(values).map(round4).map(json_num).unwrap_or(Value::Null);
    match min_max(values) {
        Some((lo, hi)) => (avg, json_num(round4(lo)), json_num(round4(hi))),
        None => (avg, Value::Null, Value::Null),
    }
}

/// Round derived statistics so result JSON stays readable.
pub(crate) fn round4(v: f64) -> f64 {
    (v * 1e4).round() / 1e4
}

pub(crate) fn json_num(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// `json!` object literal down to the map type rows and summaries are made of.
pub(crate) fn json_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub(crate) fn share(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

pub(crate) fn pct(count: usize, total: usize) -> f64 {
    round4(share(count, total) * 100.0)
}

const WEEKDAY_ORDER: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const MONTH_ORDER: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

pub(crate) fn month_name(month: u32) -> &'static str {
    MONTH_ORDER
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("unknown")
}

pub(crate) fn group_value(row: &EnrichedBar, key: GroupKey) -> String {
    use chrono::Datelike;
    match key {
        GroupKey::Weekday => row.weekday.to_string(),
        GroupKey::Month => month_name(row.trading_date.month()).to_string(),
        GroupKey::Year => row.trading_date.year().to_string(),
    }
}

/// Calendar order for group labels: weekdays Monday first, months January
/// first, years ascending.
pub(crate) fn group_cmp(key: GroupKey, a: &str, b: &str) -> Ordering {
    fn pos(order: &[&str], v: &str) -> usize {
        order.iter().position(|&o| o == v).unwrap_or(usize::MAX)
    }
    match key {
        GroupKey::Weekday => pos(&WEEKDAY_ORDER, a).cmp(&pos(&WEEKDAY_ORDER, b)),
        GroupKey::Month => pos(&MONTH_ORDER, a).cmp(&pos(&MONTH_ORDER, b)),
        GroupKey::Year => a
            .parse::<i32>()
            .unwrap_or(i32::MIN)
            .cmp(&b.parse::<i32>().unwrap_or(i32::MIN)),
    }
}

pub(crate) fn bucket_label(t: NaiveTime, bucket: Bucket) -> String {
    match bucket {
        Bucket::Hour => format!("{:02}:00", t.hour()),
        Bucket::HalfHour => format!(
            "{:02}:{}",
            t.hour(),
            if t.minute() < 30 { "00" } else { "30" }
        ),
    }
}
