//! Counting matches: how many bars pass the filter, with aggregate stats of
//! the metric over them, measured against the unfiltered period total.

use std::collections::HashMap;

use serde_json::json;

use crate::domain::error::EngineError;
use crate::domain::ops::{
    OpInput, OperationResult, group_cmp, group_value, json_object, metric_values, round4, share,
    stat_values,
};

pub fn run(input: &OpInput) -> Result<OperationResult, EngineError> {
    let series = input.primary()?;
    let table = series.table;
    let column = input.metric_column(0);

    let matched = series.selected.len();
    let values = metric_values(table, &series.selected, column);
    let (mean, min, max) = stat_values(&values);
    let mut summary = json_object(json!({
        "count": matched,
        "total": table.len(),
        "share": round4(share(matched, table.len())),
        "metric": column,
        "mean": mean,
        "min": min,
        "max": max,
    }));

    // aggregate-only unless a calendar grouping was asked for
    let Some(key) = input.group else {
        return Ok(OperationResult {
            rows: Vec::new(),
            summary,
            row_count: matched,
        });
    };

    let mut matched_by: HashMap<String, usize> = HashMap::new();
    for &idx in &series.selected {
        *matched_by.entry(group_value(&table.rows[idx], key)).or_insert(0) += 1;
    }
    let mut totals: HashMap<String, usize> = HashMap::new();
    for row in &table.rows {
        *totals.entry(group_value(row, key)).or_insert(0) += 1;
    }

    let mut groups: Vec<(String, usize)> = totals
        .iter()
        .map(|(name, _)| (name.clone(), matched_by.get(name).copied().unwrap_or(0)))
        .collect();
    groups.sort_by(|a, b| group_cmp(key, &a.0, &b.0));

    let rows: Vec<_> = groups
        .iter()
        .map(|(name, count)| {
            let total = totals.get(name).copied().unwrap_or(0);
            json_object(json!({
                "group": name,
                "count": count,
                "total": total,
                "share": round4(share(*count, total)),
            }))
        })
        .collect();

    if let Some((name, count)) = groups.iter().max_by_key(|(_, count)| *count) {
        if *count > 0 {
            summary.insert("top".to_string(), json!(name));
        }
    }

    let row_count = rows.len();
    Ok(OperationResult {
        rows,
        summary,
        row_count,
    })
}
