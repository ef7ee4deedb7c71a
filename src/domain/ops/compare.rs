//! Side-by-side aggregation. The sides are periods, filters or metrics
//! (whatever the atoms varied), or calendar groups when a single atom came
//! with a grouping key.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::domain::error::EngineError;
use crate::domain::ops::{
    OpInput, OperationResult, group_cmp, group_value, json_num, json_object, mean, metric_values,
    min_max, round4,
};

struct Side {
    label: String,
    column: String,
    values: Vec<f64>,
}

pub fn run(input: &OpInput) -> Result<OperationResult, EngineError> {
    let sides = collect_sides(input)?;

    let rows: Vec<_> = sides
        .iter()
        .map(|side| {
            let avg = mean(&side.values);
            let extremes = min_max(&side.values);
            json_object(json!({
                "label": side.label,
                "metric": side.column,
                "count": side.values.len(),
                "mean": avg.map(round4).map(json_num).unwrap_or(Value::Null),
                "min": extremes.map(|(lo, _)| json_num(round4(lo))).unwrap_or(Value::Null),
                "max": extremes.map(|(_, hi)| json_num(round4(hi))).unwrap_or(Value::Null),
            }))
        })
        .collect();

    let mut ranked: Vec<(&Side, f64)> = sides
        .iter()
        .filter_map(|s| mean(&s.values).map(|m| (s, m)))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut summary = json_object(json!({ "groups": rows.len() }));
    if let (Some((best, best_mean)), Some((worst, worst_mean))) = (ranked.first(), ranked.last()) {
        summary.insert("best".to_string(), json!(best.label));
        summary.insert("best_mean".to_string(), json!(round4(*best_mean)));
        summary.insert("worst".to_string(), json!(worst.label));
        summary.insert("worst_mean".to_string(), json!(round4(*worst_mean)));
    }

    let row_count = rows.len();
    Ok(OperationResult {
        rows,
        summary,
        row_count,
    })
}

fn collect_sides(input: &OpInput) -> Result<Vec<Side>, EngineError> {
    // Several metrics over one fetch: one side per metric column.
    if input.series.len() == 1 && input.metrics.len() > 1 {
        let series = input.primary()?;
        return Ok(input
            .metrics
            .iter()
            .map(|column| Side {
                label: column.clone(),
                column: column.clone(),
                values: metric_values(series.table, &series.selected, column),
            })
            .collect());
    }

    // A lone atom: the validator guarantees a grouping key is present.
    if input.series.len() == 1 {
        let key = input.group.ok_or_else(|| EngineError::Operation {
            reason: "single-series compare needs a grouping key".to_string(),
        })?;
        let series = input.primary()?;
        let column = input.metric_column(0);
        let mut buckets: HashMap<String, Vec<f64>> = HashMap::new();
        for &idx in &series.selected {
            if let Some(v) = series.table.metric(idx, column) {
                buckets
                    .entry(group_value(&series.table.rows[idx], key))
                    .or_default()
                    .push(v);
            }
        }
        let mut sides: Vec<Side> = buckets
            .into_iter()
            .map(|(label, values)| Side {
                label,
                column: column.to_string(),
                values,
            })
            .collect();
        sides.sort_by(|a, b| group_cmp(key, &a.label, &b.label));
        return Ok(sides);
    }

    Ok(input
        .series
        .iter()
        .enumerate()
        .map(|(i, series)| {
            let column = input.metric_column(i);
            Side {
                label: series.label.clone(),
                column: column.to_string(),
                values: metric_values(series.table, &series.selected, column),
            }
        })
        .collect())
}
