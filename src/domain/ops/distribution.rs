//! Distribution: equal-width histogram of a metric, or the clock-time
//! distribution of an event's occurrences.

use std::collections::BTreeMap;

use serde_json::json;

use crate::domain::error::EngineError;
use crate::domain::ops::{
    OpInput, OperationResult, bucket_label, filter_mask, json_object, metric_values, min_max, pct,
};
use crate::domain::query::{Bucket, FilterExpr};

pub fn run(input: &OpInput) -> Result<OperationResult, EngineError> {
    match input.event {
        Some(event) => by_time_of_day(input, event),
        None => by_metric(input),
    }
}

fn by_metric(input: &OpInput) -> Result<OperationResult, EngineError> {
    let series = input.primary()?;
    let column = input.metric_column(0);
    let bins = input.params.bins.unwrap_or(10).max(1);
    let values = metric_values(series.table, &series.selected, column);
    let total = values.len();

    let mut summary = json_object(json!({
        "count": total,
        "metric": column,
    }));
    let Some((lo, hi)) = min_max(&values) else {
        summary.insert("bins".to_string(), json!(0));
        return Ok(OperationResult {
            rows: Vec::new(),
            summary,
            row_count: 0,
        });
    };

    // a flat column collapses to a single bin
    let bins = if hi == lo { 1 } else { bins };
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in &values {
        let slot = if width == 0.0 {
            0
        } else {
            (((v - lo) / width) as usize).min(bins - 1)
        };
        counts[slot] += 1;
    }

    let rows: Vec<_> = counts
        .iter()
        .enumerate()
        .map(|(i, &count)| {
            let from = lo + width * i as f64;
            let to = lo + width * (i + 1) as f64;
            json_object(json!({
                "bin": format!("{:.2}..{:.2}", from, to),
                "count": count,
                "pct": pct(count, total),
            }))
        })
        .collect();

    summary.insert("bins".to_string(), json!(bins));
    if let Some(i) = peak(counts.iter().copied()) {
        summary.insert("most_common".to_string(), rows[i]["bin"].clone());
    }

    let row_count = rows.len();
    Ok(OperationResult {
        rows,
        summary,
        row_count,
    })
}

fn by_time_of_day(input: &OpInput, event: &FilterExpr) -> Result<OperationResult, EngineError> {
    let series = input.primary()?;
    let table = series.table;
    let bucket = input.params.bucket.unwrap_or(Bucket::Hour);
    let mask = filter_mask(table, event, input.catalog, input.session)?;

    let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
    let mut total = 0usize;
    for &idx in &series.selected {
        if !mask[idx] {
            continue;
        }
        total += 1;
        *buckets
            .entry(bucket_label(table.rows[idx].bar.ts.time(), bucket))
            .or_insert(0) += 1;
    }

    let rows: Vec<_> = buckets
        .iter()
        .map(|(label, &count)| {
            json_object(json!({
                "bin": label,
                "count": count,
                "pct": pct(count, total),
            }))
        })
        .collect();

    let mut summary = json_object(json!({
        "count": total,
        "event": event.label(),
        "bins": rows.len(),
    }));
    let labels: Vec<&String> = buckets.keys().collect();
    if let Some(i) = peak(buckets.values().copied()) {
        summary.insert("most_common".to_string(), json!(labels[i]));
    }

    let row_count = rows.len();
    Ok(OperationResult {
        rows,
        summary,
        row_count,
    })
}

/// Index of the first maximum among non-empty buckets.
fn peak<I: Iterator<Item = usize>>(counts: I) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (i, c) in counts.enumerate() {
        if c > 0 && best.map(|(_, top)| c > top).unwrap_or(true) {
            best = Some((i, c));
        }
    }
    best.map(|(i, _)| i)
}
