//! Where in the day the extremum happens: for each trading day, the clock
//! time of the daily high (or low), bucketed by hour or half hour.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::json;

use crate::domain::error::EngineError;
use crate::domain::ops::{OpInput, OperationResult, bucket_label, json_object, pct};
use crate::domain::query::{Bucket, Extremum};

pub fn run(input: &OpInput) -> Result<OperationResult, EngineError> {
    let series = input.primary()?;
    let table = series.table;
    let extremum = input.params.extremum.unwrap_or(Extremum::High);
    let bucket = input.params.bucket.unwrap_or(Bucket::Hour);

    // strict comparisons keep the earliest bar on ties
    let mut day_best: BTreeMap<NaiveDate, (usize, f64)> = BTreeMap::new();
    for &idx in &series.selected {
        let row = &table.rows[idx];
        let value = match extremum {
            Extremum::High => row.bar.high,
            Extremum::Low => row.bar.low,
        };
        day_best
            .entry(row.trading_date)
            .and_modify(|best| {
                let better = match extremum {
                    Extremum::High => value > best.1,
                    Extremum::Low => value < best.1,
                };
                if better {
                    *best = (idx, value);
                }
            })
            .or_insert((idx, value));
    }

    let days = day_best.len();
    let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
    for &(idx, _) in day_best.values() {
        let label = bucket_label(table.rows[idx].bar.ts.time(), bucket);
        *buckets.entry(label).or_insert(0) += 1;
    }

    let rows: Vec<_> = buckets
        .iter()
        .map(|(label, &count)| {
            json_object(json!({
                "bucket": label,
                "count": count,
                "pct": pct(count, days),
            }))
        })
        .collect();

    let mut summary = json_object(json!({
        "days": days,
        "extremum": match extremum {
            Extremum::High => "high",
            Extremum::Low => "low",
        },
    }));
    let mut top: Option<(&String, usize)> = None;
    for (label, &count) in &buckets {
        if top.map(|(_, c)| count > c).unwrap_or(true) {
            top = Some((label, count));
        }
    }
    if let Some((label, _)) = top {
        summary.insert("most_common".to_string(), json!(label));
    }

    let row_count = rows.len();
    Ok(OperationResult {
        rows,
        summary,
        row_count,
    })
}
