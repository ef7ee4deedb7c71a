//! Conditional probability: of the bars where the condition held, how often
//! the outcome held a fixed number of bars later, walked in trading order.

use serde_json::json;

use crate::domain::error::EngineError;
use crate::domain::ops::{OpInput, OperationResult, filter_mask, json_object, round4, share};

pub fn run(input: &OpInput) -> Result<OperationResult, EngineError> {
    let series = input.primary()?;
    let table = series.table;
    let condition = input.condition.ok_or_else(|| EngineError::Operation {
        reason: "probability needs a condition filter".to_string(),
    })?;
    let outcome = input
        .params
        .outcome
        .as_ref()
        .ok_or_else(|| EngineError::Operation {
            reason: "probability needs an outcome filter".to_string(),
        })?;
    let offset = input.params.offset.unwrap_or(1);

    let cond_mask = filter_mask(table, condition, input.catalog, input.session)?;
    let outcome_mask = filter_mask(table, outcome, input.catalog, input.session)?;

    // offsets count bars on the full sequence; occurrences whose target
    // falls outside the fetched period are skipped
    let mut occurrences = 0usize;
    let mut hits = 0usize;
    for &idx in &series.selected {
        if !cond_mask[idx] {
            continue;
        }
        let target = idx as i64 + offset;
        if target < 0 || target >= table.len() as i64 {
            continue;
        }
        occurrences += 1;
        if outcome_mask[target as usize] {
            hits += 1;
        }
    }
    if occurrences == 0 {
        return Err(EngineError::Operation {
            reason: format!("no occurrences of {} in range", condition.label()),
        });
    }

    let baseline_hits = series.selected.iter().filter(|&&i| outcome_mask[i]).count();
    let summary = json_object(json!({
        "probability": round4(share(hits, occurrences)),
        "occurrences": occurrences,
        "hits": hits,
        "baseline": round4(share(baseline_hits, series.selected.len())),
        "condition": condition.label(),
        "outcome": outcome.label(),
        "offset": offset,
    }));

    Ok(OperationResult {
        rows: Vec::new(),
        summary,
        row_count: occurrences,
    })
}
