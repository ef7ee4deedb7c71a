//! Behaviour around event bars: for each occurrence, the metric at the event
//! and at a fixed bar offset from it. Occurrences whose offset lands outside
//! the fetched period are skipped.

use serde_json::{Value, json};

use crate::domain::error::EngineError;
use crate::domain::ops::{
    OpInput, OperationResult, filter_mask, json_num, json_object, mean, round4,
};

pub fn run(input: &OpInput) -> Result<OperationResult, EngineError> {
    let series = input.primary()?;
    let table = series.table;
    let event = input.event.ok_or_else(|| EngineError::Operation {
        reason: "around needs an event filter".to_string(),
    })?;
    let mask = filter_mask(table, event, input.catalog, input.session)?;
    let column = input.metric_column(0);
    let offset = input.params.offset.unwrap_or(1);

    let mut rows = Vec::new();
    let mut at_values = Vec::new();
    let mut offset_values = Vec::new();
    for &idx in &series.selected {
        if !mask[idx] {
            continue;
        }
        let target = idx as i64 + offset;
        if target < 0 || target >= table.len() as i64 {
            continue;
        }
        let target = target as usize;
        let at = table.metric(idx, column);
        let shifted = table.metric(target, column);
        if let Some(v) = at {
            at_values.push(v);
        }
        if let Some(v) = shifted {
            offset_values.push(v);
        }
        rows.push(json_object(json!({
            "date": table.rows[idx].trading_date.to_string(),
            "value": at.map(round4).map(json_num).unwrap_or(Value::Null),
            "offset_date": table.rows[target].trading_date.to_string(),
            "offset_value": shifted.map(round4).map(json_num).unwrap_or(Value::Null),
        })));
    }

    let mut summary = json_object(json!({
        "events": rows.len(),
        "event": event.label(),
        "offset": offset,
        "metric": column,
    }));
    if let Some(m) = mean(&at_values) {
        summary.insert("mean_at_event".to_string(), json!(round4(m)));
    }
    if let Some(m) = mean(&offset_values) {
        summary.insert("mean_at_offset".to_string(), json!(round4(m)));
    }

    let row_count = rows.len();
    Ok(OperationResult {
        rows,
        summary,
        row_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::Catalog;
    use crate::domain::ops::test_support::{all_selected, daily_table, input_for};
    use crate::domain::query::{Cmp, FilterExpr, Params};
    use crate::domain::resolve::SessionSpec;

    #[test]
    fn collects_metric_at_event_and_offset() {
        // drops on Jan 3 and Jan 9 (last bar, so its next-day is out of range)
        let table = daily_table(&[101.0, 98.0, 103.0, 104.0, 105.0, 99.0]);
        let metrics = vec!["change_pct".to_string()];
        let params = Params {
            offset: Some(1),
            ..Params::default()
        };
        let catalog = Catalog::new();
        let session = SessionSpec::default();
        let mut input = input_for(&table, all_selected(&table), &metrics, &params, &catalog, &session);
        let event = FilterExpr::Comparison {
            metric: "change".to_string(),
            cmp: Cmp::Lt,
            value: 0.0,
        };
        input.event = Some(&event);

        let result = run(&input).unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0]["date"], "2024-01-03");
        assert_eq!(result.rows[0]["offset_date"], "2024-01-04");
        let after = result.rows[0]["offset_value"].as_f64().unwrap();
        assert!(after > 5.0); // 98 -> 103
        assert_eq!(result.summary["events"], 1);
        assert!(result.summary["mean_at_offset"].as_f64().unwrap() > 5.0);
    }

    #[test]
    fn negative_offset_looks_back() {
        let table = daily_table(&[101.0, 98.0, 103.0]);
        let metrics = vec!["change_pct".to_string()];
        let params = Params {
            offset: Some(-1),
            ..Params::default()
        };
        let catalog = Catalog::new();
        let session = SessionSpec::default();
        let mut input = input_for(&table, all_selected(&table), &metrics, &params, &catalog, &session);
        let event = FilterExpr::Comparison {
            metric: "change".to_string(),
            cmp: Cmp::Lt,
            value: 0.0,
        };
        input.event = Some(&event);

        let result = run(&input).unwrap();
        assert_eq!(result.rows[0]["offset_date"], "2024-01-02");
        assert_eq!(result.summary["offset"], -1);
    }

    #[test]
    fn missing_event_filter_is_an_error() {
        let table = daily_table(&[101.0]);
        let metrics = vec!["change_pct".to_string()];
        let params = Params::default();
        let catalog = Catalog::new();
        let session = SessionSpec::default();
        let input = input_for(&table, all_selected(&table), &metrics, &params, &catalog, &session);

        assert!(matches!(run(&input), Err(EngineError::Operation { .. })));
    }
}
