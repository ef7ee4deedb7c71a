//! Consecutive runs of a condition over the selected rows. Selection first,
//! then contiguity: a streak of red Fridays means consecutive Fridays, not
//! consecutive days.

use serde_json::json;

use crate::domain::error::EngineError;
use crate::domain::ops::{OpInput, OperationResult, filter_mask, json_object, mean, round4};
use crate::domain::query::{Color, FilterExpr};

struct Run {
    start: usize,
    end: usize,
    length: usize,
}

pub fn run(input: &OpInput) -> Result<OperationResult, EngineError> {
    let series = input.primary()?;
    let table = series.table;
    let column = input.metric_column(0);
    let min_len = input.params.min_len.unwrap_or(2) as usize;

    let (mask, label): (Vec<bool>, String) = match input.condition {
        // A Consecutive condition is the run spec itself: the color tags
        // bars, its cmp/length qualify whole runs below.
        Some(cond @ FilterExpr::Consecutive { color, .. }) => (
            table
                .rows
                .iter()
                .map(|r| match color {
                    Color::Green => r.bar.is_green(),
                    Color::Red => r.bar.is_red(),
                })
                .collect(),
            cond.label(),
        ),
        Some(cond) => (
            filter_mask(table, cond, input.catalog, input.session)?,
            cond.label(),
        ),
        // no condition given: streaks of positive bars on the chosen metric
        None => (
            (0..table.len())
                .map(|i| table.metric(i, column).map(|v| v > 0.0).unwrap_or(false))
                .collect(),
            format!("{}>0", column),
        ),
    };

    let mut runs: Vec<Run> = Vec::new();
    let mut current: Option<Run> = None;
    for &idx in &series.selected {
        if mask[idx] {
            match current.as_mut() {
                Some(run) => {
                    run.end = idx;
                    run.length += 1;
                }
                None => {
                    current = Some(Run {
                        start: idx,
                        end: idx,
                        length: 1,
                    });
                }
            }
        } else if let Some(run) = current.take() {
            runs.push(run);
        }
    }
    if let Some(run) = current.take() {
        runs.push(run);
    }
    runs.retain(|r| match input.condition {
        Some(FilterExpr::Consecutive { cmp, length, .. }) => {
            cmp.holds_usize(r.length, *length as usize)
        }
        _ => r.length >= min_len,
    });

    let rows: Vec<_> = runs
        .iter()
        .map(|r| {
            json_object(json!({
                "start": table.rows[r.start].trading_date.to_string(),
                "end": table.rows[r.end].trading_date.to_string(),
                "length": r.length,
            }))
        })
        .collect();

    let mut summary = json_object(json!({
        "runs": runs.len(),
        "condition": label,
    }));
    if let Some(longest) = runs.iter().max_by_key(|r| r.length) {
        summary.insert("max_len".to_string(), json!(longest.length));
        let lengths: Vec<f64> = runs.iter().map(|r| r.length as f64).collect();
        if let Some(m) = mean(&lengths) {
            summary.insert("mean_len".to_string(), json!(round4(m)));
        }
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
    use crate::domain::query::{Cmp, Color, FilterExpr, Params};
    use crate::domain::resolve::SessionSpec;

    #[test]
    fn segments_runs_and_drops_short_ones() {
        // green green red green green green red
        let table = daily_table(&[101.0, 102.0, 101.5, 102.5, 103.0, 104.0, 103.5]);
        let metrics = vec!["change_pct".to_string()];
        let params = Params {
            min_len: Some(2),
            ..Params::default()
        };
        let catalog = Catalog::new();
        let session = SessionSpec::default();
        let input = input_for(&table, all_selected(&table), &metrics, &params, &catalog, &session);

        let result = run(&input).unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["length"], 2);
        assert_eq!(result.rows[1]["length"], 3);
        assert_eq!(result.rows[1]["start"], "2024-01-05");
        assert_eq!(result.rows[1]["end"], "2024-01-09");
        assert_eq!(result.summary["max_len"], 3);
        assert_eq!(result.summary["mean_len"], 2.5);
    }

    #[test]
    fn consecutive_condition_qualifies_whole_runs() {
        // red runs of 2 and 3; only the second satisfies >= 3
        let table = daily_table(&[99.0, 98.0, 99.5, 98.5, 97.5, 96.5]);
        let metrics = vec!["change_pct".to_string()];
        let params = Params::default();
        let catalog = Catalog::new();
        let session = SessionSpec::default();
        let mut input = input_for(&table, all_selected(&table), &metrics, &params, &catalog, &session);
        let cond = FilterExpr::Consecutive {
            color: Color::Red,
            cmp: Cmp::Ge,
            length: 3,
        };
        input.condition = Some(&cond);

        let result = run(&input).unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0]["length"], 3);
        assert_eq!(result.rows[0]["start"], "2024-01-05");
        assert_eq!(result.rows[0]["end"], "2024-01-09");
    }

    #[test]
    fn selection_defines_contiguity() {
        // only every other bar selected; runs must form over that subsequence
        let table = daily_table(&[101.0, 99.0, 102.0, 98.0, 103.0]);
        let metrics = vec!["change_pct".to_string()];
        let params = Params {
            min_len: Some(3),
            ..Params::default()
        };
        let catalog = Catalog::new();
        let session = SessionSpec::default();
        let input = input_for(&table, vec![0, 2, 4], &metrics, &params, &catalog, &session);

        let result = run(&input).unwrap();
        // all three selected bars are green, so one run of 3
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0]["length"], 3);
    }

    #[test]
    fn no_qualifying_runs_reports_empty() {
        let table = daily_table(&[99.0, 101.0, 98.0]);
        let metrics = vec!["change_pct".to_string()];
        let params = Params {
            min_len: Some(2),
            ..Params::default()
        };
        let catalog = Catalog::new();
        let session = SessionSpec::default();
        let input = input_for(&table, all_selected(&table), &metrics, &params, &catalog, &session);

        let result = run(&input).unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.row_count, 0);
        assert_eq!(result.summary["runs"], 0);
        assert!(result.summary.get("max_len").is_none());
    }
}
