//! Listing: the matching bars themselves, ranked by the requested metric.

use serde_json::json;

use crate::domain::error::EngineError;
use crate::domain::ops::{
    OpInput, OperationResult, json_num, json_object, metric_points, stat_values,
};
use crate::domain::query::SortDir;

pub fn run(input: &OpInput) -> Result<OperationResult, EngineError> {
    let series = input.primary()?;
    let column = input.metric_column(0);
    let limit = input.params.n.unwrap_or(5);
    let dir = input.params.sort.unwrap_or(SortDir::Desc);

    let mut points = metric_points(series.table, &series.selected, column);
    let total = points.len();
    let all_values: Vec<f64> = points.iter().map(|&(_, v)| v).collect();
    // stable sort over chronological input keeps ties in date order
    points.sort_by(|a, b| {
        let ord = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
        match dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        }
    });
    points.truncate(limit);

    let rows: Vec<_> = points
        .iter()
        .map(|&(idx, value)| {
            let mut row = series.table.rows[idx].to_row();
            row.entry(column.to_string()).or_insert_with(|| json_num(value));
            row
        })
        .collect();

    let (mean, min, max) = stat_values(&all_values);
    let summary = json_object(json!({
        "count": total,
        "metric": column,
        "mean": mean,
        "min": min,
        "max": max,
    }));

    Ok(OperationResult {
        rows,
        summary,
        row_count: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::Catalog;
    use crate::domain::ops::test_support::{all_selected, daily_table, input_for};
    use crate::domain::query::Params;
    use crate::domain::resolve::SessionSpec;

    #[test]
    fn ranks_by_metric_and_truncates() {
        let table = daily_table(&[101.0, 99.0, 103.0, 102.0, 100.0, 104.0]);
        let metrics = vec!["change_pct".to_string()];
        let params = Params {
            n: Some(2),
            ..Params::default()
        };
        let catalog = Catalog::new();
        let session = SessionSpec::default();
        let input = input_for(&table, all_selected(&table), &metrics, &params, &catalog, &session);

        let result = run(&input).unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.row_count, 6);
        // largest advance first: 99 -> 103 is just over 4%
        assert_eq!(result.rows[0]["date"], "2024-01-04");
        assert_eq!(result.summary["count"], 6);
        assert_eq!(result.summary["metric"], "change_pct");
        assert!(result.summary["max"].as_f64().unwrap() > 4.0);
    }

    #[test]
    fn ascending_sort_puts_worst_day_first() {
        let table = daily_table(&[101.0, 99.0, 103.0]);
        let metrics = vec!["change_pct".to_string()];
        let params = Params {
            n: Some(1),
            sort: Some(SortDir::Asc),
            ..Params::default()
        };
        let catalog = Catalog::new();
        let session = SessionSpec::default();
        let input = input_for(&table, all_selected(&table), &metrics, &params, &catalog, &session);

        let result = run(&input).unwrap();
        assert_eq!(result.rows[0]["date"], "2024-01-03");
        assert_eq!(result.row_count, 3);
    }

    #[test]
    fn empty_selection_yields_no_rows() {
        let table = daily_table(&[101.0]);
        let metrics = vec!["change_pct".to_string()];
        let params = Params::default();
        let catalog = Catalog::new();
        let session = SessionSpec::default();
        let input = input_for(&table, Vec::new(), &metrics, &params, &catalog, &session);

        let result = run(&input).unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.row_count, 0);
        assert_eq!(result.summary["count"], 0);
        assert!(result.summary["mean"].is_null());
    }
}
