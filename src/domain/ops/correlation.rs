//! Pearson correlation between two metric columns, or between the same
//! metric over two periods paired by position.

use serde_json::json;

use crate::domain::error::EngineError;
use crate::domain::ops::{OpInput, OperationResult, json_num, json_object, metric_values, round4};

pub fn run(input: &OpInput) -> Result<OperationResult, EngineError> {
    let (label_x, xs, label_y, ys) = sides(input)?;
    let n = xs.len().min(ys.len());
    if n < 2 {
        return Err(EngineError::Operation {
            reason: format!("correlation needs at least 2 paired observations, got {}", n),
        });
    }
    let xs = &xs[..n];
    let ys = &ys[..n];

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        let flat = if var_x == 0.0 { &label_x } else { &label_y };
        return Err(EngineError::Operation {
            reason: format!("correlation is undefined: no variance in {}", flat),
        });
    }
    let r = cov / (var_x.sqrt() * var_y.sqrt());

    let row = json_object(json!({
        "x": label_x,
        "y": label_y,
        "n": n,
        "r": json_num(round4(r)),
    }));
    let summary = json_object(json!({
        "r": json_num(round4(r)),
        "n": n,
        "x": label_x,
        "y": label_y,
    }));
    Ok(OperationResult {
        rows: vec![row],
        summary,
        row_count: 1,
    })
}

fn sides(input: &OpInput) -> Result<(String, Vec<f64>, String, Vec<f64>), EngineError> {
    if input.series.len() >= 2 {
        let a = &input.series[0];
        let b = &input.series[1];
        let col_a = input.metric_column(0);
        let col_b = input.metric_column(1);
        return Ok((
            format!("{} {}", a.label, col_a),
            metric_values(a.table, &a.selected, col_a),
            format!("{} {}", b.label, col_b),
            metric_values(b.table, &b.selected, col_b),
        ));
    }

    // One fetch, two columns: pair rows where both metrics are defined.
    let series = input.primary()?;
    let col_x = input.metric_column(0);
    let col_y = input.metric_column(1);
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for &idx in &series.selected {
        if let (Some(x), Some(y)) = (
            series.table.metric(idx, col_x),
            series.table.metric(idx, col_y),
        ) {
            xs.push(x);
            ys.push(y);
        }
    }
    Ok((col_x.to_string(), xs, col_y.to_string(), ys))
}
