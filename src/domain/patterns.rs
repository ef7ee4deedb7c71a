//! Structural/candle pattern detection.
//!
//! Each detector produces one boolean flag per table row. Two-bar patterns
//! compare a bar with its predecessor at the table's own granularity; the
//! opening-range break is the one intraday pattern and works per trading day
//! against the first half hour of the regular session.

use chrono::Duration;

use crate::domain::bar::Bar;
use crate::domain::enrich::{BarTable, EnrichedBar};
use crate::domain::resolve::SessionSpec;

/// Detect a pattern by canonical name. `None` for names this module does not
/// know, which the validator should have caught long before.
pub fn detect(table: &BarTable, name: &str, session: &SessionSpec) -> Option<Vec<bool>> {
    let rows = &table.rows;
    match name {
        "doji" => Some(single(rows, is_doji)),
        "hammer" => Some(single(rows, is_hammer)),
        "shooting_star" => Some(single(rows, is_shooting_star)),
        "engulfing_bull" => Some(with_prev(rows, is_engulfing_bull)),
        "engulfing_bear" => Some(with_prev(rows, is_engulfing_bear)),
        "inside_day" => Some(with_prev(rows, |prev, cur| {
            cur.high < prev.high && cur.low > prev.low
        })),
        "outside_day" => Some(with_prev(rows, |prev, cur| {
            cur.high > prev.high && cur.low < prev.low
        })),
        "gap_up" => Some(with_prev(rows, |prev, cur| cur.open > prev.high)),
        "gap_down" => Some(with_prev(rows, |prev, cur| cur.open < prev.low)),
        "opening_range_break" => Some(opening_range_break(rows, session)),
        _ => None,
    }
}

fn single(rows: &[EnrichedBar], f: impl Fn(&Bar) -> bool) -> Vec<bool> {
    rows.iter().map(|r| f(&r.bar)).collect()
}

fn with_prev(rows: &[EnrichedBar], f: impl Fn(&Bar, &Bar) -> bool) -> Vec<bool> {
    let mut flags = vec![false; rows.len()];
    for i in 1..rows.len() {
        flags[i] = f(&rows[i - 1].bar, &rows[i].bar);
    }
    flags
}

fn lower_shadow(bar: &Bar) -> f64 {
    bar.open.min(bar.close) - bar.low
}

fn upper_shadow(bar: &Bar) -> f64 {
    bar.high - bar.open.max(bar.close)
}

/// Body within a tenth of the range.
fn is_doji(bar: &Bar) -> bool {
    bar.body() <= bar.range() * 0.1
}

/// Long lower shadow, little above the body.
fn is_hammer(bar: &Bar) -> bool {
    bar.range() > 0.0 && lower_shadow(bar) >= 2.0 * bar.body() && upper_shadow(bar) <= bar.body()
}

fn is_shooting_star(bar: &Bar) -> bool {
    bar.range() > 0.0 && upper_shadow(bar) >= 2.0 * bar.body() && lower_shadow(bar) <= bar.body()
}

fn is_engulfing_bull(prev: &Bar, cur: &Bar) -> bool {
    prev.is_red()
        && cur.is_green()
        && cur.open <= prev.close
        && cur.close >= prev.open
        && cur.body() > prev.body()
}

fn is_engulfing_bear(prev: &Bar, cur: &Bar) -> bool {
    prev.is_green()
        && cur.is_red()
        && cur.open >= prev.close
        && cur.close <= prev.open
        && cur.body() > prev.body()
}

/// First bar per trading day whose close escapes the opening range (the
/// high/low of the first 30 minutes of RTH). At most one flag per day.
fn opening_range_break(rows: &[EnrichedBar], session: &SessionSpec) -> Vec<bool> {
    let mut flags = vec![false; rows.len()];
    let window_end = session
        .rth_open
        .overflowing_add_signed(Duration::minutes(30))
        .0;

    let mut i = 0;
    while i < rows.len() {
        let day = rows[i].trading_date;
        let mut j = i;
        while j < rows.len() && rows[j].trading_date == day {
            j += 1;
        }

        let mut or_high = f64::NEG_INFINITY;
        let mut or_low = f64::INFINITY;
        let mut have_range = false;
        for row in &rows[i..j] {
            let t = row.bar.ts.time();
            if t >= session.rth_open && t < window_end {
                or_high = or_high.max(row.bar.high);
                or_low = or_low.min(row.bar.low);
                have_range = true;
            }
        }

        if have_range {
            for (k, row) in rows[i..j].iter().enumerate() {
                let t = row.bar.ts.time();
                if t >= window_end
                    && session.in_rth(t)
                    && (row.bar.close > or_high || row.bar.close < or_low)
                {
                    flags[i + k] = true;
                    break;
                }
            }
        }
        i = j;
    }
    flags
}
