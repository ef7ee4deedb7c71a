//! Resolution of symbolic time: period expressions to concrete date ranges,
//! session names to clock windows.
//!
//! Everything here is pure and deterministic given a reference date and a
//! calendar, so the same query resolved twice yields the same plan.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::calendar::TradingCalendar;
use crate::domain::error::EngineError;
use crate::domain::query::{Cmp, Color, TimeExpr};

/// Half-open `[start, end)` range of trading-day dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Session clock for one instrument. `day_open` is where the trading day
/// rolls: a bar stamped at or after it belongs to the next calendar date's
/// trading day (an 18:00 Sunday bar opens Monday's session).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionSpec {
    pub rth_open: NaiveTime,
    pub rth_close: NaiveTime,
    pub day_open: NaiveTime,
}

impl Default for SessionSpec {
    fn default() -> Self {
        SessionSpec {
            rth_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            rth_close: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            day_open: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl SessionSpec {
    pub fn in_rth(&self, t: NaiveTime) -> bool {
        time_in_window(self.rth_open, self.rth_close, t)
    }

    /// Trading date a bar timestamp belongs to, honoring the evening roll.
    pub fn trading_date(&self, ts: NaiveDateTime) -> NaiveDate {
        if ts.time() >= self.day_open {
            ts.date().succ_opt().unwrap_or_else(|| ts.date())
        } else {
            ts.date()
        }
    }
}

/// `[start, end)` clock window that may wrap midnight (ETH does).
pub fn time_in_window(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> bool {
    if start <= end {
        t >= start && t < end
    } else {
        t >= start || t < end
    }
}

/// A where-role filter resolved into something directly evaluable per row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedPredicate {
    Weekday {
        day: String,
    },
    TimeWindow {
        session: String,
        start: NaiveTime,
        end: NaiveTime,
    },
    TimeCmp {
        cmp: Cmp,
        time: NaiveTime,
    },
    Metric {
        column: String,
        cmp: Cmp,
        value: f64,
    },
    /// Boolean flag column: pattern or calendar-event tag.
    Flag {
        name: String,
    },
    /// Rows belonging to a qualifying consecutive-color run. Sequence
    /// dependent: must be evaluated on the full table before row selection.
    ConsecutiveRun {
        color: Color,
        cmp: Cmp,
        length: u32,
    },
}

/// Resolve a session name to its clock window.
pub fn resolve_session(name: &str, spec: &SessionSpec) -> Option<ResolvedPredicate> {
    match name {
        "rth" => Some(ResolvedPredicate::TimeWindow {
            session: "rth".to_string(),
            start: spec.rth_open,
            end: spec.rth_close,
        }),
        // ETH is everything the regular session is not.
        "eth" => Some(ResolvedPredicate::TimeWindow {
            session: "eth".to_string(),
            start: spec.rth_close,
            end: spec.rth_open,
        }),
        _ => None,
    }
}

/// Resolve a period expression to a concrete half-open date range.
pub fn resolve_time(
    expr: &TimeExpr,
    calendar: &TradingCalendar,
    as_of: NaiveDate,
) -> Result<DateRange, EngineError> {
    let unresolvable = |detail: String| EngineError::UnresolvableTime { detail };
    match expr {
        TimeExpr::Year { year } => {
            let start = date(*year, 1, 1)?;
            let end = date(*year + 1, 1, 1)?;
            Ok(DateRange { start, end })
        }
        TimeExpr::Quarter { year, quarter } => {
            if !(1..=4).contains(quarter) {
                return Err(unresolvable(format!("quarter {} out of range", quarter)));
            }
            let start_month = (quarter - 1) * 3 + 1;
            let start = date(*year, start_month, 1)?;
            let end = if *quarter == 4 {
                date(*year + 1, 1, 1)?
            } else {
                date(*year, start_month + 3, 1)?
            };
            Ok(DateRange { start, end })
        }
        TimeExpr::Month { year, month } => {
            if !(1..=12).contains(month) {
                return Err(unresolvable(format!("month {} out of range", month)));
            }
            let start = date(*year, *month, 1)?;
            let end = if *month == 12 {
                date(*year + 1, 1, 1)?
            } else {
                date(*year, *month + 1, 1)?
            };
            Ok(DateRange { start, end })
        }
        TimeExpr::Between { start, end } => {
            if start > end {
                return Err(unresolvable(format!("range {}..{} runs backwards", start, end)));
            }
            // The producer sends inclusive end dates.
            let exclusive = end
                .succ_opt()
                .ok_or_else(|| unresolvable(format!("date {} beyond calendar range", end)))?;
            Ok(DateRange {
                start: *start,
                end: exclusive,
            })
        }
        TimeExpr::LastDays { days } => {
            if *days == 0 {
                return Err(unresolvable("last 0 days is empty".to_string()));
            }
            let span = calendar.last_n_trading_days(as_of, *days);
            let (first, last) = match (span.first(), span.last()) {
                (Some(f), Some(l)) => (*f, *l),
                _ => return Err(unresolvable(format!("no trading days before {}", as_of))),
            };
            let end = last
                .succ_opt()
                .ok_or_else(|| unresolvable(format!("date {} beyond calendar range", last)))?;
            Ok(DateRange { start: first, end })
        }
        TimeExpr::Yesterday => {
            let day = calendar.prev_trading_day(as_of);
            let end = day
                .succ_opt()
                .ok_or_else(|| unresolvable(format!("date {} beyond calendar range", day)))?;
            Ok(DateRange { start: day, end })
        }
    }
}

fn date(year: i32, month: u32, day: u32) -> Result<NaiveDate, EngineError> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| EngineError::UnresolvableTime {
        detail: format!("invalid date {}-{:02}-{:02}", year, month, day),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn resolve(expr: TimeExpr, as_of: NaiveDate) -> DateRange {
        resolve_time(&expr, &TradingCalendar::new(), as_of).unwrap()
    }

    #[test]
    fn year_resolves_to_half_open_range() {
        let range = resolve(TimeExpr::Year { year: 2024 }, day(2025, 6, 1));
        assert_eq!(range.start, day(2024, 1, 1));
        assert_eq!(range.end, day(2025, 1, 1));
        assert!(range.contains(day(2024, 12, 31)));
        assert!(!range.contains(day(2025, 1, 1)));
    }

    #[test]
    fn fourth_quarter_rolls_into_next_year() {
        let range = resolve(
            TimeExpr::Quarter {
                year: 2024,
                quarter: 4,
            },
            day(2025, 6, 1),
        );
        assert_eq!(range.start, day(2024, 10, 1));
        assert_eq!(range.end, day(2025, 1, 1));
    }

    #[test]
    fn quarter_five_is_unresolvable() {
        let err = resolve_time(
            &TimeExpr::Quarter {
                year: 2024,
                quarter: 5,
            },
            &TradingCalendar::new(),
            day(2025, 6, 1),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnresolvableTime { .. }));
    }

    #[test]
    fn december_rolls_into_next_year() {
        let range = resolve(
            TimeExpr::Month {
                year: 2024,
                month: 12,
            },
            day(2025, 6, 1),
        );
        assert_eq!(range.end, day(2025, 1, 1));
    }

    #[test]
    fn between_is_inclusive_of_its_end_date() {
        let range = resolve(
            TimeExpr::Between {
                start: day(2024, 1, 1),
                end: day(2024, 3, 31),
            },
            day(2025, 6, 1),
        );
        assert!(range.contains(day(2024, 3, 31)));
        assert!(!range.contains(day(2024, 4, 1)));
    }

    #[test]
    fn backwards_range_is_rejected() {
        let err = resolve_time(
            &TimeExpr::Between {
                start: day(2024, 3, 1),
                end: day(2024, 1, 1),
            },
            &TradingCalendar::new(),
            day(2025, 6, 1),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnresolvableTime { .. }));
    }

    #[test]
    fn last_five_days_skips_weekend_and_holiday() {
        // As-of Tue 2024-01-09; Jan 1 is a holiday, Jan 6-7 a weekend.
        let range = resolve(TimeExpr::LastDays { days: 5 }, day(2024, 1, 9));
        assert_eq!(range.start, day(2024, 1, 3));
        assert_eq!(range.end, day(2024, 1, 10));
    }

    #[test]
    fn yesterday_from_monday_is_friday() {
        let range = resolve(TimeExpr::Yesterday, day(2024, 1, 8));
        assert_eq!(range.start, day(2024, 1, 5));
        assert_eq!(range.end, day(2024, 1, 6));
    }

    #[test]
    fn rth_window_and_eth_complement() {
        let spec = SessionSpec::default();
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert!(spec.in_rth(t(9, 30)));
        assert!(spec.in_rth(t(14, 0)));
        assert!(!spec.in_rth(t(17, 0)));

        let Some(ResolvedPredicate::TimeWindow { start, end, .. }) =
            resolve_session("eth", &spec)
        else {
            panic!("eth should resolve");
        };
        assert!(time_in_window(start, end, t(18, 0)));
        assert!(time_in_window(start, end, t(3, 0)));
        assert!(!time_in_window(start, end, t(10, 0)));
    }

    #[test]
    fn trading_day_rolls_at_the_evening_open() {
        let spec = SessionSpec::default();
        let evening = day(2024, 1, 7).and_hms_opt(18, 0, 0).unwrap();
        assert_eq!(spec.trading_date(evening), day(2024, 1, 8));
        let afternoon = day(2024, 1, 8).and_hms_opt(14, 0, 0).unwrap();
        assert_eq!(spec.trading_date(afternoon), day(2024, 1, 8));
        let just_before = day(2024, 1, 8).and_hms_opt(17, 59, 0).unwrap();
        assert_eq!(spec.trading_date(just_before), day(2024, 1, 8));
    }
}
