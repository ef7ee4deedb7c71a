#![allow(dead_code)]

use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

pub use barquery::domain::bar::Bar;
use barquery::domain::calendar::TradingCalendar;
use barquery::domain::catalog::Catalog;
use barquery::domain::error::EngineError;
use barquery::domain::executor::{CancelToken, ExecContext};
use barquery::domain::query::{Atom, FilterExpr, OperationKind, Params, Step, TimeExpr};
use barquery::domain::resolve::{DateRange, SessionSpec};
use barquery::domain::timeframe::Timeframe;
use barquery::ports::bar_store::BarStore;

#[derive(Debug)]
pub struct MockBarStore {
    pub data: HashMap<(String, Timeframe), Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockBarStore {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        self.data.insert((symbol.to_string(), timeframe), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl BarStore for MockBarStore {
    fn fetch(
        &self,
        symbol: &str,
        period: &DateRange,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, EngineError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(EngineError::Store {
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(&(symbol.to_string(), timeframe))
            .map(|bars| {
                bars.iter()
                    .filter(|b| period.contains(b.ts.date()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn symbols(&self) -> Result<Vec<String>, EngineError> {
        let mut symbols: Vec<String> = self.data.keys().map(|(s, _)| s.clone()).collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }

    fn coverage(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, EngineError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(EngineError::Store {
                reason: reason.clone(),
            });
        }
        match self.data.get(&(symbol.to_string(), timeframe)) {
            Some(bars) if !bars.is_empty() => {
                let min = bars.iter().map(|b| b.ts.date()).min().unwrap();
                let max = bars.iter().map(|b| b.ts.date()).max().unwrap();
                Ok(Some((min, max, bars.len())))
            }
            _ => Ok(None),
        }
    }
}

/// Owns everything an [`ExecContext`] borrows, so tests can build one in a
/// line and still control each piece.
pub struct TestEnv {
    pub store: MockBarStore,
    pub symbol: String,
    pub catalog: Catalog,
    pub session: SessionSpec,
    pub calendar: TradingCalendar,
    pub as_of: NaiveDate,
}

impl TestEnv {
    pub fn new(store: MockBarStore) -> Self {
        TestEnv {
            store,
            symbol: "ES".to_string(),
            catalog: Catalog::new(),
            session: SessionSpec::default(),
            calendar: TradingCalendar::new(),
            as_of: date(2025, 6, 2),
        }
    }

    pub fn ctx(&self) -> ExecContext<'_> {
        ExecContext {
            store: &self.store,
            symbol: &self.symbol,
            catalog: &self.catalog,
            session: &self.session,
            calendar: &self.calendar,
            as_of: self.as_of,
            cancel: CancelToken::new(),
        }
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Daily bar stamped at midnight. High/low pad the body by a point, so a
/// flat bar (close == open) reads as a doji and nothing else does.
pub fn daily_bar(symbol: &str, day: NaiveDate, open: f64, close: f64) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        ts: day.and_hms_opt(0, 0, 0).unwrap(),
        open,
        high: open.max(close) + 1.0,
        low: open.min(close) - 1.0,
        close,
        volume: 1_000,
    }
}

/// One bar per trading day starting at `start` (or the next trading day),
/// each opening at the previous close.
pub fn daily_series(symbol: &str, start: NaiveDate, first_open: f64, closes: &[f64]) -> Vec<Bar> {
    let calendar = TradingCalendar::new();
    let mut day = if calendar.is_trading_day(start) {
        start
    } else {
        calendar.next_trading_day(start)
    };
    let mut open = first_open;
    let mut bars = Vec::with_capacity(closes.len());
    for &close in closes {
        bars.push(daily_bar(symbol, day, open, close));
        open = close;
        day = calendar.next_trading_day(day);
    }
    bars
}

/// Every trading day of 2024, ascending. The built-in holiday table gives
/// exactly 252 of them.
pub fn trading_days_2024() -> Vec<NaiveDate> {
    let calendar = TradingCalendar::new();
    let mut days = Vec::new();
    let mut day = date(2024, 1, 2);
    while day.year() == 2024 {
        days.push(day);
        day = calendar.next_trading_day(day);
    }
    days
}

/// A full 2024 of daily bars with exactly 100 red days: the first two days
/// of each five-day stretch close lower until the quota is met.
pub fn year_2024_with_100_reds(symbol: &str) -> Vec<Bar> {
    let days = trading_days_2024();
    let mut bars = Vec::with_capacity(days.len());
    let mut open = 5_000.0;
    for (i, day) in days.iter().enumerate() {
        let red = i < 250 && i % 5 < 2;
        let close = if red { open - 2.0 } else { open + 1.5 };
        bars.push(daily_bar(symbol, *day, open, close));
        open = close;
    }
    bars
}

pub fn atom(when: TimeExpr, what: &str, filter: Option<FilterExpr>) -> Atom {
    Atom {
        when,
        what: what.to_string(),
        filter,
        group: None,
        timeframe: Timeframe::Day1,
    }
}

/// Single-atom step over calendar year 2024 at daily granularity.
pub fn year_step(id: &str, op: OperationKind, what: &str, filter: Option<FilterExpr>) -> Step {
    Step {
        id: id.to_string(),
        operation: op,
        atoms: vec![atom(TimeExpr::Year { year: 2024 }, what, filter)],
        params: Params::default(),
        depends_on: None,
    }
}
