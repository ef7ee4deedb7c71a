//! Enrichment: raw bars to an analyzable table.
//!
//! `BarTable` owns the chronological sequence of `EnrichedBar`s plus named
//! boolean flag columns (calendar events here, candle patterns merged in by
//! the detector). Derived numeric fields use the column names the metric map
//! points at, so an operation only ever asks for a column by name.

use chrono::{Datelike, NaiveDate, Weekday};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::domain::bar::Bar;
use crate::domain::calendar::TradingCalendar;
use crate::domain::resolve::SessionSpec;
use crate::domain::timeframe::Timeframe;

#[derive(Debug, Clone)]
pub struct EnrichedBar {
    pub bar: Bar,
    /// Trading day the bar belongs to after the evening roll.
    pub trading_date: NaiveDate,
    pub weekday: &'static str,
    pub change_pct: f64,
    pub range_abs: f64,
    pub range_pct: f64,
    /// Versus the previous trading day's close. None on the first row and on
    /// intraday bars that do not open their trading day.
    pub gap_pct: Option<f64>,
    pub in_rth: bool,
}

impl EnrichedBar {
    /// Numeric value of an enriched column.
    pub fn metric(&self, column: &str) -> Option<f64> {
        match column {
            "change_pct" => Some(self.change_pct),
            "range_abs" => Some(self.range_abs),
            "range_pct" => Some(self.range_pct),
            "gap_pct" => self.gap_pct,
            "volume" => Some(self.bar.volume as f64),
            "open" => Some(self.bar.open),
            "high" => Some(self.bar.high),
            "low" => Some(self.bar.low),
            "close" => Some(self.bar.close),
            _ => None,
        }
    }

    /// JSON-primitive row for the output contract.
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("ts".into(), Value::String(self.bar.ts.format("%Y-%m-%dT%H:%M:%S").to_string()));
        row.insert("date".into(), Value::String(self.trading_date.to_string()));
        row.insert("weekday".into(), Value::String(self.weekday.to_string()));
        row.insert("open".into(), json_f64(self.bar.open));
        row.insert("high".into(), json_f64(self.bar.high));
        row.insert("low".into(), json_f64(self.bar.low));
        row.insert("close".into(), json_f64(self.bar.close));
        row.insert("volume".into(), Value::from(self.bar.volume));
        row.insert("change_pct".into(), json_f64(self.change_pct));
        row.insert("range_pct".into(), json_f64(self.range_pct));
        if let Some(gap) = self.gap_pct {
            row.insert("gap_pct".into(), json_f64(gap));
        }
        row
    }
}

fn json_f64(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

#[derive(Debug, Clone)]
pub struct BarTable {
    pub timeframe: Timeframe,
    pub rows: Vec<EnrichedBar>,
    flags: HashMap<String, Vec<bool>>,
}

impl BarTable {
    /// Enrich a raw fetch. Bars are re-sorted by timestamp so every
    /// downstream sequence algorithm sees trading order.
    pub fn enrich(
        mut bars: Vec<Bar>,
        timeframe: Timeframe,
        session: &SessionSpec,
        calendar: &TradingCalendar,
    ) -> BarTable {
        bars.sort_by_key(|b| b.ts);

        let mut rows = Vec::with_capacity(bars.len());
        let mut prev_day_close: Option<f64> = None;
        let mut current_day: Option<NaiveDate> = None;
        let mut last_close_in_day: Option<f64> = None;

        for bar in bars {
            let trading_date = session.trading_date(bar.ts);
            let day_opened = current_day != Some(trading_date);
            if day_opened {
                if current_day.is_some() {
                    prev_day_close = last_close_in_day;
                }
                current_day = Some(trading_date);
            }
            let gap_pct = if day_opened {
                prev_day_close.map(|pc| bar.gap_pct(pc))
            } else {
                None
            };
            last_close_in_day = Some(bar.close);

            rows.push(EnrichedBar {
                trading_date,
                weekday: weekday_name(trading_date.weekday()),
                change_pct: bar.change_pct(),
                range_abs: bar.range(),
                range_pct: bar.range_pct(),
                gap_pct,
                in_rth: session.in_rth(bar.ts.time()),
                bar,
            });
        }

        let mut table = BarTable {
            timeframe,
            rows,
            flags: HashMap::new(),
        };
        table.tag_calendar_events(calendar);
        table
    }

    fn tag_calendar_events(&mut self, calendar: &TradingCalendar) {
        let opex: Vec<bool> = self.rows.iter().map(|r| calendar.is_opex(r.trading_date)).collect();
        let month_start: Vec<bool> = self
            .rows
            .iter()
            .map(|r| calendar.is_month_start(r.trading_date))
            .collect();
        let month_end: Vec<bool> = self
            .rows
            .iter()
            .map(|r| calendar.is_month_end(r.trading_date))
            .collect();
        let quarter_end: Vec<bool> = self
            .rows
            .iter()
            .map(|r| calendar.is_quarter_end(r.trading_date))
            .collect();
        self.flags.insert("opex".to_string(), opex);
        self.flags.insert("month_start".to_string(), month_start);
        self.flags.insert("month_end".to_string(), month_end);
        self.flags.insert("quarter_end".to_string(), quarter_end);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn metric(&self, idx: usize, column: &str) -> Option<f64> {
        self.rows.get(idx).and_then(|r| r.metric(column))
    }

    pub fn flag(&self, name: &str) -> Option<&[bool]> {
        self.flags.get(name).map(|v| v.as_slice())
    }

    pub fn set_flag(&mut self, name: String, values: Vec<bool>) {
        self.flags.insert(name, values);
    }

    pub fn flag_names(&self) -> impl Iterator<Item = &str> {
        self.flags.keys().map(|s| s.as_str())
    }
}
