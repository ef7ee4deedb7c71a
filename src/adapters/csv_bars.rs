//! CSV-file bar store.
//!
//! One file per symbol and timeframe, named `{symbol}_{timeframe}.csv`
//! (`ES_1d.csv`, `ES_5m.csv`), columns `ts,open,high,low,close,volume`.
//! The `ts` column takes a full timestamp or, for daily files, a bare date
//! read as midnight.

use crate::domain::bar::Bar;
use crate::domain::error::EngineError;
use crate::domain::resolve::DateRange;
use crate::domain::timeframe::Timeframe;
use crate::ports::bar_store::BarStore;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

#[derive(Debug)]
pub struct CsvBarStore {
    base_path: PathBuf,
}

impl CsvBarStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path
            .join(format!("{}_{}.csv", symbol, timeframe.canonical()))
    }

    fn parse_ts(s: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }

    /// All bars in one file, in file order.
    fn read_file(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, EngineError> {
        let path = self.csv_path(symbol, timeframe);
        let content = fs::read_to_string(&path).map_err(|e| EngineError::Store {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| EngineError::Store {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;

            let ts_str = record.get(0).ok_or_else(|| EngineError::Store {
                reason: "missing ts column".into(),
            })?;
            let ts = Self::parse_ts(ts_str).ok_or_else(|| EngineError::Store {
                reason: format!("invalid ts value: {}", ts_str),
            })?;

            let number = |idx: usize, name: &str| -> Result<f64, EngineError> {
                record
                    .get(idx)
                    .ok_or_else(|| EngineError::Store {
                        reason: format!("missing {} column", name),
                    })?
                    .parse()
                    .map_err(|e| EngineError::Store {
                        reason: format!("invalid {} value: {}", name, e),
                    })
            };

            bars.push(Bar {
                symbol: symbol.to_string(),
                ts,
                open: number(1, "open")?,
                high: number(2, "high")?,
                low: number(3, "low")?,
                close: number(4, "close")?,
                volume: number(5, "volume")? as i64,
            });
        }

        Ok(bars)
    }
}

impl BarStore for CsvBarStore {
    fn fetch(
        &self,
        symbol: &str,
        period: &DateRange,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, EngineError> {
        let mut bars: Vec<Bar> = self
            .read_file(symbol, timeframe)?
            .into_iter()
            .filter(|b| period.contains(b.ts.date()))
            .collect();
        bars.sort_by_key(|b| b.ts);
        Ok(bars)
    }

    fn symbols(&self) -> Result<Vec<String>, EngineError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| EngineError::Store {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Store {
                reason: format!("directory entry error: {}", e),
            })?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            let Some(stem) = name_str.strip_suffix(".csv") else {
                continue;
            };
            // only {symbol}_{timeframe}.csv counts; anything else is not ours
            if let Some((symbol, suffix)) = stem.rsplit_once('_') {
                if Timeframe::parse(suffix).is_some() && !symbol.is_empty() {
                    symbols.insert(symbol.to_string());
                }
            }
        }

        Ok(symbols.into_iter().collect())
    }

    fn coverage(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, EngineError> {
        if !self.csv_path(symbol, timeframe).exists() {
            return Ok(None);
        }
        let bars = self.read_file(symbol, timeframe)?;
        let first = bars.iter().map(|b| b.ts.date()).min();
        let last = bars.iter().map(|b| b.ts.date()).max();
        match (first, last) {
            (Some(min), Some(max)) => Ok(Some((min, max, bars.len()))),
            _ => Ok(None),
        }
    }
}
